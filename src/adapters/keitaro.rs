//! Keitaro tracker postback 协议
//!
//! `subid` 对应我方 click id，`sub2` 携带 user id，金额在 `payout`。

use chrono::Utc;

use super::{derive_dedupe_key, parse_amount, ParamMap, ParseError, PostbackAdapter};
use crate::models::{ConversionEvent, Partner};

pub struct KeitaroAdapter;

impl PostbackAdapter for KeitaroAdapter {
    fn partner(&self) -> Partner {
        Partner::Keitaro
    }

    fn parse(&self, params: &ParamMap) -> Result<ConversionEvent, ParseError> {
        let status = params
            .first(&["status", "event"])
            .ok_or(ParseError::MissingStatus)?
            .to_lowercase();

        let click_id = params.first(&["subid", "sub_id", "click_id"]).map(String::from);
        let user_id = params.first(&["sub2", "user_id"]).map(String::from);
        let transaction_id = params.first(&["transaction_id", "txid"]);
        let amount = parse_amount(params.first(&["payout", "amount"]));
        let currency = params.first(&["currency"]).unwrap_or("USD").to_uppercase();

        let received_at = Utc::now();
        let dedupe_key = derive_dedupe_key(
            Partner::Keitaro,
            transaction_id,
            user_id.as_deref(),
            click_id.as_deref(),
            &status,
            received_at,
        );

        Ok(ConversionEvent {
            partner: Partner::Keitaro,
            dedupe_key,
            click_id,
            user_id,
            status_label: status,
            amount,
            currency,
            received_at,
            raw_params: params.raw(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_sub2_user() {
        let mut params = ParamMap::new();
        params.insert("subid", "k1");
        params.insert("status", "sale");
        params.insert("payout", "30");
        params.insert("sub2", "42");
        params.insert("sub5", "campaign-x");

        let event = KeitaroAdapter.parse(&params).unwrap();
        assert_eq!(event.partner, Partner::Keitaro);
        assert_eq!(event.click_id.as_deref(), Some("k1"));
        assert_eq!(event.user_id.as_deref(), Some("42"));
        assert_eq!(event.amount, Some(30.0));
    }

    #[test]
    fn test_parse_without_sub2_keeps_click_id() {
        // user 缺失时事件仍可构造，合成键落在 subid 上
        let mut params = ParamMap::new();
        params.insert("subid", "k1");
        params.insert("status", "lead");
        params.insert("payout", "20");

        let event = KeitaroAdapter.parse(&params).unwrap();
        assert_eq!(event.user_id, None);
        assert!(event.dedupe_key.starts_with("keitaro:k1:lead:"));
    }

    #[test]
    fn test_parse_missing_status() {
        let mut params = ParamMap::new();
        params.insert("subid", "k1");
        assert_eq!(
            KeitaroAdapter.parse(&params).unwrap_err(),
            ParseError::MissingStatus
        );
    }
}
