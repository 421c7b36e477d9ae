//! 1win postback 协议
//!
//! `event` 为状态，`sub1` 携带我方 user id，`transaction_id` 为伙伴侧交易号。

use chrono::Utc;

use super::{derive_dedupe_key, parse_amount, ParamMap, ParseError, PostbackAdapter};
use crate::models::{ConversionEvent, Partner};

pub struct OneWinAdapter;

impl PostbackAdapter for OneWinAdapter {
    fn partner(&self) -> Partner {
        Partner::OneWin
    }

    fn parse(&self, params: &ParamMap) -> Result<ConversionEvent, ParseError> {
        let status = params
            .first(&["event", "status"])
            .ok_or(ParseError::MissingStatus)?
            .to_lowercase();

        let user_id = params.first(&["sub1", "user_id"]).map(String::from);
        let transaction_id = params.first(&["transaction_id", "txid"]);
        let amount = parse_amount(params.first(&["amount", "payout"]));
        let currency = params.first(&["currency"]).unwrap_or("USD").to_uppercase();

        let received_at = Utc::now();
        let dedupe_key = derive_dedupe_key(
            Partner::OneWin,
            transaction_id,
            user_id.as_deref(),
            None,
            &status,
            received_at,
        );

        Ok(ConversionEvent {
            partner: Partner::OneWin,
            dedupe_key,
            click_id: params.first(&["click_id"]).map(String::from),
            user_id,
            status_label: status,
            amount,
            currency,
            received_at,
            raw_params: params.raw(),
        })
    }
}
