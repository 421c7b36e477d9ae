//! 通用 postback 协议
//!
//! 面向未接入专用协议的伙伴网络，字段别名最宽容。

use chrono::Utc;

use super::{derive_dedupe_key, parse_amount, ParamMap, ParseError, PostbackAdapter};
use crate::models::{ConversionEvent, Partner};

pub struct GenericAdapter;

impl PostbackAdapter for GenericAdapter {
    fn partner(&self) -> Partner {
        Partner::Generic
    }

    fn parse(&self, params: &ParamMap) -> Result<ConversionEvent, ParseError> {
        let status = params
            .first(&["status", "event"])
            .ok_or(ParseError::MissingStatus)?
            .to_lowercase();

        let click_id = params.first(&["click_id", "clickId"]).map(String::from);
        let user_id = params
            .first(&["user_id", "userId", "sub1"])
            .map(String::from);
        let transaction_id = params.first(&["transaction_id", "txid", "tid"]);
        let amount = parse_amount(params.first(&["amount", "payout", "sum"]));
        let currency = params
            .first(&["currency", "cur"])
            .unwrap_or("USD")
            .to_uppercase();

        let received_at = Utc::now();
        let dedupe_key = derive_dedupe_key(
            Partner::Generic,
            transaction_id,
            user_id.as_deref(),
            click_id.as_deref(),
            &status,
            received_at,
        );

        Ok(ConversionEvent {
            partner: Partner::Generic,
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
