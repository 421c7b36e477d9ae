//! Postback 适配层
//!
//! 每个合作伙伴一种参数协议，各自实现 PostbackAdapter，把原始参数
//! 解析为统一的 ConversionEvent。新增伙伴 = 新增一个实现，不改公共 handler。

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::models::{ConversionEvent, Partner};

pub mod generic;
pub mod keitaro;
pub mod onewin;

pub use generic::GenericAdapter;
pub use keitaro::KeitaroAdapter;
pub use onewin::OneWinAdapter;

/// 解析失败（预期内、高频、非致命 —— 一律被 handler 吸收为 200）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// 缺少状态字段，无法构造事件
    MissingStatus,
    /// 没有任何字段能解析出 user id（事件仍会以合成键落审计）
    MissingUserIdentifier,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingStatus => write!(f, "no status/event field in payload"),
            ParseError::MissingUserIdentifier => write!(f, "no resolvable user identifier"),
        }
    }
}

/// 合并后的请求参数（query string + body，body 覆盖 query）
///
/// 各家网络同一语义的值可能用不同键名发送，first() 按别名列表取第一个非空值。
#[derive(Debug, Clone, Default)]
pub struct ParamMap {
    inner: HashMap<String, String>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 query string 和请求体构造
    ///
    /// body 支持 urlencoded 与 JSON 两种格式（JSON 只取顶层标量字段）。
    pub fn from_parts(query: &str, body: &[u8], content_type: Option<&str>) -> Self {
        let mut inner: HashMap<String, String> = HashMap::new();

        for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
            inner.insert(k.into_owned(), v.into_owned());
        }

        if !body.is_empty() {
            let is_json = content_type.is_some_and(|ct| ct.contains("json"))
                || body.first() == Some(&b'{');

            if is_json {
                if let Ok(serde_json::Value::Object(map)) =
                    serde_json::from_slice::<serde_json::Value>(body)
                {
                    for (k, v) in map {
                        let text = match v {
                            serde_json::Value::String(s) => s,
                            serde_json::Value::Number(n) => n.to_string(),
                            serde_json::Value::Bool(b) => b.to_string(),
                            _ => continue,
                        };
                        inner.insert(k, text);
                    }
                }
            } else {
                for (k, v) in url::form_urlencoded::parse(body) {
                    inner.insert(k.into_owned(), v.into_owned());
                }
            }
        }

        Self { inner }
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.inner.insert(key.into(), value.into());
    }

    /// 按别名列表返回第一个存在且非空的值
    pub fn first(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.inner.get(*k))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    /// 原始参数快照（审计用）
    pub fn raw(&self) -> HashMap<String, String> {
        self.inner.clone()
    }

    /// 日志用快照：secret 值脱敏
    pub fn redacted(&self) -> HashMap<String, String> {
        let mut snapshot = self.inner.clone();
        if let Some(secret) = snapshot.get_mut("secret") {
            *secret = "[redacted]".to_string();
        }
        snapshot
    }
}

/// Postback 适配器：一家伙伴一种协议
pub trait PostbackAdapter: Send + Sync {
    fn partner(&self) -> Partner;

    /// 把原始参数解析为标准化转化事件
    fn parse(&self, params: &ParamMap) -> Result<ConversionEvent, ParseError>;
}

/// 宽容的金额解析：非数字 → None（策略层按 0 处理）
pub fn parse_amount(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
}

/// 派生去重键
///
/// 优先伙伴自己的 transaction id；缺失时退化为
/// `{partner}:{ident}:{status}:{分钟级时间戳}`，ident 取 user id 或 click id。
pub fn derive_dedupe_key(
    partner: Partner,
    transaction_id: Option<&str>,
    user_id: Option<&str>,
    click_id: Option<&str>,
    status: &str,
    received_at: DateTime<Utc>,
) -> String {
    if let Some(tx) = transaction_id {
        return format!("{}:tx:{}", partner, tx);
    }

    let ident = user_id.or(click_id).unwrap_or("anon");
    format!(
        "{}:{}:{}:{}",
        partner,
        ident,
        status,
        received_at.format("%Y%m%d%H%M")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_map_merges_query_and_body() {
        let params = ParamMap::from_parts(
            "status=deposit&amount=10",
            b"amount=20&currency=USD",
            Some("application/x-www-form-urlencoded"),
        );
        assert_eq!(params.first(&["status"]), Some("deposit"));
        // body 覆盖 query
        assert_eq!(params.first(&["amount"]), Some("20"));
        assert_eq!(params.first(&["currency"]), Some("USD"));
    }

    #[test]
    fn test_param_map_json_body() {
        let params = ParamMap::from_parts(
            "",
            br#"{"event":"deposit","amount":5.5,"sub1":"7"}"#,
            Some("application/json"),
        );
        assert_eq!(params.first(&["event"]), Some("deposit"));
        assert_eq!(params.first(&["amount"]), Some("5.5"));
        assert_eq!(params.first(&["sub1"]), Some("7"));
    }

    #[test]
    fn test_param_map_alias_order() {
        let params = ParamMap::from_parts("clickId=c1", b"", None);
        assert_eq!(params.first(&["click_id", "clickId"]), Some("c1"));
        assert_eq!(params.first(&["missing", "also_missing"]), None);
    }

    #[test]
    fn test_param_map_skips_empty_values() {
        let params = ParamMap::from_parts("user_id=&sub1=7", b"", None);
        assert_eq!(params.first(&["user_id", "sub1"]), Some("7"));
    }

    #[test]
    fn test_redacted_masks_secret_value() {
        let params = ParamMap::from_parts("status=deposit&secret=pb-secret", b"", None);
        let snapshot = params.redacted();
        assert_eq!(snapshot.get("secret").map(String::as_str), Some("[redacted]"));
        assert_eq!(snapshot.get("status").map(String::as_str), Some("deposit"));
        // raw 保留原值供审计
        assert_eq!(params.raw().get("secret").map(String::as_str), Some("pb-secret"));
    }

    #[test]
    fn test_parse_amount_tolerant() {
        assert_eq!(parse_amount(Some("100")), Some(100.0));
        assert_eq!(parse_amount(Some(" 5.5 ")), Some(5.5));
        assert_eq!(parse_amount(Some("abc")), None);
        assert_eq!(parse_amount(None), None);
    }

    #[test]
    fn test_dedupe_key_prefers_transaction_id() {
        let now = Utc::now();
        let key = derive_dedupe_key(
            Partner::OneWin,
            Some("t1"),
            Some("7"),
            None,
            "deposit",
            now,
        );
        assert_eq!(key, "1win:tx:t1");
    }

    #[test]
    fn test_dedupe_key_synthetic_fallback() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-08-29T12:10:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let key = derive_dedupe_key(Partner::Keitaro, None, None, Some("k1"), "lead", now);
        assert_eq!(key, "keitaro:k1:lead:202608291210");

        // 同一分钟内重复到达 → 相同合成键
        let again = now + chrono::Duration::seconds(20);
        assert_eq!(
            key,
            derive_dedupe_key(Partner::Keitaro, None, None, Some("k1"), "lead", again)
        );
    }
}
