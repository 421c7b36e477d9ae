//! 核心数据模型
//!
//! 点击记录、转化事件、权益授予、人工审核请求。
//! 所有时间戳统一使用 UTC，序列化为 RFC3339。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 合作伙伴（每个伙伴一种 postback 协议）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partner {
    Generic,
    OneWin,
    Keitaro,
}

impl Partner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partner::Generic => "generic",
            Partner::OneWin => "1win",
            Partner::Keitaro => "keitaro",
        }
    }
}

impl std::fmt::Display for Partner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 单笔入金（追加写入，不修改）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    pub amount: f64,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
    pub partner_user_id: Option<String>,
}

/// 点击时的地理位置快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoClassification {
    pub country: String,
    pub region: String,
    pub city: String,
    pub is_blocked: bool,
}

/// 点击记录
///
/// 点击时创建，后续 postback 到达时原地更新；永不删除（审计链）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickRecord {
    pub click_id: String,
    pub user_id: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    /// 初始 "clicked"，之后被最新 postback 状态覆盖
    pub status: String,
    #[serde(default)]
    pub deposits: Vec<Deposit>,
    pub geo: Option<GeoClassification>,
    #[serde(default)]
    pub entitlement_granted: bool,
    pub entitlement_granted_at: Option<DateTime<Utc>>,
}

impl ClickRecord {
    pub fn new(click_id: String, user_id: String, source: Option<String>) -> Self {
        Self {
            click_id,
            user_id,
            source: source.unwrap_or_else(|| "direct".to_string()),
            created_at: Utc::now(),
            status: "clicked".to_string(),
            deposits: Vec::new(),
            geo: None,
            entitlement_granted: false,
            entitlement_granted_at: None,
        }
    }
}

/// 标准化转化事件（各家 adapter 的统一输出）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionEvent {
    pub partner: Partner,
    /// 去重键：优先伙伴自己的 transaction id，缺失时用合成键
    pub dedupe_key: String,
    pub click_id: Option<String>,
    pub user_id: Option<String>,
    pub status_label: String,
    pub amount: Option<f64>,
    pub currency: String,
    pub received_at: DateTime<Utc>,
    /// 原始参数，仅用于审计
    pub raw_params: HashMap<String, String>,
}

/// 已落库的转化事件 + 处理结论（审计行）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub event: ConversionEvent,
    pub premium_activated: bool,
    pub reason: String,
}

/// 权益授予
///
/// 每个用户最多一个活跃授予；新的合格事件刷新过期时间而不是叠加。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementGrant {
    pub user_id: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// 来源：伙伴名或 "manual_verification"
    pub source: String,
    /// 上游 system of record 是否已同步成功
    #[serde(default)]
    pub applied_upstream: bool,
}

impl EntitlementGrant {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// 人工审核状态机: Pending -> Approved | Rejected（终态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerificationStatus::Pending)
    }
}

/// 人工审核请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub id: String,
    pub user_id: String,
    pub partner_account_id: String,
    pub partner_name: String,
    pub email: Option<String>,
    pub status: VerificationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reason: Option<String>,
}

impl VerificationRequest {
    pub fn new(
        user_id: String,
        partner_account_id: String,
        partner_name: String,
        email: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            partner_account_id,
            partner_name,
            email,
            status: VerificationStatus::Pending,
            created_at: now,
            updated_at: now,
            reason: None,
        }
    }
}
