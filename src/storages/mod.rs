//! 归因存储
//!
//! 点击记录 / 转化事件 / 权益授予 / 人工审核的带键存储。
//! record_conversion 对同一 dedupe_key 必须是原子的 read-check-write，
//! 这是整个子系统的核心正确性约束（重复 postback 不得产生两次授予）。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::errors::Result;
use crate::models::{
    ClickRecord, ConversionRecord, EntitlementGrant, VerificationRequest, VerificationStatus,
};

pub mod file;
pub mod memory;

/// 对点击记录的原地修改（在存储的 per-key 临界区内执行）
pub type ClickMutator = Box<dyn FnOnce(&mut ClickRecord) + Send>;

#[async_trait]
pub trait AttributionStore: Send + Sync {
    async fn put_click(&self, record: ClickRecord) -> Result<()>;
    async fn get_click(&self, click_id: &str) -> Option<ClickRecord>;

    /// 原子更新一条点击记录，记录不存在时返回 false
    async fn update_click(&self, click_id: &str, mutator: ClickMutator) -> bool;

    /// 落库一条转化审计行；dedupe_key 已存在时不写入并返回 false。
    /// 检查与写入必须是同一临界区。
    async fn record_conversion(&self, record: ConversionRecord) -> bool;
    async fn list_conversions(&self) -> Vec<ConversionRecord>;

    /// 按 user_id 覆盖写授予（延长/替换过期时间，从不叠加）
    async fn put_grant(&self, grant: EntitlementGrant) -> Result<()>;
    async fn get_grant(&self, user_id: &str) -> Option<EntitlementGrant>;

    /// 上游同步成功后的标记；granted_at 不匹配（已被更新的授予覆盖）时返回 false
    async fn mark_grant_applied(&self, user_id: &str, granted_at: DateTime<Utc>) -> bool;
    async fn list_grants(&self) -> Vec<EntitlementGrant>;

    async fn put_verification(&self, request: VerificationRequest) -> Result<()>;
    async fn get_verification(&self, id: &str) -> Option<VerificationRequest>;

    /// Pending → 终态的唯一迁移入口；未知 id 或已是终态 → NotFound
    async fn transition_verification(
        &self,
        id: &str,
        status: VerificationStatus,
        reason: Option<String>,
    ) -> Result<VerificationRequest>;
    async fn list_verifications(&self) -> Vec<VerificationRequest>;

    async fn backend_name(&self) -> String;
}

pub struct StorageFactory;

impl StorageFactory {
    /// 根据配置选择后端
    ///
    /// memory 后端重启即失忆，仅适合开发/单实例兜底；
    /// 生产部署应使用 file 后端或接入外部 KV（见 DESIGN.md）。
    pub async fn create(config: &AppConfig) -> Result<Arc<dyn AttributionStore>> {
        let boxed: Box<dyn AttributionStore> = match config.storage_backend.as_str() {
            "file" => Box::new(file::FileStore::new(&config.attribution_file)?),
            _ => Box::new(memory::MemoryStore::new()),
        };

        Ok(Arc::from(boxed))
    }
}
