//! 进程内存储（默认后端）
//!
//! DashMap 分片锁：entry / get_mut 在持有分片写锁的情况下完成
//! “检查 → 写入”，同一 key 的并发调用天然互斥，不同 key 全并行。
//!
//! 已知限制：重启后数据丢失，生产环境需换成持久化后端。

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use async_trait::async_trait;
use tracing::debug;

use super::{AttributionStore, ClickMutator};
use crate::errors::{AffilinkError, Result};
use crate::models::{
    ClickRecord, ConversionRecord, EntitlementGrant, VerificationRequest, VerificationStatus,
};

#[derive(Default)]
pub struct MemoryStore {
    clicks: DashMap<String, ClickRecord>,
    conversions: DashMap<String, ConversionRecord>,
    grants: DashMap<String, EntitlementGrant>,
    verifications: DashMap<String, VerificationRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttributionStore for MemoryStore {
    async fn put_click(&self, record: ClickRecord) -> Result<()> {
        self.clicks.insert(record.click_id.clone(), record);
        Ok(())
    }

    async fn get_click(&self, click_id: &str) -> Option<ClickRecord> {
        self.clicks.get(click_id).map(|r| r.clone())
    }

    async fn update_click(&self, click_id: &str, mutator: ClickMutator) -> bool {
        match self.clicks.get_mut(click_id) {
            Some(mut record) => {
                mutator(&mut record);
                true
            }
            None => false,
        }
    }

    async fn record_conversion(&self, record: ConversionRecord) -> bool {
        // entry 持有分片写锁，检查与写入是同一临界区
        match self.conversions.entry(record.event.dedupe_key.clone()) {
            Entry::Occupied(_) => {
                debug!(
                    "Duplicate conversion ignored: dedupe_key={}",
                    record.event.dedupe_key
                );
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    async fn list_conversions(&self) -> Vec<ConversionRecord> {
        self.conversions.iter().map(|r| r.clone()).collect()
    }

    async fn put_grant(&self, grant: EntitlementGrant) -> Result<()> {
        self.grants.insert(grant.user_id.clone(), grant);
        Ok(())
    }

    async fn get_grant(&self, user_id: &str) -> Option<EntitlementGrant> {
        self.grants.get(user_id).map(|g| g.clone())
    }

    async fn mark_grant_applied(&self, user_id: &str, granted_at: DateTime<Utc>) -> bool {
        match self.grants.get_mut(user_id) {
            Some(mut grant) if grant.granted_at == granted_at => {
                grant.applied_upstream = true;
                true
            }
            _ => false,
        }
    }

    async fn list_grants(&self) -> Vec<EntitlementGrant> {
        self.grants.iter().map(|g| g.clone()).collect()
    }

    async fn put_verification(&self, request: VerificationRequest) -> Result<()> {
        self.verifications.insert(request.id.clone(), request);
        Ok(())
    }

    async fn get_verification(&self, id: &str) -> Option<VerificationRequest> {
        self.verifications.get(id).map(|v| v.clone())
    }

    async fn transition_verification(
        &self,
        id: &str,
        status: VerificationStatus,
        reason: Option<String>,
    ) -> Result<VerificationRequest> {
        let mut request = self
            .verifications
            .get_mut(id)
            .ok_or_else(|| AffilinkError::not_found(format!("verification '{}' not found", id)))?;

        if request.status.is_terminal() {
            return Err(AffilinkError::not_found(format!(
                "verification '{}' already {:?}",
                id, request.status
            )));
        }

        request.status = status;
        request.reason = reason;
        request.updated_at = Utc::now();
        Ok(request.clone())
    }

    async fn list_verifications(&self) -> Vec<VerificationRequest> {
        self.verifications.iter().map(|v| v.clone()).collect()
    }

    async fn backend_name(&self) -> String {
        "memory".to_string()
    }
}
