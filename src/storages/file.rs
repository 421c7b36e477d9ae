//! JSON 文件存储
//!
//! 整库快照落在单个 JSON 文件里，读写都经过同一把 RwLock，
//! 写锁内完成“检查 → 修改 → 落盘”，原子性比 memory 后端更粗但同样满足约束。
//! 适合单实例小规模部署；大规模场景应接外部数据库。

use std::collections::HashMap;
use std::fs;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{AttributionStore, ClickMutator};
use crate::errors::{AffilinkError, Result};
use crate::models::{
    ClickRecord, ConversionRecord, EntitlementGrant, VerificationRequest, VerificationStatus,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    clicks: HashMap<String, ClickRecord>,
    #[serde(default)]
    conversions: HashMap<String, ConversionRecord>,
    #[serde(default)]
    grants: HashMap<String, EntitlementGrant>,
    #[serde(default)]
    verifications: HashMap<String, VerificationRequest>,
}

pub struct FileStore {
    file_path: String,
    data: RwLock<StoreData>,
}

impl FileStore {
    pub fn new(file_path: &str) -> Result<Self> {
        let data = Self::load_from_file(file_path)?;
        info!(
            "FileStore initialized from {}: {} clicks, {} conversions, {} grants",
            file_path,
            data.clicks.len(),
            data.conversions.len(),
            data.grants.len()
        );

        Ok(Self {
            file_path: file_path.to_string(),
            data: RwLock::new(data),
        })
    }

    fn load_from_file(path: &str) -> Result<StoreData> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                error!("Failed to parse attribution file {}: {}", path, e);
                AffilinkError::serialization(format!("parse {}: {}", path, e))
            }),
            Err(_) => {
                // 文件不存在，创建空库
                info!("Attribution file {} not found, creating empty store", path);
                let empty = StoreData::default();
                fs::write(path, serde_json::to_string_pretty(&empty)?)?;
                Ok(empty)
            }
        }
    }

    /// 持有写锁时调用
    fn save_locked(&self, data: &StoreData) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        fs::write(&self.file_path, json)?;
        Ok(())
    }
}

#[async_trait]
impl AttributionStore for FileStore {
    async fn put_click(&self, record: ClickRecord) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.clicks.insert(record.click_id.clone(), record);
        self.save_locked(&data)
    }

    async fn get_click(&self, click_id: &str) -> Option<ClickRecord> {
        self.data.read().unwrap().clicks.get(click_id).cloned()
    }

    async fn update_click(&self, click_id: &str, mutator: ClickMutator) -> bool {
        let mut data = self.data.write().unwrap();
        let Some(record) = data.clicks.get_mut(click_id) else {
            return false;
        };
        mutator(record);

        if let Err(e) = self.save_locked(&data) {
            error!("FileStore: failed to persist click update: {}", e);
        }
        true
    }

    async fn record_conversion(&self, record: ConversionRecord) -> bool {
        let mut data = self.data.write().unwrap();
        if data.conversions.contains_key(&record.event.dedupe_key) {
            return false;
        }
        data.conversions
            .insert(record.event.dedupe_key.clone(), record);

        if let Err(e) = self.save_locked(&data) {
            error!("FileStore: failed to persist conversion: {}", e);
        }
        true
    }

    async fn list_conversions(&self) -> Vec<ConversionRecord> {
        self.data
            .read()
            .unwrap()
            .conversions
            .values()
            .cloned()
            .collect()
    }

    async fn put_grant(&self, grant: EntitlementGrant) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.grants.insert(grant.user_id.clone(), grant);
        self.save_locked(&data)
    }

    async fn get_grant(&self, user_id: &str) -> Option<EntitlementGrant> {
        self.data.read().unwrap().grants.get(user_id).cloned()
    }

    async fn mark_grant_applied(&self, user_id: &str, granted_at: DateTime<Utc>) -> bool {
        let mut data = self.data.write().unwrap();
        let updated = match data.grants.get_mut(user_id) {
            Some(grant) if grant.granted_at == granted_at => {
                grant.applied_upstream = true;
                true
            }
            _ => false,
        };

        if updated {
            if let Err(e) = self.save_locked(&data) {
                error!("FileStore: failed to persist grant flag: {}", e);
            }
        }
        updated
    }

    async fn list_grants(&self) -> Vec<EntitlementGrant> {
        self.data.read().unwrap().grants.values().cloned().collect()
    }

    async fn put_verification(&self, request: VerificationRequest) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.verifications.insert(request.id.clone(), request);
        self.save_locked(&data)
    }

    async fn get_verification(&self, id: &str) -> Option<VerificationRequest> {
        self.data.read().unwrap().verifications.get(id).cloned()
    }

    async fn transition_verification(
        &self,
        id: &str,
        status: VerificationStatus,
        reason: Option<String>,
    ) -> Result<VerificationRequest> {
        let mut data = self.data.write().unwrap();
        let request = data
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
        let snapshot = request.clone();

        self.save_locked(&data)?;
        Ok(snapshot)
    }

    async fn list_verifications(&self) -> Vec<VerificationRequest> {
        self.data
            .read()
            .unwrap()
            .verifications
            .values()
            .cloned()
            .collect()
    }

    async fn backend_name(&self) -> String {
        format!("file ({})", self.file_path)
    }
}
