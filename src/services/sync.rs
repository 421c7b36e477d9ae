//! 权益同步
//!
//! 授予先落本地存储（applied_upstream=false），再尽力同步到上游
//! system of record。webhook 的响应从不等待上游调用；失败进入重试队列，
//! 由后台任务按指数退避重试。

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use ureq::Agent;

use crate::config::AppConfig;
use crate::errors::{AffilinkError, Result};
use crate::models::EntitlementGrant;
use crate::storages::AttributionStore;

const HTTP_TIMEOUT_SECS: u64 = 3;
/// 重试退避上限
const MAX_BACKOFF_SECS: u64 = 3600;

static HTTP_AGENT: OnceLock<Agent> = OnceLock::new();

fn get_agent() -> &'static Agent {
    HTTP_AGENT.get_or_init(|| {
        Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(HTTP_TIMEOUT_SECS)))
            .http_status_as_error(false)
            .build()
            .into()
    })
}

/// 待重试的同步工作项
#[derive(Debug, Clone)]
struct PendingSync {
    grant: EntitlementGrant,
    attempts: u32,
    next_attempt: DateTime<Utc>,
}

pub struct EntitlementSync {
    config: AppConfig,
    store: Arc<dyn AttributionStore>,
    /// user_id → 待重试授予（同一用户只保留最新一条）
    pending: DashMap<String, PendingSync>,
}

impl EntitlementSync {
    pub fn new(config: AppConfig, store: Arc<dyn AttributionStore>) -> Arc<Self> {
        if config.sync_api_url.is_empty() {
            info!("EntitlementSync: SYNC_API_URL not set, grants stay local-only");
        }

        Arc::new(Self {
            config,
            store,
            pending: DashMap::new(),
        })
    }

    /// 授予权益并触发后台同步
    ///
    /// 本地写入是同步的（调用方能立即读到授予），上游调用是 fire-and-forget。
    /// 同一用户的新授予覆盖过期时间，从不叠加。
    pub async fn grant_and_sync(self: &Arc<Self>, user_id: &str, source: &str) -> EntitlementGrant {
        let now = Utc::now();
        let grant = EntitlementGrant {
            user_id: user_id.to_string(),
            granted_at: now,
            expires_at: now + self.config.entitlement_window(),
            source: source.to_string(),
            applied_upstream: false,
        };

        if let Err(e) = self.store.put_grant(grant.clone()).await {
            error!("Failed to persist grant for user {}: {}", user_id, e);
        }
        info!(
            "Entitlement granted: user={} source={} expires_at={}",
            user_id, source, grant.expires_at
        );

        let sync = Arc::clone(self);
        let outbound = grant.clone();
        actix_web::rt::spawn(async move {
            sync.apply(outbound).await;
        });

        grant
    }

    /// 单次上游同步尝试；失败则入队重试
    async fn apply(&self, grant: EntitlementGrant) {
        if self.config.sync_api_url.is_empty() {
            debug!("Entitlement sync disabled, keeping grant local for user {}", grant.user_id);
            return;
        }

        match self.push_upstream(&grant).await {
            Ok(()) => {
                self.store
                    .mark_grant_applied(&grant.user_id, grant.granted_at)
                    .await;
                debug!("Upstream sync succeeded for user {}", grant.user_id);
            }
            Err(e) => {
                warn!(
                    "Upstream sync failed for user {} (will retry): {}",
                    grant.user_id, e
                );
                self.pending.insert(
                    grant.user_id.clone(),
                    PendingSync {
                        grant,
                        attempts: 1,
                        next_attempt: Utc::now()
                            + chrono::Duration::seconds(self.config.sync_retry_secs as i64),
                    },
                );
            }
        }
    }

    /// 实际的上游 HTTP 调用（阻塞 IO 走 spawn_blocking，带超时）
    async fn push_upstream(&self, grant: &EntitlementGrant) -> Result<()> {
        let url = self.config.sync_api_url.clone();
        let token = self.config.sync_api_token.clone();
        let payload = json!({
            "userId": grant.user_id,
            "premium": true,
            "expiresAt": grant.expires_at.to_rfc3339(),
            "source": grant.source,
        })
        .to_string();

        tokio::task::spawn_blocking(move || {
            let mut request = get_agent()
                .post(&url)
                .header("Content-Type", "application/json");
            if !token.is_empty() {
                request = request.header("Authorization", &format!("Bearer {}", token));
            }

            match request.send(payload.as_bytes()) {
                Ok(resp) if resp.status().is_success() => Ok(()),
                Ok(resp) => Err(AffilinkError::sync_failure(format!(
                    "upstream returned {}",
                    resp.status()
                ))),
                Err(e) => Err(AffilinkError::sync_failure(e.to_string())),
            }
        })
        .await
        .unwrap_or_else(|e| Err(AffilinkError::sync_failure(e.to_string())))
    }

    /// 后台重试循环（在 main 里 spawn，测试不启动）
    pub async fn start_background_task(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.sync_retry_secs.max(1));
        loop {
            sleep(interval).await;
            self.retry_pending().await;
        }
    }

    async fn retry_pending(&self) {
        if self.pending.is_empty() {
            return;
        }

        let now = Utc::now();
        let due: Vec<PendingSync> = self
            .pending
            .iter()
            .filter(|entry| entry.next_attempt <= now)
            .map(|entry| entry.clone())
            .collect();

        if due.is_empty() {
            return;
        }
        debug!("EntitlementSync: retrying {} pending grants", due.len());

        for item in due {
            match self.push_upstream(&item.grant).await {
                Ok(()) => {
                    self.pending.remove(&item.grant.user_id);
                    self.store
                        .mark_grant_applied(&item.grant.user_id, item.grant.granted_at)
                        .await;
                    info!(
                        "Upstream sync recovered for user {} after {} attempts",
                        item.grant.user_id,
                        item.attempts + 1
                    );
                }
                Err(e) => {
                    let attempts = item.attempts + 1;
                    let backoff = (self.config.sync_retry_secs << attempts.min(10))
                        .min(MAX_BACKOFF_SECS);
                    warn!(
                        "Retry {} failed for user {}: {} (next in {}s)",
                        attempts, item.grant.user_id, e, backoff
                    );
                    if let Some(mut entry) = self.pending.get_mut(&item.grant.user_id) {
                        entry.attempts = attempts;
                        entry.next_attempt = now + chrono::Duration::seconds(backoff as i64);
                    }
                }
            }
        }
    }

    /// 待重试数量（health 检查用）
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

pub struct PremiumService;

impl PremiumService {
    /// GET /api/premium/check/{userId} — 当前权益状态
    pub async fn check(
        path: web::Path<String>,
        store: web::Data<Arc<dyn AttributionStore>>,
    ) -> impl Responder {
        let user_id = path.into_inner();
        let now = Utc::now();

        match store.get_grant(&user_id).await {
            Some(grant) if grant.is_active(now) => HttpResponse::Ok().json(json!({
                "premium": true,
                "expiresAt": grant.expires_at.to_rfc3339(),
                "source": grant.source,
                "appliedUpstream": grant.applied_upstream,
            })),
            _ => HttpResponse::Ok().json(json!({ "premium": false })),
        }
    }
}
