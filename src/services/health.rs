use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::{web, HttpResponse, Responder};
use serde_json::json;
use tracing::{error, trace};

use crate::services::sync::EntitlementSync;
use crate::storages::AttributionStore;

// 应用启动时间结构体
#[derive(Clone, Debug)]
pub struct AppStartTime {
    pub start_datetime: chrono::DateTime<chrono::Utc>,
}

pub struct HealthService;

impl HealthService {
    /// GET /health
    pub async fn health_check(
        store: web::Data<Arc<dyn AttributionStore>>,
        sync: web::Data<Arc<EntitlementSync>>,
        app_start_time: web::Data<AppStartTime>,
    ) -> impl Responder {
        let start_time = Instant::now();
        trace!("Received health check request");

        // 存储健康检查（带超时）
        let storage_status = match tokio::time::timeout(
            Duration::from_secs(5),
            store.list_conversions(),
        )
        .await
        {
            Ok(records) => json!({
                "status": "healthy",
                "conversions": records.len(),
                "backend": store.backend_name().await,
            }),
            Err(_) => {
                error!("Storage health check timeout");
                json!({
                    "status": "unhealthy",
                    "error": "timeout",
                })
            }
        };

        let now = chrono::Utc::now();
        let uptime_seconds = (now - app_start_time.start_datetime).num_seconds().max(0) as u64;
        let is_healthy = storage_status["status"] == "healthy";

        let response_status = if is_healthy {
            actix_web::http::StatusCode::OK
        } else {
            actix_web::http::StatusCode::SERVICE_UNAVAILABLE
        };

        HttpResponse::build(response_status).json(json!({
            "status": if is_healthy { "healthy" } else { "unhealthy" },
            "timestamp": now.to_rfc3339(),
            "uptime": uptime_seconds,
            "checks": {
                "storage": storage_status,
                "sync_pending": sync.pending_count(),
            },
            "response_time_ms": start_time.elapsed().as_millis(),
        }))
    }
}
