//! 人工审核流程
//!
//! 自动归因失败时的兜底路径：用户提交伙伴账号，运营在 admin 端
//! 批准/驳回。批准走与自动 postback 相同的授予/同步路径。

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::models::VerificationStatus;
use crate::models::VerificationRequest;
use crate::services::admin::ApiResponse;
use crate::services::sync::EntitlementSync;
use crate::storages::AttributionStore;

/// 批准授予的来源标记
const MANUAL_SOURCE: &str = "manual_verification";

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitVerification {
    #[serde(rename = "userId", alias = "user_id")]
    pub user_id: Option<String>,
    #[serde(rename = "bookmakerId", alias = "bookmaker_id")]
    pub bookmaker_id: Option<String>,
    pub bookmaker: Option<String>,
    pub email: Option<String>,
}

pub struct VerificationService;

impl VerificationService {
    /// POST /api/verification/request — 用户提交人工审核申请
    pub async fn submit(
        payload: web::Json<SubmitVerification>,
        store: web::Data<Arc<dyn AttributionStore>>,
    ) -> impl Responder {
        let payload = payload.into_inner();
        let Some(user_id) = payload.user_id.filter(|s| !s.trim().is_empty()) else {
            return HttpResponse::BadRequest().json(json!({
                "code": 400,
                "data": { "error": "userId is required" }
            }));
        };

        let request = VerificationRequest::new(
            user_id,
            payload.bookmaker_id.unwrap_or_default(),
            payload.bookmaker.unwrap_or_else(|| "unknown".to_string()),
            payload.email,
        );
        let id = request.id.clone();

        if let Err(e) = store.put_verification(request.clone()).await {
            warn!("Failed to store verification request: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "code": 500,
                "data": { "error": "storage failure" }
            }));
        }

        info!(
            "Verification request submitted: id={} user={} partner={}",
            id, request.user_id, request.partner_name
        );

        HttpResponse::Ok().json(json!({
            "id": id,
            "status": "pending",
        }))
    }

    /// GET /api/admin/verifications — 审核队列
    pub async fn list(
        query: web::Query<HashMap<String, String>>,
        store: web::Data<Arc<dyn AttributionStore>>,
    ) -> impl Responder {
        let mut requests = store.list_verifications().await;

        // ?status=pending 等过滤
        if let Some(filter) = query.get("status") {
            let filter = filter.to_lowercase();
            requests.retain(|r| {
                matches!(
                    (r.status, filter.as_str()),
                    (VerificationStatus::Pending, "pending")
                        | (VerificationStatus::Approved, "approved")
                        | (VerificationStatus::Rejected, "rejected")
                )
            });
        }
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        HttpResponse::Ok().json(ApiResponse { code: 0, data: requests })
    }

    /// POST /api/admin/verifications/{id}/approve
    ///
    /// 迁移先行（原子守卫），成功后才触发授予 —— 并发重复批准
    /// 只有一个能通过迁移，权益副作用恰好一次。
    pub async fn approve(
        path: web::Path<String>,
        store: web::Data<Arc<dyn AttributionStore>>,
        sync: web::Data<Arc<EntitlementSync>>,
    ) -> impl Responder {
        let id = path.into_inner();

        let request = match store
            .transition_verification(&id, VerificationStatus::Approved, None)
            .await
        {
            Ok(request) => request,
            Err(e) => {
                return HttpResponse::NotFound().json(json!({
                    "code": 404,
                    "data": { "error": e.message() }
                }));
            }
        };

        let grant = sync.grant_and_sync(&request.user_id, MANUAL_SOURCE).await;
        info!(
            "Verification approved: id={} user={} expires_at={}",
            id, request.user_id, grant.expires_at
        );

        HttpResponse::Ok().json(json!({
            "code": 0,
            "data": {
                "id": id,
                "status": "approved",
                "userId": request.user_id,
                "expiresAt": grant.expires_at.to_rfc3339(),
                "appliedUpstream": grant.applied_upstream,
            }
        }))
    }

    /// POST /api/admin/verifications/{id}/reject?reason=..
    ///
    /// 无权益副作用。
    pub async fn reject(
        path: web::Path<String>,
        query: web::Query<HashMap<String, String>>,
        store: web::Data<Arc<dyn AttributionStore>>,
    ) -> impl Responder {
        let id = path.into_inner();
        let reason = query
            .get("reason")
            .cloned()
            .unwrap_or_else(|| "rejected by operator".to_string());

        match store
            .transition_verification(&id, VerificationStatus::Rejected, Some(reason.clone()))
            .await
        {
            Ok(request) => {
                info!("Verification rejected: id={} user={} reason={}", id, request.user_id, reason);
                HttpResponse::Ok().json(json!({
                    "code": 0,
                    "data": { "id": id, "status": "rejected", "reason": reason }
                }))
            }
            Err(e) => HttpResponse::NotFound().json(json!({
                "code": 404,
                "data": { "error": e.message() }
            })),
        }
    }
}
