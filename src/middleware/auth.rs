//! Admin API 鉴权
//!
//! 共享密钥放在 `secret` 查询参数里（沿用既有伙伴后台的约定，便于 curl；
//! 已在 DESIGN.md 记为债务，应升级为 HMAC/token）。也接受
//! `Authorization: Bearer <secret>` 头。

use actix_web::middleware::Next;
use actix_web::{
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web, Error, HttpResponse,
};
use tracing::{debug, info};

use crate::config::AppConfig;

pub struct AuthMiddleware;

impl AuthMiddleware {
    /// Admin API 身份验证中间件
    pub async fn admin_auth(
        req: ServiceRequest,
        next: Next<BoxBody>,
    ) -> Result<ServiceResponse<BoxBody>, Error> {
        if req.method() == actix_web::http::Method::OPTIONS {
            return Ok(req.into_response(HttpResponse::NoContent().finish()));
        }

        let admin_secret = req
            .app_data::<web::Data<AppConfig>>()
            .map(|config| config.admin_secret.clone())
            .unwrap_or_default();

        // secret 为空 → Admin API 禁用，对外表现为 404
        if admin_secret.is_empty() {
            return Ok(req.into_response(
                HttpResponse::NotFound()
                    .insert_header(("Content-Type", "text/html; charset=utf-8"))
                    .body("Not Found"),
            ));
        }

        if let Some(supplied) = extract_secret(&req) {
            if supplied == admin_secret {
                debug!("Admin API authentication succeeded");
                return next.call(req).await;
            }
        }

        info!("Admin API authentication failed: secret mismatch or missing");
        Ok(req.into_response(
            HttpResponse::Forbidden()
                .append_header(("Content-Type", "application/json; charset=utf-8"))
                .json(serde_json::json!({
                    "code": 403,
                    "data": { "error": "Forbidden: invalid or missing secret" }
                })),
        ))
    }
}

fn extract_secret(req: &ServiceRequest) -> Option<String> {
    // 查询参数优先
    if let Ok(query) =
        web::Query::<std::collections::HashMap<String, String>>::from_query(req.query_string())
    {
        if let Some(secret) = query.get("secret") {
            if !secret.is_empty() {
                return Some(secret.clone());
            }
        }
    }

    // 其次 Authorization: Bearer
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(String::from)
}
