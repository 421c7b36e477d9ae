//! 人工审核与 Admin 鉴权集成测试
//!
//! 覆盖提交 → 批准 → 授予链路、终态不可二次迁移、以及 admin
//! 共享密钥的三种结果（禁用 404 / 错误 403 / 正确放行）。

use std::sync::Arc;

use actix_web::{middleware::from_fn, test as actix_test, web, App};
use async_trait::async_trait;

use affilink::config::AppConfig;
use affilink::middleware::AuthMiddleware;
use affilink::services::geo::{GeoInfo, GeoLookup, GeoService};
use affilink::services::{AdminService, EntitlementSync, VerificationService};
use affilink::storages::memory::MemoryStore;
use affilink::storages::AttributionStore;

struct StubGeo;

#[async_trait]
impl GeoLookup for StubGeo {
    async fn lookup(&self, _ip: &str) -> Option<GeoInfo> {
        None
    }

    fn name(&self) -> &'static str {
        "Stub"
    }
}

fn test_state(config: AppConfig) -> (AppConfig, Arc<dyn AttributionStore>, GeoService, Arc<EntitlementSync>) {
    let store: Arc<dyn AttributionStore> = Arc::new(MemoryStore::new());
    let geo = GeoService::with_provider(Arc::new(StubGeo), &config);
    let sync = EntitlementSync::new(config.clone(), store.clone());
    (config, store, geo, sync)
}

macro_rules! verification_app {
    ($config:expr, $store:expr, $geo:expr, $sync:expr) => {
        actix_test::init_service(
            App::new()
                .app_data(web::Data::new($config.clone()))
                .app_data(web::Data::new($store.clone()))
                .app_data(web::Data::new($geo.clone()))
                .app_data(web::Data::new($sync.clone()))
                .route(
                    "/api/verification/request",
                    web::post().to(VerificationService::submit),
                )
                .service(
                    web::scope("/api/admin")
                        .wrap(from_fn(AuthMiddleware::admin_auth))
                        .route("/verifications", web::get().to(VerificationService::list))
                        .route(
                            "/verifications/{id}/approve",
                            web::post().to(VerificationService::approve),
                        )
                        .route(
                            "/verifications/{id}/reject",
                            web::post().to(VerificationService::reject),
                        )
                        .route("/postbacks", web::get().to(AdminService::list_postbacks))
                        .route("/premiums", web::get().to(AdminService::list_premiums)),
                ),
        )
        .await
    };
}

fn admin_config() -> AppConfig {
    AppConfig {
        admin_secret: "hunter2".to_string(),
        ..AppConfig::default()
    }
}

/// 提交一条审核申请，返回其 id
macro_rules! submit {
    ($app:expr, $user_id:expr) => {{
        let req = actix_test::TestRequest::post()
            .uri("/api/verification/request")
            .set_json(serde_json::json!({
                "userId": $user_id,
                "bookmakerId": "bk-1001",
                "bookmaker": "1win",
                "email": "user@example.com",
            }))
            .to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&$app, req).await;
        assert_eq!(body["status"], "pending");
        body["id"].as_str().unwrap().to_string()
    }};
}

#[actix_rt::test]
async fn test_submit_approve_grants_entitlement() {
    let (config, store, geo, sync) = test_state(admin_config());
    let app = verification_app!(config, store, geo, sync);

    let id = submit!(app, "42");

    let req = actix_test::TestRequest::post()
        .uri(&format!("/api/admin/verifications/{}/approve?secret=hunter2", id))
        .to_request();
    let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["status"], "approved");
    assert_eq!(body["data"]["userId"], "42");

    // 授予来源标记为人工审核，窗口同自动链路
    let grant = store.get_grant("42").await.unwrap();
    assert_eq!(grant.source, "manual_verification");
    assert_eq!(grant.expires_at - grant.granted_at, chrono::Duration::days(15));
}

#[actix_rt::test]
async fn test_double_approve_returns_404_without_second_grant() {
    let (config, store, geo, sync) = test_state(admin_config());
    let app = verification_app!(config, store, geo, sync);

    let id = submit!(app, "7");

    let uri = format!("/api/admin/verifications/{}/approve?secret=hunter2", id);
    let req = actix_test::TestRequest::post().uri(&uri).to_request();
    let resp = actix_test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let first = store.get_grant("7").await.unwrap();

    // 二次批准：终态守卫拒绝，授予不变
    let req = actix_test::TestRequest::post().uri(&uri).to_request();
    let resp = actix_test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let grant = store.get_grant("7").await.unwrap();
    assert_eq!(grant.granted_at, first.granted_at);
}

#[actix_rt::test]
async fn test_reject_has_no_entitlement_side_effect() {
    let (config, store, geo, sync) = test_state(admin_config());
    let app = verification_app!(config, store, geo, sync);

    let id = submit!(app, "9");

    let req = actix_test::TestRequest::post()
        .uri(&format!(
            "/api/admin/verifications/{}/reject?secret=hunter2&reason=duplicate+account",
            id
        ))
        .to_request();
    let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "rejected");
    assert_eq!(body["data"]["reason"], "duplicate account");

    assert!(store.get_grant("9").await.is_none());

    // 驳回后再批准同样被终态守卫拒绝
    let req = actix_test::TestRequest::post()
        .uri(&format!("/api/admin/verifications/{}/approve?secret=hunter2", id))
        .to_request();
    let resp = actix_test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_rt::test]
async fn test_approve_unknown_id_returns_404() {
    let (config, store, geo, sync) = test_state(admin_config());
    let app = verification_app!(config, store, geo, sync);

    let req = actix_test::TestRequest::post()
        .uri("/api/admin/verifications/no-such-id/approve?secret=hunter2")
        .to_request();
    let resp = actix_test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_rt::test]
async fn test_submit_without_user_id_rejected() {
    let (config, store, geo, sync) = test_state(admin_config());
    let app = verification_app!(config, store, geo, sync);

    let req = actix_test::TestRequest::post()
        .uri("/api/verification/request")
        .set_json(serde_json::json!({ "bookmaker": "1win" }))
        .to_request();
    let resp = actix_test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert!(store.list_verifications().await.is_empty());
}

#[actix_rt::test]
async fn test_list_filters_by_status() {
    let (config, store, geo, sync) = test_state(admin_config());
    let app = verification_app!(config, store, geo, sync);

    let id_a = submit!(app, "1");
    let _id_b = submit!(app, "2");

    let req = actix_test::TestRequest::post()
        .uri(&format!("/api/admin/verifications/{}/approve?secret=hunter2", id_a))
        .to_request();
    actix_test::call_service(&app, req).await;

    let req = actix_test::TestRequest::get()
        .uri("/api/admin/verifications?secret=hunter2&status=pending")
        .to_request();
    let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["user_id"], "2");
}

#[actix_rt::test]
async fn test_admin_secret_mismatch_forbidden() {
    let (config, store, geo, sync) = test_state(admin_config());
    let app = verification_app!(config, store, geo, sync);

    for uri in [
        "/api/admin/verifications?secret=wrong",
        "/api/admin/verifications",
        "/api/admin/postbacks?secret=wrong",
    ] {
        let req = actix_test::TestRequest::get().uri(uri).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 403, "expected 403 for {}", uri);
    }

    // Bearer 头同样被接受
    let req = actix_test::TestRequest::get()
        .uri("/api/admin/verifications")
        .insert_header(("Authorization", "Bearer hunter2"))
        .to_request();
    let resp = actix_test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_rt::test]
async fn test_admin_disabled_when_secret_unset() {
    // admin_secret 为空 → 整个 admin 面 404，连正确 secret 也无法访问
    let (config, store, geo, sync) = test_state(AppConfig::default());
    let app = verification_app!(config, store, geo, sync);

    let req = actix_test::TestRequest::get()
        .uri("/api/admin/verifications?secret=anything")
        .to_request();
    let resp = actix_test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}
