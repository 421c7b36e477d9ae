//! Postback webhook 集成测试
//!
//! 覆盖归因主链路：解析 → 去重 → 策略 → 授予，以及 always-200 契约。

use std::sync::Arc;

use actix_web::{test as actix_test, web, App};
use async_trait::async_trait;

use affilink::config::AppConfig;
use affilink::models::ClickRecord;
use affilink::services::geo::{GeoInfo, GeoLookup, GeoService};
use affilink::services::{EntitlementSync, PostbackService, PremiumService};
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

macro_rules! postback_app {
    ($config:expr, $store:expr, $geo:expr, $sync:expr) => {
        actix_test::init_service(
            App::new()
                .app_data(web::Data::new($config.clone()))
                .app_data(web::Data::new($store.clone()))
                .app_data(web::Data::new($geo.clone()))
                .app_data(web::Data::new($sync.clone()))
                .route("/api/postback", web::get().to(PostbackService::generic))
                .route("/api/postback", web::post().to(PostbackService::generic))
                .route("/api/1win/postback", web::get().to(PostbackService::onewin))
                .route("/api/keitaro/postback", web::get().to(PostbackService::keitaro))
                .route("/api/premium/check/{user_id}", web::get().to(PremiumService::check)),
        )
        .await
    };
}

/// 断言 webhook 以 200 "OK" 应答
macro_rules! ack {
    ($app:expr, $uri:expr) => {{
        let req = actix_test::TestRequest::get().uri($uri).to_request();
        let resp = actix_test::call_service(&$app, req).await;
        assert_eq!(resp.status(), 200, "webhook must ack with 200 for {}", $uri);
        let body = actix_test::read_body(resp).await;
        assert_eq!(body, "OK");
    }};
}

#[actix_rt::test]
async fn test_first_deposit_grants_entitlement() {
    let (config, store, geo, sync) = test_state(AppConfig::default());
    let app = postback_app!(config, store, geo, sync);

    // 预置点击记录（等价于 /api/click 签发）
    store
        .put_click(ClickRecord::new("c1".to_string(), "42".to_string(), None))
        .await
        .unwrap();

    ack!(app, "/api/postback?click_id=c1&status=first_deposit&amount=100&currency=USD");

    // 点击记录被原地更新
    let click = store.get_click("c1").await.unwrap();
    assert_eq!(click.status, "first_deposit");
    assert_eq!(click.deposits.len(), 1);
    assert_eq!(click.deposits[0].amount, 100.0);
    assert!(click.entitlement_granted);

    // 授予存在且窗口为 15 天
    let grant = store.get_grant("42").await.unwrap();
    let window = grant.expires_at - grant.granted_at;
    assert_eq!(window, chrono::Duration::days(15));
    assert_eq!(grant.source, "generic");

    // premium check 返回激活状态
    let req = actix_test::TestRequest::get()
        .uri("/api/premium/check/42")
        .to_request();
    let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["premium"], true);
}

#[actix_rt::test]
async fn test_replayed_transaction_is_idempotent() {
    let (config, store, geo, sync) = test_state(AppConfig::default());
    let app = postback_app!(config, store, geo, sync);

    let uri = "/api/postback?user_id=42&status=deposit&amount=50&transaction_id=t9";
    ack!(app, uri);

    let first_grant = store.get_grant("42").await.unwrap();

    // 伙伴重试同一 transaction_id
    ack!(app, uri);
    ack!(app, uri);

    // 审计行只有一条，过期时间与首次一致（无二次延长）
    assert_eq!(store.list_conversions().await.len(), 1);
    let grant = store.get_grant("42").await.unwrap();
    assert_eq!(grant.expires_at, first_grant.expires_at);
    assert_eq!(grant.granted_at, first_grant.granted_at);
}

#[actix_rt::test]
async fn test_onewin_below_threshold_records_reason() {
    let config = AppConfig {
        min_deposit_usd: 10.0,
        ..AppConfig::default()
    };
    let (config, store, geo, sync) = test_state(config);
    let app = postback_app!(config, store, geo, sync);

    ack!(app, "/api/1win/postback?event=deposit&amount=5&sub1=7&transaction_id=t1");

    let records = store.list_conversions().await;
    assert_eq!(records.len(), 1);
    assert!(!records[0].premium_activated);
    assert_eq!(records[0].reason, "Deposit below minimum ($10 required)");
    assert!(store.get_grant("7").await.is_none());

    // 重放同一交易：不产生第二条审计行
    ack!(app, "/api/1win/postback?event=deposit&amount=5&sub1=7&transaction_id=t1");
    assert_eq!(store.list_conversions().await.len(), 1);
}

#[actix_rt::test]
async fn test_keitaro_without_user_stores_synthetic_key() {
    let (config, store, geo, sync) = test_state(AppConfig::default());
    let app = postback_app!(config, store, geo, sync);

    ack!(app, "/api/keitaro/postback?subid=k1&status=lead&payout=20");

    let records = store.list_conversions().await;
    assert_eq!(records.len(), 1);
    assert!(records[0].event.dedupe_key.starts_with("keitaro:k1:lead:"));
    assert!(!records[0].premium_activated);
    assert!(store.list_grants().await.is_empty());
}

#[actix_rt::test]
async fn test_click_resolves_user_from_attribution() {
    let (config, store, geo, sync) = test_state(AppConfig::default());
    let app = postback_app!(config, store, geo, sync);

    store
        .put_click(ClickRecord::new("k7".to_string(), "99".to_string(), None))
        .await
        .unwrap();

    // keitaro 带 subid 不带 sub2：user 从点击记录回填
    ack!(app, "/api/keitaro/postback?subid=k7&status=sale&payout=40");

    assert!(store.get_grant("99").await.is_some());
}

#[actix_rt::test]
async fn test_webhook_always_200_on_malformed_payloads() {
    let (config, store, geo, sync) = test_state(AppConfig::default());
    let app = postback_app!(config, store, geo, sync);

    // 无任何参数 / 缺状态 / 乱码金额
    ack!(app, "/api/postback");
    ack!(app, "/api/postback?click_id=c1");
    ack!(app, "/api/1win/postback?sub1=7");
    ack!(app, "/api/keitaro/postback?payout=zzz&status=lead");

    // POST 乱码 body 同样被吸收
    let req = actix_test::TestRequest::post()
        .uri("/api/postback")
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = actix_test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    assert!(store.list_grants().await.is_empty());
}

#[actix_rt::test]
async fn test_post_body_fields_accepted() {
    let (config, store, geo, sync) = test_state(AppConfig::default());
    let app = postback_app!(config, store, geo, sync);

    let req = actix_test::TestRequest::post()
        .uri("/api/postback")
        .insert_header(("content-type", "application/x-www-form-urlencoded"))
        .set_payload("user_id=11&status=deposit&amount=30&transaction_id=tx-post")
        .to_request();
    let resp = actix_test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    assert!(store.get_grant("11").await.is_some());
}

#[actix_rt::test]
async fn test_postback_secret_only_checked_when_supplied() {
    let config = AppConfig {
        postback_secret: "pb-secret".to_string(),
        ..AppConfig::default()
    };
    let (config, store, geo, sync) = test_state(config);
    let app = postback_app!(config, store, geo, sync);

    // 携带错误 secret → 403
    let req = actix_test::TestRequest::get()
        .uri("/api/postback?user_id=5&status=deposit&amount=10&secret=wrong")
        .to_request();
    let resp = actix_test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
    assert!(store.get_grant("5").await.is_none());

    // 正确 secret → 正常处理
    ack!(app, "/api/postback?user_id=5&status=deposit&amount=10&secret=pb-secret&transaction_id=s1");
    assert!(store.get_grant("5").await.is_some());

    // 不带 secret → 按 always-200 契约吸收并照常处理
    ack!(app, "/api/postback?user_id=6&status=deposit&amount=10&transaction_id=s2");
    assert!(store.get_grant("6").await.is_some());
}

#[actix_rt::test]
async fn test_requalifying_event_extends_expiry() {
    let (config, store, geo, sync) = test_state(AppConfig::default());
    let app = postback_app!(config, store, geo, sync);

    ack!(app, "/api/postback?user_id=42&status=deposit&amount=50&transaction_id=a1");
    let first = store.get_grant("42").await.unwrap();

    // 新的合格事件（不同交易号）刷新过期时间，而不是叠加
    ack!(app, "/api/postback?user_id=42&status=deposit&amount=50&transaction_id=a2");
    let second = store.get_grant("42").await.unwrap();

    assert!(second.expires_at >= first.expires_at);
    assert_eq!(store.list_grants().await.len(), 1);
    assert_eq!(store.list_conversions().await.len(), 2);
}
