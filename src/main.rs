use actix_web::{middleware::from_fn, web, App, HttpServer};
use tracing::info;

use affilink::config::AppConfig;
use affilink::middleware::AuthMiddleware;
use affilink::services::{
    AdminService, AppStartTime, ClickService, EntitlementSync, GeoService, HealthService,
    PostbackService, PremiumService, ProxyService, VerificationService,
};
use affilink::storages::StorageFactory;
use affilink::system::logging::init_logging;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // 记录程序启动时间
    let app_start_time = AppStartTime {
        start_datetime: chrono::Utc::now(),
    };

    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();
    let _log_guard = init_logging(&config);

    // 存储后端
    let store = StorageFactory::create(&config)
        .await
        .expect("Failed to create attribution store");
    info!("Using storage backend: {}", store.backend_name().await);
    if config.storage_backend == "memory" {
        info!("Memory backend is not durable across restarts; use STORAGE_BACKEND=file for persistence");
    }

    // 地理分类与权益同步
    let geo = GeoService::new(&config);
    let sync = EntitlementSync::new(config.clone(), store.clone());

    // 后台重试任务：同步失败的授予按退避重试
    actix_web::rt::spawn(EntitlementSync::start_background_task(sync.clone()));

    if config.admin_secret.is_empty() {
        info!("Admin API is disabled (ADMIN_SECRET not set)");
    } else {
        info!("Admin API available at: /api/admin");
    }
    if !config.blocked_countries.is_empty() {
        info!("Geo blocklist: {:?}", config.blocked_countries);
    }

    let bind_address = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting affilink gateway at http://{}", bind_address);

    let app_config = config.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_config.clone()))
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(geo.clone()))
            .app_data(web::Data::new(sync.clone()))
            .app_data(web::Data::new(app_start_time.clone()))
            .route("/api/geo", web::get().to(GeoService::report))
            .route("/api/click", web::get().to(ClickService::issue))
            .route("/api/bookmaker/link", web::get().to(ClickService::bookmaker_link))
            .route("/api/postback", web::get().to(PostbackService::generic))
            .route("/api/postback", web::post().to(PostbackService::generic))
            .route("/api/1win/postback", web::get().to(PostbackService::onewin))
            .route("/api/1win/postback", web::post().to(PostbackService::onewin))
            .route("/api/keitaro/postback", web::get().to(PostbackService::keitaro))
            .route("/api/keitaro/postback", web::post().to(PostbackService::keitaro))
            .route("/api/premium/check/{user_id}", web::get().to(PremiumService::check))
            .route("/api/verification/request", web::post().to(VerificationService::submit))
            .service(web::resource("/api/proxy/{tail:.*}").route(web::route().to(ProxyService::forward)))
            .service(
                web::scope("/api/admin")
                    .wrap(from_fn(AuthMiddleware::admin_auth))
                    .route("/verifications", web::get().to(VerificationService::list))
                    .route(
                        "/verifications/{id}/approve",
                        web::post().to(VerificationService::approve),
                    )
                    .route(
                        "/verifications/{id}/approve",
                        web::get().to(VerificationService::approve),
                    )
                    .route(
                        "/verifications/{id}/reject",
                        web::post().to(VerificationService::reject),
                    )
                    .route(
                        "/verifications/{id}/reject",
                        web::get().to(VerificationService::reject),
                    )
                    .route("/postbacks", web::get().to(AdminService::list_postbacks))
                    .route("/premiums", web::get().to(AdminService::list_premiums)),
            )
            .route("/health", web::get().to(HealthService::health_check))
    })
    .bind(bind_address)?
    .run()
    .await
}
