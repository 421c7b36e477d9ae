//! Postback webhook 处理
//!
//! 伙伴网络的投递是 at-least-once 且 schema 不一致的；本模块把它收敛为
//! exactly-once 的业务效果：解析 → 去重 → 策略 → 授予 → 异步上游同步。
//!
//! 契约：webhook 一律返回 200 "OK"（哪怕解析失败 / 用户无法识别），
//! 否则伙伴会无限重试。重复投递由 dedupe_key 吸收。

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use tracing::{info, warn};

use crate::adapters::{
    GenericAdapter, KeitaroAdapter, OneWinAdapter, ParamMap, ParseError, PostbackAdapter,
};
use crate::config::AppConfig;
use crate::models::{ConversionEvent, ConversionRecord, Deposit};
use crate::services::policy::EntitlementPolicy;
use crate::services::sync::EntitlementSync;
use crate::storages::AttributionStore;

const ACK_BODY: &str = "OK";

pub struct PostbackService;

impl PostbackService {
    /// GET/POST /api/postback
    pub async fn generic(
        req: HttpRequest,
        body: web::Bytes,
        store: web::Data<Arc<dyn AttributionStore>>,
        sync: web::Data<Arc<EntitlementSync>>,
        config: web::Data<AppConfig>,
    ) -> impl Responder {
        Self::handle(&GenericAdapter, req, body, store, sync, config).await
    }

    /// GET/POST /api/1win/postback
    pub async fn onewin(
        req: HttpRequest,
        body: web::Bytes,
        store: web::Data<Arc<dyn AttributionStore>>,
        sync: web::Data<Arc<EntitlementSync>>,
        config: web::Data<AppConfig>,
    ) -> impl Responder {
        Self::handle(&OneWinAdapter, req, body, store, sync, config).await
    }

    /// GET/POST /api/keitaro/postback
    pub async fn keitaro(
        req: HttpRequest,
        body: web::Bytes,
        store: web::Data<Arc<dyn AttributionStore>>,
        sync: web::Data<Arc<EntitlementSync>>,
        config: web::Data<AppConfig>,
    ) -> impl Responder {
        Self::handle(&KeitaroAdapter, req, body, store, sync, config).await
    }

    async fn handle(
        adapter: &dyn PostbackAdapter,
        req: HttpRequest,
        body: web::Bytes,
        store: web::Data<Arc<dyn AttributionStore>>,
        sync: web::Data<Arc<EntitlementSync>>,
        config: web::Data<AppConfig>,
    ) -> HttpResponse {
        let content_type = req
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok());
        let params = ParamMap::from_parts(req.query_string(), &body, content_type);

        // 密钥校验：只有请求显式携带 secret 且配置了校验密钥时才比对。
        // 未携带 secret 的请求按 always-200 契约吸收。
        if !config.postback_secret.is_empty() {
            if let Some(supplied) = params.first(&["secret"]) {
                if supplied != config.postback_secret {
                    warn!(
                        "Postback rejected: invalid secret from partner {}",
                        adapter.partner()
                    );
                    return HttpResponse::Forbidden().body("Forbidden");
                }
            }
        }

        let event = match adapter.parse(&params) {
            Ok(event) => event,
            Err(e) => {
                // 解析失败是预期内情况：记日志带原始参数供审计（secret 脱敏），照常 ACK
                warn!(
                    "Unparseable {} postback absorbed ({}): {:?}",
                    adapter.partner(),
                    e,
                    params.redacted()
                );
                return HttpResponse::Ok().body(ACK_BODY);
            }
        };

        Self::process(event, &store, &sync, &config).await;
        HttpResponse::Ok().body(ACK_BODY)
    }

    /// 核心归因流程；任何内部失败都不影响 ACK
    async fn process(
        mut event: ConversionEvent,
        store: &Arc<dyn AttributionStore>,
        sync: &Arc<EntitlementSync>,
        config: &AppConfig,
    ) {
        // 事件自身没带 user 时，回退到 click 记录的归因元数据
        if event.user_id.is_none() {
            if let Some(click_id) = event.click_id.as_deref() {
                if let Some(click) = store.get_click(click_id).await {
                    event.user_id = Some(click.user_id);
                }
            }
        }

        let (premium_activated, reason) = match event.user_id.as_deref() {
            None => {
                // MissingUserIdentifier：吸收为 no-op，事件仍以合成键落审计
                info!(
                    "Postback without resolvable user absorbed: partner={} dedupe_key={} ({})",
                    event.partner,
                    event.dedupe_key,
                    ParseError::MissingUserIdentifier
                );
                (false, ParseError::MissingUserIdentifier.to_string())
            }
            Some(_) => {
                let decision = EntitlementPolicy::evaluate(
                    event.partner,
                    &event.status_label,
                    event.amount,
                    config.min_deposit_usd,
                );
                (decision.qualifies, decision.reason)
            }
        };

        let record = ConversionRecord {
            event: event.clone(),
            premium_activated,
            reason: reason.clone(),
        };

        // 去重：同一 dedupe_key 的检查与写入是原子的，重复投递在此终止
        if !store.record_conversion(record).await {
            info!(
                "Duplicate postback absorbed: partner={} dedupe_key={}",
                event.partner, event.dedupe_key
            );
            return;
        }

        // 更新点击记录：最新状态覆盖 + 入金追加
        if let Some(click_id) = event.click_id.clone() {
            let status = event.status_label.clone();
            let deposit = event.amount.map(|amount| Deposit {
                amount,
                currency: event.currency.clone(),
                timestamp: event.received_at,
                partner_user_id: event.user_id.clone(),
            });
            store
                .update_click(
                    &click_id,
                    Box::new(move |record| {
                        record.status = status;
                        if let Some(deposit) = deposit {
                            record.deposits.push(deposit);
                        }
                    }),
                )
                .await;
        }

        info!(
            "Conversion recorded: partner={} dedupe_key={} status={} amount={:?} premium_activated={} reason={}",
            event.partner, event.dedupe_key, event.status_label, event.amount, premium_activated, reason
        );

        if !premium_activated {
            return;
        }

        // 授予本地落库 + fire-and-forget 上游同步（ACK 不等它）
        let user_id = event.user_id.as_deref().unwrap_or_default().to_string();
        let grant = sync.grant_and_sync(&user_id, event.partner.as_str()).await;

        if let Some(click_id) = event.click_id.clone() {
            let granted_at = grant.granted_at;
            store
                .update_click(
                    &click_id,
                    Box::new(move |record| {
                        record.entitlement_granted = true;
                        record.entitlement_granted_at = Some(granted_at);
                    }),
                )
                .await;
        }
    }
}
