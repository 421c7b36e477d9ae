//! 点击签发
//!
//! 为每次外跳生成不透明 click id，连同地理快照落库；
//! 返回嵌入该 id 的联盟链接（被屏蔽地区走镜像域名）。

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde_json::json;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::models::ClickRecord;
use crate::services::geo::GeoService;
use crate::storages::AttributionStore;
use crate::utils::generate_random_code;
use crate::utils::ip::extract_client_ip;

const CLICK_ID_LENGTH: usize = 10;

pub struct ClickService;

impl ClickService {
    /// GET /api/click?userId=..&source=..
    pub async fn issue(
        req: HttpRequest,
        query: web::Query<HashMap<String, String>>,
        store: web::Data<Arc<dyn AttributionStore>>,
        geo: web::Data<GeoService>,
        config: web::Data<AppConfig>,
    ) -> impl Responder {
        let Some(user_id) = first_param(&query, &["userId", "user_id"]) else {
            return HttpResponse::BadRequest().json(json!({
                "code": 400,
                "data": { "error": "userId is required" }
            }));
        };
        let source = first_param(&query, &["source", "campaign"]);

        match Self::create_click(&req, &user_id, source, &store, &geo, &config).await {
            Ok((click_id, link, _)) => HttpResponse::Ok().json(json!({
                "clickId": click_id,
                "affiliateLink": link,
            })),
            Err(response) => response,
        }
    }

    /// GET /api/bookmaker/link?userId=..&campaign=..
    ///
    /// 与 /api/click 同源，但显式返回地理判定结果，供客户端做 cloaking 展示。
    pub async fn bookmaker_link(
        req: HttpRequest,
        query: web::Query<HashMap<String, String>>,
        store: web::Data<Arc<dyn AttributionStore>>,
        geo: web::Data<GeoService>,
        config: web::Data<AppConfig>,
    ) -> impl Responder {
        let Some(user_id) = first_param(&query, &["userId", "user_id"]) else {
            return HttpResponse::BadRequest().json(json!({
                "code": 400,
                "data": { "error": "userId is required" }
            }));
        };
        let campaign = first_param(&query, &["campaign", "source"]);

        match Self::create_click(&req, &user_id, campaign, &store, &geo, &config).await {
            Ok((click_id, link, classification)) => HttpResponse::Ok().json(json!({
                "clickId": click_id,
                "isBlocked": classification.is_blocked,
                "country": classification.country,
                "link": link,
            })),
            Err(response) => response,
        }
    }

    async fn create_click(
        req: &HttpRequest,
        user_id: &str,
        source: Option<String>,
        store: &Arc<dyn AttributionStore>,
        geo: &GeoService,
        config: &AppConfig,
    ) -> std::result::Result<(String, String, crate::models::GeoClassification), HttpResponse>
    {
        let ip = extract_client_ip(req).unwrap_or_default();
        let classification = geo.classify(&ip).await;

        let click_id = generate_random_code(CLICK_ID_LENGTH);
        let mut record = ClickRecord::new(click_id.clone(), user_id.to_string(), source.clone());
        record.geo = Some(classification.clone());

        // 存储失败是致命的：没有点击记录，后续 postback 无从归因
        if let Err(e) = store.put_click(record).await {
            error!("Failed to store click record {}: {}", click_id, e);
            return Err(HttpResponse::InternalServerError().json(json!({
                "code": 500,
                "data": { "error": "storage failure" }
            })));
        }

        let domain = geo.pick_domain(&classification);
        let link = build_affiliate_link(domain, &click_id, &config.affiliate_tag, source.as_deref());

        info!(
            "Click issued: click_id={} user_id={} country={} blocked={}",
            click_id, user_id, classification.country, classification.is_blocked
        );

        Ok((click_id, link, classification))
    }
}

/// 拼接联盟出站链接
pub fn build_affiliate_link(
    domain: &str,
    click_id: &str,
    affiliate_tag: &str,
    source: Option<&str>,
) -> String {
    let mut link = format!(
        "{}/?clickId={}&aff={}",
        domain.trim_end_matches('/'),
        click_id,
        affiliate_tag
    );
    if let Some(source) = source {
        link.push_str("&source=");
        link.push_str(&urlencoding::encode(source));
    }
    link
}

fn first_param(query: &HashMap<String, String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| query.get(*k))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(String::from)
}
