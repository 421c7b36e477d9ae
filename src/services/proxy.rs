//! 代理网关
//!
//! 把任意请求转发到按调用方地理位置选出的伙伴域名，绕过 CORS/地域限制。
//! 上游状态码/响应体/Content-Type 原样回传；上游不可达 → 502。

use std::sync::OnceLock;
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use tracing::{debug, warn};
use ureq::Agent;

use crate::errors::{AffilinkError, Result};
use crate::services::geo::GeoService;
use crate::utils::ip::extract_client_ip;

const HTTP_TIMEOUT_SECS: u64 = 5;

static HTTP_AGENT: OnceLock<Agent> = OnceLock::new();

fn get_agent() -> &'static Agent {
    HTTP_AGENT.get_or_init(|| {
        Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(HTTP_TIMEOUT_SECS)))
            // 上游的 4xx/5xx 要原样转发，不能当错误吞掉
            .http_status_as_error(false)
            .build()
            .into()
    })
}

/// 上游响应快照
struct UpstreamResponse {
    status: u16,
    content_type: String,
    body: Vec<u8>,
}

pub struct ProxyService;

impl ProxyService {
    /// ALL /api/proxy/{tail}
    pub async fn forward(
        req: HttpRequest,
        path: web::Path<String>,
        body: web::Bytes,
        geo: web::Data<GeoService>,
    ) -> impl Responder {
        let tail = path.into_inner();
        let client_ip = extract_client_ip(&req).unwrap_or_default();
        let classification = geo.classify(&client_ip).await;
        let domain = geo.pick_domain(&classification).to_string();

        let mut url = format!("{}/{}", domain.trim_end_matches('/'), tail);
        if !req.query_string().is_empty() {
            url.push('?');
            url.push_str(req.query_string());
        }

        let method = req.method().clone();
        let content_type = req
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body_bytes = body.to_vec();

        debug!(
            "Proxying {} {} for {} (country={})",
            method, url, client_ip, classification.country
        );

        let result = web::block(move || {
            forward_sync(&method.to_string(), &url, &client_ip, &content_type, &body_bytes)
        })
        .await;

        match result {
            Ok(Ok(upstream)) => HttpResponse::build(
                StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY),
            )
            .insert_header(("Content-Type", upstream.content_type))
            .body(upstream.body),
            Ok(Err(e)) => {
                warn!("Proxy upstream failure: {}", e);
                HttpResponse::BadGateway().body("Bad Gateway")
            }
            Err(e) => {
                warn!("Proxy task failure: {}", e);
                HttpResponse::BadGateway().body("Bad Gateway")
            }
        }
    }
}

/// 同步转发（在 web::block 线程池内执行）
///
/// 方法原样转发，不做白名单改写。
fn forward_sync(
    method: &str,
    url: &str,
    client_ip: &str,
    content_type: &str,
    body: &[u8],
) -> Result<UpstreamResponse> {
    let mut builder = ureq::http::Request::builder()
        .method(method)
        .uri(url)
        .header("X-Forwarded-For", client_ip);
    if !body.is_empty() {
        builder = builder.header("Content-Type", content_type);
    }
    let request = builder
        .body(body)
        .map_err(|e| AffilinkError::proxy_unreachable(e.to_string()))?;

    let response = get_agent()
        .run(request)
        .map_err(|e| AffilinkError::proxy_unreachable(e.to_string()))?;

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let body = response
        .into_body()
        .read_to_vec()
        .map_err(|e| AffilinkError::proxy_unreachable(e.to_string()))?;

    Ok(UpstreamResponse {
        status,
        content_type,
        body,
    })
}
