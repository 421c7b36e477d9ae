//! 地理分类与域名选择
//!
//! 根据配置自动选择查询实现：
//! 1. MAXMINDDB_PATH 配置且可读 → 本地 MaxMind 数据库
//! 2. 否则 → 外部 HTTP API（带 Moka 缓存 + singleflight）
//!
//! classify 永不失败：回环/私网地址归为固定测试国家，查不到归为 UNKNOWN。

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use async_trait::async_trait;
use maxminddb::Reader;
use moka::future::Cache;
use serde_json::json;
use tracing::{debug, info, trace, warn};
use ureq::Agent;

use crate::config::AppConfig;
use crate::models::GeoClassification;
use crate::utils::ip::{extract_client_ip, is_private_or_local};

/// 回环/私网地址的固定归类
const LOCAL_COUNTRY: &str = "LOCAL";
const UNKNOWN_COUNTRY: &str = "UNKNOWN";

const GEO_CACHE_TTL_SECS: u64 = 15 * 60;
const GEO_CACHE_MAX_CAPACITY: u64 = 10_000;
const HTTP_TIMEOUT_SECS: u64 = 2;

static HTTP_AGENT: OnceLock<Agent> = OnceLock::new();

fn get_agent() -> &'static Agent {
    HTTP_AGENT.get_or_init(|| {
        Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(HTTP_TIMEOUT_SECS)))
            .build()
            .into()
    })
}

/// GeoIP 查询结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// GeoIP 查询 trait（测试可注入 stub 实现）
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo>;

    fn name(&self) -> &'static str;
}

/// 本地 MaxMind GeoLite2 实现
pub struct MaxMindLookup {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MaxMindLookup {
    pub fn new(path: &str) -> Result<Self, maxminddb::MaxMindDbError> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }
}

#[async_trait]
impl GeoLookup for MaxMindLookup {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        let ip_addr: IpAddr = ip.parse().ok()?;

        let result = self.reader.lookup(ip_addr).ok()?;
        let city: maxminddb::geoip2::City = result.decode().ok()??;

        let country = city.country.iso_code.map(String::from);
        let region = city
            .subdivisions
            .first()
            .and_then(|s| s.iso_code)
            .map(String::from);
        let city_name = city.city.names.english.map(|s| s.to_string());

        trace!(
            "MaxMind lookup for {}: country={:?}, region={:?}, city={:?}",
            ip, country, region, city_name
        );

        Some(GeoInfo {
            country,
            region,
            city: city_name,
        })
    }

    fn name(&self) -> &'static str {
        "MaxMind"
    }
}

/// 外部 API 实现（ip-api.com 兼容格式）
///
/// Moka 缓存自带 singleflight：同一 IP 的并发查询只发一次 HTTP。
pub struct ExternalApiLookup {
    api_url_template: String,
    cache: Cache<String, Option<GeoInfo>>,
}

impl ExternalApiLookup {
    /// `api_url_template` 使用 `{ip}` 作为占位符
    pub fn new(api_url_template: &str) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(GEO_CACHE_TTL_SECS))
            .max_capacity(GEO_CACHE_MAX_CAPACITY)
            .build();

        Self {
            api_url_template: api_url_template.to_string(),
            cache,
        }
    }

    fn fetch_sync(url: String) -> Option<GeoInfo> {
        let resp = match get_agent().get(&url).call() {
            Ok(r) => r,
            Err(e) => {
                warn!("GeoIP API request to \"{}\" failed: {}", url, e);
                return None;
            }
        };

        let body: serde_json::Value = match resp.into_body().read_json() {
            Ok(j) => j,
            Err(e) => {
                warn!("GeoIP API response from \"{}\" parse failed: {}", url, e);
                return None;
            }
        };

        if body["status"].as_str() == Some("fail") {
            trace!("GeoIP API returned fail status");
            return None;
        }

        let country = body["countryCode"]
            .as_str()
            .or_else(|| body["country_code"].as_str())
            .or_else(|| body["country"].as_str())
            .map(String::from);
        let region = body["regionName"]
            .as_str()
            .or_else(|| body["region"].as_str())
            .map(String::from);
        let city = body["city"].as_str().map(String::from);

        Some(GeoInfo {
            country,
            region,
            city,
        })
    }

    async fn fetch(&self, ip: &str) -> Option<GeoInfo> {
        let url = self.api_url_template.replace("{ip}", ip);

        tokio::task::spawn_blocking(move || Self::fetch_sync(url))
            .await
            .unwrap_or_else(|e| {
                warn!("GeoIP spawn_blocking failed: {}", e);
                None
            })
    }
}

#[async_trait]
impl GeoLookup for ExternalApiLookup {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        let ip_key = ip.to_string();

        self.cache
            .get_with(ip_key, async {
                trace!("GeoIP cache miss for {}, fetching from API", ip);
                self.fetch(ip).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "ExternalAPI"
    }
}

/// 地理分类服务
///
/// 查询 + 屏蔽名单判定 + 主/镜像域名选择。
pub struct GeoService {
    provider: Arc<dyn GeoLookup>,
    blocked_countries: HashSet<String>,
    primary_domain: String,
    mirror_domain: String,
}

impl GeoService {
    pub fn new(config: &AppConfig) -> Self {
        let provider: Arc<dyn GeoLookup> = if let Some(ref path) = config.maxminddb_path {
            match MaxMindLookup::new(path) {
                Ok(lookup) => {
                    info!("GeoService: using MaxMind database at {}", path);
                    Arc::new(lookup)
                }
                Err(e) => {
                    warn!(
                        "GeoService: failed to load MaxMind database at {}: {}, falling back to external API",
                        path, e
                    );
                    Arc::new(ExternalApiLookup::new(&config.geoip_api_url))
                }
            }
        } else {
            debug!("GeoService: no MaxMind database configured, using external API");
            Arc::new(ExternalApiLookup::new(&config.geoip_api_url))
        };

        Self::with_provider(provider, config)
    }

    /// 注入自定义查询实现（测试用）
    pub fn with_provider(provider: Arc<dyn GeoLookup>, config: &AppConfig) -> Self {
        Self {
            provider,
            blocked_countries: config.blocked_countries.iter().cloned().collect(),
            primary_domain: config.primary_domain.clone(),
            mirror_domain: config.mirror_domain.clone(),
        }
    }

    /// 按来源地址分类，永不失败
    pub async fn classify(&self, ip: &str) -> GeoClassification {
        if let Ok(ip_addr) = ip.parse::<IpAddr>() {
            if is_private_or_local(&ip_addr) {
                return GeoClassification {
                    country: LOCAL_COUNTRY.to_string(),
                    region: String::new(),
                    city: String::new(),
                    is_blocked: false,
                };
            }
        }

        match self.provider.lookup(ip).await {
            Some(info) => {
                let country = info
                    .country
                    .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string())
                    .to_uppercase();
                let is_blocked = self.blocked_countries.contains(&country);
                GeoClassification {
                    country,
                    region: info.region.unwrap_or_default(),
                    city: info.city.unwrap_or_default(),
                    is_blocked,
                }
            }
            None => GeoClassification {
                country: UNKNOWN_COUNTRY.to_string(),
                region: String::new(),
                city: String::new(),
                is_blocked: false,
            },
        }
    }

    /// 被屏蔽地区走镜像域名
    pub fn pick_domain(&self, geo: &GeoClassification) -> &str {
        if geo.is_blocked {
            &self.mirror_domain
        } else {
            &self.primary_domain
        }
    }

    /// GET /api/geo — 报告调用方的地理分类
    pub async fn report(req: HttpRequest, geo: web::Data<GeoService>) -> impl Responder {
        let ip = extract_client_ip(&req).unwrap_or_default();
        let classification = geo.classify(&ip).await;

        HttpResponse::Ok().json(json!({
            "ip": ip,
            "country": classification.country,
            "region": classification.region,
            "city": classification.city,
            "isBlocked": classification.is_blocked,
        }))
    }
}

impl Clone for GeoService {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            blocked_countries: self.blocked_countries.clone(),
            primary_domain: self.primary_domain.clone(),
            mirror_domain: self.mirror_domain.clone(),
        }
    }
}
