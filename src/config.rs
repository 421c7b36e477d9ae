//! 应用配置
//!
//! 所有配置来自环境变量（支持 .env 文件），启动时一次性读入 AppConfig。
//! 测试可直接构造 AppConfig::default() 并覆盖字段，不依赖进程环境。

use std::env;

/// 应用配置结构体
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,

    /// 存储后端: "memory" 或 "file"
    pub storage_backend: String,
    /// file 后端的数据文件路径
    pub attribution_file: String,

    /// Admin API 共享密钥（为空则 Admin API 禁用）
    pub admin_secret: String,
    /// Postback 校验密钥（为空则不校验；只有请求显式携带 secret 时才比对）
    pub postback_secret: String,

    /// 权益有效期（天）
    pub entitlement_days: i64,
    /// 最低入金金额（美元），0 表示不限制
    pub min_deposit_usd: f64,

    /// 屏蔽国家列表（ISO 3166-1 alpha-2，逗号分隔）
    pub blocked_countries: Vec<String>,
    /// 主域名与镜像域名（被屏蔽地区走镜像）
    pub primary_domain: String,
    pub mirror_domain: String,
    /// 联盟标识，拼接到出站链接的 aff 参数
    pub affiliate_tag: String,

    /// 权益同步上游 API（为空则只落本地，不做上游同步）
    pub sync_api_url: String,
    pub sync_api_token: String,
    /// 同步失败的重试轮询间隔（秒）
    pub sync_retry_secs: u64,

    /// MaxMind GeoLite2 数据库路径（不配置则使用外部 API）
    pub maxminddb_path: Option<String>,
    /// 外部 GeoIP API 模板，`{ip}` 为占位符
    pub geoip_api_url: String,

    pub log_level: String,
    pub log_file: Option<String>,
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            storage_backend: "memory".to_string(),
            attribution_file: "attribution.json".to_string(),
            admin_secret: String::new(),
            postback_secret: String::new(),
            entitlement_days: 15,
            min_deposit_usd: 0.0,
            blocked_countries: Vec::new(),
            primary_domain: "https://go.example-partner.com".to_string(),
            mirror_domain: "https://mirror.example-partner.com".to_string(),
            affiliate_tag: "affilink".to_string(),
            sync_api_url: String::new(),
            sync_api_token: String::new(),
            sync_retry_secs: 60,
            maxminddb_path: None,
            geoip_api_url: "http://ip-api.com/json/{ip}?fields=status,countryCode,regionName,city"
                .to_string(),
            log_level: "info".to_string(),
            log_file: None,
            log_format: "text".to_string(),
        }
    }
}

impl AppConfig {
    /// 从环境变量加载配置，未设置的键取默认值
    pub fn from_env() -> Self {
        let defaults = AppConfig::default();

        AppConfig {
            server_host: env_or("SERVER_HOST", &defaults.server_host),
            server_port: env_or("SERVER_PORT", "8080")
                .parse()
                .unwrap_or(defaults.server_port),
            storage_backend: env_or("STORAGE_BACKEND", &defaults.storage_backend),
            attribution_file: env_or("ATTRIBUTION_FILE", &defaults.attribution_file),
            admin_secret: env_or("ADMIN_SECRET", ""),
            postback_secret: env_or("POSTBACK_SECRET", ""),
            entitlement_days: env_or("ENTITLEMENT_DAYS", "15")
                .parse()
                .unwrap_or(defaults.entitlement_days),
            min_deposit_usd: env_or("MIN_DEPOSIT_USD", "0")
                .parse()
                .unwrap_or(defaults.min_deposit_usd),
            blocked_countries: env_or("BLOCKED_COUNTRIES", "")
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            primary_domain: env_or("PRIMARY_DOMAIN", &defaults.primary_domain),
            mirror_domain: env_or("MIRROR_DOMAIN", &defaults.mirror_domain),
            affiliate_tag: env_or("AFFILIATE_TAG", &defaults.affiliate_tag),
            sync_api_url: env_or("SYNC_API_URL", ""),
            sync_api_token: env_or("SYNC_API_TOKEN", ""),
            sync_retry_secs: env_or("SYNC_RETRY_SECS", "60")
                .parse()
                .unwrap_or(defaults.sync_retry_secs),
            maxminddb_path: env::var("MAXMINDDB_PATH").ok().filter(|s| !s.is_empty()),
            geoip_api_url: env_or("GEOIP_API_URL", &defaults.geoip_api_url),
            log_level: env_or("LOG_LEVEL", &defaults.log_level),
            log_file: env::var("LOG_FILE").ok().filter(|s| !s.is_empty()),
            log_format: env_or("LOG_FORMAT", &defaults.log_format),
        }
    }

    /// 权益有效期
    pub fn entitlement_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.entitlement_days)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
