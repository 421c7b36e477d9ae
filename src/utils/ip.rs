//! 客户端 IP 提取
//!
//! Postback 与 proxy 场景下服务通常部署在反向代理后面，
//! 连接 IP 来自私有网段时自动回退到 X-Forwarded-For / X-Real-IP。

use std::net::IpAddr;

use actix_web::HttpRequest;
use tracing::debug;

/// 检查 IP 是否为私有地址或 localhost
pub fn is_private_or_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => {
            // fc00::/7 (ULA) + fe80::/10 (link-local) + ::1
            v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// 从请求头提取转发的 IP（X-Forwarded-For 优先，其次 X-Real-IP）
pub fn extract_forwarded_ip(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            req.headers()
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(String::from)
        })
}

/// 提取真实客户端 IP
///
/// 连接来自私有 IP/localhost 且带有转发头 → 信任转发头；
/// 否则直接使用连接 IP（公网直连场景，防止伪造）。
pub fn extract_client_ip(req: &HttpRequest) -> Option<String> {
    let conn_info = req.connection_info();
    let peer_ip = conn_info.peer_addr()?.to_string();

    if let Ok(ip_addr) = peer_ip.parse::<IpAddr>() {
        if is_private_or_local(&ip_addr) {
            if let Some(real_ip) = extract_forwarded_ip(req) {
                debug!(
                    "Auto-detect proxy (private IP {}): using forwarded IP {}",
                    peer_ip, real_ip
                );
                return Some(real_ip);
            }
        }
    }

    Some(peer_ip)
}
