use std::net::IpAddr;

use axum::http::HeaderMap;
use ipnet::IpNet;

/// Resolve the client address, honoring `X-Forwarded-For` and `X-Real-IP`
/// only when the direct peer is a trusted proxy.
pub fn resolve(headers: &HeaderMap, peer_addr: Option<IpAddr>, trusted_proxies: &[IpNet]) -> Option<String> {
    let trusted = |ip: &IpAddr| trusted_proxies.iter().any(|net| net.contains(ip));

    let Some(peer) = peer_addr else {
        return None;
    };

    if !trusted(&peer) {
        return Some(normalize(peer));
    }

    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        // Leftmost address that isn't one of our proxies
        for ip_str in xff.split(',').map(|s| s.trim()) {
            if let Ok(ip) = ip_str.parse::<IpAddr>() {
                if !trusted(&ip) {
                    return Some(normalize(ip));
                }
            }
        }
    }

    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
    {
        return Some(normalize(real_ip));
    }

    Some(normalize(peer))
}

fn normalize(ip: IpAddr) -> String {
    match ip {
        IpAddr::V6(v6) if v6.is_loopback() => "127.0.0.1".to_string(),
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(|v4| v4.to_string())
            .unwrap_or_else(|| v6.to_string()),
        IpAddr::V4(v4) => v4.to_string(),
    }
}
