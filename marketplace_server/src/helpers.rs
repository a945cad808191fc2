use std::{net::IpAddr, str::FromStr};

use actix_web::HttpRequest;
use log::{debug, trace};
use regex::Regex;

use crate::config::ProxyConfig;

/// Get the remote IP address from the request. It uses 3 sources to determine the IP address, in decreasing order
/// of preference:
/// 1. The `X-Forwarded-For` header, iif `use_x_forwarded_for` is set in the proxy configuration.
/// 2. The `Forwarded` header, iif `use_forwarded` is set in the proxy configuration.
/// 3. The peer address from the connection info.
pub fn get_remote_ip(req: &HttpRequest, proxy: ProxyConfig) -> Option<IpAddr> {
    let mut result = None;
    if proxy.use_x_forwarded_for {
        trace!("Checking X-Forwarded-For header");
        result = req
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| IpAddr::from_str(s.trim()).ok());
        if let Some(ip) = result {
            debug!("Using X-Forwarded-For header for remote address: {ip}");
        }
    }
    if proxy.use_forwarded && result.is_none() {
        trace!("Checking Forwarded header");
        result = req.headers().get("Forwarded").and_then(|v| v.to_str().ok()).and_then(forwarded_for);
        if let Some(ip) = result {
            debug!("Using Forwarded header for remote address: {ip}");
        }
    }
    result.or_else(|| {
        let peer_addr = req.peer_addr().map(|a| a.ip());
        trace!("Using Peer address for remote address: {:?}", peer_addr);
        peer_addr
    })
}

/// The first `for=` address in a `Forwarded` header (RFC 7239). Quoted and bracketed IPv6 forms are accepted.
fn forwarded_for(header: &str) -> Option<IpAddr> {
    let re = Regex::new(r#"(?i)for=(?P<ip>[^;,]+)"#).ok()?;
    let ip = re.captures(header)?.name("ip")?.as_str();
    let ip = ip.trim().trim_matches('"');
    let ip = match ip.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or_default(),
        None => ip,
    };
    IpAddr::from_str(ip).ok()
}
