use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ipnet::IpNet;

use super::error::ApiError;
use super::state::AppState;
use crate::models::request::GateRequest;
use crate::models::threat::{GateDecision, ThreatReason};

/// Client address resolved by the gate, available to handlers as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// Runs every request through the [`RequestGate`](crate::protection::pipeline::RequestGate).
///
/// JSON and form bodies are buffered (up to the configured limit) so the
/// firewall can scan them, then handed on unchanged.
pub async fn gate_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
    let client_ip = extract_client_ip(req.headers(), peer, &state.trusted_proxies);

    let (mut parts, body) = req.into_parts();

    let (body, body_text) = if is_scannable(&parts.headers) {
        match to_bytes(body, state.settings.server.body_limit_bytes).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                (Body::from(bytes), text)
            }
            Err(_) => return ApiError::PayloadTooLarge.into_response(),
        }
    } else {
        (body, String::new())
    };

    let header_str = |name: header::HeaderName| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let mut gate_req = GateRequest::new(client_ip, parts.method.as_str(), parts.uri.path())
        .with_body(body_text);
    gate_req.query = parts.uri.query().map(str::to_string);
    gate_req.host = header_str(header::HOST).or_else(|| parts.uri.host().map(str::to_string));
    gate_req.referer = header_str(header::REFERER);
    gate_req.user_agent = header_str(header::USER_AGENT);

    match state.gate.evaluate(&gate_req) {
        GateDecision::Allow => {
            parts.extensions.insert(ClientIp(client_ip));
            next.run(Request::from_parts(parts, body)).await
        }
        GateDecision::Reject { reason, message } => {
            let message = match reason {
                ThreatReason::RateLimit => message,
                _ => "Access denied".to_string(),
            };
            ApiError::Gate {
                code: reason.code(),
                message,
            }
            .into_response()
        }
    }
}

fn is_scannable(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("application/json") || ct.starts_with("application/x-www-form-urlencoded")
        })
        .unwrap_or(false)
}

/// Peer address, or the forwarded client when the peer is a trusted proxy.
pub fn extract_client_ip(headers: &HeaderMap, peer: IpAddr, trusted: &[IpNet]) -> IpAddr {
    if !trusted.iter().any(|net| net.contains(&peer)) {
        return peer;
    }

    // X-Forwarded-For left-most entry.
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Ok(ip) = real_ip.trim().parse::<IpAddr>() {
            return ip;
        }
    }

    peer
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_header_needs_trusted_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.5, 10.0.0.1"));
        let trusted: Vec<IpNet> = vec!["10.0.0.0/8".parse().unwrap()];

        let from_proxy = extract_client_ip(&headers, "10.1.2.3".parse().unwrap(), &trusted);
        assert_eq!(from_proxy, "203.0.113.5".parse::<IpAddr>().unwrap());

        let spoofed = extract_client_ip(&headers, "198.51.100.1".parse().unwrap(), &trusted);
        assert_eq!(spoofed, "198.51.100.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_real_ip_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.9"));
        let trusted: Vec<IpNet> = vec!["127.0.0.0/8".parse().unwrap()];
        let ip = extract_client_ip(&headers, "127.0.0.1".parse().unwrap(), &trusted);
        assert_eq!(ip, "203.0.113.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_scannable_content_types() {
        let mut headers = HeaderMap::new();
        assert!(!is_scannable(&headers));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
        assert!(is_scannable(&headers));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("multipart/form-data; boundary=x"));
        assert!(!is_scannable(&headers));
    }
}
