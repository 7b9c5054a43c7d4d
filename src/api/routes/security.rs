use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::api::error::{json_body, ApiError, ApiResponse, ApiResult};
use crate::api::gate::ClientIp;
use crate::api::state::AppState;
use crate::models::event::EventKind;

pub async fn stats(State(state): State<AppState>) -> ApiResult {
    let events = state.events.stats()?;
    Ok(ApiResponse::ok().data(json!({
        "totalEvents": events.total_events,
        "last24h": events.last_24h,
        "blockedIPs": state.blocklist.len(),
        "highSeverityEvents": events.high_severity_events,
        "recentEvents": events.recent_events,
    })))
}

pub async fn blocked_ips(State(state): State<AppState>) -> ApiResult {
    Ok(ApiResponse::ok().data(state.blocklist.list()?))
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub ip: String,
    pub reason: Option<String>,
}

pub async fn block_ip(
    State(state): State<AppState>,
    Extension(ClientIp(admin_ip)): Extension<ClientIp>,
    body: Result<Json<BlockRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    let reason = req
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Manual block".to_string());

    let added = state.blocklist.block(&req.ip, &reason, "admin")?;
    if added {
        info!(ip = %req.ip, by = %admin_ip, "IP blocked by admin");
        state.events.record(
            EventKind::IpBlocked,
            json!({ "ip": req.ip, "reason": reason, "by": admin_ip.to_string() }),
        );
    }
    Ok(ApiResponse::ok().message(if added {
        format!("IP {} blocked", req.ip)
    } else {
        format!("IP {} was already blocked", req.ip)
    }))
}

pub async fn unblock_ip(
    State(state): State<AppState>,
    Extension(ClientIp(admin_ip)): Extension<ClientIp>,
    Path(ip): Path<String>,
) -> ApiResult {
    if !state.blocklist.unblock(&ip)? {
        return Err(ApiError::NotFound(format!("IP {} is not blocked", ip)));
    }
    info!(ip = %ip, by = %admin_ip, "IP unblocked by admin");
    state.events.record(
        EventKind::IpUnblocked,
        json!({ "ip": ip, "by": admin_ip.to_string() }),
    );
    Ok(ApiResponse::ok().message(format!("IP {} unblocked", ip)))
}

pub async fn access_stats(State(state): State<AppState>) -> ApiResponse {
    ApiResponse::ok().data(state.gate.monitor.stats())
}
