use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::error::ApiError;
use super::gate::ClientIp;
use super::state::AppState;
use crate::models::event::EventKind;

/// Axum middleware that requires a valid admin bearer token. Verified
/// claims are attached to the request for the handler.
pub async fn require_admin(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return ApiError::Unauthorized("Access token required".into()).into_response();
    };

    match state.auth.verify(&token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => {
            let ip = req
                .extensions()
                .get::<ClientIp>()
                .map(|ClientIp(ip)| ip.to_string());
            let prefix: String = token.chars().take(20).collect();
            state.events.record(
                EventKind::InvalidToken,
                json!({ "ip": ip, "token": format!("{}...", prefix), "error": e.to_string() }),
            );
            ApiError::Unauthorized("Invalid or expired token".into()).into_response()
        }
    }
}
