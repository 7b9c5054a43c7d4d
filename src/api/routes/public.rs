use std::path::Path as FsPath;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::api::error::{json_body, ApiError, ApiResponse, ApiResult};
use crate::api::gate::ClientIp;
use crate::api::state::AppState;
use crate::models::contact::NewContact;
use crate::models::event::EventKind;

pub(crate) fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub async fn health() -> ApiResponse {
    ApiResponse::ok()
        .message("Server is running")
        .with("timestamp", Utc::now().to_rfc3339())
}

/// Landing page. Counted as a page view.
pub async fn index(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    headers: HeaderMap,
) -> Response {
    state.events.record(
        EventKind::PageView,
        json!({
            "ip": ip.to_string(),
            "userAgent": user_agent(&headers),
            "referer": headers.get(header::REFERER).and_then(|v| v.to_str().ok()),
        }),
    );

    let path = FsPath::new(&state.settings.server.static_dir).join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "index.html not available");
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        }
    }
}

pub async fn list_services(State(state): State<AppState>) -> ApiResult {
    Ok(ApiResponse::ok().with("services", state.content.services()?))
}

pub async fn get_service(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let not_found = || ApiError::NotFound("Service not found".into());
    let id: i64 = id.parse().map_err(|_| not_found())?;
    let service = state.content.service(id)?.ok_or_else(not_found)?;
    Ok(ApiResponse::ok().with("service", service))
}

pub async fn site_data(State(state): State<AppState>) -> ApiResult {
    Ok(ApiResponse::ok().data(state.content.site_data()?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContactForm {
    pub name: Option<String>,
    pub email: Option<String>,
    pub service: Option<String>,
    pub message: Option<String>,
}

fn required(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub async fn submit_contact(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    headers: HeaderMap,
    body: Result<Json<ContactForm>, JsonRejection>,
) -> ApiResult<Response> {
    let form = json_body(body)?;

    let name = required(form.name);
    let email = required(form.email);
    let message = required(form.message);

    let (Some(name), Some(email), Some(message)) = (name.clone(), email.clone(), message.clone())
    else {
        let missing: Vec<&str> = [("name", &name), ("email", &email), ("message", &message)]
            .into_iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k)
            .collect();
        return Ok(ApiResponse::fail("Please fill in all required fields")
            .with("fields", missing)
            .into_response());
    };

    if !email.contains('@') {
        return Ok(ApiResponse::fail("Please provide a valid email address")
            .with("fields", ["email"])
            .into_response());
    }

    let service = required(form.service);
    let contact = state.content.add_contact(NewContact {
        name,
        email,
        service: service.clone(),
        message,
        ip: Some(ip.to_string()),
        user_agent: user_agent(&headers),
    })?;

    state.events.record(
        EventKind::ContactFormSubmit,
        json!({ "contactId": contact.id, "service": service, "ip": ip.to_string() }),
    );
    info!(contact_id = %contact.id, "New contact form submission");

    Ok(ApiResponse::ok()
        .message("Message received! We will get back to you soon.")
        .with("contactId", contact.id)
        .into_response())
}
