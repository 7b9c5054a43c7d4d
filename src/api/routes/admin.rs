use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::public::user_agent;
use crate::api::error::{json_body, ApiError, ApiResponse, ApiResult};
use crate::api::gate::ClientIp;
use crate::api::state::AppState;
use crate::auth::manager::AuthError;
use crate::models::contact::ContactStatus;
use crate::models::event::EventKind;
use crate::models::site::{NewService, ServiceUpdate, SiteSettingsUpdate};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    headers: HeaderMap,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult {
    let creds = json_body(body)?;
    if creds.username.is_empty() || creds.password.is_empty() {
        return Err(ApiError::Validation("Username and password are required".into()));
    }

    let ua = user_agent(&headers);
    match state
        .auth
        .authenticate(&creds.username, &creds.password, &ip.to_string(), ua.as_deref())
    {
        Ok(login) => Ok(ApiResponse::ok()
            .message("Login successful")
            .with("token", &login.token)
            .with("expiresIn", login.expires_in)
            .with("user", &login.user)),
        Err(AuthError::InvalidCredentials) => {
            Err(ApiError::Unauthorized("Invalid credentials".into()))
        }
        Err(e @ AuthError::Token(_)) => Err(ApiError::internal(e)),
    }
}

pub async fn site_data(State(state): State<AppState>) -> ApiResult {
    Ok(ApiResponse::ok().data(state.content.site_data()?))
}

pub async fn update_site_settings(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    body: Result<Json<SiteSettingsUpdate>, JsonRejection>,
) -> ApiResult {
    let update = json_body(body)?;
    let (_, changed) = state.content.update_settings(update)?;
    state.events.record(
        EventKind::SiteSettingsUpdated,
        json!({ "changes": changed, "ip": ip.to_string() }),
    );
    Ok(ApiResponse::ok()
        .message("Site settings updated successfully")
        .data(state.content.site_data()?))
}

pub async fn add_service(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    body: Result<Json<NewService>, JsonRejection>,
) -> ApiResult {
    let new = json_body(body)?;
    if new.name.trim().is_empty() {
        return Err(ApiError::Validation("Service name is required".into()));
    }
    let service = state.content.add_service(new)?;
    state.events.record(
        EventKind::ServiceAdded,
        json!({ "serviceId": service.id, "serviceName": service.name, "ip": ip.to_string() }),
    );
    Ok(ApiResponse::ok()
        .message("Service added successfully")
        .with("service", service))
}

fn service_id(raw: &str) -> ApiResult<i64> {
    raw.parse()
        .map_err(|_| ApiError::NotFound("Service not found".into()))
}

pub async fn update_service(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Path(id): Path<String>,
    body: Result<Json<ServiceUpdate>, JsonRejection>,
) -> ApiResult {
    let id = service_id(&id)?;
    let update = json_body(body)?;
    let service = state
        .content
        .update_service(id, update)?
        .ok_or_else(|| ApiError::NotFound("Service not found".into()))?;
    state.events.record(
        EventKind::ServiceUpdated,
        json!({ "serviceId": id, "ip": ip.to_string() }),
    );
    Ok(ApiResponse::ok()
        .message("Service updated successfully")
        .with("service", service))
}

pub async fn delete_service(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = service_id(&id)?;
    if !state.content.delete_service(id)? {
        return Err(ApiError::NotFound("Service not found".into()));
    }
    state.events.record(
        EventKind::ServiceDeleted,
        json!({ "serviceId": id, "ip": ip.to_string() }),
    );
    Ok(ApiResponse::ok().message("Service deleted successfully"))
}

pub async fn contacts(State(state): State<AppState>) -> ApiResult {
    Ok(ApiResponse::ok().with("contacts", state.content.contacts()?))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

pub async fn update_contact_status(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Path(id): Path<String>,
    body: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    let status = ContactStatus::from_str_name(&req.status).ok_or_else(|| {
        ApiError::Validation("Status must be one of: new, read, replied, archived".into())
    })?;
    let contact = state
        .content
        .set_contact_status(&id, status)?
        .ok_or_else(|| ApiError::NotFound("Contact not found".into()))?;
    state.events.record(
        EventKind::ContactStatusUpdated,
        json!({ "contactId": id, "status": status.as_str(), "ip": ip.to_string() }),
    );
    Ok(ApiResponse::ok()
        .message("Contact status updated")
        .with("contact", contact))
}

fn analytics_summary(state: &AppState) -> ApiResult<Value> {
    Ok(json!({
        "totalVisits": state.events.count(EventKind::PageView)?,
        "totalContacts": state.events.count(EventKind::ContactFormSubmit)?,
        "adminLogins": state.events.count(EventKind::AuthSuccess)?,
        "recentActivity": state.events.recent(50)?,
    }))
}

pub async fn analytics(State(state): State<AppState>) -> ApiResult {
    Ok(ApiResponse::ok().with("analytics", analytics_summary(&state)?))
}

pub async fn backup(State(state): State<AppState>) -> ApiResult<Response> {
    let now = Utc::now();
    let body = ApiResponse::ok()
        .with("siteData", state.content.site_data()?)
        .with("contacts", state.content.contacts()?)
        .with("analytics", state.events.all()?)
        .with("timestamp", now.to_rfc3339());

    let disposition = format!("attachment; filename=backup-{}.json", now.timestamp_millis());
    let mut resp = body.into_response();
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        resp.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(resp)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    pub site_data: Option<Map<String, Value>>,
}

pub async fn restore(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    body: Result<Json<RestoreRequest>, JsonRejection>,
) -> ApiResult {
    let req = json_body(body)?;
    let Some(mut site_data) = req.site_data else {
        return Err(ApiError::Validation("Invalid backup data".into()));
    };

    let services = match site_data.remove("services") {
        Some(v) => Some(
            serde_json::from_value::<Vec<NewService>>(v)
                .map_err(|e| ApiError::Validation(format!("Invalid services in backup: {}", e)))?,
        ),
        None => None,
    };
    let settings: SiteSettingsUpdate = serde_json::from_value(Value::Object(site_data))
        .map_err(|e| ApiError::Validation(format!("Invalid site data in backup: {}", e)))?;

    state.content.restore(settings, services)?;
    state
        .events
        .record(EventKind::DataRestored, json!({ "ip": ip.to_string() }));
    Ok(ApiResponse::ok().message("Data restored successfully"))
}
