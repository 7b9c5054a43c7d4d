use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::error;

use super::state::AppState;
use crate::storage::blocklist::BlocklistError;

const INTERNAL_MESSAGE: &str = "Internal server error";

/// Detail of a 500 response, kept off the body and carried as a response
/// extension for [`expose_internal_detail`].
#[derive(Debug, Clone)]
pub struct InternalDetail(pub String);

/// The `{success, message?, data?, code?}` envelope every JSON endpoint returns.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
            code: None,
            extra: Map::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn data(mut self, data: impl Serialize) -> Self {
        self.data = Some(serde_json::to_value(data).unwrap_or(Value::Null));
        self
    }

    pub fn code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    /// Extra top-level field next to `success`.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        self.extra
            .insert(key.to_string(), serde_json::to_value(value).unwrap_or(Value::Null));
        self
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let status = if self.success {
            StatusCode::OK
        } else {
            StatusCode::BAD_REQUEST
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    Gate { code: &'static str, message: String },
    #[error("Request body too large")]
    PayloadTooLarge,
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Gate { .. } => StatusCode::FORBIDDEN,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Gate { code, message } => ApiResponse::fail(message).code(code),
            ApiError::Internal(detail) => {
                error!(error = %detail, "Internal error");
                let mut resp = (status, Json(ApiResponse::fail(INTERNAL_MESSAGE))).into_response();
                resp.extensions_mut().insert(InternalDetail(detail));
                return resp;
            }
            other => ApiResponse::fail(other.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

/// With `server.development` on, 500 responses also carry the error detail.
pub async fn expose_internal_detail(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let resp = next.run(req).await;
    if !state.settings.server.development {
        return resp;
    }
    match resp.extensions().get::<InternalDetail>() {
        Some(InternalDetail(detail)) => {
            let body = ApiResponse::fail(INTERNAL_MESSAGE).with("error", detail);
            (resp.status(), Json(body)).into_response()
        }
        None => resp,
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::internal(e)
    }
}

impl From<BlocklistError> for ApiError {
    fn from(e: BlocklistError) -> Self {
        match e {
            BlocklistError::InvalidAddress(addr) => {
                ApiError::Validation(format!("Invalid IP address or CIDR: {}", addr))
            }
            BlocklistError::Storage(inner) => ApiError::internal(inner),
        }
    }
}

pub type ApiResult<T = ApiResponse> = Result<T, ApiError>;

/// Unwrap a JSON body extraction, turning rejections into the 400 envelope.
pub fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(v)| v)
        .map_err(|e| ApiError::Validation(e.body_text()))
}
