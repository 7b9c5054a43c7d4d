pub mod admin;
pub mod public;
pub mod security;

use crate::api::error::ApiError;

pub async fn api_not_found() -> ApiError {
    ApiError::NotFound("API endpoint not found".into())
}
