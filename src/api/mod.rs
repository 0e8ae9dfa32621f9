//! API handlers for the library REST endpoints

pub mod access;
pub mod auth;
pub mod books;
pub mod cookies;
pub mod health;
pub mod mailing;
pub mod openapi;

use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

/// Plain message body
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Welcome message
#[utoipa::path(
    get,
    path = "/",
    tag = "health",
    responses(
        (status = 200, description = "Welcome message", body = MessageResponse)
    )
)]
pub async fn welcome() -> Json<MessageResponse> {
    Json(MessageResponse::new("Welcome to the library API"))
}
