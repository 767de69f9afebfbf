//! HTTP endpoints, one module per concern.

mod chat;
mod faq;
mod health;
mod sessions;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use askdesk_queue::QueueError;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// User-facing text safe to show in a chat bubble.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into(), message: None }))
}

pub(crate) const BUSY_MESSAGE: &str =
    "We're answering a lot of questions right now. Please try again shortly.";
pub(crate) const TIMEOUT_MESSAGE: &str =
    "Sorry, this is taking longer than expected. Please ask again in a moment.";
pub(crate) const FAILURE_MESSAGE: &str =
    "Sorry, something went wrong while answering. Please try again.";

/// Map a queue failure to a status and a friendly body. Raw errors are never shown to users.
pub(crate) fn queue_error_response(err: &QueueError) -> ApiError {
    let (status, code, message) = match err {
        QueueError::CapacityExceeded { .. } => (StatusCode::TOO_MANY_REQUESTS, "capacity_exceeded", BUSY_MESSAGE),
        QueueError::UserLimitExceeded { .. } => (StatusCode::TOO_MANY_REQUESTS, "user_limit_exceeded", BUSY_MESSAGE),
        QueueError::TimedOut(_) => (StatusCode::GATEWAY_TIMEOUT, "timed_out", TIMEOUT_MESSAGE),
        QueueError::Closed => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down", BUSY_MESSAGE),
        QueueError::Failed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "failed", FAILURE_MESSAGE),
    };
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: Some(message.to_string()),
        }),
    )
}

// ── Re-exports ───────────────────────────────────────────────────

pub use chat::{chat, chat_stream};
pub use faq::{faq_create, faq_delete, faq_list, faq_purge};
pub use health::{health, llm_usage, queue_status, telemetry};
pub use sessions::{session_get, session_set_bot};
