//! FAQ administration: inspect, curate, delete, purge.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use askdesk_assistant::FaqEntry;

use crate::state::AppState;

use super::{api_error, ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct FaqListParams {
    #[serde(default)]
    pub include_expired: bool,
}

#[derive(Debug, Serialize)]
pub struct FaqListResponse {
    pub count: usize,
    pub entries: Vec<FaqEntry>,
}

#[derive(Debug, Deserialize)]
pub struct FaqCreateRequest {
    pub question: String,
    pub answer: String,
    /// Omit for an entry that never expires.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct FaqDeleteParams {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct FaqPurgeResponse {
    pub purged: usize,
    pub remaining: usize,
}

pub async fn faq_list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FaqListParams>,
) -> Json<FaqListResponse> {
    let entries = state.faq.inspect(params.include_expired);
    Json(FaqListResponse { count: entries.len(), entries })
}

pub async fn faq_create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FaqCreateRequest>,
) -> Result<(StatusCode, Json<FaqEntry>), ApiError> {
    if req.answer.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "answer must not be empty"));
    }
    let ttl = req.ttl_secs.map(Duration::from_secs);
    state
        .faq
        .record_admin(&req.question, req.answer.trim(), ttl)
        .map(|entry| (StatusCode::CREATED, Json(entry)))
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "question has no searchable words"))
}

pub async fn faq_delete(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FaqDeleteParams>,
) -> Result<StatusCode, ApiError> {
    if state.faq.remove(&params.question) {
        info!(question = %params.question, "faq entry deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(StatusCode::NOT_FOUND, format!("no faq entry for: {}", params.question)))
    }
}

pub async fn faq_purge(State(state): State<Arc<AppState>>) -> Json<FaqPurgeResponse> {
    let purged = state.faq.purge_expired();
    Json(FaqPurgeResponse { purged, remaining: state.faq.len() })
}
