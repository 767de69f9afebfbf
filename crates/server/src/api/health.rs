//! Health, queue stats, provider usage and job telemetry.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use askdesk_assistant::{JobEvent, TelemetryStats};
use askdesk_llm::ModelUsageSnapshot;
use askdesk_queue::QueueStats;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub index_chunks: usize,
    pub providers: Vec<String>,
    pub queued: usize,
    pub active: usize,
    pub accepting: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (queued, active) = state.queue.depth();
    let accepting = !state.queue.stats().closed;
    Json(HealthResponse {
        status: if accepting { "ok" } else { "draining" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        index_chunks: state.index_chunks,
        providers: state.gateway.provider_ids().into_iter().map(String::from).collect(),
        queued,
        active,
        accepting,
    })
}

pub async fn queue_status(State(state): State<Arc<AppState>>) -> Json<QueueStats> {
    Json(state.queue.stats())
}

#[derive(Serialize)]
pub struct LlmUsageResponse {
    pub models: Vec<ModelUsageSnapshot>,
}

pub async fn llm_usage(State(state): State<Arc<AppState>>) -> Json<LlmUsageResponse> {
    Json(LlmUsageResponse { models: state.gateway.usage() })
}

#[derive(Deserialize)]
pub struct TelemetryParams {
    /// Maximum number of events to return (default 50).
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct TelemetryResponse {
    pub stats: TelemetryStats,
    pub count: usize,
    pub events: Vec<JobEvent>,
}

/// Aggregate stats over the retained window plus the most recent events.
pub async fn telemetry(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TelemetryParams>,
) -> Json<TelemetryResponse> {
    let events = state.telemetry.recent(params.limit.unwrap_or(50));
    Json(TelemetryResponse {
        stats: state.telemetry.stats(),
        count: events.len(),
        events,
    })
}
