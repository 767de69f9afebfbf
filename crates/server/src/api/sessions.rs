use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use askdesk_assistant::Session;

use crate::state::AppState;

use super::{api_error, ApiError};

#[derive(Debug, Deserialize)]
pub struct BotToggleRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct BotToggleResponse {
    pub session_id: String,
    pub bot_enabled: bool,
}

/// Hand a conversation to a human operator (`enabled: false`) or back to the bot.
pub async fn session_set_bot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<BotToggleRequest>,
) -> Result<Json<BotToggleResponse>, ApiError> {
    state.sessions.set_bot_enabled(&id, req.enabled).await.map_err(|e| {
        error!(session_id = %id, error = %e, "failed to update bot flag");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to update session")
    })?;
    info!(session_id = %id, enabled = req.enabled, "bot flag updated");
    Ok(Json(BotToggleResponse { session_id: id, bot_enabled: req.enabled }))
}

pub async fn session_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    match state.sessions.session(&id).await {
        Ok(Some(session)) => Ok(Json(session)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("session not found: {id}"))),
        Err(e) => {
            error!(session_id = %id, error = %e, "failed to read session");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read session"))
        }
    }
}
