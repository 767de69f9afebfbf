//! Chat endpoints: blocking JSON and SSE with queue position updates.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::Json;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use askdesk_assistant::AssistantResponse;
use askdesk_core::ChatRequest;
use askdesk_queue::{JobHandle, JobState, JobStatus};

use crate::state::AppState;

use super::{api_error, queue_error_response, ApiError};

/// Longest accepted question, in characters.
pub(crate) const MAX_TEXT_CHARS: usize = 2000;
const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub job_id: String,
    #[serde(flatten)]
    pub response: AssistantResponse,
}

#[derive(Debug, Serialize)]
struct QueuedEvent<'a> {
    job_id: &'a str,
    position: usize,
    eta_secs: f64,
}

#[derive(Debug, Serialize)]
struct ActiveEvent<'a> {
    job_id: &'a str,
}

fn validate(req: &ChatRequest) -> Result<(), ApiError> {
    let session = req.session_id.trim();
    if session.is_empty() || session.len() > MAX_SESSION_ID_LEN {
        return Err(api_error(StatusCode::BAD_REQUEST, "session_id must be 1-128 characters"));
    }
    let text = req.text.trim();
    if text.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "text must not be empty"));
    }
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(api_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("text exceeds {MAX_TEXT_CHARS} characters"),
        ));
    }
    Ok(())
}

fn submit(state: &AppState, req: ChatRequest) -> Result<JobHandle<AssistantResponse>, ApiError> {
    validate(&req)?;
    let user_key = req.user_key();
    let channel = req.channel;
    state
        .queue
        .submit(user_key, channel, req)
        .map_err(|e| queue_error_response(&e))
}

/// Ask a question and wait for the answer.
///
/// Admission rejections map to 429 and deadline overruns to 504, both with a
/// user-facing `message`.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    let handle = submit(&state, req)?;
    let job_id = handle.id().to_string();
    let response = handle.wait().await.map_err(|e| queue_error_response(&e))?;
    Ok(Json(ChatReply { job_id, response }))
}

/// Ask a question over SSE.
///
/// Event types: `queued` (position, eta_secs), `active`, then one terminal
/// `answer` or `error`. Rejections happen before the stream opens.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<KeepAliveStream<ReceiverStream<Result<Event, Infallible>>>>, ApiError> {
    let handle = submit(&state, req)?;
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(forward_job(handle, tx));
    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

fn sse_event(name: &'static str, payload: &impl Serialize) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|_| Event::default().event(name))
}

/// Relay status changes until the job settles, then the result.
async fn forward_job(handle: JobHandle<AssistantResponse>, tx: mpsc::Sender<Result<Event, Infallible>>) {
    let job_id = handle.id().to_string();
    let mut status = handle.status();
    let mut last: Option<JobStatus> = None;

    let initial = *status.borrow_and_update();
    if !send_status(&tx, &job_id, initial, &mut last).await {
        return;
    }

    let wait = handle.wait();
    tokio::pin!(wait);
    let result = loop {
        tokio::select! {
            result = &mut wait => break result,
            changed = status.changed() => {
                if changed.is_err() {
                    break (&mut wait).await;
                }
                let current = *status.borrow_and_update();
                if !send_status(&tx, &job_id, current, &mut last).await {
                    return;
                }
            }
        }
    };

    let event = match result {
        Ok(response) => sse_event("answer", &ChatReply { job_id: job_id.clone(), response }),
        Err(e) => {
            let (_, Json(body)) = queue_error_response(&e);
            sse_event("error", &body)
        }
    };
    if tx.send(Ok(event)).await.is_err() {
        debug!(job_id = %job_id, "stream client went away before the answer");
    }
}

/// Returns false once the client is gone.
async fn send_status(
    tx: &mpsc::Sender<Result<Event, Infallible>>,
    job_id: &str,
    status: JobStatus,
    last: &mut Option<JobStatus>,
) -> bool {
    if last.as_ref() == Some(&status) {
        return true;
    }
    let event = match status.state {
        JobState::Queued => sse_event(
            "queued",
            &QueuedEvent { job_id, position: status.position, eta_secs: status.eta_secs },
        ),
        JobState::Active => sse_event("active", &ActiveEvent { job_id }),
        _ => return true,
    };
    *last = Some(status);
    if tx.send(Ok(event)).await.is_err() {
        debug!(job_id = %job_id, "stream client disconnected, job continues");
        return false;
    }
    true
}
