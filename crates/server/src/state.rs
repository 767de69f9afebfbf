use std::sync::Arc;
use std::time::Instant;

use askdesk_assistant::{Assistant, FaqCache, SessionStore, TelemetryLog};
use askdesk_llm::LlmGateway;
use askdesk_queue::AdmissionQueue;

pub type ChatQueue = AdmissionQueue<Assistant>;

pub struct AppState {
    pub queue: Arc<ChatQueue>,
    pub sessions: Arc<dyn SessionStore>,
    pub faq: Arc<FaqCache>,
    pub gateway: Arc<LlmGateway>,
    pub telemetry: Arc<TelemetryLog>,
    /// Chunks in the loaded knowledge index.
    pub index_chunks: usize,
    pub started_at: Instant,
}
