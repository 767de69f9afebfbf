//! Server startup: build the component graph and spawn background tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use askdesk_assistant::{
    Assistant, FaqCache, FileSessionStore, InMemorySessionStore, PromptBuilder, SessionStore, TelemetryLog,
};
use askdesk_core::Config;
use askdesk_llm::LlmGateway;
use askdesk_queue::{AdmissionQueue, QueueSettings};
use askdesk_retrieval::{create_embedder, HybridRetriever, InMemoryIndex, RetrieverSettings};

use crate::background;
use crate::state::AppState;

/// Job events kept for `/api/telemetry`.
const TELEMETRY_CAPACITY: usize = 1000;

/// Load the index, build the provider chain and wire the assistant behind the queue.
///
/// The worker pool starts here, so this must run inside the Tokio runtime.
pub fn build_app_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let index = InMemoryIndex::load(&config.retrieval.index_path).with_context(|| {
        format!("failed to load knowledge index {}", config.retrieval.index_path.display())
    })?;
    let index_chunks = index.chunks().len();
    let embedder = create_embedder(&config.embedding, &config.llm, &config.ollama);
    if embedder.is_none() {
        info!("no query embedder configured, retrieval is sparse-only");
    }
    let retriever = Arc::new(HybridRetriever::new(
        Arc::new(index),
        embedder,
        RetrieverSettings::from(&config.retrieval),
    ));

    let gateway = Arc::new(
        LlmGateway::from_config(&config.llm, &config.ollama).context("failed to build LLM provider chain")?,
    );
    let prompts = PromptBuilder::from_config(&config.assistant).context("invalid prompt template")?;

    let sessions: Arc<dyn SessionStore> = match &config.session.dir {
        Some(dir) => {
            let store = FileSessionStore::new(dir, config.session.history_turns)
                .with_context(|| format!("failed to open session dir {}", dir.display()))?;
            info!(dir = %dir.display(), "session store: json files");
            Arc::new(store)
        }
        None => {
            info!("session store: in-memory");
            Arc::new(InMemorySessionStore::new(config.session.history_turns))
        }
    };
    let faq = Arc::new(FaqCache::new(Duration::from_secs(config.faq.ttl_secs)));
    let telemetry = Arc::new(TelemetryLog::new(TELEMETRY_CAPACITY));

    let assistant = Assistant::new(
        Arc::clone(&sessions),
        Arc::clone(&faq),
        retriever,
        Arc::clone(&gateway),
        prompts,
        telemetry.clone(),
    )
    .with_top_k(config.retrieval.top_k)
    .with_fallback_message(config.assistant.fallback_message.clone());

    let queue = Arc::new(AdmissionQueue::start(Arc::new(assistant), QueueSettings::from(&config.queue)));

    Ok(Arc::new(AppState {
        queue,
        sessions,
        faq,
        gateway,
        telemetry,
        index_chunks,
        started_at: Instant::now(),
    }))
}

/// Spawn the FAQ sweep and the session prune loop. Both stop when `shutdown` flips.
pub fn spawn_background_tasks(
    config: &Config,
    state: &AppState,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    vec![
        background::spawn_faq_purge(
            Arc::clone(&state.faq),
            Duration::from_secs(config.faq.purge_interval_secs),
            shutdown.clone(),
        ),
        background::spawn_session_prune(
            Arc::clone(&state.sessions),
            Duration::from_secs(config.session.idle_timeout_secs),
            Duration::from_secs(config.session.prune_interval_secs),
            shutdown,
        ),
    ]
}
