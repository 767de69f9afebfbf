use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use askdesk_assistant::{
    Assistant, FaqCache, InMemorySessionStore, JobOutcome, PromptBuilder, ResponseKind, Session, SessionError,
    SessionStore, TelemetryLog,
};
use askdesk_core::{ChatRequest, Channel, InputMode, KnowledgeChunk, Turn, TurnRole};
use askdesk_llm::{
    Completion, GenerationParams, LlmError, LlmGateway, LlmProvider, Message, ProviderDescriptor, ProviderKind,
    ProviderRoute, RetryPolicy,
};
use askdesk_queue::{AdmissionQueue, QueueSettings};
use askdesk_retrieval::{FusionWeights, HybridRetriever, InMemoryIndex, RetrieverSettings};

// ── Fixtures ──────────────────────────────────────────────────

/// Provider that either answers with a fixed text or fails fatally, and keeps every prompt it saw.
struct ScriptedProvider {
    reply: Option<String>,
    calls: AtomicU32,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    fn answering(text: &str) -> Arc<Self> {
        Arc::new(Self { reply: Some(text.into()), calls: AtomicU32::new(0), prompts: Mutex::new(Vec::new()) })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self { reply: None, calls: AtomicU32::new(0), prompts: Mutex::new(Vec::new()) })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_system_prompt(&self) -> String {
        let prompts = self.prompts.lock().unwrap();
        prompts.last().unwrap()[0].content.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        _model: &str,
        messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        match &self.reply {
            Some(text) => Ok(Completion {
                text: text.clone(),
                prompt_tokens: Some(120),
                completion_tokens: Some(12),
            }),
            None => Err(LlmError::ApiError { status: 400, body: "bad request".into() }),
        }
    }
}

fn gateway(provider: Arc<ScriptedProvider>) -> Arc<LlmGateway> {
    let descriptor = ProviderDescriptor {
        id: "scripted".into(),
        kind: ProviderKind::Ollama,
        models: vec!["test-model".into()],
        max_retries: 1,
        retry_base_delay_ms: 1,
        base_url: None,
        api_key_env: None,
    };
    Arc::new(LlmGateway::new(
        vec![ProviderRoute { descriptor, provider }],
        GenerationParams::default(),
        RetryPolicy { max_delay: Duration::from_millis(5), attempt_timeout: Duration::from_secs(5) },
    ))
}

fn chunk(id: &str, text: &str, tokens: usize) -> KnowledgeChunk {
    KnowledgeChunk {
        chunk_id: id.into(),
        text: text.into(),
        dense_vector: vec![],
        sparse_terms: HashMap::from([("registration".to_string(), 1), ("deadline".to_string(), 1)]),
        source_doc: format!("{id}.pdf"),
        offset: 0,
        source_updated_at: None,
        token_count: tokens,
    }
}

fn retriever(chunks: Vec<KnowledgeChunk>, max_context_tokens: usize) -> Arc<HybridRetriever> {
    let settings = RetrieverSettings {
        candidates: 20,
        weights: FusionWeights::default(),
        max_context_tokens,
    };
    Arc::new(HybridRetriever::new(Arc::new(InMemoryIndex::from_chunks(chunks)), None, settings))
}

struct Harness {
    assistant: Assistant,
    sessions: Arc<InMemorySessionStore>,
    faq: Arc<FaqCache>,
    telemetry: Arc<TelemetryLog>,
}

fn assistant(
    sessions: Arc<dyn SessionStore>,
    faq: Arc<FaqCache>,
    telemetry: Arc<TelemetryLog>,
    provider: Arc<ScriptedProvider>,
    chunks: Vec<KnowledgeChunk>,
    max_context_tokens: usize,
) -> Assistant {
    Assistant::new(
        sessions,
        faq,
        retriever(chunks, max_context_tokens),
        gateway(provider),
        PromptBuilder::with_default_template(4),
        telemetry,
    )
    .with_top_k(10)
    .with_fallback_message("Sorry, I can't answer right now.")
}

fn harness(provider: Arc<ScriptedProvider>, chunks: Vec<KnowledgeChunk>, max_context_tokens: usize) -> Harness {
    let sessions = Arc::new(InMemorySessionStore::new(20));
    let faq = Arc::new(FaqCache::new(Duration::from_secs(3600)));
    let telemetry = Arc::new(TelemetryLog::new(100));
    let assistant = assistant(
        sessions.clone(),
        faq.clone(),
        telemetry.clone(),
        provider,
        chunks,
        max_context_tokens,
    );
    Harness { assistant, sessions, faq, telemetry }
}

/// Session store whose writes fail after the first `ok_writes`, like a disk filling up.
struct FlakyWrites {
    inner: InMemorySessionStore,
    ok_writes: u32,
    writes: AtomicU32,
}

impl FlakyWrites {
    fn new(ok_writes: u32) -> Arc<Self> {
        Arc::new(Self { inner: InMemorySessionStore::new(20), ok_writes, writes: AtomicU32::new(0) })
    }

    fn check_write(&self) -> Result<(), SessionError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) >= self.ok_writes {
            return Err(std::io::Error::other("no space left on device").into());
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FlakyWrites {
    async fn get(&self, session_id: &str) -> Result<Vec<Turn>, SessionError> {
        self.inner.get(session_id).await
    }

    async fn append(&self, session_id: &str, platform: Channel, turn: Turn) -> Result<(), SessionError> {
        self.check_write()?;
        self.inner.append(session_id, platform, turn).await
    }

    async fn append_exchange(
        &self,
        session_id: &str,
        platform: Channel,
        exchange: [Turn; 2],
    ) -> Result<(), SessionError> {
        self.check_write()?;
        self.inner.append_exchange(session_id, platform, exchange).await
    }

    async fn get_bot_enabled(&self, session_id: &str) -> Result<bool, SessionError> {
        self.inner.get_bot_enabled(session_id).await
    }

    async fn set_bot_enabled(&self, session_id: &str, enabled: bool) -> Result<(), SessionError> {
        self.inner.set_bot_enabled(session_id, enabled).await
    }

    async fn session(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        self.inner.session(session_id).await
    }

    async fn prune_inactive(&self, idle: Duration) -> Result<usize, SessionError> {
        self.inner.prune_inactive(idle).await
    }
}

fn request(session: &str, channel: Channel, text: &str) -> ChatRequest {
    ChatRequest {
        session_id: session.into(),
        channel,
        text: text.into(),
        mode: InputMode::Text,
        correlation_id: None,
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn answered_exchange_is_persisted_and_cached() {
    let provider = ScriptedProvider::answering("Registration closes on March 15th.");
    let h = harness(provider.clone(), vec![chunk("calendar", "Registration deadline is March 15.", 20)], 1000);

    let resp = h
        .assistant
        .answer(&request("s1", Channel::Web, "What is the registration deadline?"))
        .await
        .unwrap();

    assert_eq!(resp.kind, ResponseKind::Answered);
    assert_eq!(resp.answer.as_deref(), Some("Registration closes on March 15th."));
    assert_eq!(resp.provider.as_deref(), Some("scripted"));
    assert_eq!(resp.sources, vec!["calendar.pdf".to_string()]);
    assert!(resp.gesture.is_none(), "gestures are only produced for avatar channels");

    let history = h.sessions.get("s1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, TurnRole::User);
    assert_eq!(history[1].content, "Registration closes on March 15th.");
    assert_eq!(h.faq.len(), 1);
}

#[tokio::test]
async fn faq_hit_skips_generation_and_history() {
    let provider = ScriptedProvider::answering("generated");
    let h = harness(provider.clone(), vec![], 1000);
    h.faq.record_admin("Where is the library?", "Building C, second floor.", None);

    let resp = h
        .assistant
        .answer(&request("s1", Channel::Avatar, "where is the LIBRARY"))
        .await
        .unwrap();

    assert_eq!(resp.kind, ResponseKind::FaqHit);
    assert_eq!(resp.answer.as_deref(), Some("Building C, second floor."));
    assert!(resp.gesture.is_some());
    assert_eq!(provider.calls(), 0);
    assert!(h.sessions.get("s1").await.unwrap().is_empty());
}

#[tokio::test]
async fn provider_exhaustion_returns_fallback_without_mutation() {
    let provider = ScriptedProvider::failing();
    let h = harness(provider.clone(), vec![chunk("calendar", "Registration deadline is March 15.", 20)], 1000);

    let resp = h
        .assistant
        .answer(&request("s1", Channel::Web, "registration deadline"))
        .await
        .unwrap();

    assert_eq!(resp.kind, ResponseKind::Fallback);
    assert_eq!(resp.answer.as_deref(), Some("Sorry, I can't answer right now."));
    assert_eq!(provider.calls(), 1, "fatal errors are not retried");
    assert!(h.sessions.get("s1").await.unwrap().is_empty());
    assert!(h.faq.is_empty());
}

#[tokio::test]
async fn disabled_bot_produces_no_answer() {
    let provider = ScriptedProvider::answering("generated");
    let h = harness(provider.clone(), vec![], 1000);
    h.sessions.set_bot_enabled("s1", false).await.unwrap();

    let resp = h.assistant.answer(&request("s1", Channel::WhatsApp, "hello?")).await.unwrap();

    assert_eq!(resp.kind, ResponseKind::BotDisabled);
    assert!(resp.answer.is_none());
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn context_respects_token_budget() {
    let provider = ScriptedProvider::answering("It is in March.");
    let chunks = (0..10)
        .map(|i| chunk(&format!("doc{i}"), &format!("Registration deadline excerpt {i}."), 100))
        .collect();
    let h = harness(provider.clone(), chunks, 500);

    let resp = h
        .assistant
        .answer(&request("s1", Channel::Web, "registration deadline"))
        .await
        .unwrap();

    assert_eq!(resp.sources.len(), 5);
    let system = provider.last_system_prompt();
    for n in 1..=5 {
        assert!(system.contains(&format!("[{n}] (")), "missing excerpt {n}");
    }
    assert!(!system.contains("[6] ("));
}

#[tokio::test]
async fn avatar_answers_carry_gesture() {
    let provider = ScriptedProvider::answering("Hello! Welcome to the help desk.");
    let h = harness(provider, vec![], 1000);

    let resp = h.assistant.answer(&request("s1", Channel::Avatar, "hi there")).await.unwrap();

    assert_eq!(resp.gesture, Some(askdesk_assistant::GestureTag::Greeting));
}

#[tokio::test]
async fn blank_question_is_rejected() {
    let h = harness(ScriptedProvider::answering("x"), vec![], 1000);
    assert!(h.assistant.answer(&request("s1", Channel::Web, "   ")).await.is_err());
}

#[tokio::test]
async fn queued_jobs_emit_telemetry() {
    let provider = ScriptedProvider::answering("Registration closes on March 15th.");
    let h = harness(provider, vec![chunk("calendar", "Registration deadline is March 15.", 20)], 1000);
    let telemetry = h.telemetry.clone();
    let queue = AdmissionQueue::start(Arc::new(h.assistant), QueueSettings::default());

    let req = request("s9", Channel::Telegram, "registration deadline");
    let handle = queue.submit(req.user_key(), req.channel, req.clone()).unwrap();
    let resp = handle.wait().await.unwrap();
    assert_eq!(resp.kind, ResponseKind::Answered);

    for _ in 0..100 {
        if !telemetry.recent(1).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let events = telemetry.recent(10);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, JobOutcome::Answered);
    assert_eq!(events[0].channel, Channel::Telegram);
    assert_eq!(events[0].prompt_tokens, 120);
    assert!(!events[0].cache_hit);

    queue.shutdown().await;
}

#[tokio::test]
async fn failed_history_write_leaves_no_dangling_question() {
    let provider = ScriptedProvider::answering("Registration closes on March 15th.");
    let store = FlakyWrites::new(1);
    let faq = Arc::new(FaqCache::new(Duration::from_secs(3600)));
    let assistant = assistant(
        store.clone(),
        faq,
        Arc::new(TelemetryLog::new(10)),
        provider,
        vec![chunk("calendar", "Registration deadline is March 15.", 20)],
        1000,
    );

    let first = assistant.answer(&request("s1", Channel::Web, "registration deadline")).await.unwrap();
    assert_eq!(first.kind, ResponseKind::Answered);
    let second = assistant.answer(&request("s1", Channel::Web, "when is the registration closing")).await.unwrap();
    assert_eq!(second.kind, ResponseKind::Answered, "the caller still gets the answer");

    let history: Vec<_> = store.get("s1").await.unwrap().into_iter().map(|t| (t.role, t.content)).collect();
    assert_eq!(
        history,
        vec![
            (TurnRole::User, "registration deadline".to_string()),
            (TurnRole::Assistant, "Registration closes on March 15th.".to_string()),
        ]
    );
}

#[tokio::test]
async fn answer_without_context_is_not_cached() {
    let provider = ScriptedProvider::answering("I don't have that information.");
    let h = harness(provider.clone(), vec![chunk("calendar", "Registration deadline is March 15.", 20)], 1000);

    let resp = h.assistant.answer(&request("s1", Channel::Web, "cafeteria menu")).await.unwrap();
    assert_eq!(resp.kind, ResponseKind::Answered);
    assert!(resp.sources.is_empty());
    assert!(h.faq.is_empty());

    let again = h.assistant.answer(&request("s2", Channel::Web, "cafeteria menu")).await.unwrap();
    assert_eq!(again.kind, ResponseKind::Answered);
    assert_eq!(provider.calls(), 2);
}
