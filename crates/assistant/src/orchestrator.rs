//! Per-request pipeline: bot gate → FAQ → history + retrieval → prompt → gateway.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use askdesk_core::config::DEFAULT_FALLBACK_MESSAGE;
use askdesk_core::{ChatRequest, Turn};
use askdesk_llm::{GatewayError, LlmGateway};
use askdesk_queue::{JobContext, JobHandler, JobReport, JobState};
use askdesk_retrieval::{HybridRetriever, RetrievalResult};

use crate::error::AssistantError;
use crate::faq::FaqCache;
use crate::gesture::{classify, GestureTag};
use crate::prompt::PromptBuilder;
use crate::session::SessionStore;
use crate::telemetry::{JobEvent, JobObserver, JobOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Answered,
    FaqHit,
    /// Every provider failed; `answer` holds the configured fallback message.
    Fallback,
    /// A human operator owns the conversation; no answer is produced.
    BotDisabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantResponse {
    pub session_id: String,
    pub kind: ResponseKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gesture: Option<GestureTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Source documents of the context chunks, in prompt order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AssistantResponse {
    fn new(req: &ChatRequest, kind: ResponseKind) -> Self {
        Self {
            session_id: req.session_id.clone(),
            kind,
            answer: None,
            gesture: None,
            provider: None,
            model: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            sources: Vec::new(),
            correlation_id: req.correlation_id.clone(),
        }
    }

    pub fn outcome(&self) -> JobOutcome {
        match self.kind {
            ResponseKind::Answered => JobOutcome::Answered,
            ResponseKind::FaqHit => JobOutcome::FaqHit,
            ResponseKind::Fallback => JobOutcome::Fallback,
            ResponseKind::BotDisabled => JobOutcome::BotDisabled,
        }
    }
}

/// Stateless orchestrator over shared collaborators.
pub struct Assistant {
    sessions: Arc<dyn SessionStore>,
    faq: Arc<FaqCache>,
    retriever: Arc<HybridRetriever>,
    gateway: Arc<LlmGateway>,
    prompts: PromptBuilder,
    observer: Arc<dyn JobObserver>,
    top_k: usize,
    fallback_message: String,
}

impl Assistant {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        faq: Arc<FaqCache>,
        retriever: Arc<HybridRetriever>,
        gateway: Arc<LlmGateway>,
        prompts: PromptBuilder,
        observer: Arc<dyn JobObserver>,
    ) -> Self {
        Self {
            sessions,
            faq,
            retriever,
            gateway,
            prompts,
            observer,
            top_k: 8,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_fallback_message(mut self, message: impl Into<String>) -> Self {
        self.fallback_message = message.into();
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn faq(&self) -> &Arc<FaqCache> {
        &self.faq
    }

    pub async fn answer(&self, req: &ChatRequest) -> Result<AssistantResponse, AssistantError> {
        let question = req.text.trim();
        if question.is_empty() {
            return Err(AssistantError::EmptyQuestion);
        }

        if !self.sessions.get_bot_enabled(&req.session_id).await? {
            debug!(session_id = %req.session_id, "bot disabled for session, skipping");
            return Ok(AssistantResponse::new(req, ResponseKind::BotDisabled));
        }

        if let Some(hit) = self.faq.lookup(question) {
            debug!(session_id = %req.session_id, hits = hit.hit_count, "faq hit");
            let mut response = AssistantResponse::new(req, ResponseKind::FaqHit);
            response.gesture = self.gesture_for(req, &hit.answer);
            response.answer = Some(hit.answer);
            return Ok(response);
        }

        let history = self.sessions.get(&req.session_id).await?;
        let retrieval = match self.retriever.retrieve(question, self.top_k).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "retrieval failed, answering without context");
                RetrievalResult::default()
            }
        };
        let prompt = self.prompts.build(question, &history, &retrieval.chunks);

        match self.gateway.generate(&prompt).await {
            Ok(generated) => {
                self.persist_exchange(req, question, &generated.text).await;
                if retrieval.is_empty() {
                    debug!(session_id = %req.session_id, "no context retrieved, answer not cached");
                } else {
                    self.faq.record(question, &generated.text);
                }

                let mut response = AssistantResponse::new(req, ResponseKind::Answered);
                response.gesture = self.gesture_for(req, &generated.text);
                response.provider = Some(generated.provider_id);
                response.model = Some(generated.model);
                response.prompt_tokens = generated.prompt_tokens;
                response.completion_tokens = generated.completion_tokens;
                response.sources = retrieval.chunks.iter().map(|c| c.source_doc.clone()).collect();
                response.answer = Some(generated.text);
                Ok(response)
            }
            Err(GatewayError::AllProvidersExhausted { attempts }) => {
                error!(
                    session_id = %req.session_id,
                    attempts = attempts.len(),
                    last_error = attempts.last().map(|a| a.error.as_str()).unwrap_or("-"),
                    "all LLM providers exhausted, returning fallback"
                );
                let mut response = AssistantResponse::new(req, ResponseKind::Fallback);
                response.answer = Some(self.fallback_message.clone());
                Ok(response)
            }
        }
    }

    async fn persist_exchange(&self, req: &ChatRequest, question: &str, answer: &str) {
        let exchange = [Turn::user(question), Turn::assistant(answer)];
        if let Err(e) = self.sessions.append_exchange(&req.session_id, req.channel, exchange).await {
            warn!(session_id = %req.session_id, error = %e, "failed to persist exchange");
        }
    }

    fn gesture_for(&self, req: &ChatRequest, answer: &str) -> Option<GestureTag> {
        req.channel.is_avatar_facing().then(|| classify(answer))
    }
}

#[async_trait]
impl JobHandler for Assistant {
    type Payload = ChatRequest;
    type Output = AssistantResponse;

    async fn handle(&self, job: JobContext<ChatRequest>) -> anyhow::Result<AssistantResponse> {
        let response = self.answer(&job.payload).await?;
        info!(job_id = %job.id, kind = ?response.kind, "request handled");
        Ok(response)
    }

    fn observe(&self, report: JobReport<'_, AssistantResponse>) {
        let outcome = match (report.state, report.output) {
            (JobState::TimedOut, _) => JobOutcome::TimedOut,
            (_, Some(output)) => output.outcome(),
            _ => JobOutcome::Failed,
        };
        let output = report.output;
        self.observer.record(JobEvent {
            job_id: report.id.to_string(),
            timestamp: Utc::now(),
            channel: report.channel,
            latency_ms: report.processing.as_millis() as u64,
            queue_wait_ms: report.queue_wait.as_millis() as u64,
            provider: output.and_then(|o| o.provider.clone()),
            model: output.and_then(|o| o.model.clone()),
            prompt_tokens: output.map_or(0, |o| o.prompt_tokens),
            completion_tokens: output.map_or(0, |o| o.completion_tokens),
            cache_hit: output.is_some_and(|o| o.kind == ResponseKind::FaqHit),
            outcome,
        });
    }
}
