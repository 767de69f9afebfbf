//! LLM gateway: one uniform retry loop over an ordered provider/model chain.
//!
//! For each provider (in chain order) and each of its models (primary first),
//! transient failures are retried up to `max_retries` attempts with exponential
//! backoff from `retry_base_delay`, doubling per attempt and capped at
//! `max_delay`. Fatal failures move on at once: to the next model, or to the
//! next provider when the failure is provider-wide (bad credentials). Only when
//! every combination has failed does `generate` return
//! [`GatewayError::AllProvidersExhausted`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use askdesk_core::config::{LlmConfig, OllamaConfig};
use askdesk_core::text::estimate_tokens;

use crate::chain::{ProviderChain, ProviderDescriptor};
use crate::provider::{Completion, FailureKind, GenerationParams, LlmError, LlmProvider, Message};
use crate::providers::create_provider;

/// A fully assembled prompt: instructions + context, prior turns, and the question.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub history: Vec<Message>,
    pub question: String,
}

impl Prompt {
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(Message::system(self.system.clone()));
        messages.extend(self.history.iter().cloned());
        messages.push(Message::user(self.question.clone()));
        messages
    }
}

/// A successful generation and who served it.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayAnswer {
    pub text: String,
    pub provider_id: String,
    pub model: String,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Provider calls made across the whole chain, including the successful one.
    pub attempts: u32,
}

/// One failed provider call.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptFailure {
    pub provider_id: String,
    pub model: String,
    pub attempt: u32,
    pub kind: FailureKind,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("all providers exhausted after {} failed attempts", attempts.len())]
    AllProvidersExhausted { attempts: Vec<AttemptFailure> },
}

/// Backoff ceiling and per-call timeout shared by the whole chain.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Delay before the attempt following `attempt` (1-based): `base * 2^(attempt-1)`, capped.
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(max)
}

/// A provider descriptor bound to its adapter.
pub struct ProviderRoute {
    pub descriptor: ProviderDescriptor,
    pub provider: Arc<dyn LlmProvider>,
}

#[derive(Debug, Default, Clone)]
struct ModelUsage {
    successes: u64,
    transient_failures: u64,
    fatal_failures: u64,
    prompt_tokens: u64,
    completion_tokens: u64,
    last_latency_ms: u64,
}

/// Per provider/model counters for `GET /llm/usage`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelUsageSnapshot {
    pub provider_id: String,
    pub model: String,
    pub successes: u64,
    pub transient_failures: u64,
    pub fatal_failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub last_latency_ms: u64,
}

pub struct LlmGateway {
    routes: Vec<ProviderRoute>,
    params: GenerationParams,
    policy: RetryPolicy,
    usage: DashMap<(String, String), ModelUsage>,
}

impl LlmGateway {
    pub fn new(routes: Vec<ProviderRoute>, params: GenerationParams, policy: RetryPolicy) -> Self {
        Self {
            routes,
            params,
            policy,
            usage: DashMap::new(),
        }
    }

    /// Build the gateway from config: load the chain and create each adapter.
    ///
    /// Providers whose adapter can't be created (missing API key) are skipped
    /// with a warning; at least one must remain.
    pub fn from_config(llm: &LlmConfig, ollama: &OllamaConfig) -> Result<Self, LlmError> {
        let chain = ProviderChain::load(llm, ollama)?;
        let mut routes = Vec::with_capacity(chain.providers.len());
        for descriptor in chain.providers {
            match create_provider(&descriptor, llm, ollama) {
                Ok(provider) => {
                    info!(provider = %descriptor.id, models = ?descriptor.models, "LLM provider ready");
                    routes.push(ProviderRoute { descriptor, provider });
                }
                Err(e) => warn!(provider = %descriptor.id, error = %e, "skipping LLM provider"),
            }
        }
        if routes.is_empty() {
            return Err(LlmError::NotConfigured("no usable LLM provider in chain".into()));
        }

        let params = GenerationParams {
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
        };
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(chain.retry_max_delay_ms.unwrap_or(llm.retry_max_delay_ms)),
            attempt_timeout: Duration::from_secs(llm.request_timeout_secs),
        };
        Ok(Self::new(routes, params, policy))
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.descriptor.id.as_str()).collect()
    }

    /// Generate an answer, walking the chain until some provider/model succeeds.
    pub async fn generate(&self, prompt: &Prompt) -> Result<GatewayAnswer, GatewayError> {
        let messages = prompt.to_messages();
        let started = Instant::now();
        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut calls = 0u32;

        for route in &self.routes {
            let descriptor = &route.descriptor;
            'models: for model in &descriptor.models {
                for attempt in 1..=descriptor.max_retries {
                    calls += 1;
                    let call_started = Instant::now();
                    let result = match tokio::time::timeout(
                        self.policy.attempt_timeout,
                        route.provider.complete(model, &messages, &self.params),
                    )
                    .await
                    {
                        Ok(r) => r,
                        Err(_) => Err(LlmError::Timeout(self.policy.attempt_timeout)),
                    };

                    match result {
                        Ok(completion) => {
                            let answer = self.record_success(
                                descriptor,
                                model,
                                completion,
                                &messages,
                                call_started.elapsed(),
                                calls,
                            );
                            info!(
                                provider = %answer.provider_id,
                                model = %answer.model,
                                latency_ms = answer.latency.as_millis() as u64,
                                total_ms = started.elapsed().as_millis() as u64,
                                prompt_tokens = answer.prompt_tokens,
                                completion_tokens = answer.completion_tokens,
                                attempts = calls,
                                "LLM generation succeeded"
                            );
                            return Ok(answer);
                        }
                        Err(e) => {
                            let kind = e.kind();
                            self.record_failure(descriptor, model, kind);
                            warn!(
                                provider = %descriptor.id,
                                model = %model,
                                attempt,
                                max_retries = descriptor.max_retries,
                                kind = ?kind,
                                error = %e,
                                "LLM provider call failed"
                            );
                            let provider_wide = e.is_provider_wide();
                            failures.push(AttemptFailure {
                                provider_id: descriptor.id.clone(),
                                model: model.clone(),
                                attempt,
                                kind,
                                error: e.to_string(),
                            });

                            if kind == FailureKind::Fatal {
                                if provider_wide {
                                    break 'models;
                                }
                                continue 'models;
                            }
                            if attempt < descriptor.max_retries {
                                let delay = backoff_delay(
                                    descriptor.retry_base_delay(),
                                    attempt,
                                    self.policy.max_delay,
                                );
                                debug!(provider = %descriptor.id, model = %model, delay_ms = delay.as_millis() as u64, "backing off");
                                tokio::time::sleep(delay).await;
                            }
                        }
                    }
                }
                debug!(provider = %descriptor.id, model = %model, "model exhausted, falling back");
            }
        }

        error!(
            attempts = failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "all LLM providers exhausted"
        );
        Err(GatewayError::AllProvidersExhausted { attempts: failures })
    }

    fn record_success(
        &self,
        descriptor: &ProviderDescriptor,
        model: &str,
        completion: Completion,
        messages: &[Message],
        latency: Duration,
        calls: u32,
    ) -> GatewayAnswer {
        let prompt_tokens = completion.prompt_tokens.unwrap_or_else(|| {
            messages.iter().map(|m| estimate_tokens(&m.content)).sum::<usize>() as u32
        });
        let completion_tokens = completion
            .completion_tokens
            .unwrap_or_else(|| estimate_tokens(&completion.text) as u32);

        let mut usage = self
            .usage
            .entry((descriptor.id.clone(), model.to_string()))
            .or_default();
        usage.successes += 1;
        usage.prompt_tokens += u64::from(prompt_tokens);
        usage.completion_tokens += u64::from(completion_tokens);
        usage.last_latency_ms = latency.as_millis() as u64;

        GatewayAnswer {
            text: completion.text,
            provider_id: descriptor.id.clone(),
            model: model.to_string(),
            latency,
            prompt_tokens,
            completion_tokens,
            attempts: calls,
        }
    }

    fn record_failure(&self, descriptor: &ProviderDescriptor, model: &str, kind: FailureKind) {
        let mut usage = self
            .usage
            .entry((descriptor.id.clone(), model.to_string()))
            .or_default();
        match kind {
            FailureKind::Transient => usage.transient_failures += 1,
            FailureKind::Fatal => usage.fatal_failures += 1,
        }
    }

    pub fn usage(&self) -> Vec<ModelUsageSnapshot> {
        let mut out: Vec<ModelUsageSnapshot> = self
            .usage
            .iter()
            .map(|entry| {
                let (provider_id, model) = entry.key().clone();
                let u = entry.value();
                ModelUsageSnapshot {
                    provider_id,
                    model,
                    successes: u.successes,
                    transient_failures: u.transient_failures,
                    fatal_failures: u.fatal_failures,
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    last_latency_ms: u.last_latency_ms,
                }
            })
            .collect();
        out.sort_by(|a, b| (&a.provider_id, &a.model).cmp(&(&b.provider_id, &b.model)));
        out
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ProviderKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&str, u32) -> Result<Completion, LlmError> + Send + Sync>;

    /// Provider whose behaviour is a function of (model, call number).
    struct ScriptedProvider {
        calls: AtomicU32,
        models_called: Mutex<Vec<String>>,
        respond: Responder,
    }

    impl ScriptedProvider {
        fn new(respond: impl Fn(&str, u32) -> Result<Completion, LlmError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                models_called: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn calls_for(&self, model: &str) -> usize {
            self.models_called.lock().unwrap().iter().filter(|m| *m == model).count()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(
            &self,
            model: &str,
            _messages: &[Message],
            _params: &GenerationParams,
        ) -> Result<Completion, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.models_called.lock().unwrap().push(model.to_string());
            (self.respond)(model, n)
        }
    }

    fn descriptor(id: &str, models: &[&str], max_retries: u32) -> ProviderDescriptor {
        ProviderDescriptor {
            id: id.into(),
            kind: ProviderKind::Ollama,
            models: models.iter().map(|m| m.to_string()).collect(),
            max_retries,
            retry_base_delay_ms: 100,
            base_url: None,
            api_key_env: None,
        }
    }

    fn route(d: ProviderDescriptor, p: Arc<ScriptedProvider>) -> ProviderRoute {
        ProviderRoute { descriptor: d, provider: p }
    }

    fn prompt() -> Prompt {
        Prompt {
            system: "Answer from context.".into(),
            history: vec![],
            question: "When is the registration deadline?".into(),
        }
    }

    fn overloaded() -> LlmError {
        LlmError::ApiError { status: 503, body: "overloaded".into() }
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_moves_to_next_provider_without_retry() {
        let a = ScriptedProvider::new(|_, _| Err(LlmError::ApiError { status: 400, body: "bad".into() }));
        let b = ScriptedProvider::new(|_, _| Ok(Completion::text("from B")));
        let gw = LlmGateway::new(
            vec![route(descriptor("a", &["m1"], 3), a.clone()), route(descriptor("b", &["m2"], 3), b.clone())],
            GenerationParams::default(),
            RetryPolicy::default(),
        );

        let answer = gw.generate(&prompt()).await.unwrap();
        assert_eq!(answer.text, "from B");
        assert_eq!(answer.provider_id, "b");
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(answer.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn all_transient_exhausts_after_exactly_max_retries_per_model() {
        let a = ScriptedProvider::new(|_, _| Err(overloaded()));
        let b = ScriptedProvider::new(|_, _| Err(overloaded()));
        let gw = LlmGateway::new(
            vec![
                route(descriptor("a", &["a-primary", "a-fallback"], 3), a.clone()),
                route(descriptor("b", &["b-primary"], 2), b.clone()),
            ],
            GenerationParams::default(),
            RetryPolicy::default(),
        );

        let err = gw.generate(&prompt()).await.unwrap_err();
        let GatewayError::AllProvidersExhausted { attempts } = err;
        assert_eq!(a.calls_for("a-primary"), 3);
        assert_eq!(a.calls_for("a-fallback"), 3);
        assert_eq!(b.calls_for("b-primary"), 2);
        assert_eq!(attempts.len(), 8);
        assert!(attempts.iter().all(|f| f.kind == FailureKind::Transient));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success_on_same_model() {
        let a = ScriptedProvider::new(|_, n| if n < 3 { Err(overloaded()) } else { Ok(Completion::text("ok")) });
        let gw = LlmGateway::new(
            vec![route(descriptor("a", &["m"], 3), a.clone())],
            GenerationParams::default(),
            RetryPolicy::default(),
        );

        let answer = gw.generate(&prompt()).await.unwrap();
        assert_eq!(answer.text, "ok");
        assert_eq!(answer.attempts, 3);
        assert_eq!(a.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_model_tried_before_next_provider() {
        let a = ScriptedProvider::new(|model, _| {
            if model == "big" { Err(overloaded()) } else { Ok(Completion::text("small model answer")) }
        });
        let b = ScriptedProvider::new(|_, _| Ok(Completion::text("from B")));
        let gw = LlmGateway::new(
            vec![route(descriptor("a", &["big", "small"], 2), a.clone()), route(descriptor("b", &["x"], 1), b.clone())],
            GenerationParams::default(),
            RetryPolicy::default(),
        );

        let answer = gw.generate(&prompt()).await.unwrap();
        assert_eq!(answer.model, "small");
        assert_eq!(a.calls_for("big"), 2);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_skips_remaining_models_of_provider() {
        let a = ScriptedProvider::new(|_, _| Err(LlmError::ApiError { status: 401, body: "no key".into() }));
        let b = ScriptedProvider::new(|_, _| Ok(Completion::text("from B")));
        let gw = LlmGateway::new(
            vec![route(descriptor("a", &["m1", "m2"], 3), a.clone()), route(descriptor("b", &["x"], 1), b.clone())],
            GenerationParams::default(),
            RetryPolicy::default(),
        );

        gw.generate(&prompt()).await.unwrap();
        assert_eq!(a.calls(), 1);
        assert_eq!(a.calls_for("m2"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out_as_transient() {
        struct Slow;
        #[async_trait]
        impl LlmProvider for Slow {
            async fn complete(&self, _: &str, _: &[Message], _: &GenerationParams) -> Result<Completion, LlmError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Completion::text("too late"))
            }
        }
        let gw = LlmGateway::new(
            vec![ProviderRoute { descriptor: descriptor("slow", &["m"], 2), provider: Arc::new(Slow) }],
            GenerationParams::default(),
            RetryPolicy { max_delay: Duration::from_secs(1), attempt_timeout: Duration::from_secs(5) },
        );

        let GatewayError::AllProvidersExhausted { attempts } = gw.generate(&prompt()).await.unwrap_err();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].kind, FailureKind::Transient);
    }

    #[tokio::test(start_paused = true)]
    async fn usage_counts_tokens_and_failures() {
        let a = ScriptedProvider::new(|_, n| {
            if n == 1 {
                Err(overloaded())
            } else {
                Ok(Completion { text: "answer".into(), prompt_tokens: Some(120), completion_tokens: Some(30) })
            }
        });
        let gw = LlmGateway::new(
            vec![route(descriptor("a", &["m"], 3), a)],
            GenerationParams::default(),
            RetryPolicy::default(),
        );
        let answer = gw.generate(&prompt()).await.unwrap();
        assert_eq!(answer.prompt_tokens, 120);
        assert_eq!(answer.completion_tokens, 30);

        let usage = gw.usage();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].successes, 1);
        assert_eq!(usage[0].transient_failures, 1);
        assert_eq!(usage[0].prompt_tokens, 120);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(3);
        assert_eq!(backoff_delay(base, 1, max), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2, max), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3, max), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 4, max), Duration::from_secs(3));
        assert_eq!(backoff_delay(base, 40, max), Duration::from_secs(3));
    }

    #[test]
    fn prompt_messages_wrap_history() {
        let p = Prompt {
            system: "sys".into(),
            history: vec![Message::user("q1"), Message::assistant("a1")],
            question: "q2".into(),
        };
        let msgs = p.to_messages();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, crate::provider::Role::System);
        assert_eq!(msgs[3].content, "q2");
    }
}
