use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub llm: LlmConfig,
    pub ollama: OllamaConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub faq: FaqConfig,
    pub session: SessionConfig,
    pub assistant: AssistantConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `ASKDESK_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("ASKDESK_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            queue: QueueConfig::from_env_profiled(p),
            llm: LlmConfig::from_env_profiled(p),
            ollama: OllamaConfig::from_env_profiled(p),
            embedding: EmbeddingConfig::from_env_profiled(p),
            retrieval: RetrievalConfig::from_env_profiled(p),
            faq: FaqConfig::from_env_profiled(p),
            session: SessionConfig::from_env_profiled(p),
            assistant: AssistantConfig::from_env_profiled(p),
        }
    }

    /// Reject settings the queue, retriever or session store cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.queue.workers == 0 {
            return Err(CoreError::config("QUEUE_WORKERS", "must be at least 1"));
        }
        if self.queue.capacity < self.queue.workers {
            return Err(CoreError::config(
                "QUEUE_CAPACITY",
                format!("{} is below the worker count {}", self.queue.capacity, self.queue.workers),
            ));
        }
        if self.queue.per_user_limit == 0 {
            return Err(CoreError::config("QUEUE_PER_USER_LIMIT", "must be at least 1"));
        }
        if !(self.queue.ema_alpha > 0.0 && self.queue.ema_alpha <= 1.0) {
            return Err(CoreError::config("QUEUE_EMA_ALPHA", "must be in (0, 1]"));
        }
        if self.retrieval.top_k == 0 {
            return Err(CoreError::config("RETRIEVAL_TOP_K", "must be at least 1"));
        }
        if self.retrieval.rrf_k <= 0.0 {
            return Err(CoreError::config("RETRIEVAL_RRF_K", "must be positive"));
        }
        if self.retrieval.dense_weight < 0.0 || self.retrieval.sparse_weight < 0.0 {
            return Err(CoreError::config("RETRIEVAL_*_WEIGHT", "weights cannot be negative"));
        }
        if self.embedding.provider != "none" && self.embedding.dimensions == 0 {
            return Err(CoreError::config("EMBEDDING_DIMENSIONS", "must be at least 1"));
        }
        if self.session.history_turns == 0 {
            return Err(CoreError::config("SESSION_HISTORY_TURNS", "must be at least 1"));
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  queue:       capacity={}, workers={}, per_user={}, timeout={}s",
            self.queue.capacity,
            self.queue.workers,
            self.queue.per_user_limit,
            self.queue.request_timeout_secs
        );
        tracing::info!("  llm:         providers_file={}", self.llm.providers_file.display());
        tracing::info!(
            "  embedding:   provider={}, model={}, timeout={}ms",
            self.embedding.provider,
            self.embedding.model,
            self.embedding.request_timeout_ms
        );
        tracing::info!(
            "  retrieval:   index={}, top_k={}, budget={} tokens",
            self.retrieval.index_path.display(),
            self.retrieval.top_k,
            self.retrieval.max_context_tokens
        );
        tracing::info!("  faq:         ttl={}s", self.faq.ttl_secs);
        tracing::info!(
            "  session:     history={} turns, idle={}s",
            self.session.history_turns,
            self.session.idle_timeout_secs
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_parse(p, "PORT", 3001),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

// ── Admission queue ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Upper bound on queued + active jobs.
    pub capacity: usize,
    /// Fixed worker pool size.
    pub workers: usize,
    /// Max queued + active jobs per user key.
    pub per_user_limit: usize,
    pub request_timeout_secs: u64,
    pub position_update_ms: u64,
    /// Smoothing factor for the processing-time moving average.
    pub ema_alpha: f64,
}

impl QueueConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            capacity: profiled_env_parse(p, "QUEUE_CAPACITY", 100),
            workers: profiled_env_parse(p, "QUEUE_WORKERS", 4),
            per_user_limit: profiled_env_parse(p, "QUEUE_PER_USER_LIMIT", 1),
            request_timeout_secs: profiled_env_parse(p, "QUEUE_REQUEST_TIMEOUT_SECS", 60),
            position_update_ms: profiled_env_parse(p, "QUEUE_POSITION_UPDATE_MS", 2000),
            ema_alpha: profiled_env_parse(p, "QUEUE_EMA_ALPHA", 0.2),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn position_update_interval(&self) -> Duration {
        Duration::from_millis(self.position_update_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            workers: 4,
            per_user_limit: 1,
            request_timeout_secs: 60,
            position_update_ms: 2000,
            ema_alpha: 0.2,
        }
    }
}

// ── LLM (OpenAI / Anthropic / Ollama) ────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// TOML file with the ordered `[[providers]]` chain.
    pub providers_file: PathBuf,
    /// Provider used when no chain file exists: "openai", "anthropic", "ollama".
    pub provider: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ceiling for exponential retry backoff.
    pub retry_max_delay_ms: u64,
    /// Per-request HTTP timeout for provider calls.
    pub request_timeout_secs: u64,
}

impl LlmConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            providers_file: PathBuf::from(profiled_env_or(p, "LLM_PROVIDERS_FILE", "config/providers.toml")),
            provider: profiled_env_or(p, "LLM_PROVIDER", "ollama"),
            openai_api_key: profiled_env_opt(p, "OPENAI_API_KEY"),
            openai_model: profiled_env_or(p, "OPENAI_MODEL", "gpt-4o-mini"),
            openai_base_url: profiled_env_opt(p, "OPENAI_BASE_URL"),
            anthropic_api_key: profiled_env_opt(p, "ANTHROPIC_API_KEY"),
            anthropic_model: profiled_env_or(p, "ANTHROPIC_MODEL", "claude-sonnet-4-5-20250929"),
            temperature: profiled_env_parse(p, "LLM_TEMPERATURE", 0.2),
            max_tokens: profiled_env_parse(p, "LLM_MAX_TOKENS", 1024),
            retry_max_delay_ms: profiled_env_parse(p, "LLM_RETRY_MAX_DELAY_MS", 8000),
            request_timeout_secs: profiled_env_parse(p, "LLM_REQUEST_TIMEOUT_SECS", 30),
        }
    }

    pub fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            "openai" => self.openai_api_key.is_some(),
            "anthropic" => self.anthropic_api_key.is_some(),
            "ollama" => true,
            _ => false,
        }
    }
}

// ── Ollama (local models) ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub url: String,
    pub model: String,
    pub embedding_model: String,
}

impl OllamaConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_or(p, "OLLAMA_URL", "http://localhost:11434"),
            model: profiled_env_or(p, "OLLAMA_MODEL", "llama3.2"),
            embedding_model: profiled_env_or(p, "OLLAMA_EMBEDDING_MODEL", "nomic-embed-text"),
        }
    }
}

// ── Embedding ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "ollama", "openai", "none"
    pub provider: String,
    pub model: String,
    pub dimensions: u32,
    /// Query embedding sits on the request path, so this stays short.
    pub request_timeout_ms: u64,
    /// Prepended to every query, for models trained with task prefixes
    /// (nomic-embed-text expects `search_query: `).
    pub query_prefix: String,
}

impl EmbeddingConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_or(p, "EMBEDDING_PROVIDER", "ollama"),
            model: profiled_env_or(p, "EMBEDDING_MODEL", "nomic-embed-text"),
            dimensions: profiled_env_parse(p, "EMBEDDING_DIMENSIONS", 768),
            request_timeout_ms: profiled_env_parse(p, "EMBEDDING_TIMEOUT_MS", 3000),
            query_prefix: profiled_env_or(p, "EMBEDDING_QUERY_PREFIX", ""),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            request_timeout_ms: 3000,
            query_prefix: String::new(),
        }
    }
}

// ── Retrieval ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// JSONL file of pre-built knowledge chunks.
    pub index_path: PathBuf,
    pub top_k: usize,
    /// Candidates pulled from each signal before fusion.
    pub candidates: usize,
    pub dense_weight: f64,
    pub sparse_weight: f64,
    /// Reciprocal-rank smoothing constant.
    pub rrf_k: f64,
    pub max_context_tokens: usize,
}

impl RetrievalConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            index_path: PathBuf::from(profiled_env_or(p, "KNOWLEDGE_INDEX_PATH", "data/knowledge/chunks.jsonl")),
            top_k: profiled_env_parse(p, "RETRIEVAL_TOP_K", 8),
            candidates: profiled_env_parse(p, "RETRIEVAL_CANDIDATES", 20),
            dense_weight: profiled_env_parse(p, "RETRIEVAL_DENSE_WEIGHT", 1.0),
            sparse_weight: profiled_env_parse(p, "RETRIEVAL_SPARSE_WEIGHT", 1.0),
            rrf_k: profiled_env_parse(p, "RETRIEVAL_RRF_K", 60.0),
            max_context_tokens: profiled_env_parse(p, "RETRIEVAL_MAX_CONTEXT_TOKENS", 2000),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("data/knowledge/chunks.jsonl"),
            top_k: 8,
            candidates: 20,
            dense_weight: 1.0,
            sparse_weight: 1.0,
            rrf_k: 60.0,
            max_context_tokens: 2000,
        }
    }
}

// ── FAQ cache ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaqConfig {
    /// TTL applied to generated answers.
    pub ttl_secs: u64,
    pub purge_interval_secs: u64,
}

impl FaqConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            ttl_secs: profiled_env_parse(p, "FAQ_TTL_SECS", 86_400),
            purge_interval_secs: profiled_env_parse(p, "FAQ_PURGE_INTERVAL_SECS", 3600),
        }
    }
}

// ── Sessions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Max turns kept per session (ring buffer).
    pub history_turns: usize,
    pub idle_timeout_secs: u64,
    pub prune_interval_secs: u64,
    /// When set, sessions are persisted as one JSON file each under this dir.
    pub dir: Option<PathBuf>,
}

impl SessionConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            history_turns: profiled_env_parse(p, "SESSION_HISTORY_TURNS", 20),
            idle_timeout_secs: profiled_env_parse(p, "SESSION_IDLE_TIMEOUT_SECS", 86_400),
            prune_interval_secs: profiled_env_parse(p, "SESSION_PRUNE_INTERVAL_SECS", 600),
            dir: profiled_env_opt(p, "SESSION_DIR").map(PathBuf::from),
        }
    }
}

// ── Assistant ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Optional instruction template with a `<<<context>>>` placeholder.
    pub prompt_template_path: Option<PathBuf>,
    /// History turns included in each prompt.
    pub prompt_history_turns: usize,
    /// Message returned when every provider failed.
    pub fallback_message: String,
}

impl AssistantConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            prompt_template_path: profiled_env_opt(p, "PROMPT_TEMPLATE_PATH").map(PathBuf::from),
            prompt_history_turns: profiled_env_parse(p, "PROMPT_HISTORY_TURNS", 6),
            fallback_message: profiled_env_or(p, "FALLBACK_MESSAGE", DEFAULT_FALLBACK_MESSAGE),
        }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            prompt_template_path: None,
            prompt_history_turns: 6,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
        }
    }
}

pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "Sorry, I can't answer right now. Please try again in a few minutes.";
