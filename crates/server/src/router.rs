//! HTTP router construction.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::api;
use crate::state::AppState;

/// Request bodies are small JSON documents; anything larger is rejected before parsing.
const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn build_router(state: Arc<AppState>, cors_origin: &str) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/queue/status", get(api::queue_status))
        .route("/llm/usage", get(api::llm_usage))
        .route("/api/chat", post(api::chat))
        .route("/api/chat/stream", post(api::chat_stream))
        .route("/api/faq/purge", post(api::faq_purge))
        .route(
            "/api/faq",
            get(api::faq_list).post(api::faq_create).delete(api::faq_delete),
        )
        .route("/api/sessions/{id}", get(api::session_get))
        .route("/api/sessions/{id}/bot", put(api::session_set_bot))
        .route("/api/telemetry", get(api::telemetry))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(cors_origin))
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::permissive();
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => {
            warn!(origin, "invalid CORS_ORIGIN, allowing any origin");
            CorsLayer::permissive()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use axum::body::{Body, Bytes};
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use askdesk_assistant::{Assistant, FaqCache, InMemorySessionStore, PromptBuilder, SessionStore, TelemetryLog};
    use askdesk_core::KnowledgeChunk;
    use askdesk_llm::{
        Completion, GenerationParams, LlmError, LlmGateway, LlmProvider, Message, ProviderDescriptor, ProviderKind,
        ProviderRoute, RetryPolicy,
    };
    use askdesk_queue::{AdmissionQueue, QueueSettings};
    use askdesk_retrieval::{HybridRetriever, InMemoryIndex, RetrieverSettings};

    /// Answers with the question it was asked, after an optional delay.
    struct EchoProvider {
        delay: Duration,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn complete(
            &self,
            _model: &str,
            messages: &[Message],
            _params: &GenerationParams,
        ) -> Result<Completion, LlmError> {
            tokio::time::sleep(self.delay).await;
            let question = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(Completion::text(format!("You asked: {question}")))
        }
    }

    fn test_state(settings: QueueSettings, delay: Duration) -> Arc<AppState> {
        let chunk = KnowledgeChunk {
            chunk_id: "calendar-1".into(),
            text: "Registration closes on March 15.".into(),
            dense_vector: vec![],
            sparse_terms: HashMap::from([("registration".to_string(), 1), ("closes".to_string(), 1)]),
            source_doc: "calendar.pdf".into(),
            offset: 0,
            source_updated_at: None,
            token_count: 0,
        };
        let retriever = Arc::new(HybridRetriever::new(
            Arc::new(InMemoryIndex::from_chunks(vec![chunk])),
            None,
            RetrieverSettings::default(),
        ));
        let gateway = Arc::new(LlmGateway::new(
            vec![ProviderRoute {
                descriptor: ProviderDescriptor {
                    id: "echo".into(),
                    kind: ProviderKind::Ollama,
                    models: vec!["echo-1".into()],
                    max_retries: 1,
                    retry_base_delay_ms: 1,
                    base_url: None,
                    api_key_env: None,
                },
                provider: Arc::new(EchoProvider { delay }),
            }],
            GenerationParams::default(),
            RetryPolicy::default(),
        ));
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(20));
        let faq = Arc::new(FaqCache::new(Duration::from_secs(3600)));
        let telemetry = Arc::new(TelemetryLog::new(100));
        let assistant = Assistant::new(
            sessions.clone(),
            faq.clone(),
            retriever,
            gateway.clone(),
            PromptBuilder::with_default_template(4),
            telemetry.clone(),
        );
        let queue = Arc::new(AdmissionQueue::start(Arc::new(assistant), settings));
        Arc::new(AppState {
            queue,
            sessions,
            faq,
            gateway,
            telemetry,
            index_chunks: 1,
            started_at: Instant::now(),
        })
    }

    fn app(state: &Arc<AppState>) -> Router {
        build_router(state.clone(), "*")
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Bytes) {
        let body = match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, bytes)
    }

    async fn send_json(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, method, uri, body).await;
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    fn question(session: &str, text: &str) -> Value {
        json!({ "session_id": session, "channel": "web", "text": text })
    }

    #[tokio::test]
    async fn health_reports_components() {
        let state = test_state(QueueSettings::default(), Duration::ZERO);
        let (status, body) = send_json(app(&state), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["index_chunks"], 1);
        assert_eq!(body["providers"], json!(["echo"]));
        state.queue.shutdown().await;
    }

    #[tokio::test]
    async fn chat_returns_answer() {
        let state = test_state(QueueSettings::default(), Duration::ZERO);
        let (status, body) = send_json(
            app(&state),
            "POST",
            "/api/chat",
            Some(question("s1", "When does registration close?")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "answered");
        assert_eq!(body["answer"], "You asked: When does registration close?");
        assert_eq!(body["provider"], "echo");
        assert!(body["job_id"].is_string());
        assert_eq!(state.sessions.get("s1").await.unwrap().len(), 2);
        state.queue.shutdown().await;
    }

    #[tokio::test]
    async fn blank_question_is_bad_request() {
        let state = test_state(QueueSettings::default(), Duration::ZERO);
        let (status, _) = send_json(app(&state), "POST", "/api/chat", Some(question("s1", "   "))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        state.queue.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_is_too_many_requests_with_friendly_message() {
        let settings = QueueSettings { capacity: 0, ..QueueSettings::default() };
        let state = test_state(settings, Duration::ZERO);
        let (status, body) = send_json(app(&state), "POST", "/api/chat", Some(question("s1", "hello"))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "capacity_exceeded");
        assert!(body["message"].as_str().unwrap().contains("try again shortly"));
        state.queue.shutdown().await;
    }

    #[tokio::test]
    async fn slow_answer_times_out_with_apology() {
        let settings = QueueSettings { request_timeout: Duration::from_millis(50), ..QueueSettings::default() };
        let state = test_state(settings, Duration::from_millis(300));
        let (status, body) = send_json(app(&state), "POST", "/api/chat", Some(question("s1", "hello"))).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], "timed_out");
        assert!(body["message"].as_str().unwrap().starts_with("Sorry"));
        state.queue.shutdown().await;
    }

    #[tokio::test]
    async fn stream_ends_with_answer_event() {
        let state = test_state(QueueSettings::default(), Duration::from_millis(20));
        let (status, bytes) = send(
            app(&state),
            "POST",
            "/api/chat/stream",
            Some(question("s1", "When does registration close?")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: answer"), "stream was: {text}");
        assert!(text.contains("You asked: When does registration close?"));
        assert!(!text.contains("event: error"));
        state.queue.shutdown().await;
    }

    #[tokio::test]
    async fn faq_admin_lifecycle() {
        let state = test_state(QueueSettings::default(), Duration::ZERO);

        let (status, entry) = send_json(
            app(&state),
            "POST",
            "/api/faq",
            Some(json!({ "question": "Where is the library?", "answer": "Building C, second floor." })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(entry["source"], "admin");

        let (_, list) = send_json(app(&state), "GET", "/api/faq", None).await;
        assert_eq!(list["count"], 1);

        let (status, body) =
            send_json(app(&state), "POST", "/api/chat", Some(question("s2", "where is the LIBRARY"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "faq_hit");
        assert_eq!(body["answer"], "Building C, second floor.");

        let (status, _) = send(app(&state), "DELETE", "/api/faq?question=where%20is%20the%20library", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(app(&state), "DELETE", "/api/faq?question=where%20is%20the%20library", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, purge) = send_json(app(&state), "POST", "/api/faq/purge", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(purge["remaining"], 0);
        state.queue.shutdown().await;
    }

    #[tokio::test]
    async fn operator_takeover_silences_bot() {
        let state = test_state(QueueSettings::default(), Duration::ZERO);

        let (status, body) =
            send_json(app(&state), "PUT", "/api/sessions/s3/bot", Some(json!({ "enabled": false }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bot_enabled"], false);

        let (_, body) = send_json(app(&state), "POST", "/api/chat", Some(question("s3", "hello?"))).await;
        assert_eq!(body["kind"], "bot_disabled");
        assert!(body.get("answer").is_none());

        let (status, session) = send_json(app(&state), "GET", "/api/sessions/s3", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["bot_enabled"], false);

        let (status, _) = send_json(app(&state), "GET", "/api/sessions/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        state.queue.shutdown().await;
    }

    #[tokio::test]
    async fn stats_endpoints_reflect_traffic() {
        let state = test_state(QueueSettings::default(), Duration::ZERO);
        let (status, _) = send(app(&state), "POST", "/api/chat", Some(question("s4", "registration"))).await;
        assert_eq!(status, StatusCode::OK);

        for _ in 0..100 {
            if !state.telemetry.recent(1).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let (_, telemetry) = send_json(app(&state), "GET", "/api/telemetry?limit=5", None).await;
        assert_eq!(telemetry["count"], 1);
        assert_eq!(telemetry["stats"]["total_jobs"], 1);
        assert_eq!(telemetry["events"][0]["outcome"], "answered");

        let (_, usage) = send_json(app(&state), "GET", "/llm/usage", None).await;
        assert_eq!(usage["models"][0]["provider_id"], "echo");
        assert_eq!(usage["models"][0]["successes"], 1);

        let (status, queue) = send_json(app(&state), "GET", "/queue/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(queue["closed"], false);
        state.queue.shutdown().await;
    }
}
