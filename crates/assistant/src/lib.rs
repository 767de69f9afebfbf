pub mod error;
pub mod faq;
pub mod gesture;
pub mod orchestrator;
pub mod prompt;
pub mod session;
pub mod telemetry;

pub use error::{AssistantError, PromptError, SessionError};
pub use faq::{FaqCache, FaqEntry, FaqHit, FaqSource};
pub use gesture::{classify, GestureTag};
pub use orchestrator::{Assistant, AssistantResponse, ResponseKind};
pub use prompt::{PromptBuilder, CONTEXT_PLACEHOLDER};
pub use session::{FileSessionStore, InMemorySessionStore, Session, SessionStore};
pub use telemetry::{JobEvent, JobObserver, JobOutcome, TelemetryLog, TelemetryStats};
