pub mod error;
pub mod job;
pub mod metrics;
pub mod queue;

pub use error::QueueError;
pub use job::{JobContext, JobHandle, JobHandler, JobId, JobReport, JobState, JobStatus};
pub use metrics::MetricsSnapshot;
pub use queue::{AdmissionQueue, QueueSettings, QueueStats};
