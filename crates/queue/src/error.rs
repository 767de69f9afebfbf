//! Queue error types.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("queue is full ({capacity} jobs in flight)")]
    CapacityExceeded { capacity: usize },

    #[error("user {user_key} already has {limit} job(s) in flight")]
    UserLimitExceeded { user_key: String, limit: usize },

    #[error("job timed out after {0:?}")]
    TimedOut(Duration),

    #[error("job failed: {0}")]
    Failed(String),

    #[error("queue is shut down")]
    Closed,
}

impl QueueError {
    /// Admission rejections: the job never entered the queue.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            QueueError::CapacityExceeded { .. } | QueueError::UserLimitExceeded { .. } | QueueError::Closed
        )
    }
}
