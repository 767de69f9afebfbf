//! Job model, lifecycle state machine and the handle returned to callers.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use uuid::Uuid;

use askdesk_core::Channel;

use crate::error::QueueError;

pub type JobId = Uuid;

// ── State machine ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Active,
    Done,
    Failed,
    TimedOut,
    Rejected,
}

impl JobState {
    /// Transitions only move forward: Queued → Active → {Done, Failed, TimedOut},
    /// Queued → {TimedOut, Rejected}. Terminal states accept nothing.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Active)
                | (Queued, TimedOut)
                | (Queued, Rejected)
                | (Active, Done)
                | (Active, Failed)
                | (Active, TimedOut)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::TimedOut | JobState::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
            JobState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pushed to the waiting caller while the job moves through the queue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JobStatus {
    pub state: JobState,
    /// 1-based place in the ready list; 0 once the job left it.
    pub position: usize,
    pub eta_secs: f64,
}

impl JobStatus {
    pub(crate) fn queued(position: usize, eta_secs: f64) -> Self {
        Self { state: JobState::Queued, position, eta_secs }
    }

    pub(crate) fn settled(state: JobState) -> Self {
        Self { state, position: 0, eta_secs: 0.0 }
    }
}

// ── Job ───────────────────────────────────────────────────────

/// A unit of work owned by the queue: bookkeeping plus the caller's payload.
#[derive(Debug)]
pub struct Job<P> {
    pub meta: JobMeta,
    pub payload: P,
}

impl<P> Job<P> {
    pub(crate) fn new(user_key: String, channel: Channel, payload: P, timeout: Duration) -> Self {
        Self { meta: JobMeta::new(user_key, channel, timeout), payload }
    }
}

#[derive(Debug, Clone)]
pub struct JobMeta {
    pub id: JobId,
    pub user_key: String,
    pub channel: Channel,
    pub enqueued_at: DateTime<Utc>,
    pub(crate) deadline: Instant,
    pub(crate) accepted_at: Instant,
    state: JobState,
}

impl JobMeta {
    fn new(user_key: String, channel: Channel, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            user_key,
            channel,
            enqueued_at: Utc::now(),
            deadline: now + timeout,
            accepted_at: now,
            state: JobState::Queued,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Apply a transition. Returns false (and leaves the state alone) if it would move backwards.
    pub(crate) fn transition(&mut self, next: JobState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            tracing::warn!(job_id = %self.id, from = %self.state, to = %next, "illegal job transition ignored");
            false
        }
    }
}

/// What a handler sees: the job's identity and payload.
#[derive(Debug, Clone)]
pub struct JobContext<P> {
    pub id: JobId,
    pub user_key: String,
    pub channel: Channel,
    pub payload: P,
    pub enqueued_at: DateTime<Utc>,
}

/// Summary emitted to the handler once a job reaches a terminal state.
#[derive(Debug)]
pub struct JobReport<'a, O> {
    pub id: JobId,
    pub user_key: &'a str,
    pub channel: Channel,
    pub state: JobState,
    pub queue_wait: Duration,
    pub processing: Duration,
    pub output: Option<&'a O>,
    pub error: Option<&'a str>,
}

/// The work executed by queue workers.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Payload: Send + 'static;
    type Output: Send + Sync + 'static;

    async fn handle(&self, job: JobContext<Self::Payload>) -> anyhow::Result<Self::Output>;

    /// Called for every job that was executed or expired in the queue.
    fn observe(&self, _report: JobReport<'_, Self::Output>) {}
}

// ── Handle ────────────────────────────────────────────────────

/// Returned by `submit`. Dropping it abandons the result; the job still runs.
#[derive(Debug)]
pub struct JobHandle<O> {
    id: JobId,
    deadline: Instant,
    timeout: Duration,
    result: oneshot::Receiver<Result<O, QueueError>>,
    status: watch::Receiver<JobStatus>,
}

impl<O> JobHandle<O> {
    pub(crate) fn new(
        id: JobId,
        deadline: Instant,
        timeout: Duration,
        result: oneshot::Receiver<Result<O, QueueError>>,
        status: watch::Receiver<JobStatus>,
    ) -> Self {
        Self { id, deadline, timeout, result, status }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Position/ETA updates while queued, then the state changes.
    pub fn status(&self) -> watch::Receiver<JobStatus> {
        self.status.clone()
    }

    pub fn current_status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// Wait for the result, bounded by the job's deadline.
    pub async fn wait(self) -> Result<O, QueueError> {
        match tokio::time::timeout_at(self.deadline, self.result).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(QueueError::Closed),
            Err(_) => Err(QueueError::TimedOut(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_one_directional() {
        use JobState::*;
        assert!(Queued.can_transition_to(Active));
        assert!(Active.can_transition_to(Done));
        assert!(Active.can_transition_to(TimedOut));
        assert!(Queued.can_transition_to(TimedOut));
        assert!(!Active.can_transition_to(Queued));
        assert!(!Done.can_transition_to(Active));
        assert!(!Queued.can_transition_to(Done));
        for terminal in [Done, Failed, TimedOut, Rejected] {
            assert!(terminal.is_terminal());
            for next in [Queued, Active, Done, Failed, TimedOut, Rejected] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[tokio::test]
    async fn illegal_transition_leaves_state() {
        let mut job = Job::new("web:s".into(), Channel::Web, (), Duration::from_secs(5));
        assert!(job.meta.transition(JobState::Active));
        assert!(!job.meta.transition(JobState::Queued));
        assert_eq!(job.meta.state(), JobState::Active);
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::settled(JobState::TimedOut)).unwrap();
        assert!(json.contains("\"timed_out\""));
    }
}
