//! Per-job observability: one event per finished job, kept in a bounded ring.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use askdesk_core::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Answered,
    FaqHit,
    Fallback,
    BotDisabled,
    Failed,
    TimedOut,
}

impl JobOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            JobOutcome::Answered => "answered",
            JobOutcome::FaqHit => "faq_hit",
            JobOutcome::Fallback => "fallback",
            JobOutcome::BotDisabled => "bot_disabled",
            JobOutcome::Failed => "failed",
            JobOutcome::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub channel: Channel,
    pub latency_ms: u64,
    pub queue_wait_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cache_hit: bool,
    pub outcome: JobOutcome,
}

/// Sink for finished-job events.
pub trait JobObserver: Send + Sync {
    fn record(&self, event: JobEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryStats {
    pub total_jobs: usize,
    pub outcomes: BTreeMap<JobOutcome, usize>,
    pub cache_hit_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub total_tokens: u64,
}

/// Fixed-capacity FIFO that evicts the oldest item when full.
#[derive(Debug)]
struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, item: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }
}

/// In-memory telemetry: the most recent `capacity` events plus a log line per job.
pub struct TelemetryLog {
    ring: Mutex<RingBuffer<JobEvent>>,
}

impl TelemetryLog {
    pub fn new(capacity: usize) -> Self {
        Self { ring: Mutex::new(RingBuffer::new(capacity)) }
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<JobEvent> {
        match self.ring.lock() {
            Ok(ring) => ring.buf.iter().rev().take(limit).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn stats(&self) -> TelemetryStats {
        let events: Vec<JobEvent> = match self.ring.lock() {
            Ok(ring) => ring.buf.iter().cloned().collect(),
            Err(_) => Vec::new(),
        };
        compute_stats(&events)
    }
}

impl JobObserver for TelemetryLog {
    fn record(&self, event: JobEvent) {
        info!(
            job_id = %event.job_id,
            channel = %event.channel,
            outcome = event.outcome.as_str(),
            latency_ms = event.latency_ms,
            queue_wait_ms = event.queue_wait_ms,
            provider = event.provider.as_deref().unwrap_or("-"),
            prompt_tokens = event.prompt_tokens,
            completion_tokens = event.completion_tokens,
            cache_hit = event.cache_hit,
            "job telemetry"
        );
        if let Ok(mut ring) = self.ring.lock() {
            ring.push(event);
        }
    }
}

fn compute_stats(events: &[JobEvent]) -> TelemetryStats {
    let total = events.len();
    let mut outcomes = BTreeMap::new();
    for e in events {
        *outcomes.entry(e.outcome).or_insert(0) += 1;
    }
    let cache_hits = events.iter().filter(|e| e.cache_hit).count();
    let total_tokens: u64 = events
        .iter()
        .map(|e| e.prompt_tokens as u64 + e.completion_tokens as u64)
        .sum();

    let mut latencies: Vec<u64> = events.iter().map(|e| e.latency_ms).collect();
    latencies.sort_unstable();

    let (cache_hit_rate, avg_latency_ms, p95_latency_ms) = if total > 0 {
        let idx = ((0.95 * total as f64).ceil() as usize).saturating_sub(1).min(total - 1);
        (
            cache_hits as f64 / total as f64,
            latencies.iter().sum::<u64>() as f64 / total as f64,
            latencies[idx] as f64,
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    TelemetryStats {
        total_jobs: total,
        outcomes,
        cache_hit_rate,
        avg_latency_ms,
        p95_latency_ms,
        total_tokens,
    }
}
