//! Lock-free queue counters plus a one-minute completion window.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct QueueMetrics {
    pending: AtomicUsize,
    active: AtomicUsize,
    processed: AtomicU64,
    errors: AtomicU64,
    rejected: AtomicU64,
    timeouts: AtomicU64,
    peak_pending: AtomicUsize,
    peak_active: AtomicUsize,
    /// EMA of processing time in ms, stored as f64 bits. Zero bits = no sample yet.
    ema_ms_bits: AtomicU64,
    ema_alpha: f64,
    completions: Mutex<VecDeque<Instant>>,
}

impl QueueMetrics {
    pub fn new(ema_alpha: f64) -> Self {
        Self {
            pending: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            peak_pending: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
            ema_ms_bits: AtomicU64::new(0),
            ema_alpha: ema_alpha.clamp(0.01, 1.0),
            completions: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn set_depths(&self, pending: usize, active: usize) {
        self.pending.store(pending, Ordering::Relaxed);
        self.active.store(active, Ordering::Relaxed);
        self.peak_pending.fetch_max(pending, Ordering::Relaxed);
        self.peak_active.fetch_max(active, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// A job finished executing, successfully or not.
    pub(crate) fn record_processed(&self, elapsed: Duration, failed: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.update_ema(elapsed.as_secs_f64() * 1000.0);

        let now = Instant::now();
        if let Ok(mut window) = self.completions.lock() {
            window.push_back(now);
            prune(&mut window, now);
        }
    }

    fn update_ema(&self, sample_ms: f64) {
        let alpha = self.ema_alpha;
        let _ = self
            .ema_ms_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let next = if bits == 0 {
                    sample_ms
                } else {
                    alpha * sample_ms + (1.0 - alpha) * f64::from_bits(bits)
                };
                // Keep zero reserved for "no sample".
                Some(next.max(f64::MIN_POSITIVE).to_bits())
            });
    }

    /// EMA of recent processing time; `None` before the first completion.
    pub fn ema_processing(&self) -> Option<Duration> {
        match self.ema_ms_bits.load(Ordering::Relaxed) {
            0 => None,
            bits => Some(Duration::from_secs_f64(f64::from_bits(bits) / 1000.0)),
        }
    }

    /// ETA for a job with `ahead` jobs in front of it.
    pub fn eta_secs(&self, ahead: usize) -> f64 {
        self.ema_processing()
            .map(|d| d.as_secs_f64() * ahead as f64)
            .unwrap_or(0.0)
    }

    pub fn throughput_per_min(&self) -> usize {
        let now = Instant::now();
        match self.completions.lock() {
            Ok(mut window) => {
                prune(&mut window, now);
                window.len()
            }
            Err(_) => 0,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pending: self.pending.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            peak_pending: self.peak_pending.load(Ordering::Relaxed),
            peak_active: self.peak_active.load(Ordering::Relaxed),
            avg_processing_ms: self.ema_processing().map(|d| d.as_secs_f64() * 1000.0),
            throughput_per_min: self.throughput_per_min(),
        }
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&oldest) = window.front() {
        if now.duration_since(oldest) > THROUGHPUT_WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub pending: usize,
    pub active: usize,
    pub processed: u64,
    pub errors: u64,
    pub rejected: u64,
    pub timeouts: u64,
    pub peak_pending: usize,
    pub peak_active: usize,
    pub avg_processing_ms: Option<f64>,
    pub throughput_per_min: usize,
}
