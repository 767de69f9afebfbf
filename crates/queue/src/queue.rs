//! Admission-controlled job queue with a fixed worker pool.
//!
//! `submit` accepts or rejects immediately. Accepted jobs wait in a FIFO
//! ready list; each worker takes one job at a time and runs the handler in
//! its own task so a panic only fails that job. Callers wait on a
//! `JobHandle`, bounded by the job deadline.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use askdesk_core::config::QueueConfig;
use askdesk_core::Channel;

use crate::error::QueueError;
use crate::job::{Job, JobContext, JobHandle, JobHandler, JobMeta, JobReport, JobState, JobStatus};
use crate::metrics::{MetricsSnapshot, QueueMetrics};

#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Upper bound on queued + active jobs.
    pub capacity: usize,
    pub workers: usize,
    /// Upper bound on queued + active jobs per user key.
    pub per_user_limit: usize,
    pub request_timeout: Duration,
    pub position_update_interval: Duration,
    pub ema_alpha: f64,
}

impl From<&QueueConfig> for QueueSettings {
    fn from(cfg: &QueueConfig) -> Self {
        Self {
            capacity: cfg.capacity,
            workers: cfg.workers,
            per_user_limit: cfg.per_user_limit,
            request_timeout: cfg.request_timeout(),
            position_update_interval: cfg.position_update_interval(),
            ema_alpha: cfg.ema_alpha,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub capacity: usize,
    pub workers: usize,
    pub per_user_limit: usize,
    pub request_timeout_secs: u64,
    pub closed: bool,
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
}

// ── Internal state ────────────────────────────────────────────

struct Waiting<P, O> {
    job: Job<P>,
    result_tx: oneshot::Sender<Result<O, QueueError>>,
    status_tx: watch::Sender<JobStatus>,
}

struct ReadyList<P, O> {
    ready: VecDeque<Waiting<P, O>>,
    active: usize,
    /// Queued + active per user key. Keys are removed at zero.
    per_user: HashMap<String, usize>,
    closed: bool,
}

impl<P, O> ReadyList<P, O> {
    fn in_flight(&self) -> usize {
        self.ready.len() + self.active
    }

    fn release_user(&mut self, user_key: &str) {
        if let Some(count) = self.per_user.get_mut(user_key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_user.remove(user_key);
            }
        }
    }

    /// Pull every queued job whose deadline has passed.
    fn take_expired(&mut self, now: Instant) -> Vec<Waiting<P, O>> {
        if !self.ready.iter().any(|w| w.job.meta.is_expired(now)) {
            return Vec::new();
        }
        let (expired, kept): (VecDeque<_>, VecDeque<_>) =
            self.ready.drain(..).partition(|w| w.job.meta.is_expired(now));
        self.ready = kept;
        for w in &expired {
            self.release_user(&w.job.meta.user_key);
        }
        expired.into_iter().collect()
    }
}

enum Next<P, O> {
    Job(Waiting<P, O>),
    Idle,
    Closed,
}

struct Inner<H: JobHandler> {
    handler: Arc<H>,
    settings: QueueSettings,
    state: Mutex<ReadyList<H::Payload, H::Output>>,
    notify: Notify,
    metrics: QueueMetrics,
    shutdown: watch::Sender<bool>,
}

impl<H: JobHandler> Inner<H> {
    fn lock(&self) -> MutexGuard<'_, ReadyList<H::Payload, H::Output>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_job(&self) -> Next<H::Payload, H::Output> {
        let (next, expired) = {
            let mut state = self.lock();
            let expired = state.take_expired(Instant::now());
            let next = match state.ready.pop_front() {
                Some(waiting) => {
                    state.active += 1;
                    if !state.ready.is_empty() {
                        self.notify.notify_one();
                    }
                    Next::Job(waiting)
                }
                None if state.closed => Next::Closed,
                None => Next::Idle,
            };
            self.metrics.set_depths(state.ready.len(), state.active);
            (next, expired)
        };
        for waiting in expired {
            self.expire_queued(waiting);
        }
        next
    }

    fn expire_queued(&self, waiting: Waiting<H::Payload, H::Output>) {
        let Waiting { job, result_tx, status_tx } = waiting;
        let mut meta = job.meta;
        meta.transition(JobState::TimedOut);
        self.metrics.record_timeout();
        let _ = status_tx.send(JobStatus::settled(JobState::TimedOut));
        let _ = result_tx.send(Err(QueueError::TimedOut(self.settings.request_timeout)));
        warn!(job_id = %meta.id, user_key = %meta.user_key, "job expired while queued");
        self.handler.observe(JobReport {
            id: meta.id,
            user_key: &meta.user_key,
            channel: meta.channel,
            state: meta.state(),
            queue_wait: meta.accepted_at.elapsed(),
            processing: Duration::ZERO,
            output: None,
            error: Some("expired while queued"),
        });
    }

    fn finish(&self, meta: &JobMeta) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        state.release_user(&meta.user_key);
        self.metrics.set_depths(state.ready.len(), state.active);
    }

    /// Refresh position/ETA for every queued job and drop the expired ones.
    fn publish_positions(&self) {
        let expired = {
            let mut state = self.lock();
            let expired = state.take_expired(Instant::now());
            for (i, waiting) in state.ready.iter().enumerate() {
                let _ = waiting
                    .status_tx
                    .send(JobStatus::queued(i + 1, self.metrics.eta_secs(i)));
            }
            self.metrics.set_depths(state.ready.len(), state.active);
            expired
        };
        for waiting in expired {
            self.expire_queued(waiting);
        }
    }

    async fn run(&self, waiting: Waiting<H::Payload, H::Output>, worker_id: usize) {
        let Waiting { job, result_tx, status_tx } = waiting;
        let Job { mut meta, payload } = job;

        meta.transition(JobState::Active);
        let _ = status_tx.send(JobStatus::settled(JobState::Active));
        let started = Instant::now();
        let queue_wait = started.duration_since(meta.accepted_at);
        debug!(job_id = %meta.id, worker_id, wait_ms = queue_wait.as_millis() as u64, "job started");

        let ctx = JobContext {
            id: meta.id,
            user_key: meta.user_key.clone(),
            channel: meta.channel,
            payload,
            enqueued_at: meta.enqueued_at,
        };
        let handler = Arc::clone(&self.handler);
        let mut task = tokio::spawn(async move { handler.handle(ctx).await });

        let mut result_tx = Some(result_tx);
        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = tokio::time::sleep_until(meta.deadline) => {
                // The caller stops waiting; the job keeps running to completion.
                meta.transition(JobState::TimedOut);
                self.metrics.record_timeout();
                let _ = status_tx.send(JobStatus::settled(JobState::TimedOut));
                if let Some(tx) = result_tx.take() {
                    let _ = tx.send(Err(QueueError::TimedOut(self.settings.request_timeout)));
                }
                warn!(job_id = %meta.id, user_key = %meta.user_key, "job exceeded request timeout, result discarded");
                task.await
            }
        };

        let processing = started.elapsed();
        let outcome: Result<H::Output, String> = match joined {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(e) if e.is_panic() => Err("job panicked".to_string()),
            Err(_) => Err("job cancelled".to_string()),
        };
        self.metrics.record_processed(processing, outcome.is_err());

        if meta.state() == JobState::Active {
            let next = if outcome.is_ok() { JobState::Done } else { JobState::Failed };
            meta.transition(next);
            let _ = status_tx.send(JobStatus::settled(next));
        }

        match &outcome {
            Ok(_) => info!(
                job_id = %meta.id,
                worker_id,
                state = %meta.state(),
                elapsed_ms = processing.as_millis() as u64,
                "job finished"
            ),
            Err(e) => error!(job_id = %meta.id, worker_id, error = %e, "job failed"),
        }

        self.handler.observe(JobReport {
            id: meta.id,
            user_key: &meta.user_key,
            channel: meta.channel,
            state: meta.state(),
            queue_wait,
            processing,
            output: outcome.as_ref().ok(),
            error: outcome.as_ref().err().map(String::as_str),
        });

        if let Some(tx) = result_tx {
            let _ = tx.send(outcome.map_err(QueueError::Failed));
        }

        self.finish(&meta);
    }
}

// ── Public queue ──────────────────────────────────────────────

pub struct AdmissionQueue<H: JobHandler> {
    inner: Arc<Inner<H>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<H: JobHandler> AdmissionQueue<H> {
    /// Spawn the worker pool and the position ticker. Must be called inside a Tokio runtime.
    pub fn start(handler: Arc<H>, settings: QueueSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        let workers = settings.workers.max(1);
        let inner = Arc::new(Inner {
            handler,
            metrics: QueueMetrics::new(settings.ema_alpha),
            settings,
            state: Mutex::new(ReadyList {
                ready: VecDeque::new(),
                active: 0,
                per_user: HashMap::new(),
                closed: false,
            }),
            notify: Notify::new(),
            shutdown,
        });

        let mut tasks = Vec::with_capacity(workers + 1);
        for worker_id in 0..workers {
            tasks.push(tokio::spawn(worker_loop(Arc::clone(&inner), worker_id)));
        }
        tasks.push(tokio::spawn(position_ticker(Arc::clone(&inner))));

        info!(
            workers,
            capacity = inner.settings.capacity,
            per_user_limit = inner.settings.per_user_limit,
            timeout_secs = inner.settings.request_timeout.as_secs(),
            "admission queue started"
        );

        Self { inner, tasks: Mutex::new(tasks) }
    }

    /// Admit a job or reject it immediately. Never blocks.
    pub fn submit(
        &self,
        user_key: impl Into<String>,
        channel: Channel,
        payload: H::Payload,
    ) -> Result<JobHandle<H::Output>, QueueError> {
        let settings = &self.inner.settings;
        let mut job = Job::new(user_key.into(), channel, payload, settings.request_timeout);

        let mut state = self.inner.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.in_flight() >= settings.capacity {
            drop(state);
            job.meta.transition(JobState::Rejected);
            self.inner.metrics.record_rejected();
            warn!(user_key = %job.meta.user_key, capacity = settings.capacity, "queue full, job rejected");
            return Err(QueueError::CapacityExceeded { capacity: settings.capacity });
        }
        let user_count = state.per_user.get(&job.meta.user_key).copied().unwrap_or(0);
        if user_count >= settings.per_user_limit {
            drop(state);
            job.meta.transition(JobState::Rejected);
            self.inner.metrics.record_rejected();
            warn!(user_key = %job.meta.user_key, limit = settings.per_user_limit, "per-user limit reached, job rejected");
            return Err(QueueError::UserLimitExceeded {
                user_key: job.meta.user_key,
                limit: settings.per_user_limit,
            });
        }

        let position = state.ready.len() + 1;
        let (result_tx, result_rx) = oneshot::channel();
        let (status_tx, status_rx) =
            watch::channel(JobStatus::queued(position, self.inner.metrics.eta_secs(position - 1)));
        let handle = JobHandle::new(
            job.meta.id,
            job.meta.deadline(),
            settings.request_timeout,
            result_rx,
            status_rx,
        );

        *state.per_user.entry(job.meta.user_key.clone()).or_default() += 1;
        debug!(job_id = %job.meta.id, user_key = %job.meta.user_key, position, "job queued");
        state.ready.push_back(Waiting { job, result_tx, status_tx });
        self.inner.metrics.set_depths(state.ready.len(), state.active);
        drop(state);

        self.inner.notify.notify_one();
        Ok(handle)
    }

    /// Exact (queued, active) counts.
    pub fn depth(&self) -> (usize, usize) {
        let state = self.inner.lock();
        (state.ready.len(), state.active)
    }

    pub fn stats(&self) -> QueueStats {
        let settings = &self.inner.settings;
        QueueStats {
            capacity: settings.capacity,
            workers: settings.workers.max(1),
            per_user_limit: settings.per_user_limit,
            request_timeout_secs: settings.request_timeout.as_secs(),
            closed: self.inner.lock().closed,
            metrics: self.inner.metrics.snapshot(),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.inner.handler
    }

    /// Stop admitting jobs, let the workers drain what is queued, and wait for them.
    pub async fn shutdown(&self) {
        self.inner.lock().closed = true;
        let _ = self.inner.shutdown.send(true);
        self.inner.notify.notify_waiters();

        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "queue task ended abnormally");
            }
        }
        info!("admission queue drained");
    }
}

async fn worker_loop<H: JobHandler>(inner: Arc<Inner<H>>, worker_id: usize) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        match inner.next_job() {
            Next::Job(waiting) => inner.run(waiting, worker_id).await,
            Next::Idle => {
                tokio::select! {
                    _ = inner.notify.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }
            Next::Closed => break,
        }
    }
    debug!(worker_id, "worker stopped");
}

async fn position_ticker<H: JobHandler>(inner: Arc<Inner<H>>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut interval = tokio::time::interval(inner.settings.position_update_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => inner.publish_positions(),
            _ = shutdown.changed() => break,
        }
    }
}
