//! Per-source FIFO execution with spacing and throttle cooldowns.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::sources::SourceError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// The queue was cleared before this operation started.
    #[error("operation abandoned by queue clear")]
    Abandoned,

    /// The per-source worker stopped unexpectedly.
    #[error("queue worker is gone")]
    WorkerGone,
}

/// Explicit throttle signal extracted from a source response.
#[derive(Debug, Clone)]
pub struct RateLimitSignal {
    /// Server-specified reset time, honored when present.
    pub reset_at: Option<DateTime<Utc>>,
}

/// Observability snapshot for one source queue.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueMetrics {
    pub source: String,
    pub depth: usize,
    pub processing: bool,
    pub in_cooldown: bool,
}

struct Job {
    run: Box<dyn FnOnce() -> BoxFuture<'static, Option<RateLimitSignal>> + Send>,
    abandon: Box<dyn FnOnce() + Send>,
}

struct SourceQueue {
    name: String,
    min_spacing: Duration,
    pending: Mutex<VecDeque<Job>>,
    notify: Notify,
    processing: AtomicBool,
    cooldown_until: Mutex<Option<Instant>>,
    /// Applied when the source gives no reset hint; doubles per repeat,
    /// resets on a signal-free completion.
    cooldown_backoff: Mutex<Duration>,
    config: QueueConfig,
}

impl SourceQueue {
    fn in_cooldown(&self) -> bool {
        self.cooldown_until
            .lock()
            .map_or(false, |until| until > Instant::now())
    }

    fn apply_signal(&self, signal: RateLimitSignal) {
        let now = Instant::now();
        let until = match signal.reset_at {
            Some(reset_at) => {
                let wait = (reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                now + wait
            }
            None => {
                let mut backoff = self.cooldown_backoff.lock();
                let wait = *backoff;
                *backoff = std::cmp::min(backoff.saturating_mul(2), self.config.cooldown_max());
                now + wait
            }
        };

        warn!(
            source = %self.name,
            cooldown_ms = (until - now).as_millis() as u64,
            "source rate limited, entering cooldown"
        );
        *self.cooldown_until.lock() = Some(until);
    }

    async fn worker(self: Arc<Self>) {
        let mut next_allowed: Option<Instant> = None;

        loop {
            while self.pending.lock().is_empty() {
                self.notify.notified().await;
            }

            // Honor spacing and any active cooldown before starting a job,
            // so a queue clear during the wait still abandons it.
            loop {
                let now = Instant::now();
                let cooldown = *self.cooldown_until.lock();
                let wake = [next_allowed, cooldown]
                    .into_iter()
                    .flatten()
                    .filter(|at| *at > now)
                    .max();

                match wake {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => break,
                }
            }

            let Some(job) = self.pending.lock().pop_front() else {
                continue;
            };

            self.processing.store(true, Ordering::Release);
            let signal = (job.run)().await;
            self.processing.store(false, Ordering::Release);

            next_allowed = Some(Instant::now() + self.min_spacing);

            match signal {
                Some(signal) => self.apply_signal(signal),
                None => {
                    *self.cooldown_backoff.lock() = self.config.cooldown_base();
                }
            }
        }
    }
}

struct SourceEntry {
    queue: Arc<SourceQueue>,
    worker: JoinHandle<()>,
}

/// One logical queue per source; different sources proceed concurrently.
pub struct RateLimitedQueue {
    sources: DashMap<String, SourceEntry>,
    config: QueueConfig,
}

impl RateLimitedQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            sources: DashMap::new(),
            config,
        }
    }

    fn source_queue(&self, source: &str, min_spacing: Duration) -> Arc<SourceQueue> {
        self.sources
            .entry(source.to_string())
            .or_insert_with(|| {
                debug!(source, spacing_ms = min_spacing.as_millis() as u64, "starting source queue worker");
                let queue = Arc::new(SourceQueue {
                    name: source.to_string(),
                    min_spacing,
                    pending: Mutex::new(VecDeque::new()),
                    notify: Notify::new(),
                    processing: AtomicBool::new(false),
                    cooldown_until: Mutex::new(None),
                    cooldown_backoff: Mutex::new(self.config.cooldown_base()),
                    config: self.config.clone(),
                });
                let worker = tokio::spawn(Arc::clone(&queue).worker());
                SourceEntry { queue, worker }
            })
            .queue
            .clone()
    }

    /// Enqueue an operation against a source. Resolves when the operation
    /// completes, or with [`QueueError::Abandoned`] if the queue is cleared
    /// first. A `RateLimited` error from the operation triggers the source's
    /// cooldown; the error itself still flows back to the caller.
    pub async fn enqueue<T, F, Fut>(
        &self,
        source: &str,
        min_spacing: Duration,
        op: F,
    ) -> Result<Result<T, SourceError>, QueueError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SourceError>> + Send + 'static,
    {
        let queue = self.source_queue(source, min_spacing);

        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let run_slot = Arc::clone(&slot);

        let job = Job {
            run: Box::new(move || {
                Box::pin(async move {
                    let result = op().await;
                    let signal = match &result {
                        Err(SourceError::RateLimited { reset_at }) => Some(RateLimitSignal {
                            reset_at: *reset_at,
                        }),
                        _ => None,
                    };
                    if let Some(tx) = run_slot.lock().take() {
                        let _ = tx.send(Ok(result));
                    }
                    signal
                })
            }),
            abandon: Box::new(move || {
                if let Some(tx) = slot.lock().take() {
                    let _ = tx.send(Err(QueueError::Abandoned));
                }
            }),
        };

        queue.pending.lock().push_back(job);
        queue.notify.notify_one();

        rx.await.map_err(|_| QueueError::WorkerGone)?
    }

    /// Discard all pending (not-yet-started) operations for all sources.
    /// In-flight operations are not interrupted.
    pub fn clear_queue(&self) -> usize {
        let mut discarded = 0;
        for entry in self.sources.iter() {
            let drained: Vec<Job> = entry.queue.pending.lock().drain(..).collect();
            discarded += drained.len();
            for job in drained {
                (job.abandon)();
            }
        }
        if discarded > 0 {
            info!(discarded, "cleared pending queue operations");
        }
        discarded
    }

    /// Abandon everything pending and stop every source worker. The queue
    /// accepts no further work for sources created before shutdown.
    pub fn shutdown(&self) {
        let discarded = self.clear_queue();
        for entry in self.sources.iter() {
            entry.worker.abort();
        }
        debug!(discarded, workers = self.sources.len(), "queue workers stopped");
    }

    pub fn metrics(&self) -> Vec<QueueMetrics> {
        let mut out: Vec<QueueMetrics> = self
            .sources
            .iter()
            .map(|entry| QueueMetrics {
                source: entry.queue.name.clone(),
                depth: entry.queue.pending.lock().len(),
                processing: entry.queue.processing.load(Ordering::Acquire),
                in_cooldown: entry.queue.in_cooldown(),
            })
            .collect();
        out.sort_by(|a, b| a.source.cmp(&b.source));
        out
    }
}
