//! Background progress monitor for batch runs.
//!
//! Periodically logs dispatch/completion counters so operators can follow
//! long-running stages without parsing per-item log lines.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Snapshot of batch counters at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub in_flight: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Items with a final outcome.
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Shared atomic counters updated by the runner as items move through.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounters {
    pub dispatched: Arc<AtomicUsize>,
    pub succeeded: Arc<AtomicUsize>,
    pub failed: Arc<AtomicUsize>,
    pub in_flight: Arc<AtomicUsize>,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one item as started.
    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks one in-flight item as finished.
    pub fn record_finish(&self, success: bool) {
        // Saturating: a finish without a matching dispatch must not wrap.
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Sets every counter back to zero.
    pub fn reset(&self) {
        self.dispatched.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.in_flight.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that logs batch progress every `interval`.
///
/// Call [`ProgressMonitor::stop`] when the batch finishes. Dropping the
/// monitor also stops it at the next tick.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Starts logging `counters` every `interval` for a batch of `total`
    /// pending items.
    pub fn start(
        stage: impl Into<String>,
        counters: ProgressCounters,
        total: usize,
        interval: Duration,
    ) -> Self {
        let stage = stage.into();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let pct = if total > 0 {
                    (snap.finished() as f64 / total as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };
                let elapsed_secs = snap.elapsed.as_secs_f64();
                let items_per_sec = if elapsed_secs > 0.0 {
                    snap.finished() as f64 / elapsed_secs
                } else {
                    0.0
                };

                tracing::info!(
                    stage = %stage,
                    dispatched = snap.dispatched,
                    succeeded = snap.succeeded,
                    failed = snap.failed,
                    in_flight = snap.in_flight,
                    total = total,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = snap.elapsed.as_secs(),
                    items_per_sec = format!("{:.2}", items_per_sec),
                    "Batch progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Stops the monitor and waits for its task to end.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}
