//! Bounded-concurrency dispatcher.
//!
//! Items are dispatched onto a tokio [`JoinSet`] behind a counting
//! semaphore. A permit is acquired before a task is spawned and released when
//! it finishes, so at most `max_concurrency` tasks are ever in flight.
//! Results are handed back in completion order. A failing or panicking task
//! never cancels its siblings.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use super::executor::{FailureDetail, TaskFailure, TaskResult};
use super::item::WorkItem;

/// Outcome of one dispatched item.
#[derive(Debug, Clone)]
pub struct Completed<T> {
    pub id: String,
    pub result: TaskResult<T>,
    /// Wall-clock time from spawn to completion, retries included.
    pub elapsed: Duration,
}

/// Counters for one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    /// Items handed to a task.
    pub dispatched: usize,
    /// Items whose outcome was delivered.
    pub completed: usize,
    /// True if a shutdown signal stopped dispatching early.
    pub interrupted: bool,
}

/// Dispatches work items with bounded concurrency.
pub struct Scheduler {
    max_concurrency: usize,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl Scheduler {
    /// Creates a scheduler. A limit of 0 is treated as 1.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            shutdown: None,
        }
    }

    /// Stops dispatching new items once a value is received on `shutdown`.
    ///
    /// In-flight tasks still run to completion and are reported.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Runs `task` for every item and calls `on_complete` with each outcome
    /// as soon as it is available.
    ///
    /// Every dispatched item yields exactly one [`Completed`], including
    /// items whose task panicked.
    pub async fn run<P, T, I, F, Fut, C>(
        &mut self,
        items: I,
        mut task: F,
        mut on_complete: C,
    ) -> SchedulerSummary
    where
        I: IntoIterator<Item = WorkItem<P>>,
        F: FnMut(WorkItem<P>) -> Fut,
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
        T: Send + 'static,
        C: FnMut(Completed<T>),
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set: JoinSet<Completed<T>> = JoinSet::new();
        let mut summary = SchedulerSummary::default();

        'dispatch: for item in items {
            if shutdown_requested(&mut self.shutdown) {
                summary.interrupted = true;
                break;
            }

            // Wait for a free slot, delivering finished tasks meanwhile.
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut self.shutdown) => {
                        summary.interrupted = true;
                        break 'dispatch;
                    }
                    Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                        if let Some(done) = completed_or_log(joined) {
                            summary.completed += 1;
                            on_complete(done);
                        }
                    }
                    acquired = semaphore.clone().acquire_owned() => match acquired {
                        Ok(permit) => break permit,
                        Err(e) => {
                            error!(error = %e, "Scheduler semaphore closed, stopping dispatch");
                            break 'dispatch;
                        }
                    }
                }
            };

            let id = item.id.clone();
            debug!(item_id = %id, in_flight = join_set.len() + 1, "Dispatching item");
            let future = task(item);
            summary.dispatched += 1;

            join_set.spawn(async move {
                let started = Instant::now();
                let result = match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let failure = TaskFailure::permanent(format!(
                            "task panicked: {}",
                            panic_message(panic.as_ref())
                        ));
                        TaskResult::Failure(FailureDetail::single(failure, 1))
                    }
                };
                drop(permit);
                Completed {
                    id,
                    result,
                    elapsed: started.elapsed(),
                }
            });
        }

        if summary.interrupted {
            info!(
                in_flight = join_set.len(),
                "Shutdown requested, waiting for in-flight items"
            );
        }

        while let Some(joined) = join_set.join_next().await {
            if let Some(done) = completed_or_log(joined) {
                summary.completed += 1;
                on_complete(done);
            }
        }

        summary
    }

    /// Like [`Scheduler::run`] but collects outcomes in completion order.
    pub async fn collect<P, T, I, F, Fut>(&mut self, items: I, task: F) -> Vec<Completed<T>>
    where
        I: IntoIterator<Item = WorkItem<P>>,
        F: FnMut(WorkItem<P>) -> Fut,
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let mut outcomes = Vec::new();
        self.run(items, task, |done| outcomes.push(done)).await;
        outcomes
    }
}

fn completed_or_log<T>(joined: Result<Completed<T>, JoinError>) -> Option<Completed<T>> {
    match joined {
        Ok(done) => Some(done),
        Err(e) => {
            // Panics are caught inside the task, so this is only reachable
            // through runtime shutdown.
            error!(error = %e, "Task did not complete");
            None
        }
    }
}

fn shutdown_requested(shutdown: &mut Option<broadcast::Receiver<()>>) -> bool {
    match shutdown {
        Some(rx) => match rx.try_recv() {
            Ok(()) | Err(TryRecvError::Lagged(_)) => true,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => false,
        },
        None => false,
    }
}

async fn wait_for_shutdown(shutdown: &mut Option<broadcast::Receiver<()>>) {
    if let Some(rx) = shutdown {
        match rx.recv().await {
            Ok(()) | Err(RecvError::Lagged(_)) => return,
            // Sender gone: no shutdown can arrive any more.
            Err(RecvError::Closed) => {}
        }
    }
    std::future::pending::<()>().await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::executor::FailureKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn items(n: usize) -> Vec<WorkItem<usize>> {
        (0..n).map(|i| WorkItem::new(format!("item-{}", i), i)).collect()
    }

    #[tokio::test]
    async fn test_every_item_yields_one_result() {
        let mut scheduler = Scheduler::new(3);
        let outcomes = scheduler
            .collect(items(10), |item| async move { TaskResult::Success(item.payload * 2) })
            .await;

        assert_eq!(outcomes.len(), 10);
        let mut ids: Vec<_> = outcomes.iter().map(|o| o.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
        assert!(outcomes.iter().all(|o| o.result.is_success()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut scheduler = Scheduler::new(3);
        let outcomes = scheduler
            .collect(items(20), |item| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    TaskResult::Success(item.payload)
                }
            })
            .await;

        assert_eq!(outcomes.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_arrive_in_completion_order() {
        let mut scheduler = Scheduler::new(3);
        let delays = vec![
            WorkItem::new("slow", 300u64),
            WorkItem::new("fast", 10u64),
            WorkItem::new("medium", 100u64),
        ];
        let outcomes = scheduler
            .collect(delays, |item| async move {
                tokio::time::sleep(Duration::from_millis(item.payload)).await;
                TaskResult::Success(())
            })
            .await;

        let order: Vec<_> = outcomes.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(order, vec!["fast", "medium", "slow"]);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_siblings() {
        let mut scheduler = Scheduler::new(2);
        let outcomes = scheduler
            .collect(items(5), |item| async move {
                if item.payload == 2 {
                    TaskResult::Failure(FailureDetail::single(
                        TaskFailure::permanent("bad input"),
                        1,
                    ))
                } else {
                    TaskResult::Success(item.payload)
                }
            })
            .await;

        assert_eq!(outcomes.len(), 5);
        let failed: Vec<_> = outcomes
            .iter()
            .filter(|o| !o.result.is_success())
            .map(|o| o.id.as_str())
            .collect();
        assert_eq!(failed, vec!["item-2"]);
    }

    #[tokio::test]
    async fn test_drains_when_everything_fails() {
        let mut scheduler = Scheduler::new(4);
        let summary = scheduler
            .run(
                items(8),
                |_| async {
                    TaskResult::<()>::Failure(FailureDetail::single(
                        TaskFailure::transient("down"),
                        3,
                    ))
                },
                |_| {},
            )
            .await;

        assert_eq!(summary.dispatched, 8);
        assert_eq!(summary.completed, 8);
        assert!(!summary.interrupted);
    }

    #[tokio::test]
    async fn test_panicking_task_becomes_permanent_failure() {
        let mut scheduler = Scheduler::new(2);
        let outcomes = scheduler
            .collect(items(3), |item| async move {
                if item.payload == 1 {
                    panic!("boom");
                }
                TaskResult::Success(item.payload)
            })
            .await;

        assert_eq!(outcomes.len(), 3);
        let panicked = outcomes.iter().find(|o| o.id == "item-1").unwrap();
        let detail = panicked.result.failure().unwrap();
        assert_eq!(detail.kind, FailureKind::Permanent);
        assert!(detail.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_dispatch() {
        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        let mut scheduler = Scheduler::new(2).with_shutdown(rx);
        let summary = scheduler
            .run(items(5), |item| async move { TaskResult::Success(item.payload) }, |_| {})
            .await;

        assert!(summary.interrupted);
        assert_eq!(summary.dispatched, 0);
        assert_eq!(summary.completed, 0);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        assert_eq!(Scheduler::new(0).max_concurrency(), 1);
    }
}
