//! Batch runner: wires source, completion index, retry policy, scheduler and
//! sink into one run.
//!
//! ```text
//! source ─► dedupe ─► completion filter ─► scheduler ─► retry(executor) ─► validate ─► sink
//!                                                                    └─► report
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::completion::CompletionIndex;
use super::config::BatchConfig;
use super::executor::{FailureDetail, Schema, TaskExecutor, TaskFailure, TaskResult};
use super::item::{WorkItem, WorkItemSource};
use super::progress::{ProgressCounters, ProgressMonitor};
use super::report::ExecutionReport;
use super::retry::RetryPolicy;
use super::scheduler::{Completed, Scheduler};
use super::sink::{validate_identifier, CommitOutcome, ResultSink};
use crate::error::SourceError;

/// Enumerates `source` and returns the items that still need work.
///
/// Rejected records, duplicate identifiers and already-completed items are
/// recorded in `report`; the returned items are unique and in enumeration
/// order.
pub fn plan_batch<S: WorkItemSource>(
    source: &S,
    index: &CompletionIndex,
    report: &mut ExecutionReport,
) -> Vec<WorkItem<S::Payload>> {
    let mut seen = HashSet::new();
    let mut pending = Vec::new();

    for (position, entry) in source.enumerate().enumerate() {
        let item = match entry {
            Ok(item) => item,
            Err(err) => {
                debug!(origin = %err.origin(), error = %err, "Rejected input record");
                report.record_rejected(err.origin(), err.to_string());
                continue;
            }
        };
        report.counts.enumerated += 1;

        if let Err(err) = validate_identifier(&item.id) {
            report.record_rejected(item.id.clone(), err.to_string());
            continue;
        }
        if !seen.insert(item.id.clone()) {
            let err = SourceError::DuplicateIdentifier {
                id: item.id.clone(),
                origin: format!("item #{}", position + 1),
            };
            report.record_rejected(err.origin(), err.to_string());
            continue;
        }
        if index.contains(&item.id) {
            report.counts.skipped_completed += 1;
            continue;
        }
        pending.push(item);
    }

    report.counts.pending = pending.len();
    pending
}

/// Runs one stage: an executor and a sink driven by a [`BatchConfig`].
pub struct BatchRunner<E: TaskExecutor> {
    executor: Arc<E>,
    sink: Arc<dyn ResultSink>,
    config: BatchConfig,
    shutdown: Option<broadcast::Receiver<()>>,
    counters: ProgressCounters,
}

impl<E: TaskExecutor> BatchRunner<E> {
    pub fn new(executor: E, sink: impl ResultSink + 'static, config: BatchConfig) -> Self {
        Self::from_shared(Arc::new(executor), Arc::new(sink), config)
    }

    pub fn from_shared(executor: Arc<E>, sink: Arc<dyn ResultSink>, config: BatchConfig) -> Self {
        Self {
            executor,
            sink,
            config,
            shutdown: None,
            counters: ProgressCounters::new(),
        }
    }

    /// Stops dispatching new items when a value is sent on the channel.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Live counters of the current run, reset when a run starts.
    pub fn counters(&self) -> ProgressCounters {
        self.counters.clone()
    }

    /// Processes every pending item of `source` not present in `index`.
    pub async fn run<S>(&self, source: &S, index: &CompletionIndex) -> ExecutionReport
    where
        S: WorkItemSource<Payload = E::Payload>,
    {
        let mut report = ExecutionReport::new(self.executor.name(), self.sink.location());
        let pending = plan_batch(source, index, &mut report);
        self.execute(pending, &mut report).await;
        report.finish();
        report
    }

    /// Dispatches already-planned items, recording outcomes in `report`.
    pub async fn execute(&self, mut pending: Vec<WorkItem<E::Payload>>, report: &mut ExecutionReport) {
        report.dry_run = self.config.dry_run;
        self.counters.reset();

        if let Some(limit) = self.config.limit {
            if pending.len() > limit {
                for item in pending.drain(limit..) {
                    report.record_not_dispatched(item.id);
                }
            }
        }

        info!(
            stage = %self.executor.name(),
            output = %self.sink.location(),
            enumerated = report.counts.enumerated,
            already_completed = report.counts.skipped_completed,
            rejected = report.counts.rejected,
            pending = pending.len(),
            concurrency = self.config.concurrency,
            "Planned batch"
        );

        if self.config.dry_run {
            for item in pending {
                report.record_not_dispatched(item.id);
            }
            return;
        }
        if pending.is_empty() {
            return;
        }

        let pending_ids: Vec<String> = pending.iter().map(|item| item.id.clone()).collect();
        let monitor = self.config.progress_interval.map(|interval| {
            ProgressMonitor::start(
                self.executor.name(),
                self.counters.clone(),
                pending.len(),
                interval,
            )
        });

        let mut scheduler = Scheduler::new(self.config.concurrency);
        if let Some(rx) = &self.shutdown {
            scheduler = scheduler.with_shutdown(rx.resubscribe());
        }

        let policy = self.config.retry_policy();
        let executor = self.executor.clone();
        let sink = self.sink.clone();
        let counters = self.counters.clone();
        let mut finished = HashSet::new();

        let summary = scheduler
            .run(
                pending,
                |item| {
                    counters.record_dispatch();
                    process_item(executor.clone(), sink.clone(), policy.clone(), item)
                },
                |done: Completed<CommitOutcome>| {
                    let success = done.result.is_success();
                    finished.insert(done.id.clone());
                    record_outcome(report, done);
                    counters.record_finish(success);
                },
            )
            .await;

        if let Some(monitor) = monitor {
            monitor.stop().await;
        }

        report.counts.dispatched = summary.dispatched;
        report.interrupted = summary.interrupted;
        for id in pending_ids {
            if !finished.contains(&id) {
                report.record_not_dispatched(id);
            }
        }

        info!(
            stage = %self.executor.name(),
            written = report.counts.written,
            already_present = report.counts.already_present,
            failed = report.counts.failed,
            not_dispatched = report.counts.not_dispatched,
            interrupted = summary.interrupted,
            "Batch finished"
        );
    }
}

fn record_outcome(report: &mut ExecutionReport, done: Completed<CommitOutcome>) {
    let elapsed_ms = done.elapsed.as_millis() as u64;
    match done.result {
        TaskResult::Success(CommitOutcome::Written) => {
            info!(item_id = %done.id, elapsed_ms, "Item completed");
            report.record_written(done.id, done.elapsed);
        }
        TaskResult::Success(CommitOutcome::AlreadyPresent) => {
            info!(item_id = %done.id, elapsed_ms, "Item already present, record left untouched");
            report.record_already_present(done.id, done.elapsed);
        }
        TaskResult::Failure(detail) => {
            warn!(
                item_id = %done.id,
                kind = %detail.kind,
                attempts = detail.attempts,
                exhausted = detail.exhausted,
                error = %detail.message,
                "Item failed"
            );
            report.record_failure(done.id, detail, done.elapsed);
        }
    }
}

/// Runs one item end to end: retried executor call, schema validation,
/// encoding and commit.
async fn process_item<E: TaskExecutor>(
    executor: Arc<E>,
    sink: Arc<dyn ResultSink>,
    policy: RetryPolicy,
    item: WorkItem<E::Payload>,
) -> TaskResult<CommitOutcome> {
    let mut attempts = 0u32;
    let executor_ref: &E = executor.as_ref();
    let item_ref = &item;
    let outcome = policy
        .run(|attempt| {
            attempts = attempt + 1;
            attempt_once(executor_ref, item_ref)
        })
        .await;

    let output = match outcome {
        TaskResult::Success(output) => output,
        TaskResult::Failure(detail) => return TaskResult::Failure(detail),
    };

    let bytes = match serde_json::to_vec_pretty(&output) {
        Ok(bytes) => bytes,
        Err(e) => {
            let failure = TaskFailure::permanent(format!("failed to encode result: {}", e));
            return TaskResult::Failure(FailureDetail::single(failure, attempts));
        }
    };

    let id = item.id.clone();
    let committed = tokio::task::spawn_blocking(move || sink.commit(&id, &bytes)).await;
    match committed {
        Ok(Ok(outcome)) => TaskResult::Success(outcome),
        Ok(Err(e)) => {
            TaskResult::Failure(FailureDetail::single(TaskFailure::io(e.to_string()), attempts))
        }
        Err(e) => TaskResult::Failure(FailureDetail::single(
            TaskFailure::io(format!("commit task failed: {}", e)),
            attempts,
        )),
    }
}

async fn attempt_once<E: TaskExecutor>(
    executor: &E,
    item: &WorkItem<E::Payload>,
) -> Result<E::Output, TaskFailure> {
    let output = executor.execute(item).await?;
    output
        .validate()
        .map_err(|reason| TaskFailure::permanent(format!("schema validation failed: {}", reason)))?;
    Ok(output)
}
