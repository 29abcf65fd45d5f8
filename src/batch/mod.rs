//! Resumable concurrent batch engine.
//!
//! A run enumerates work items from a [`WorkItemSource`], drops those whose
//! record already exists according to a [`CompletionIndex`] snapshot, and
//! dispatches the rest through a [`Scheduler`] with bounded concurrency. Each
//! item goes through a [`RetryPolicy`]-wrapped [`TaskExecutor`] call and, on
//! success, is committed by a [`ResultSink`]. Failures are collected in the
//! [`ExecutionReport`] and never abort other items; the next run picks them up
//! again because they have no record.
//!
//! # Example
//!
//! ```ignore
//! use agent_harvest::batch::{BatchConfig, BatchRunner, CompletionIndex, JsonDirSink};
//!
//! let sink = JsonDirSink::create("out/search")?;
//! let index = CompletionIndex::scan(sink.dir())?;
//! let runner = BatchRunner::new(executor, sink, BatchConfig::default());
//! let report = runner.run(&source, &index).await;
//! report.print_summary();
//! ```

pub mod completion;
pub mod config;
pub mod executor;
pub mod item;
pub mod progress;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod sink;

pub use completion::CompletionIndex;
pub use config::{BatchConfig, BatchSettings};
pub use executor::{FailureDetail, FailureKind, Schema, TaskExecutor, TaskFailure, TaskResult};
pub use item::{
    list_csv_files, normalize_identifier, CsvSource, Identified, VecSource, WorkItem,
    WorkItemSource, DEFAULT_ID_COLUMN,
};
pub use progress::{ProgressCounters, ProgressMonitor, ProgressSnapshot};
pub use report::{ExecutionReport, OutcomeLine, OutcomeStatus, RejectedRecord, ReportCounts};
pub use retry::{with_retry, RetryPolicy};
pub use runner::{plan_batch, BatchRunner};
pub use scheduler::{Completed, Scheduler, SchedulerSummary};
pub use sink::{CommitOutcome, JsonDirSink, ResultSink, StagedRecord};
