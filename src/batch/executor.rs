//! Task executor contract and the failure taxonomy driving retries.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::item::WorkItem;

/// Classification of a failed attempt.
///
/// Retry policy dispatches on this value, so executors classify at the
/// point where the underlying fault is caught (status code, error kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network timeout, 5xx, connection reset. Retried.
    Transient,
    /// HTTP 429 or equivalent. Retried with a longer delay.
    RateLimited,
    /// Client error, malformed response or schema mismatch. Never retried.
    Permanent,
    /// The result could not be persisted. Left for the next run.
    Io,
}

impl FailureKind {
    /// Returns true if another attempt may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::RateLimited)
    }

    /// Classifies an HTTP status code that is not a success.
    pub fn from_status(code: u16) -> Self {
        match code {
            429 => FailureKind::RateLimited,
            408 | 500..=599 => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Transient => "transient",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Permanent => "permanent",
            FailureKind::Io => "io",
        };
        f.write_str(name)
    }
}

/// A single classified failure returned by one executor attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FailureKind::RateLimited, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Permanent, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Io, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskFailure {}

/// Final failure of an item after the retry policy gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
    /// Number of attempts made, including the first.
    pub attempts: u32,
    /// True when the last failure was retryable but no attempts remained.
    pub exhausted: bool,
}

impl FailureDetail {
    /// Failure that happened outside the retry loop (validation, sink).
    pub fn single(failure: TaskFailure, attempts: u32) -> Self {
        Self {
            kind: failure.kind,
            message: failure.message,
            attempts,
            exhausted: false,
        }
    }

    /// Human-readable reason, e.g. "transient: timed out (retries exhausted after 3 attempts)".
    pub fn reason(&self) -> String {
        if self.exhausted {
            format!(
                "{}: {} (retries exhausted after {} attempts)",
                self.kind, self.message, self.attempts
            )
        } else {
            format!("{}: {}", self.kind, self.message)
        }
    }
}

/// Tagged outcome of one work item.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult<T> {
    Success(T),
    Failure(FailureDetail),
}

impl<T> TaskResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success(_))
    }

    pub fn failure(&self) -> Option<&FailureDetail> {
        match self {
            TaskResult::Failure(detail) => Some(detail),
            TaskResult::Success(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TaskResult<U> {
        match self {
            TaskResult::Success(value) => TaskResult::Success(f(value)),
            TaskResult::Failure(detail) => TaskResult::Failure(detail),
        }
    }
}

/// Declared output schema of an executor.
///
/// `validate` runs before a result reaches the sink; a violation turns the
/// item into a permanent failure instead of a malformed record on disk.
pub trait Schema: Serialize + Send + 'static {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

impl Schema for serde_json::Value {
    fn validate(&self) -> Result<(), String> {
        match self {
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => Ok(()),
            other => Err(format!("expected a JSON object or array, got {}", other)),
        }
    }
}

/// Performs the externally-facing operation for one work item.
///
/// Implementations must not write output themselves; the returned value is
/// handed to the result sink by the batch runner.
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    /// Task payload carried by each work item.
    type Payload: Send + Sync + 'static;
    /// Structured result persisted on success.
    type Output: Schema;

    /// Short stage name used in logs and reports.
    fn name(&self) -> &str;

    /// Runs a single attempt for `item`.
    async fn execute(&self, item: &WorkItem<Self::Payload>) -> Result<Self::Output, TaskFailure>;
}
