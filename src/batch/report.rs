//! Execution report for one batch run.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::executor::FailureDetail;

/// Final status of one dispatched item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The record was written by this run.
    Written,
    /// The task succeeded but a record appeared meanwhile; left untouched.
    AlreadyPresent,
    Failed,
}

impl OutcomeStatus {
    fn label(self) -> &'static str {
        match self {
            OutcomeStatus::Written => "ok",
            OutcomeStatus::AlreadyPresent => "exists",
            OutcomeStatus::Failed => "FAILED",
        }
    }
}

/// Per-item line of the report.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeLine {
    pub id: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
    pub elapsed_ms: u64,
}

/// An input record that never became a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRecord {
    /// Where the record came from, e.g. `"90210.csv:14"` or an id.
    pub origin: String,
    pub reason: String,
}

/// Aggregate counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub enumerated: usize,
    pub rejected: usize,
    pub skipped_completed: usize,
    pub pending: usize,
    pub dispatched: usize,
    pub written: usize,
    pub already_present: usize,
    pub failed: usize,
    pub not_dispatched: usize,
}

impl ReportCounts {
    /// Items whose record exists after this run.
    pub fn succeeded(&self) -> usize {
        self.written + self.already_present
    }
}

/// Outcome of one batch: per-item lines plus aggregate counts.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub stage: String,
    pub output: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    /// A shutdown signal stopped dispatching early.
    pub interrupted: bool,
    pub counts: ReportCounts,
    pub outcomes: Vec<OutcomeLine>,
    pub rejected: Vec<RejectedRecord>,
    /// Pending ids that were not dispatched (dry run, limit or shutdown).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_dispatched: Vec<String>,
}

impl ExecutionReport {
    pub fn new(stage: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            stage: stage.into(),
            output: output.into(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run: false,
            interrupted: false,
            counts: ReportCounts::default(),
            outcomes: Vec::new(),
            rejected: Vec::new(),
            not_dispatched: Vec::new(),
        }
    }

    pub fn record_rejected(&mut self, origin: impl Into<String>, reason: impl Into<String>) {
        self.rejected.push(RejectedRecord {
            origin: origin.into(),
            reason: reason.into(),
        });
        self.counts.rejected += 1;
    }

    pub fn record_written(&mut self, id: impl Into<String>, elapsed: Duration) {
        self.push_outcome(id.into(), OutcomeStatus::Written, None, elapsed);
        self.counts.written += 1;
    }

    pub fn record_already_present(&mut self, id: impl Into<String>, elapsed: Duration) {
        self.push_outcome(id.into(), OutcomeStatus::AlreadyPresent, None, elapsed);
        self.counts.already_present += 1;
    }

    pub fn record_failure(&mut self, id: impl Into<String>, detail: FailureDetail, elapsed: Duration) {
        self.push_outcome(id.into(), OutcomeStatus::Failed, Some(detail), elapsed);
        self.counts.failed += 1;
    }

    pub fn record_not_dispatched(&mut self, id: impl Into<String>) {
        self.not_dispatched.push(id.into());
        self.counts.not_dispatched += 1;
    }

    fn push_outcome(
        &mut self,
        id: String,
        status: OutcomeStatus,
        failure: Option<FailureDetail>,
        elapsed: Duration,
    ) {
        self.outcomes.push(OutcomeLine {
            id,
            status,
            failure,
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    /// Stamps the finish time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Failed items with their reasons.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &FailureDetail)> {
        self.outcomes
            .iter()
            .filter_map(|line| line.failure.as_ref().map(|f| (line.id.as_str(), f)))
    }

    /// Human-readable report: one line per item, then totals.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let c = &self.counts;

        let _ = writeln!(
            out,
            "== {} -> {} (run {}){}",
            self.stage,
            self.output,
            self.run_id,
            if self.dry_run { " [dry run]" } else { "" }
        );

        for line in &self.outcomes {
            match &line.failure {
                Some(detail) => {
                    let _ = writeln!(out, "  {:<7}{}  {}", line.status.label(), line.id, detail.reason());
                }
                None => {
                    let _ = writeln!(out, "  {:<7}{}", line.status.label(), line.id);
                }
            }
        }

        if !self.rejected.is_empty() {
            let _ = writeln!(out, "Rejected records:");
            for rejected in &self.rejected {
                let _ = writeln!(out, "  {}  {}", rejected.origin, rejected.reason);
            }
        }

        if self.dry_run && !self.not_dispatched.is_empty() {
            let _ = writeln!(out, "Would process:");
            for id in &self.not_dispatched {
                let _ = writeln!(out, "  {}", id);
            }
        }

        let _ = writeln!(
            out,
            "Enumerated: {}  Rejected: {}  Already completed: {}  Pending: {}",
            c.enumerated, c.rejected, c.skipped_completed, c.pending
        );
        let _ = writeln!(
            out,
            "Succeeded: {} (written {}, already present {})  Failed: {}  Not dispatched: {}",
            c.succeeded(),
            c.written,
            c.already_present,
            c.failed,
            c.not_dispatched
        );
        if self.interrupted {
            let _ = writeln!(out, "Interrupted: remaining items will be picked up by the next run");
        }
        out
    }

    /// Prints [`ExecutionReport::render`] to stdout.
    pub fn print_summary(&self) {
        print!("{}", self.render());
    }

    /// Writes the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::executor::{FailureKind, TaskFailure};
    use tempfile::TempDir;

    fn sample() -> ExecutionReport {
        let mut report = ExecutionReport::new("search", "out/search");
        report.counts.enumerated = 4;
        report.counts.pending = 3;
        report.counts.skipped_completed = 1;
        report.record_written("a", Duration::from_millis(12));
        report.record_already_present("b", Duration::from_millis(3));
        report.record_failure(
            "c",
            FailureDetail {
                kind: FailureKind::Transient,
                message: "503".to_string(),
                attempts: 3,
                exhausted: true,
            },
            Duration::from_millis(40),
        );
        report.record_rejected("agents.csv:5", "missing identifier");
        report.finish();
        report
    }

    #[test]
    fn test_counts() {
        let report = sample();
        assert_eq!(report.counts.written, 1);
        assert_eq!(report.counts.already_present, 1);
        assert_eq!(report.counts.succeeded(), 2);
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.rejected, 1);
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn test_failures_iterator() {
        let report = sample();
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "c");
        assert!(failures[0].1.exhausted);
    }

    #[test]
    fn test_render_lists_every_item() {
        let text = sample().render();
        assert!(text.contains("ok     a"));
        assert!(text.contains("exists b"));
        assert!(text.contains("FAILED c"));
        assert!(text.contains("retries exhausted after 3 attempts"));
        assert!(text.contains("agents.csv:5"));
        assert!(text.contains("Succeeded: 2"));
    }

    #[test]
    fn test_write_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("run.json");
        sample().write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["stage"], "search");
        assert_eq!(value["counts"]["failed"], 1);
        assert_eq!(value["outcomes"][2]["failure"]["kind"], "transient");
        assert!(value["outcomes"][0].get("failure").is_none());
    }

    #[test]
    fn test_single_failure_reason_in_render() {
        let mut report = ExecutionReport::new("extract", "out");
        report.record_failure(
            "x",
            FailureDetail::single(TaskFailure::permanent("schema mismatch"), 1),
            Duration::ZERO,
        );
        assert!(report.render().contains("permanent: schema mismatch"));
    }
}
