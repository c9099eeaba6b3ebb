//! Execution Records
//!
//! What happened to each job in a run, kept for the summary and the
//! report.

use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::workflow::{JobId, JobStatus, SkipReason};

/// Where a process stream went.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum StreamSink {
    /// Written to a log file
    Log(String),
    /// Inherited from the engine
    Inherited,
    /// Nothing was run
    None,
}

impl fmt::Display for StreamSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log(path) => write!(f, "{}", path),
            Self::Inherited => write!(f, "inherited"),
            Self::None => write!(f, "-"),
        }
    }
}

/// Final state of a job, flattened for serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Succeeded,
    Failed,
    UpToDate,
    SkippedFailedDependency,
    Cancelled,
    Pending,
}

impl From<&JobStatus> for RecordStatus {
    fn from(status: &JobStatus) -> Self {
        match status {
            JobStatus::Succeeded => Self::Succeeded,
            JobStatus::Failed(_) => Self::Failed,
            JobStatus::Skipped(SkipReason::UpToDate) => Self::UpToDate,
            JobStatus::Skipped(SkipReason::FailedDependency(_)) => Self::SkippedFailedDependency,
            JobStatus::Skipped(SkipReason::Cancelled) => Self::Cancelled,
            JobStatus::Pending | JobStatus::Running => Self::Pending,
        }
    }
}

/// The outcome of one job.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub job: JobId,
    pub label: String,
    pub status: RecordStatus,
    pub exit_code: Option<i32>,
    pub stdout: StreamSink,
    pub stderr: StreamSink,
    pub started: Option<DateTime<Local>>,
    pub finished: Option<DateTime<Local>>,
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// Creates a record for a job that has not run.
    pub fn new(job: JobId, label: impl Into<String>, status: &JobStatus) -> Self {
        Self {
            job,
            label: label.into(),
            status: status.into(),
            exit_code: None,
            stdout: StreamSink::None,
            stderr: StreamSink::None,
            started: None,
            finished: None,
            error: None,
        }
    }

    /// Starts a record for a job about to run.
    pub fn started(job: JobId, label: impl Into<String>) -> Self {
        Self {
            started: Some(Local::now()),
            ..Self::new(job, label, &JobStatus::Running)
        }
    }

    /// Marks the record succeeded and stamps the finish time.
    pub fn succeed(&mut self) {
        self.status = RecordStatus::Succeeded;
        self.finished = Some(Local::now());
    }

    /// Marks the record failed and stamps the finish time.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RecordStatus::Failed;
        self.error = Some(error.into());
        self.finished = Some(Local::now());
    }

    pub fn is_success(&self) -> bool {
        self.status == RecordStatus::Succeeded
    }

    /// Wall-clock duration in milliseconds, if the job ran.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started, self.finished) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lifecycle() {
        let mut record = ExecutionRecord::started(3, "bwa[sample=s1]");
        assert_eq!(record.status, RecordStatus::Pending);
        assert!(record.started.is_some());

        record.succeed();
        assert!(record.is_success());
        assert!(record.duration_ms().unwrap() >= 0);
    }

    #[test]
    fn test_record_failure() {
        let mut record = ExecutionRecord::started(0, "a");
        record.exit_code = Some(2);
        record.fail("exit status 2");
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("exit status 2"));
    }

    #[test]
    fn test_status_conversion() {
        let status = JobStatus::Skipped(SkipReason::FailedDependency(1));
        assert_eq!(RecordStatus::from(&status), RecordStatus::SkippedFailedDependency);
        let record = ExecutionRecord::new(0, "a", &JobStatus::Skipped(SkipReason::UpToDate));
        assert_eq!(record.status, RecordStatus::UpToDate);
        assert!(record.duration_ms().is_none());
    }

    #[test]
    fn test_serializes_to_json() {
        let mut record = ExecutionRecord::started(0, "a");
        record.stderr = StreamSink::Log("logs/a.err".to_string());
        record.succeed();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["stderr"]["kind"], "log");
        assert_eq!(json["stderr"]["path"], "logs/a.err");
    }
}
