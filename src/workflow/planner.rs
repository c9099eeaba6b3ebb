//! Execution Planner
//!
//! Tracks the status of every job during a run:
//! - which jobs are ready (all upstream work done)
//! - how many are running against the parallelism limit
//! - failure propagation to dependents
//! - cooperative cancellation

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

use log::{debug, info};

use super::dag::Dag;
use super::job::JobId;
use super::staleness::Staleness;

/// Why a job did not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Outputs exist and are newer than the inputs
    UpToDate,
    /// An upstream job failed
    FailedDependency(JobId),
    /// The run was cancelled before the job started
    Cancelled,
}

/// Status of a job during execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Waiting for upstream jobs
    Pending,
    /// Currently executing
    Running,
    /// Finished successfully
    Succeeded,
    /// Failed with error message
    Failed(String),
    /// Not run
    Skipped(SkipReason),
}

impl JobStatus {
    /// Returns true if the job's outputs can be consumed downstream.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped(SkipReason::UpToDate))
    }

    /// Returns true once the status can no longer change.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed(_) => write!(f, "failed"),
            Self::Skipped(SkipReason::UpToDate) => write!(f, "up to date"),
            Self::Skipped(SkipReason::FailedDependency(id)) => {
                write!(f, "skipped (job {} failed)", id)
            }
            Self::Skipped(SkipReason::Cancelled) => write!(f, "cancelled"),
        }
    }
}

/// Execution metrics for a single job.
#[derive(Debug, Clone)]
pub struct JobMetrics {
    /// When the job started executing
    pub start_time: Option<Instant>,
    /// When the job finished
    pub end_time: Option<Instant>,
    /// Duration in milliseconds
    pub duration_ms: Option<u128>,
    /// Current status
    pub status: JobStatus,
}

impl JobMetrics {
    fn new(status: JobStatus) -> Self {
        Self {
            start_time: None,
            end_time: None,
            duration_ms: None,
            status,
        }
    }

    fn finish(&mut self, status: JobStatus) {
        let now = Instant::now();
        self.end_time = Some(now);
        if let Some(start) = self.start_time {
            self.duration_ms = Some(now.duration_since(start).as_millis());
        }
        self.status = status;
    }
}

/// Manages job scheduling for one run.
pub struct ExecutionPlanner {
    upstream: Vec<BTreeSet<JobId>>,
    downstream: Vec<BTreeSet<JobId>>,
    metrics: BTreeMap<JobId, JobMetrics>,
    running: BTreeSet<JobId>,
    max_parallel_jobs: usize,
    cancelled: bool,
}

impl ExecutionPlanner {
    /// Creates a planner for `dag`.
    ///
    /// Jobs that do not need to run start as `Skipped(UpToDate)`.
    pub fn new(dag: &Dag, staleness: &Staleness, max_parallel_jobs: usize) -> Self {
        let max_parallel_jobs = max_parallel_jobs.max(1);
        let mut metrics = BTreeMap::new();
        for job in dag.jobs() {
            let status = if staleness.needs_run(job.id) {
                JobStatus::Pending
            } else {
                JobStatus::Skipped(SkipReason::UpToDate)
            };
            metrics.insert(job.id, JobMetrics::new(status));
        }

        info!(
            "Creating planner: {} jobs to run, {} max parallel",
            staleness.count(),
            max_parallel_jobs
        );

        Self {
            upstream: (0..dag.len()).map(|id| dag.upstream(id).clone()).collect(),
            downstream: (0..dag.len()).map(|id| dag.downstream(id).clone()).collect(),
            metrics,
            running: BTreeSet::new(),
            max_parallel_jobs,
            cancelled: false,
        }
    }

    /// Returns the jobs that can start now, lowest id first.
    ///
    /// A pending job is ready when every upstream job succeeded or was up to
    /// date. At most `max_parallel - running` jobs are returned; none once
    /// the run is cancelled.
    pub fn ready_jobs(&self) -> Vec<JobId> {
        if self.cancelled {
            return Vec::new();
        }
        let capacity = self.max_parallel_jobs.saturating_sub(self.running.len());

        self.metrics
            .iter()
            .filter(|(_, m)| m.status == JobStatus::Pending)
            .map(|(&id, _)| id)
            .filter(|&id| self.upstream[id].iter().all(|up| self.status(*up).is_some_and(JobStatus::is_satisfied)))
            .take(capacity)
            .collect()
    }

    /// Marks a job as running.
    pub fn mark_running(&mut self, id: JobId) {
        self.running.insert(id);
        if let Some(metrics) = self.metrics.get_mut(&id) {
            metrics.start_time = Some(Instant::now());
            metrics.status = JobStatus::Running;
        }
        debug!("Job {} started ({}/{} slots)", id, self.running.len(), self.max_parallel_jobs);
    }

    /// Marks a job as succeeded.
    pub fn mark_succeeded(&mut self, id: JobId) {
        self.running.remove(&id);
        if let Some(metrics) = self.metrics.get_mut(&id) {
            metrics.finish(JobStatus::Succeeded);
        }
    }

    /// Marks a job as failed and skips everything downstream of it.
    ///
    /// Returns the ids of the newly skipped jobs.
    pub fn mark_failed(&mut self, id: JobId, error: String) -> Vec<JobId> {
        self.running.remove(&id);
        if let Some(metrics) = self.metrics.get_mut(&id) {
            metrics.finish(JobStatus::Failed(error));
        }

        let mut skipped = Vec::new();
        let mut stack: Vec<JobId> = self.downstream[id].iter().copied().collect();
        let mut seen = BTreeSet::new();
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            if let Some(metrics) = self.metrics.get_mut(&next) {
                if metrics.status == JobStatus::Pending {
                    metrics.status = JobStatus::Skipped(SkipReason::FailedDependency(id));
                    skipped.push(next);
                }
            }
            stack.extend(self.downstream[next].iter().copied());
        }

        skipped.sort_unstable();
        if !skipped.is_empty() {
            debug!("Job {} failed; skipped dependents {:?}", id, skipped);
        }
        skipped
    }

    /// Stops scheduling. Running jobs are left to finish.
    pub fn cancel(&mut self) {
        if !self.cancelled {
            info!("Cancelling: no new jobs will start");
        }
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Marks every job that never started as cancelled.
    ///
    /// Called once the run has drained.
    pub fn finalize(&mut self) {
        for metrics in self.metrics.values_mut() {
            if metrics.status == JobStatus::Pending {
                metrics.status = JobStatus::Skipped(SkipReason::Cancelled);
            }
        }
    }

    /// Returns true while jobs are running or could still be started.
    pub fn has_work_remaining(&self) -> bool {
        if !self.running.is_empty() {
            return true;
        }
        !self.cancelled && !self.ready_jobs().is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn status(&self, id: JobId) -> Option<&JobStatus> {
        self.metrics.get(&id).map(|m| &m.status)
    }

    /// Returns the current progress as (finished, total).
    pub fn progress(&self) -> (usize, usize) {
        let finished = self.metrics.values().filter(|m| m.status.is_final()).count();
        (finished, self.metrics.len())
    }

    /// Returns metrics for all jobs.
    pub fn metrics(&self) -> &BTreeMap<JobId, JobMetrics> {
        &self.metrics
    }
}
