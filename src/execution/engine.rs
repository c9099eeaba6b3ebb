//! Workflow Execution Engine
//!
//! The core engine that orchestrates a run:
//! - sample discovery, rule registration and job graph construction
//! - staleness checking against the filesystem
//! - parallel job scheduling with failure isolation
//! - cooperative cancellation via a handle or a stop file
//! - dry runs and the aggregated report

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use super::functions::{FunctionRegistry, JobFunction};
use super::record::{ExecutionRecord, RecordStatus};
use super::runner::JobRunner;
use crate::error::{Result, WorkflowError};
use crate::monitoring::{EventType, ExecutionTimeline};
use crate::report::Report;
use crate::workflow::{
    annotate, default_targets, Dag, DagBuilder, ExecutionPlanner, JobAction, JobId, JobStatus, RuleRegistry,
    SampleSet, SkipReason, Staleness, Workflow,
};

/// Interval for checking the stop file and the cancel handle.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Everything known about a run before any job starts.
#[derive(Debug)]
pub struct Plan {
    pub registry: RuleRegistry,
    pub dag: Dag,
    pub staleness: Staleness,
}

impl Plan {
    /// Jobs that will run, in topological order.
    pub fn jobs_to_run(&self) -> Vec<JobId> {
        self.dag
            .topological_order()
            .into_iter()
            .filter(|&id| self.staleness.needs_run(id))
            .collect()
    }
}

/// Outcome of a run.
#[derive(Debug)]
pub struct RunSummary {
    /// One record per job, ordered by job id
    pub records: Vec<ExecutionRecord>,
    /// Number of jobs that were started
    pub executed: usize,
    pub dry_run: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
    pub timeline: ExecutionTimeline,
}

impl RunSummary {
    /// Returns true if no job failed, was skipped after a failure, or was
    /// cancelled.
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self.records.iter().all(|r| {
                matches!(r.status, RecordStatus::Succeeded | RecordStatus::UpToDate)
                    || (self.dry_run && r.status == RecordStatus::Pending)
            })
    }

    pub fn count(&self, status: RecordStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.iter().filter(|r| r.status == RecordStatus::Failed)
    }
}

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use pipewright::execution::Engine;
/// use pipewright::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("pipeline.yaml")?;
///     let mut engine = Engine::new(workflow);
///     engine.set_max_parallel(4);
///     engine.set_working_dir("/data/analysis");
///
///     let summary = engine.run(&[])?;
///     println!("{} jobs executed", summary.executed);
///     Ok(())
/// }
/// ```
pub struct Engine {
    workflow: Workflow,
    working_dir: PathBuf,
    max_parallel: usize,
    dry_run: bool,
    force: bool,
    stop_file: Option<PathBuf>,
    report_path: Option<PathBuf>,
    shell: Option<String>,
    functions: FunctionRegistry,
    cancel: Arc<AtomicBool>,
}

impl Engine {
    /// Creates a new execution engine for a workflow.
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            working_dir: PathBuf::from("."),
            max_parallel: num_cpus::get(),
            dry_run: false,
            force: false,
            stop_file: None,
            report_path: None,
            shell: None,
            functions: FunctionRegistry::with_builtins(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the maximum number of parallel jobs.
    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = max.max(1);
    }

    /// Enables or disables dry run mode.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Forces the jobs producing the requested targets to run.
    pub fn set_force(&mut self, force: bool) {
        self.force = force;
    }

    /// Sets a file whose appearance cancels the run.
    pub fn set_stop_file(&mut self, path: impl Into<PathBuf>) {
        self.stop_file = Some(path.into());
    }

    /// Sets where the aggregated report is written.
    pub fn set_report_path(&mut self, path: impl Into<PathBuf>) {
        self.report_path = Some(path.into());
    }

    /// Sets the working directory for discovery and job execution.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = dir.into();
    }

    /// Sets the shell that runs shell actions.
    pub fn set_shell(&mut self, shell: impl Into<String>) {
        self.shell = Some(shell.into());
    }

    /// Registers a function rules can call with `run:`.
    pub fn register_function<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: JobFunction + 'static,
    {
        self.functions.register(name, function);
    }

    /// Handle that cancels the run when set to true.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Builds the job graph for `targets` and decides what needs to run.
    ///
    /// With no targets, the workflow's default targets are used.
    pub fn plan(&self, targets: &[String]) -> Result<Plan> {
        info!("Discovering samples in {}", self.working_dir.display());
        let samples = SampleSet::from_discoveries(&self.workflow.discover, &self.working_dir)?;
        let registry = RuleRegistry::from_workflow(&self.workflow, samples)?;
        self.check_functions(&registry)?;

        let targets = if targets.is_empty() {
            default_targets(&self.workflow, &registry)?
        } else {
            targets.to_vec()
        };
        if targets.is_empty() {
            return Err(WorkflowError::NoTargets);
        }
        info!("Requested {} targets", targets.len());

        let dag = DagBuilder::new(&registry, &self.working_dir).build(&targets)?;

        let forced: BTreeSet<JobId> = if self.force {
            dag.targets().iter().filter_map(|t| dag.producer(t)).collect()
        } else {
            BTreeSet::new()
        };
        let staleness = annotate(&dag, &self.working_dir, &forced)?;

        Ok(Plan {
            registry,
            dag,
            staleness,
        })
    }

    fn check_functions(&self, registry: &RuleRegistry) -> Result<()> {
        for rule in registry.rules() {
            if let JobAction::Function(name) = rule.action() {
                if !self.functions.contains(name) {
                    return Err(WorkflowError::InvalidRule {
                        rule: rule.name().to_string(),
                        reason: format!(
                            "unknown function '{}' (available: {})",
                            name,
                            self.functions.names().join(", ")
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    fn runner(&self, plan: &Plan) -> JobRunner {
        let mut runner = JobRunner::new(
            self.working_dir.clone(),
            plan.registry.config().clone(),
            self.functions.clone(),
        );
        if let Some(shell) = &self.shell {
            runner.set_shell(shell.clone());
        }
        runner
    }

    /// Executes the workflow.
    ///
    /// Graph construction errors are returned before any job starts. Job
    /// failures do not make this return an error; they are reported in the
    /// summary.
    pub fn run(&mut self, targets: &[String]) -> Result<RunSummary> {
        let start_time = Instant::now();
        let plan = self.plan(targets)?;

        info!(
            "Starting execution (max parallel: {}, dry run: {})",
            self.max_parallel, self.dry_run
        );

        if self.dry_run {
            return self.dry_run_summary(&plan, start_time);
        }

        let runner = Arc::new(self.runner(&plan));
        let mut planner = ExecutionPlanner::new(&plan.dag, &plan.staleness, self.max_parallel);
        let mut timeline = ExecutionTimeline::new();
        let mut records: BTreeMap<JobId, ExecutionRecord> = BTreeMap::new();
        let mut executed = 0;

        // Create channel for job completion
        let (tx, rx): (Sender<ExecutionRecord>, Receiver<ExecutionRecord>) = channel();

        // Main execution loop
        loop {
            if !planner.is_cancelled() && self.stop_requested() {
                warn!("Stop requested - waiting for {} running jobs", planner.running_count());
                planner.cancel();
            }

            for id in planner.ready_jobs() {
                let Some(job) = plan.dag.job(id).cloned() else { continue };
                let reason = plan
                    .staleness
                    .reason(id)
                    .map(|r| r.to_string())
                    .unwrap_or_default();
                info!("Starting job {}: {} ({})", id, job, reason);
                timeline.add_event(id, job.label(), EventType::Started);
                planner.mark_running(id);
                executed += 1;

                // Spawn worker thread
                let tx = tx.clone();
                let runner = Arc::clone(&runner);
                thread::spawn(move || {
                    let record = guarded(id, job.label(), || runner.run(&job));
                    if let Err(e) = tx.send(record) {
                        error!("Failed to send completion signal: {}", e);
                    }
                });
            }

            // Check for completion
            if planner.running_count() == 0 {
                break;
            }

            // Wait for job completion
            let record = match rx.recv_timeout(STOP_CHECK_INTERVAL) {
                Ok(record) => record,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WorkflowError::JobExecution {
                        job: "scheduler".to_string(),
                        reason: "worker channel closed".to_string(),
                    })
                }
            };

            let id = record.job;
            if record.is_success() {
                info!("Job {} completed: {}", id, record.label);
                planner.mark_succeeded(id);
                timeline.add_event(id, record.label.clone(), EventType::Completed);
            } else {
                let message = record.error.clone().unwrap_or_else(|| "unknown error".to_string());
                error!("Job {} failed: {}", id, record.label);
                timeline.add_event(id, record.label.clone(), EventType::Failed);
                for skipped in planner.mark_failed(id, message) {
                    if let Some(job) = plan.dag.job(skipped) {
                        warn!("Skipping {}: upstream job {} failed", job, id);
                    }
                }
            }

            let (finished, total) = planner.progress();
            info!("Progress: {}/{} jobs", finished, total);
            records.insert(id, record);
        }

        planner.finalize();
        let cancelled = planner.is_cancelled();

        let records: Vec<ExecutionRecord> = plan
            .dag
            .jobs()
            .iter()
            .map(|job| {
                records.remove(&job.id).unwrap_or_else(|| {
                    let status = planner.status(job.id).cloned().unwrap_or(JobStatus::Pending);
                    ExecutionRecord::new(job.id, job.label(), &status)
                })
            })
            .collect();

        if let Some(path) = &self.report_path {
            let report_path = self.working_dir.join(path);
            Report::collect(&plan.dag, &records, &self.working_dir)?.write(&report_path)?;
        }

        Ok(RunSummary {
            records,
            executed,
            dry_run: false,
            cancelled,
            elapsed: start_time.elapsed(),
            timeline,
        })
    }

    /// Prints what would run without running anything.
    fn dry_run_summary(&self, plan: &Plan, start_time: Instant) -> Result<RunSummary> {
        let runner = self.runner(plan);
        let to_run = plan.jobs_to_run();

        for &id in &to_run {
            let Some(job) = plan.dag.job(id) else { continue };
            let reason = plan.staleness.reason(id).map(|r| r.to_string()).unwrap_or_default();

            println!();
            println!("[DRY RUN] Job {}: {}", id, job);
            println!("  Reason: {}", reason);
            println!("  Command: {}", runner.describe_action(job)?);
            println!("  Input: {:?}", job.input_paths().collect::<Vec<_>>());
            println!("  Output: {:?}", job.output_paths().collect::<Vec<_>>());
            if !job.logs.is_empty() {
                println!("  Log: {:?}", job.log_paths().collect::<Vec<_>>());
            }
        }
        println!();
        println!("{} of {} jobs would run", to_run.len(), plan.dag.len());

        let records = plan
            .dag
            .jobs()
            .iter()
            .map(|job| {
                let status = if plan.staleness.needs_run(job.id) {
                    JobStatus::Pending
                } else {
                    JobStatus::Skipped(SkipReason::UpToDate)
                };
                ExecutionRecord::new(job.id, job.label(), &status)
            })
            .collect();

        Ok(RunSummary {
            records,
            executed: 0,
            dry_run: true,
            cancelled: false,
            elapsed: start_time.elapsed(),
            timeline: ExecutionTimeline::new(),
        })
    }

    /// Checks the cancel handle and the stop file.
    fn stop_requested(&self) -> bool {
        if self.cancel.load(Ordering::Relaxed) {
            return true;
        }
        match &self.stop_file {
            Some(path) if path.exists() => {
                info!("Stop file {} found", path.display());
                true
            }
            _ => false,
        }
    }
}

/// Runs `work` and turns a panic into a failed record, so every worker
/// reports back to the scheduler.
fn guarded<F>(job: JobId, label: String, work: F) -> ExecutionRecord
where
    F: FnOnce() -> ExecutionRecord,
{
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
        let mut record = ExecutionRecord::started(job, label);
        record.fail("worker thread panicked");
        record
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::functions::{ActionArgs, FunctionResult};
    use crate::workflow::model::Rule;
    use crate::workflow::parse_workflow;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn targets(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    /// A -> B -> C and an unrelated D.
    fn chain_workflow(b_command: &str) -> Workflow {
        Workflow::from_rules(vec![
            Rule::new("A").with_output("o", "a.txt").with_shell("echo a > {output}"),
            Rule::new("B").with_input("i", "a.txt").with_output("o", "b.txt").with_shell(b_command),
            Rule::new("C").with_input("i", "b.txt").with_output("o", "c.txt").with_shell("cat {input} > {output}"),
            Rule::new("D").with_output("o", "d.txt").with_shell("echo d > {output}"),
        ])
    }

    fn engine(workflow: Workflow, dir: &Path) -> Engine {
        let mut engine = Engine::new(workflow);
        engine.set_working_dir(dir);
        engine.set_max_parallel(2);
        engine
    }

    #[test]
    fn test_engine_configuration() {
        let mut engine = Engine::new(Workflow::new());
        engine.set_max_parallel(0);
        engine.set_dry_run(true);
        engine.set_force(true);
        engine.set_stop_file("/tmp/stop");

        assert_eq!(engine.max_parallel, 1);
        assert!(engine.dry_run);
        assert!(engine.force);
        assert_eq!(engine.stop_file, Some(PathBuf::from("/tmp/stop")));
    }

    #[test]
    fn test_run_chain_then_idempotent() {
        let temp_dir = tempdir().unwrap();
        let mut engine = engine(chain_workflow("cat {input} > {output}"), temp_dir.path());

        let summary = engine.run(&targets(&["c.txt", "d.txt"])).unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.executed, 4);
        assert_eq!(fs::read_to_string(temp_dir.path().join("c.txt")).unwrap().trim(), "a");

        let summary = engine.run(&targets(&["c.txt", "d.txt"])).unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.executed, 0);
        assert_eq!(summary.count(RecordStatus::UpToDate), 4);
    }

    #[test]
    fn test_failure_isolation() {
        let temp_dir = tempdir().unwrap();
        let mut engine = engine(chain_workflow("exit 1"), temp_dir.path());

        let summary = engine.run(&targets(&["c.txt", "d.txt"])).unwrap();
        assert!(!summary.is_success());

        let status = |label: &str| summary.records.iter().find(|r| r.label == label).unwrap().status.clone();
        assert_eq!(status("A"), RecordStatus::Succeeded);
        assert_eq!(status("B"), RecordStatus::Failed);
        assert_eq!(status("C"), RecordStatus::SkippedFailedDependency);
        assert_eq!(status("D"), RecordStatus::Succeeded);
        assert!(temp_dir.path().join("d.txt").exists());
        assert!(!temp_dir.path().join("c.txt").exists());
        assert_eq!(summary.failed().count(), 1);
    }

    #[test]
    fn test_dry_run_executes_nothing() {
        let temp_dir = tempdir().unwrap();
        let mut engine = engine(chain_workflow("cat {input} > {output}"), temp_dir.path());
        engine.set_dry_run(true);

        let summary = engine.run(&targets(&["c.txt"])).unwrap();
        assert!(summary.dry_run);
        assert!(summary.is_success());
        assert_eq!(summary.executed, 0);
        assert_eq!(summary.count(RecordStatus::Pending), 3);
        assert!(!temp_dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_force_reruns_target_producer() {
        let temp_dir = tempdir().unwrap();
        let mut engine = engine(chain_workflow("cat {input} > {output}"), temp_dir.path());
        engine.run(&targets(&["c.txt"])).unwrap();

        engine.set_force(true);
        let summary = engine.run(&targets(&["c.txt"])).unwrap();
        assert_eq!(summary.executed, 1);
        assert_eq!(summary.count(RecordStatus::UpToDate), 2);
    }

    #[test]
    fn test_stop_file_cancels_before_start() {
        let temp_dir = tempdir().unwrap();
        let stop = temp_dir.path().join("STOP");
        fs::write(&stop, "").unwrap();

        let mut engine = engine(chain_workflow("cat {input} > {output}"), temp_dir.path());
        engine.set_stop_file(&stop);

        let summary = engine.run(&targets(&["c.txt", "d.txt"])).unwrap();
        assert!(summary.cancelled);
        assert!(!summary.is_success());
        assert_eq!(summary.executed, 0);
        assert_eq!(summary.count(RecordStatus::Cancelled), 4);
    }

    #[test]
    fn test_cancel_handle() {
        let temp_dir = tempdir().unwrap();
        let mut engine = engine(chain_workflow("cat {input} > {output}"), temp_dir.path());
        engine.cancel_handle().store(true, Ordering::Relaxed);

        let summary = engine.run(&targets(&["d.txt"])).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.executed, 0);
    }

    #[test]
    fn test_worker_panic_becomes_failed_record() {
        let record = guarded(7, "boom".to_string(), || panic!("runner bug"));
        assert_eq!(record.job, 7);
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("worker thread panicked"));

        let ok = guarded(1, "fine".to_string(), || {
            let mut record = ExecutionRecord::started(1, "fine");
            record.succeed();
            record
        });
        assert!(ok.is_success());
    }

    #[test]
    fn test_graph_errors_abort_before_running() {
        let temp_dir = tempdir().unwrap();
        let mut engine = engine(chain_workflow("cat {input} > {output}"), temp_dir.path());

        let err = engine.run(&targets(&["missing.txt"])).unwrap_err();
        assert!(matches!(err, WorkflowError::NoRuleFound { .. }));
        assert!(!temp_dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_unknown_function_rejected() {
        let temp_dir = tempdir().unwrap();
        let workflow = Workflow::from_rules(vec![Rule::new("x").with_output("o", "x.txt").with_function("nope")]);
        let engine = engine(workflow, temp_dir.path());

        let err = engine.plan(&targets(&["x.txt"])).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidRule { .. }));
    }

    #[test]
    fn test_two_samples_run_in_parallel_slots() {
        let temp_dir = tempdir().unwrap();
        fs::create_dir_all(temp_dir.path().join("in")).unwrap();
        fs::write(temp_dir.path().join("in/s1.txt"), "1").unwrap();
        fs::write(temp_dir.path().join("in/s2.txt"), "2").unwrap();

        let yaml = r#"
discover:
  - "in/{s}.txt"
targets:
  - "out/{s}.txt"
rules:
  - name: R1
    input: "in/{s}.txt"
    output: "out/{s}.txt"
    run: concat
"#;
        let engine = engine(parse_workflow(yaml).unwrap(), temp_dir.path());
        let plan = engine.plan(&[]).unwrap();

        assert_eq!(plan.dag.len(), 2);
        let planner = ExecutionPlanner::new(&plan.dag, &plan.staleness, 2);
        assert_eq!(planner.ready_jobs(), vec![0, 1]);
    }

    #[test]
    fn test_custom_function_and_report() {
        let temp_dir = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let yaml = r#"
rules:
  - name: summarize
    output:
      summary:
        path: "qc/summary.txt"
        report: { category: QC }
    run: summarize
"#;
        let mut engine = engine(parse_workflow(yaml).unwrap(), temp_dir.path());
        engine.register_function("summarize", move |args: &ActionArgs| -> FunctionResult {
            counter.fetch_add(1, Ordering::SeqCst);
            fs::write(args.resolve(args.output("summary").unwrap_or_default()), "all good")?;
            Ok(())
        });
        engine.set_report_path("report.json");

        let summary = engine.run(&[]).unwrap();
        assert!(summary.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let report = fs::read_to_string(temp_dir.path().join("report.json")).unwrap();
        assert!(report.contains("all good"));
    }
}
