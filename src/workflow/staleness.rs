//! Staleness Checking
//!
//! Decides which jobs of a DAG must run by comparing the filesystem with
//! what each job declares. Nothing is persisted between runs; completion is
//! read from output files and their modification times.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use log::{debug, info};

use super::dag::Dag;
use super::job::{Job, JobId};
use crate::error::{Result, WorkflowError};

/// Why a job was scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReason {
    /// Requested with `--force`
    Forced,
    /// An output file does not exist
    MissingOutput(String),
    /// An upstream job will run
    UpstreamRerun(JobId),
    /// An input is newer than the oldest output
    UpdatedInput(String),
}

impl fmt::Display for RunReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced => write!(f, "forced"),
            Self::MissingOutput(path) => write!(f, "missing output {}", path),
            Self::UpstreamRerun(id) => write!(f, "upstream job {} runs", id),
            Self::UpdatedInput(path) => write!(f, "updated input {}", path),
        }
    }
}

/// Jobs that need to run, with the first reason found for each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Staleness {
    reasons: BTreeMap<JobId, RunReason>,
}

impl Staleness {
    pub fn needs_run(&self, id: JobId) -> bool {
        self.reasons.contains_key(&id)
    }

    pub fn reason(&self, id: JobId) -> Option<&RunReason> {
        self.reasons.get(&id)
    }

    /// Ids of the jobs to run, ascending.
    pub fn stale_jobs(&self) -> impl Iterator<Item = JobId> + '_ {
        self.reasons.keys().copied()
    }

    pub fn count(&self) -> usize {
        self.reasons.len()
    }
}

/// Annotates every job of `dag` with whether it needs to run.
///
/// Reasons are checked in order: forced, missing output, upstream rerun,
/// then input newer than the oldest output.
pub fn annotate(dag: &Dag, working_dir: &Path, forced: &BTreeSet<JobId>) -> Result<Staleness> {
    let mut staleness = Staleness::default();

    for id in dag.topological_order() {
        let Some(job) = dag.job(id) else { continue };
        if let Some(reason) = check_job(dag, job, working_dir, forced, &staleness)? {
            debug!("{} needs to run: {}", job, reason);
            staleness.reasons.insert(id, reason);
        }
    }

    info!(
        "{} of {} jobs need to run",
        staleness.count(),
        dag.len()
    );
    Ok(staleness)
}

fn check_job(
    dag: &Dag,
    job: &Job,
    working_dir: &Path,
    forced: &BTreeSet<JobId>,
    staleness: &Staleness,
) -> Result<Option<RunReason>> {
    if forced.contains(&job.id) {
        return Ok(Some(RunReason::Forced));
    }

    let mut oldest_output: Option<SystemTime> = None;
    for output in job.output_paths() {
        match modified(&working_dir.join(output))? {
            None => return Ok(Some(RunReason::MissingOutput(output.to_string()))),
            Some(time) => {
                oldest_output = Some(oldest_output.map_or(time, |oldest| oldest.min(time)));
            }
        }
    }

    if let Some(&up) = dag.upstream(job.id).iter().find(|&&up| staleness.needs_run(up)) {
        return Ok(Some(RunReason::UpstreamRerun(up)));
    }

    let Some(oldest_output) = oldest_output else {
        return Ok(None);
    };
    for input in job.input_paths() {
        if let Some(time) = modified(&working_dir.join(input))? {
            if time > oldest_output {
                return Ok(Some(RunReason::UpdatedInput(input.to_string())));
            }
        }
    }

    Ok(None)
}

fn modified(path: &Path) -> Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(meta) => meta
            .modified()
            .map(Some)
            .map_err(|e| WorkflowError::io(path, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WorkflowError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::dag::DagBuilder;
    use crate::workflow::discovery::SampleSet;
    use crate::workflow::model::Rule;
    use crate::workflow::registry::RuleRegistry;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    fn chain_registry() -> RuleRegistry {
        let mut registry = RuleRegistry::new(BTreeMap::new(), SampleSet::new());
        registry
            .register(Rule::new("b").with_input("i", "a.txt").with_output("o", "b.txt").with_function("concat"))
            .unwrap();
        registry
            .register(Rule::new("c").with_input("i", "b.txt").with_output("o", "c.txt").with_function("concat"))
            .unwrap();
        registry
    }

    fn set_mtime(path: &Path, secs_ago: u64) {
        let time = SystemTime::now() - Duration::from_secs(secs_ago);
        File::options().write(true).open(path).unwrap().set_modified(time).unwrap();
    }

    fn build(dir: &Path) -> Dag {
        let registry = chain_registry();
        DagBuilder::new(&registry, dir).build(&["c.txt".to_string()]).unwrap()
    }

    #[test]
    fn test_missing_outputs_propagate() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "a").unwrap();
        let dag = build(temp_dir.path());

        let staleness = annotate(&dag, temp_dir.path(), &BTreeSet::new()).unwrap();
        let b = dag.producer("b.txt").unwrap();
        let c = dag.producer("c.txt").unwrap();
        assert_eq!(staleness.reason(b), Some(&RunReason::MissingOutput("b.txt".to_string())));
        assert_eq!(staleness.reason(c), Some(&RunReason::MissingOutput("c.txt".to_string())));
    }

    #[test]
    fn test_up_to_date() {
        let temp_dir = tempdir().unwrap();
        for (name, age) in [("a.txt", 30), ("b.txt", 20), ("c.txt", 10)] {
            let path = temp_dir.path().join(name);
            fs::write(&path, name).unwrap();
            set_mtime(&path, age);
        }
        let dag = build(temp_dir.path());

        let staleness = annotate(&dag, temp_dir.path(), &BTreeSet::new()).unwrap();
        assert_eq!(staleness.count(), 0);
    }

    #[test]
    fn test_updated_input_and_upstream_rerun() {
        let temp_dir = tempdir().unwrap();
        for (name, age) in [("a.txt", 5), ("b.txt", 20), ("c.txt", 10)] {
            let path = temp_dir.path().join(name);
            fs::write(&path, name).unwrap();
            set_mtime(&path, age);
        }
        let dag = build(temp_dir.path());

        let staleness = annotate(&dag, temp_dir.path(), &BTreeSet::new()).unwrap();
        let b = dag.producer("b.txt").unwrap();
        let c = dag.producer("c.txt").unwrap();
        assert_eq!(staleness.reason(b), Some(&RunReason::UpdatedInput("a.txt".to_string())));
        assert_eq!(staleness.reason(c), Some(&RunReason::UpstreamRerun(b)));
    }

    #[test]
    fn test_forced() {
        let temp_dir = tempdir().unwrap();
        for (name, age) in [("a.txt", 30), ("b.txt", 20), ("c.txt", 10)] {
            let path = temp_dir.path().join(name);
            fs::write(&path, name).unwrap();
            set_mtime(&path, age);
        }
        let dag = build(temp_dir.path());
        let c = dag.producer("c.txt").unwrap();

        let forced: BTreeSet<JobId> = [c].into_iter().collect();
        let staleness = annotate(&dag, temp_dir.path(), &forced).unwrap();
        assert_eq!(staleness.count(), 1);
        assert_eq!(staleness.reason(c), Some(&RunReason::Forced));
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(RunReason::MissingOutput("x".to_string()).to_string(), "missing output x");
        assert_eq!(RunReason::Forced.to_string(), "forced");
    }
}
