//! Job Graph
//!
//! Builds the directed acyclic graph of jobs needed for a set of targets by
//! resolving every input backwards through the rule registry.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, VecDeque};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::job::{Job, JobId, JobKey};
use super::registry::RuleRegistry;
use crate::error::{Result, WorkflowError};

/// Default bound on the depth of the dependency chain.
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Jobs and their dependency edges.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    jobs: Vec<Job>,
    upstream: Vec<BTreeSet<JobId>>,
    downstream: Vec<BTreeSet<JobId>>,
    producers: BTreeMap<String, JobId>,
    sources: BTreeSet<String>,
    targets: Vec<String>,
}

impl Dag {
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs whose outputs `id` consumes.
    pub fn upstream(&self, id: JobId) -> &BTreeSet<JobId> {
        &self.upstream[id]
    }

    /// Jobs consuming outputs of `id`.
    pub fn downstream(&self, id: JobId) -> &BTreeSet<JobId> {
        &self.downstream[id]
    }

    /// The job producing `path`, if it is a derived target.
    pub fn producer(&self, path: &str) -> Option<JobId> {
        self.producers.get(path).copied()
    }

    /// Existing files no rule produces.
    pub fn sources(&self) -> &BTreeSet<String> {
        &self.sources
    }

    /// Requested targets, duplicates removed, in request order.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Returns jobs so that every job follows its upstream jobs.
    ///
    /// Among jobs that are ready at the same time the lowest id comes first,
    /// so the order is deterministic.
    pub fn topological_order(&self) -> Vec<JobId> {
        let mut in_degree: Vec<usize> = self.upstream.iter().map(BTreeSet::len).collect();
        let mut ready: BinaryHeap<Reverse<JobId>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| Reverse(id))
            .collect();

        let mut order = Vec::with_capacity(self.jobs.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for &next in &self.downstream[id] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        order
    }

    /// Every job transitively downstream of `id`, excluding `id`.
    pub fn downstream_closure(&self, id: JobId) -> BTreeSet<JobId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<JobId> = self.downstream[id].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.downstream[next].iter().copied());
            }
        }
        seen
    }

    /// Renders the graph in Graphviz DOT format.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph pipeline {\n");
        dot.push_str("    rankdir=LR;\n");
        dot.push_str("    node [shape=box, style=rounded];\n");
        for job in &self.jobs {
            let _ = writeln!(dot, "    {} [label=\"{}\"];", job.id, escape_dot(&job.label()));
        }
        for (id, downstream) in self.downstream.iter().enumerate() {
            for next in downstream {
                let _ = writeln!(dot, "    {} -> {};", id, next);
            }
        }
        dot.push_str("}\n");
        dot
    }

    fn insert(&mut self, mut job: Job, upstream: BTreeSet<JobId>) -> Result<JobId> {
        let id = self.jobs.len();
        job.id = id;

        for output in job.output_paths() {
            if let Some(&other) = self.producers.get(output) {
                return Err(WorkflowError::AmbiguousRule {
                    target: output.to_string(),
                    candidates: vec![self.jobs[other].label(), job.label()],
                });
            }
        }
        for output in job.output_paths() {
            self.producers.insert(output.to_string(), id);
        }

        for &up in &upstream {
            self.downstream[up].insert(id);
        }
        self.upstream.push(upstream);
        self.downstream.push(BTreeSet::new());
        self.jobs.push(job);
        Ok(id)
    }
}

fn escape_dot(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Builds a [`Dag`] from requested targets.
pub struct DagBuilder<'a> {
    registry: &'a RuleRegistry,
    working_dir: PathBuf,
    max_depth: usize,
    dag: Dag,
    built: HashMap<JobKey, JobId>,
    /// Targets under resolution with the job that produces each
    stack: Vec<(String, JobKey)>,
}

impl<'a> DagBuilder<'a> {
    pub fn new(registry: &'a RuleRegistry, working_dir: impl AsRef<Path>) -> Self {
        Self {
            registry,
            working_dir: working_dir.as_ref().to_path_buf(),
            max_depth: DEFAULT_MAX_DEPTH,
            dag: Dag::default(),
            built: HashMap::new(),
            stack: Vec::new(),
        }
    }

    /// Sets the maximum dependency chain depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolves every target and returns the finished graph.
    pub fn build(mut self, targets: &[String]) -> Result<Dag> {
        for target in targets {
            if self.dag.targets.contains(target) {
                continue;
            }
            self.dag.targets.push(target.clone());
            self.require(target, None)?;
        }

        info!(
            "Built job graph: {} jobs, {} source files",
            self.dag.jobs.len(),
            self.dag.sources.len()
        );
        Ok(self.dag)
    }

    fn require(&mut self, target: &str, required_by: Option<&str>) -> Result<Option<JobId>> {
        if let Some(id) = self.dag.producer(target) {
            return Ok(Some(id));
        }
        if self.dag.sources.contains(target) {
            return Ok(None);
        }

        if let Some(pos) = self.stack.iter().position(|(t, _)| t == target) {
            return Err(self.cycle_from(pos, target));
        }
        if self.stack.len() >= self.max_depth {
            return Err(WorkflowError::DependencyTooDeep {
                target: target.to_string(),
                limit: self.max_depth,
            });
        }

        let Some(job) = self.registry.resolve(target)? else {
            if self.working_dir.join(target).exists() {
                debug!("Source file: {}", target);
                self.dag.sources.insert(target.to_string());
                return Ok(None);
            }
            return Err(WorkflowError::NoRuleFound {
                target: target.to_string(),
                required_by: required_by.map(str::to_string),
            });
        };

        let key = job.key();
        if let Some(&id) = self.built.get(&key) {
            return Ok(Some(id));
        }
        if let Some(pos) = self.stack.iter().position(|(_, k)| *k == key) {
            return Err(self.cycle_from(pos, target));
        }

        let label = job.label();
        debug!("Resolving {} for '{}'", label, target);

        self.stack.push((target.to_string(), key.clone()));
        let mut upstream = BTreeSet::new();
        let inputs: Vec<String> = job.input_paths().map(str::to_string).collect();
        for input in &inputs {
            if let Some(id) = self.require(input, Some(&label))? {
                upstream.insert(id);
            }
        }
        self.stack.pop();

        let id = self.dag.insert(job, upstream)?;
        self.built.insert(key, id);
        Ok(Some(id))
    }

    fn cycle_from(&self, pos: usize, target: &str) -> WorkflowError {
        let mut cycle: Vec<String> = self.stack[pos..].iter().map(|(t, _)| t.clone()).collect();
        cycle.push(target.to_string());
        WorkflowError::CyclicDependency { cycle }
    }
}
