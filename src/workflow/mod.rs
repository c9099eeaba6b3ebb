//! Workflow Definition Module
//!
//! Everything that happens before a job runs: declarations, discovery,
//! rule compilation, graph construction and scheduling state.
//!
//! # Structure
//!
//! - [`model`]: Declaration data structures (Rule, Workflow)
//! - [`parser`]: YAML loading and default targets
//! - [`wildcards`]: Path patterns with named wildcards
//! - [`template`]: `{placeholder}` templates
//! - [`discovery`]: Sample discovery from input directories
//! - [`validator`]: Rule validation
//! - [`registry`]: Compiled rules and target resolution
//! - [`job`]: Concrete jobs
//! - [`dag`]: Job graph construction
//! - [`staleness`]: Which jobs need to run
//! - [`planner`]: Execution planning and scheduling

pub mod dag;
pub mod discovery;
pub mod job;
pub mod model;
pub mod parser;
pub mod planner;
pub mod registry;
pub mod staleness;
pub mod template;
pub mod validator;
pub mod wildcards;

pub use dag::{Dag, DagBuilder};
pub use discovery::{discover, glob_wildcards, SampleSet};
pub use job::{Job, JobAction, JobId, JobKey, ReportEntry};
pub use model::{Rule, Workflow};
pub use parser::{default_targets, load_workflow, parse_workflow};
pub use planner::{ExecutionPlanner, JobStatus, SkipReason};
pub use registry::RuleRegistry;
pub use staleness::{annotate, RunReason, Staleness};
pub use wildcards::{expand, Bindings, Pattern};
