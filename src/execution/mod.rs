//! Workflow Execution Module
//!
//! Runs the job graph: parallel scheduling, shell and function actions,
//! and per-job execution records.
//!
//! # Architecture
//!
//! - [`engine`]: Main execution engine orchestrating workflow runs
//! - [`runner`]: Execution of a single job
//! - [`functions`]: Named in-process actions
//! - [`record`]: Per-job outcome records

pub mod engine;
pub mod functions;
pub mod record;
pub mod runner;

pub use engine::{Engine, Plan, RunSummary};
pub use functions::{ActionArgs, FunctionRegistry, FunctionResult, JobFunction};
pub use record::{ExecutionRecord, RecordStatus, StreamSink};
pub use runner::JobRunner;
