//! Pipewright - Rule-Based Workflow Engine
//!
//! Builds requested output files by working backwards through rules whose
//! inputs and outputs are path patterns with named wildcards. Jobs whose
//! outputs are missing or older than their inputs are run in parallel,
//! in dependency order; everything else is left alone.
//!
//! # Architecture
//!
//! - [`workflow`]: Declarations, patterns, rule resolution and the job graph
//! - [`execution`]: Parallel scheduling and job execution
//! - [`monitoring`]: Execution timeline
//! - [`report`]: Aggregated report of tagged outputs
//! - [`error`]: The crate-wide error type
//!
//! # Example
//!
//! ```rust,no_run
//! use pipewright::execution::Engine;
//! use pipewright::load_workflow;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a workflow from YAML
//!     let workflow = load_workflow("pipeline.yaml")?;
//!
//!     // Create execution engine
//!     let mut engine = Engine::new(workflow);
//!     engine.set_max_parallel(4);
//!     engine.set_working_dir("/data/analysis");
//!
//!     // Build the default targets
//!     let summary = engine.run(&[])?;
//!     assert!(summary.is_success());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod monitoring;
pub mod report;
pub mod workflow;

// Re-export commonly used types
pub use error::{Result, WorkflowError};
pub use execution::engine::Engine;
pub use workflow::model::{Rule, Workflow};
pub use workflow::parser::load_workflow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Pipewright";
