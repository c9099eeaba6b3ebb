//! Run Monitoring Module
//!
//! Job timing for the execution timeline printed after a run.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Job start/end timing for Gantt charts

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
