//! Error Types
//!
//! Every failure the engine can report before or during a run. Graph
//! construction errors are fatal and surface before any job starts;
//! `JobExecution` is local to a single job and ends up in that job's
//! execution record instead of aborting the run.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;

/// Errors raised while loading, planning or executing a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("malformed pattern '{pattern}': {reason}")]
    MalformedPattern { pattern: String, reason: String },

    #[error("pattern '{pattern}' requires wildcard '{{{wildcard}}}' but no value was bound")]
    UnboundWildcard { pattern: String, wildcard: String },

    #[error("path '{path}' matches pattern '{pattern}' in more than one way")]
    AmbiguousMatch { pattern: String, path: String },

    #[error("rule '{rule}': {context} uses wildcard '{{{wildcard}}}' which its outputs do not declare")]
    UndeclaredWildcard {
        rule: String,
        wildcard: String,
        context: String,
    },

    #[error("rule '{rule}' is invalid: {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("template error in '{owner}': {reason}")]
    Template { owner: String, reason: String },

    #[error("'{owner}' references unknown config key '{key}'")]
    Config { owner: String, key: String },

    #[error("no rule produces '{target}' and it does not exist{}", .required_by.as_ref().map(|j| format!(" (required by {})", j)).unwrap_or_default())]
    NoRuleFound {
        target: String,
        required_by: Option<String>,
    },

    #[error("target '{target}' can be produced by more than one job: {}", .candidates.join(", "))]
    AmbiguousRule {
        target: String,
        candidates: Vec<String>,
    },

    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("dependency chain for '{target}' exceeds {limit} levels")]
    DependencyTooDeep { target: String, limit: usize },

    #[error("no targets requested and the workflow declares no default targets")]
    NoTargets,

    #[error("job {job} failed: {reason}")]
    JobExecution { job: String, reason: String },

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse workflow: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("failed to serialize report: {0}")]
    Report(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Wraps an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_rule_found_display() {
        let err = WorkflowError::NoRuleFound {
            target: "in/x.fastq".to_string(),
            required_by: Some("bwa[sample=x]".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("in/x.fastq"));
        assert!(msg.contains("required by bwa[sample=x]"));

        let err = WorkflowError::NoRuleFound {
            target: "in/x.fastq".to_string(),
            required_by: None,
        };
        assert!(!err.to_string().contains("required by"));
    }

    #[test]
    fn test_cycle_display() {
        let err = WorkflowError::CyclicDependency {
            cycle: vec!["a.txt".to_string(), "b.txt".to_string(), "a.txt".to_string()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a.txt -> b.txt -> a.txt");
    }

    #[test]
    fn test_undeclared_wildcard_display() {
        let err = WorkflowError::UndeclaredWildcard {
            rule: "bwa".to_string(),
            wildcard: "lane".to_string(),
            context: "input 'fq'".to_string(),
        };
        assert!(err.to_string().contains("{lane}"));
    }
}
