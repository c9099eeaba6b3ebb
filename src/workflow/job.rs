//! Jobs
//!
//! A job is one rule instantiated with concrete wildcard bindings. All of its
//! paths are rendered; nothing about it depends on the filesystem.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::model::Named;
use super::wildcards::Bindings;

/// Index of a job in its DAG, assigned in creation order.
pub type JobId = usize;

/// Identity of a job. Equal keys denote the same DAG node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub rule: String,
    pub bindings: Bindings,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rule)?;
        if !self.bindings.is_empty() {
            let pairs: Vec<String> = self
                .bindings
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            write!(f, "[{}]", pairs.join(","))?;
        }
        Ok(())
    }
}

/// What a job runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum JobAction {
    /// Unrendered shell template
    Shell(String),
    /// Name of a registered function
    Function(String),
}

/// A report-tagged output with its labels rendered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    pub path: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub caption: Option<String>,
}

/// A concrete unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub rule: String,
    pub wildcards: Bindings,
    /// Input entries; an expanded input carries several paths
    pub inputs: Vec<Named<Vec<String>>>,
    pub outputs: Vec<Named<String>>,
    pub params: Vec<Named<String>>,
    pub logs: Vec<Named<String>>,
    pub action: JobAction,
    pub reports: Vec<ReportEntry>,
}

impl Job {
    pub fn key(&self) -> JobKey {
        JobKey {
            rule: self.rule.clone(),
            bindings: self.wildcards.clone(),
        }
    }

    /// Label used in logs and error messages, e.g. `bwa[sample=s1]`.
    pub fn label(&self) -> String {
        self.key().to_string()
    }

    /// Every input path in declaration order.
    pub fn input_paths(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .flat_map(|entry| entry.value.iter().map(String::as_str))
    }

    /// Every output path in declaration order.
    pub fn output_paths(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|entry| entry.value.as_str())
    }

    pub fn log_paths(&self) -> impl Iterator<Item = &str> {
        self.logs.iter().map(|entry| entry.value.as_str())
    }

    /// Finds a log by name.
    pub fn log(&self, name: &str) -> Option<&str> {
        self.logs
            .iter()
            .find(|entry| entry.name.as_deref() == Some(name))
            .map(|entry| entry.value.as_str())
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.key(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        let mut wildcards = Bindings::new();
        wildcards.insert("sample".to_string(), "s1".to_string());
        Job {
            id: 0,
            rule: "bwa".to_string(),
            wildcards,
            inputs: vec![
                Named::named("fq", vec!["in/s1.fq".to_string()]),
                Named::unnamed(vec!["a.txt".to_string(), "b.txt".to_string()]),
            ],
            outputs: vec![Named::named("bam", "out/s1.bam".to_string())],
            params: Vec::new(),
            logs: vec![Named::named("err", "logs/s1.err".to_string())],
            action: JobAction::Shell("true".to_string()),
            reports: Vec::new(),
        }
    }

    #[test]
    fn test_job_label() {
        let job = sample_job();
        assert_eq!(job.label(), "bwa[sample=s1]");
        assert_eq!(job.to_string(), "bwa[sample=s1]");
    }

    #[test]
    fn test_key_without_bindings() {
        let key = JobKey {
            rule: "merge".to_string(),
            bindings: Bindings::new(),
        };
        assert_eq!(key.to_string(), "merge");
    }

    #[test]
    fn test_paths_flatten_expanded_inputs() {
        let job = sample_job();
        let inputs: Vec<&str> = job.input_paths().collect();
        assert_eq!(inputs, vec!["in/s1.fq", "a.txt", "b.txt"]);
        assert_eq!(job.output_paths().collect::<Vec<_>>(), vec!["out/s1.bam"]);
        assert_eq!(job.log("err"), Some("logs/s1.err"));
        assert_eq!(job.log("out"), None);
    }
}
