//! Workflow Parser
//!
//! Loads workflow declarations from YAML and works out default targets.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::discovery::SampleSet;
use super::model::Workflow;
use super::registry::RuleRegistry;
use super::wildcards::{expand, Pattern};
use crate::error::{Result, WorkflowError};

/// Loads a workflow from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use pipewright::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("pipeline.yaml")?;
///     println!("Loaded {} rules", workflow.rules.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| WorkflowError::io(path, e))?;
    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    parse_workflow(&yaml_content)
}

/// Parses a workflow from YAML text.
pub fn parse_workflow(yaml: &str) -> Result<Workflow> {
    let workflow: Workflow = serde_yaml::from_str(yaml)?;

    info!(
        "Parsed {} rules, {} config entries, {} discovery patterns",
        workflow.rules.len(),
        workflow.config.len(),
        workflow.discover.len()
    );
    Ok(workflow)
}

/// Targets to build when none are requested explicitly.
///
/// Declared `targets` patterns are expanded over the discovered samples.
/// Without declarations, the outputs of the first rule whose outputs have
/// no wildcards are used.
pub fn default_targets(workflow: &Workflow, registry: &RuleRegistry) -> Result<Vec<String>> {
    if !workflow.targets.is_empty() {
        return expand_targets(&workflow.targets, registry.samples());
    }

    let first = registry
        .rules()
        .iter()
        .find(|rule| rule.output_patterns().all(|p| !p.has_wildcards()))
        .ok_or(WorkflowError::NoTargets)?;

    debug!("Using outputs of rule '{}' as default targets", first.name());
    Ok(first.output_patterns().map(|p| p.as_str().to_string()).collect())
}

/// Expands target patterns over discovered wildcard values.
pub fn expand_targets(patterns: &[String], samples: &SampleSet) -> Result<Vec<String>> {
    let mut targets = Vec::new();
    for text in patterns {
        let pattern = Pattern::compile(text)?;
        let lists = samples.lists_for(pattern.wildcard_names());
        if let Some(missing) = pattern
            .wildcard_names()
            .iter()
            .find(|name| !samples.contains(name))
        {
            return Err(WorkflowError::UnboundWildcard {
                pattern: text.clone(),
                wildcard: missing.clone(),
            });
        }
        targets.extend(expand(std::slice::from_ref(&pattern), &lists)?);
    }
    Ok(targets)
}
