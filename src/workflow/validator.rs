//! Rule Validation
//!
//! Checks run when a rule is registered:
//! - rule fields (name, outputs, exactly one action)
//! - wildcard consistency between outputs and everything else
//! - config references
//! - shell template placeholders

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use super::model::{Named, Rule};
use super::template::{split_key, Template};
use super::wildcards::Pattern;
use crate::error::{Result, WorkflowError};

fn invalid(rule: &str, reason: impl Into<String>) -> WorkflowError {
    WorkflowError::InvalidRule {
        rule: rule.to_string(),
        reason: reason.into(),
    }
}

/// Validates a rule's own fields against the names already registered.
pub fn check_rule_fields(rule: &Rule, registered: &[&str]) -> Result<()> {
    if rule.name.trim().is_empty() {
        return Err(invalid("", "rule has empty or whitespace-only name"));
    }

    if registered.contains(&rule.name.as_str()) {
        return Err(invalid(&rule.name, "duplicate rule name"));
    }

    if rule.output.is_empty() {
        return Err(invalid(&rule.name, "rule declares no outputs"));
    }

    match (&rule.shell, &rule.run) {
        (Some(_), Some(_)) => return Err(invalid(&rule.name, "rule has both 'shell' and 'run'")),
        (None, None) => return Err(invalid(&rule.name, "rule has neither 'shell' nor 'run'")),
        (Some(shell), None) if shell.trim().is_empty() => {
            return Err(invalid(&rule.name, "shell command is empty"))
        }
        (None, Some(run)) if run.trim().is_empty() => {
            return Err(invalid(&rule.name, "function name is empty"))
        }
        _ => {}
    }

    check_unique_names(&rule.name, "input", &rule.input)?;
    check_unique_names(&rule.name, "output", &rule.output)?;
    check_unique_names(&rule.name, "params", &rule.params)?;
    check_unique_names(&rule.name, "log", &rule.log)?;

    Ok(())
}

fn check_unique_names<T>(rule: &str, section: &str, entries: &[Named<T>]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for name in entries.iter().filter_map(|e| e.name.as_deref()) {
        if !seen.insert(name) {
            return Err(invalid(rule, format!("duplicate {} name '{}'", section, name)));
        }
    }
    Ok(())
}

/// Returns the wildcard set shared by every output pattern.
///
/// Outputs of one rule are produced together, so each must be renderable
/// from the bindings extracted by any other.
pub fn check_output_wildcards(rule: &str, outputs: &[Pattern]) -> Result<BTreeSet<String>> {
    let Some(first) = outputs.first() else {
        return Err(invalid(rule, "rule declares no outputs"));
    };
    let declared = first.wildcard_set();

    for output in &outputs[1..] {
        let other = output.wildcard_set();
        if let Some(extra) = other.symmetric_difference(&declared).next() {
            return Err(WorkflowError::UndeclaredWildcard {
                rule: rule.to_string(),
                wildcard: extra.clone(),
                context: format!("output '{}'", output),
            });
        }
    }

    Ok(declared)
}

/// Fails if `used` names a wildcard the outputs do not declare.
pub fn check_declared<'a, I>(rule: &str, declared: &BTreeSet<String>, used: I, context: &str) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    for name in used {
        if !declared.contains(name) {
            return Err(WorkflowError::UndeclaredWildcard {
                rule: rule.to_string(),
                wildcard: name.to_string(),
                context: context.to_string(),
            });
        }
    }
    Ok(())
}

/// Looks up a config key, failing with [`WorkflowError::Config`].
pub fn check_config_key<'a>(owner: &str, key: &str, config: &'a BTreeMap<String, String>) -> Result<&'a str> {
    config
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| WorkflowError::Config {
            owner: owner.to_string(),
            key: key.to_string(),
        })
}

/// Parses a template, mapping syntax errors to [`WorkflowError::Template`].
pub fn parse_template(owner: &str, text: &str) -> Result<Template> {
    Template::parse(text).map_err(|reason| WorkflowError::Template {
        owner: owner.to_string(),
        reason,
    })
}

/// Validates every placeholder of a rule's shell template.
pub fn check_shell_template(
    rule: &Rule,
    template: &Template,
    declared: &BTreeSet<String>,
    config: &BTreeMap<String, String>,
) -> Result<()> {
    let template_error = |reason: String| WorkflowError::Template {
        owner: rule.name.clone(),
        reason,
    };

    for key in template.placeholders() {
        let (namespace, member) = split_key(key);
        match (namespace, member) {
            ("rule", None) => {}
            ("input", member) => check_entry(&rule.input, member, key).map_err(template_error)?,
            ("output", member) => check_entry(&rule.output, member, key).map_err(template_error)?,
            ("log", member) => check_entry(&rule.log, member, key).map_err(template_error)?,
            ("params", Some(member)) => {
                check_entry(&rule.params, Some(member), key).map_err(template_error)?
            }
            ("wildcards", Some(name)) => check_declared(&rule.name, declared, [name], "shell command")?,
            ("config", Some(name)) => {
                check_config_key(&rule.name, name, config)?;
            }
            _ => return Err(template_error(format!("unknown placeholder '{{{}}}'", key))),
        }
    }

    debug!("Shell template of '{}' validated", rule.name);
    Ok(())
}

fn check_entry<T>(entries: &[Named<T>], member: Option<&str>, key: &str) -> std::result::Result<(), String> {
    match member {
        None if entries.is_empty() => Err(format!("'{{{}}}' used but nothing is declared", key)),
        None => Ok(()),
        Some(member) => {
            let by_name = entries.iter().any(|e| e.name.as_deref() == Some(member));
            let by_index = member.parse::<usize>().map(|i| i < entries.len()).unwrap_or(false);
            if by_name || by_index {
                Ok(())
            } else {
                Err(format!("'{{{}}}' does not name a declared entry", key))
            }
        }
    }
}

/// Warns about logs that are declared but never written.
///
/// Shell rules route stdout/stderr to logs named `stdout`/`out` and
/// `stderr`/`err`, or both to the first log; any other log is left to the
/// command itself.
pub fn warn_unrouted_logs(rule: &Rule, template: Option<&Template>) {
    if rule.log.len() < 2 {
        return;
    }
    let referenced: BTreeSet<&str> = template
        .map(|t| t.placeholders().collect())
        .unwrap_or_default();
    for (index, entry) in rule.log.iter().enumerate() {
        let label = entry.label(index);
        let routed = matches!(label.as_str(), "stdout" | "out" | "stderr" | "err");
        let named_key = format!("log.{}", label);
        if !routed && !referenced.contains("log") && !referenced.contains(named_key.as_str()) {
            warn!("Rule '{}': log '{}' is never written by the engine or the command", rule.name, label);
        }
    }
}
