//! Rule Registry
//!
//! Holds compiled rules and turns concrete targets into jobs. Registration
//! validates a rule completely, so every error about the declarations
//! surfaces before the graph is built.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};

use super::discovery::SampleSet;
use super::job::{Job, JobAction, JobKey, ReportEntry};
use super::model::{InputSpec, Named, ParamSpec, ReportMeta, Rule, Workflow};
use super::template::Template;
use super::validator;
use super::wildcards::{expand, Bindings, Pattern};
use crate::error::{Result, WorkflowError};

#[derive(Debug, Clone)]
enum CompiledInput {
    Pattern(Pattern),
    /// Paths fixed at registration (config references, expansions)
    Fixed(Vec<String>),
}

#[derive(Debug, Clone)]
enum CompiledParam {
    Fixed(String),
    Template(Template),
}

#[derive(Debug, Clone)]
struct CompiledReport {
    meta: ReportMeta,
    labels: Vec<(String, Template)>,
}

/// A validated rule with its patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    wildcards: BTreeSet<String>,
    inputs: Vec<Named<CompiledInput>>,
    outputs: Vec<Named<Pattern>>,
    reports: Vec<Option<CompiledReport>>,
    params: Vec<Named<CompiledParam>>,
    logs: Vec<Named<Pattern>>,
    action: JobAction,
}

impl CompiledRule {
    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Wildcards declared by the outputs.
    pub fn wildcards(&self) -> &BTreeSet<String> {
        &self.wildcards
    }

    pub fn output_patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.outputs.iter().map(|o| &o.value)
    }

    pub fn action(&self) -> &JobAction {
        &self.action
    }
}

/// Compiled rules in registration order.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<CompiledRule>,
    config: BTreeMap<String, String>,
    samples: SampleSet,
}

impl RuleRegistry {
    /// Creates an empty registry with the given config and sample set.
    pub fn new(config: BTreeMap<String, String>, samples: SampleSet) -> Self {
        Self {
            rules: Vec::new(),
            config,
            samples,
        }
    }

    /// Registers every rule of a workflow.
    pub fn from_workflow(workflow: &Workflow, samples: SampleSet) -> Result<Self> {
        let mut registry = Self::new(workflow.config.clone(), samples);
        for rule in &workflow.rules {
            registry.register(rule.clone())?;
        }
        info!("Registered {} rules", registry.len());
        Ok(registry)
    }

    /// Validates and compiles a rule.
    pub fn register(&mut self, rule: Rule) -> Result<()> {
        let registered: Vec<&str> = self.rules.iter().map(|r| r.name()).collect();
        validator::check_rule_fields(&rule, &registered)?;

        let name = rule.name.clone();

        let output_patterns = rule
            .output
            .iter()
            .map(|o| Pattern::compile(o.value.path()))
            .collect::<Result<Vec<_>>>()?;
        let wildcards = validator::check_output_wildcards(&name, &output_patterns)?;

        let outputs: Vec<Named<Pattern>> = rule
            .output
            .iter()
            .zip(output_patterns)
            .map(|(entry, pattern)| Named {
                name: entry.name.clone(),
                value: pattern,
            })
            .collect();

        let mut reports = Vec::with_capacity(rule.output.len());
        for (index, entry) in rule.output.iter().enumerate() {
            let compiled = match entry.value.report() {
                Some(meta) => Some(self.compile_report(&name, &entry.label(index), meta, &wildcards)?),
                None => None,
            };
            reports.push(compiled);
        }

        let mut inputs = Vec::with_capacity(rule.input.len());
        for (index, entry) in rule.input.iter().enumerate() {
            let context = format!("input '{}'", entry.label(index));
            let compiled = match &entry.value {
                InputSpec::Pattern(text) => {
                    let pattern = Pattern::compile(text)?;
                    validator::check_declared(&name, &wildcards, pattern.wildcard_names().iter().map(String::as_str), &context)?;
                    CompiledInput::Pattern(pattern)
                }
                InputSpec::Config { config } => {
                    let value = validator::check_config_key(&name, config, &self.config)?;
                    CompiledInput::Fixed(vec![value.to_string()])
                }
                InputSpec::Expand { expand: text } => {
                    let pattern = Pattern::compile(text)?;
                    for wildcard in pattern.wildcard_names() {
                        if !self.samples.contains(wildcard) {
                            return Err(WorkflowError::UndeclaredWildcard {
                                rule: name.clone(),
                                wildcard: wildcard.clone(),
                                context: format!("{} (no discovered values)", context),
                            });
                        }
                    }
                    let lists = self.samples.lists_for(pattern.wildcard_names());
                    let paths = expand(std::slice::from_ref(&pattern), &lists)?;
                    debug!("Rule '{}': {} expands to {} paths", name, context, paths.len());
                    CompiledInput::Fixed(paths)
                }
            };
            inputs.push(Named {
                name: entry.name.clone(),
                value: compiled,
            });
        }

        let mut params = Vec::with_capacity(rule.params.len());
        for (index, entry) in rule.params.iter().enumerate() {
            let context = format!("param '{}'", entry.label(index));
            let compiled = match &entry.value {
                ParamSpec::Config { config } => {
                    let value = validator::check_config_key(&name, config, &self.config)?;
                    CompiledParam::Fixed(value.to_string())
                }
                other => {
                    let text = other.template_text().unwrap_or_default();
                    let template = validator::parse_template(&name, &text)?;
                    validator::check_declared(&name, &wildcards, template.placeholders(), &context)?;
                    CompiledParam::Template(template)
                }
            };
            params.push(Named {
                name: entry.name.clone(),
                value: compiled,
            });
        }

        let mut logs = Vec::with_capacity(rule.log.len());
        for (index, entry) in rule.log.iter().enumerate() {
            let pattern = Pattern::compile(&entry.value)?;
            let context = format!("log '{}'", entry.label(index));
            validator::check_declared(&name, &wildcards, pattern.wildcard_names().iter().map(String::as_str), &context)?;
            logs.push(Named {
                name: entry.name.clone(),
                value: pattern,
            });
        }

        let action = match (&rule.shell, &rule.run) {
            (Some(shell), _) => {
                let template = validator::parse_template(&name, shell)?;
                validator::check_shell_template(&rule, &template, &wildcards, &self.config)?;
                validator::warn_unrouted_logs(&rule, Some(&template));
                JobAction::Shell(shell.clone())
            }
            (None, Some(function)) => JobAction::Function(function.trim().to_string()),
            (None, None) => {
                return Err(WorkflowError::InvalidRule {
                    rule: name,
                    reason: "rule has neither 'shell' nor 'run'".to_string(),
                })
            }
        };

        debug!("Registered rule '{}' with wildcards {:?}", name, wildcards);
        self.rules.push(CompiledRule {
            rule,
            wildcards,
            inputs,
            outputs,
            reports,
            params,
            logs,
            action,
        });
        Ok(())
    }

    fn compile_report(
        &self,
        rule: &str,
        output: &str,
        meta: &ReportMeta,
        wildcards: &BTreeSet<String>,
    ) -> Result<CompiledReport> {
        let mut labels = Vec::with_capacity(meta.labels.len());
        for (key, text) in &meta.labels {
            let template = validator::parse_template(rule, text)?;
            let context = format!("report label '{}' of output '{}'", key, output);
            validator::check_declared(rule, wildcards, template.placeholders(), &context)?;
            labels.push((key.clone(), template));
        }
        Ok(CompiledReport {
            meta: meta.clone(),
            labels,
        })
    }

    /// Finds the job producing `target`.
    ///
    /// Returns `Ok(None)` when no rule matches. More than one distinct
    /// `(rule, bindings)` match is an [`WorkflowError::AmbiguousRule`].
    pub fn resolve(&self, target: &str) -> Result<Option<Job>> {
        let mut matches: Vec<(usize, Bindings)> = Vec::new();

        for (index, rule) in self.rules.iter().enumerate() {
            for pattern in rule.output_patterns() {
                let bindings = match pattern.matches(target) {
                    Ok(Some(bindings)) => bindings,
                    Ok(None) => continue,
                    Err(e @ WorkflowError::AmbiguousMatch { .. }) => {
                        warn!("Rule '{}' skipped for '{}': {}", rule.name(), target, e);
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if !outputs_agree(rule, &bindings) {
                    debug!("Rule '{}' rejected for '{}': sibling outputs do not match", rule.name(), target);
                    continue;
                }
                let candidate = (index, bindings);
                if !matches.contains(&candidate) {
                    matches.push(candidate);
                }
            }
        }

        match matches.len() {
            0 => Ok(None),
            1 => {
                let (index, bindings) = matches.remove(0);
                self.instantiate(&self.rules[index], bindings).map(Some)
            }
            _ => {
                let candidates = matches
                    .iter()
                    .map(|(index, bindings)| {
                        JobKey {
                            rule: self.rules[*index].name().to_string(),
                            bindings: bindings.clone(),
                        }
                        .to_string()
                    })
                    .collect();
                Err(WorkflowError::AmbiguousRule {
                    target: target.to_string(),
                    candidates,
                })
            }
        }
    }

    /// Builds the job of `rule` for the given bindings.
    pub fn instantiate(&self, rule: &CompiledRule, wildcards: Bindings) -> Result<Job> {
        let inputs = rule
            .inputs
            .iter()
            .map(|entry| {
                let paths = match &entry.value {
                    CompiledInput::Pattern(pattern) => vec![pattern.render(&wildcards)?],
                    CompiledInput::Fixed(paths) => paths.clone(),
                };
                Ok(Named {
                    name: entry.name.clone(),
                    value: paths,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let outputs = render_patterns(&rule.outputs, &wildcards)?;
        let logs = render_patterns(&rule.logs, &wildcards)?;

        let params = rule
            .params
            .iter()
            .map(|entry| {
                let value = match &entry.value {
                    CompiledParam::Fixed(value) => value.clone(),
                    CompiledParam::Template(template) => render_with_wildcards(rule.name(), template, &wildcards)?,
                };
                Ok(Named {
                    name: entry.name.clone(),
                    value,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut reports = Vec::new();
        for (output, report) in outputs.iter().zip(&rule.reports) {
            let Some(report) = report else { continue };
            let labels = report
                .labels
                .iter()
                .map(|(key, template)| Ok((key.clone(), render_with_wildcards(rule.name(), template, &wildcards)?)))
                .collect::<Result<BTreeMap<_, _>>>()?;
            reports.push(ReportEntry {
                path: output.value.clone(),
                category: report.meta.category.clone(),
                subcategory: report.meta.subcategory.clone(),
                labels,
                caption: report.meta.caption.clone(),
            });
        }

        Ok(Job {
            id: 0,
            rule: rule.name().to_string(),
            wildcards,
            inputs,
            outputs,
            params,
            logs,
            action: rule.action.clone(),
            reports,
        })
    }

    pub fn get(&self, name: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.name() == name)
    }

    /// Rules in registration order.
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn config(&self) -> &BTreeMap<String, String> {
        &self.config
    }

    pub fn samples(&self) -> &SampleSet {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn render_patterns(entries: &[Named<Pattern>], wildcards: &Bindings) -> Result<Vec<Named<String>>> {
    entries
        .iter()
        .map(|entry| {
            Ok(Named {
                name: entry.name.clone(),
                value: entry.value.render(wildcards)?,
            })
        })
        .collect()
}

fn render_with_wildcards(rule: &str, template: &Template, wildcards: &Bindings) -> Result<String> {
    template
        .render(|key| wildcards.get(key).cloned())
        .map_err(|reason| WorkflowError::Template {
            owner: rule.to_string(),
            reason,
        })
}

/// Every output of `rule`, rendered with `bindings`, matches its own
/// pattern back to the same bindings.
fn outputs_agree(rule: &CompiledRule, bindings: &Bindings) -> bool {
    rule.output_patterns().all(|pattern| {
        pattern
            .render(bindings)
            .and_then(|path| pattern.matches(&path))
            .is_ok_and(|found| found.as_ref() == Some(bindings))
    })
}
