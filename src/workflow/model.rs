//! Workflow Data Model
//!
//! The declaration surface: rules, their named inputs/outputs/params/logs,
//! sample discovery and default targets.
//!
//! # Example YAML Format
//!
//! ```yaml
//! config:
//!   genome_db: /chr9.fa
//!
//! discover:
//!   - "000.fastq/{sample}.fastq"
//!
//! targets:
//!   - "020.bwa/{sample}.bam"
//!
//! rules:
//!   - name: bwa
//!     input:
//!       fq: "000.fastq/{sample}.fastq"
//!       db: { config: genome_db }
//!     output:
//!       bam: "020.bwa/{sample}.bam"
//!       bai: "020.bwa/{sample}.bam.bai"
//!     log:
//!       err: "logs/bwa/{sample}.err"
//!     shell: |
//!       bwa mem {input.db} {input.fq} | samtools sort - > {output.bam}
//!       samtools index {output.bam}
//! ```

use std::collections::BTreeMap;

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// An entry in a named list (`input`, `output`, `params`, `log`).
///
/// Declared either as a mapping (`fq: reads.fastq`) or positionally.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Named<T> {
    pub name: Option<String>,
    pub value: T,
}

impl<T> Named<T> {
    pub fn named(name: impl Into<String>, value: T) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }

    pub fn unnamed(value: T) -> Self {
        Self { name: None, value }
    }

    /// Name used in messages: the declared name or the position.
    pub fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| index.to_string())
    }
}

/// A rule input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum InputSpec {
    /// A path pattern using the rule's wildcards.
    Pattern(String),
    /// A path taken verbatim from the workflow config.
    Config { config: String },
    /// A pattern expanded over every discovered sample value.
    Expand { expand: String },
}

/// A rule output, optionally tagged for the aggregated report.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum OutputSpec {
    Plain(String),
    Report { path: String, report: ReportMeta },
}

impl OutputSpec {
    pub fn path(&self) -> &str {
        match self {
            Self::Plain(path) => path,
            Self::Report { path, .. } => path,
        }
    }

    pub fn report(&self) -> Option<&ReportMeta> {
        match self {
            Self::Plain(_) => None,
            Self::Report { report, .. } => Some(report),
        }
    }
}

/// Report metadata attached to an output.
///
/// Label values may reference the rule's wildcards (`sample: "{file}"`).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ReportMeta {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// A rule parameter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ParamSpec {
    /// Value read from the workflow config.
    Config { config: String },
    /// Template text; placeholders name the rule's wildcards.
    Template(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl ParamSpec {
    /// Template text for literal and templated params; `None` for config refs.
    pub fn template_text(&self) -> Option<String> {
        match self {
            Self::Config { .. } => None,
            Self::Template(text) => Some(text.clone()),
            Self::Integer(value) => Some(value.to_string()),
            Self::Float(value) => Some(value.to_string()),
            Self::Bool(value) => Some(value.to_string()),
        }
    }
}

/// A sample discovery declaration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Discovery {
    /// Pattern whose literal directory prefix is the scanned directory.
    Pattern(String),
    /// Pattern relative to an explicit directory.
    Scoped { pattern: String, directory: String },
}

/// A single rule declaration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Rule {
    /// Unique rule name
    pub name: String,

    #[serde(default, deserialize_with = "named_entries")]
    pub input: Vec<Named<InputSpec>>,

    #[serde(deserialize_with = "named_entries")]
    pub output: Vec<Named<OutputSpec>>,

    #[serde(default, deserialize_with = "named_entries")]
    pub params: Vec<Named<ParamSpec>>,

    #[serde(default, deserialize_with = "named_entries")]
    pub log: Vec<Named<String>>,

    /// Shell command template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Name of a registered function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
}

impl Rule {
    /// Creates an empty rule.
    ///
    /// # Example
    ///
    /// ```
    /// use pipewright::workflow::Rule;
    ///
    /// let rule = Rule::new("bwa")
    ///     .with_input("fq", "000.fastq/{sample}.fastq")
    ///     .with_output("bam", "020.bwa/{sample}.bam")
    ///     .with_shell("bwa mem ref.fa {input.fq} > {output.bam}");
    /// assert_eq!(rule.output.len(), 1);
    /// ```
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            input: Vec::new(),
            output: Vec::new(),
            params: Vec::new(),
            log: Vec::new(),
            shell: None,
            run: None,
        }
    }

    /// Adds a named input pattern.
    pub fn with_input(mut self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.input.push(Named::named(name, InputSpec::Pattern(pattern.into())));
        self
    }

    /// Adds an input expanded over discovered samples.
    pub fn with_expanded_input(mut self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.input.push(Named::named(
            name,
            InputSpec::Expand {
                expand: pattern.into(),
            },
        ));
        self
    }

    /// Adds an input resolved from the workflow config.
    pub fn with_config_input(mut self, name: impl Into<String>, key: impl Into<String>) -> Self {
        self.input
            .push(Named::named(name, InputSpec::Config { config: key.into() }));
        self
    }

    /// Adds a named output pattern.
    pub fn with_output(mut self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.output.push(Named::named(name, OutputSpec::Plain(pattern.into())));
        self
    }

    /// Adds a report-tagged output.
    pub fn with_report_output(
        mut self,
        name: impl Into<String>,
        pattern: impl Into<String>,
        report: ReportMeta,
    ) -> Self {
        self.output.push(Named::named(
            name,
            OutputSpec::Report {
                path: pattern.into(),
                report,
            },
        ));
        self
    }

    /// Adds a templated parameter.
    pub fn with_param(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.params
            .push(Named::named(name, ParamSpec::Template(template.into())));
        self
    }

    /// Adds a parameter read from the workflow config.
    pub fn with_config_param(mut self, name: impl Into<String>, key: impl Into<String>) -> Self {
        self.params
            .push(Named::named(name, ParamSpec::Config { config: key.into() }));
        self
    }

    /// Adds a named log pattern.
    pub fn with_log(mut self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.log.push(Named::named(name, pattern.into()));
        self
    }

    /// Sets the shell command template.
    pub fn with_shell(mut self, command: impl Into<String>) -> Self {
        self.shell = Some(command.into());
        self
    }

    /// Sets the function action.
    pub fn with_function(mut self, name: impl Into<String>) -> Self {
        self.run = Some(name.into());
        self
    }
}

/// A complete workflow declaration.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Workflow {
    /// Workflow-level values (reference data paths and the like)
    #[serde(default, deserialize_with = "scalar_map")]
    pub config: BTreeMap<String, String>,

    /// Sample discovery declarations, scanned at load time
    #[serde(default)]
    pub discover: Vec<Discovery>,

    /// Default targets, expanded over discovered samples
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Workflow {
    /// Creates an empty workflow.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a workflow from a list of rules.
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    /// Adds a rule.
    pub fn add_rule(&mut self, rule: Rule) -> Result<(), String> {
        if self.rules.iter().any(|r| r.name == rule.name) {
            return Err(format!("Rule '{}' already exists", rule.name));
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Gets a rule by name.
    pub fn get_rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Sets or overrides a config value.
    pub fn set_config(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config.insert(key.into(), value.into());
    }

    /// Adds a default target pattern.
    pub fn with_target(mut self, pattern: impl Into<String>) -> Self {
        self.targets.push(pattern.into());
        self
    }

    /// Adds a discovery pattern.
    pub fn with_discovery(mut self, pattern: impl Into<String>) -> Self {
        self.discover.push(Discovery::Pattern(pattern.into()));
        self
    }

    /// Returns the number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the workflow has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Deserializes a mapping, a sequence, or a single value into named entries.
fn named_entries<'de, D, T>(deserializer: D) -> Result<Vec<Named<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::Mapping(map) => map
            .into_iter()
            .map(|(key, value)| {
                let name = match key {
                    Value::String(s) => s,
                    other => return Err(de::Error::custom(format!("Expected string key, got {:?}", other))),
                };
                let value = serde_yaml::from_value(value).map_err(de::Error::custom)?;
                Ok(Named::named(name, value))
            })
            .collect(),
        Value::Sequence(seq) => seq
            .into_iter()
            .map(|value| {
                serde_yaml::from_value(value)
                    .map(Named::unnamed)
                    .map_err(de::Error::custom)
            })
            .collect(),
        single => serde_yaml::from_value(single)
            .map(|value| vec![Named::unnamed(value)])
            .map_err(de::Error::custom),
    }
}

/// Deserializes a mapping of scalars into strings.
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = BTreeMap::<String, Value>::deserialize(deserializer)?;
    map.into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                _ => {
                    return Err(de::Error::custom(format!(
                        "Config value '{}' must be a string, number or boolean",
                        key
                    )))
                }
            };
            Ok((key, text))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_creation() {
        let rule = Rule::new(" bwa ")
            .with_input("fq", "000.fastq/{sample}.fastq")
            .with_output("bam", "020.bwa/{sample}.bam")
            .with_output("bai", "020.bwa/{sample}.bam.bai")
            .with_param("threads", "2")
            .with_log("err", "logs/{sample}.err")
            .with_shell("bwa mem {input.fq} > {output.bam}");

        assert_eq!(rule.name, "bwa");
        assert_eq!(rule.input.len(), 1);
        assert_eq!(rule.output.len(), 2);
        assert_eq!(rule.output[1].name.as_deref(), Some("bai"));
        assert!(rule.run.is_none());
    }

    #[test]
    fn test_named_label() {
        let named = Named::named("fq", "x");
        assert_eq!(named.label(3), "fq");
        let unnamed = Named::unnamed("x");
        assert_eq!(unnamed.label(3), "3");
    }

    #[test]
    fn test_workflow_add_rule() {
        let mut workflow = Workflow::new();
        assert!(workflow.add_rule(Rule::new("a")).is_ok());
        assert!(workflow.add_rule(Rule::new("a")).is_err());
        assert_eq!(workflow.len(), 1);
        assert!(workflow.get_rule("a").is_some());
        assert!(workflow.get_rule("b").is_none());
    }

    #[test]
    fn test_deserialize_named_mapping() {
        let yaml = r#"
name: fastqc
input:
  fq: "000.fastq/{file}.fastq"
output:
  zip: "010.fastqc/{file}_fastqc.zip"
  summary:
    path: "010.fastqc/{file}_fastqc/summary.txt"
    report:
      category: Fastqc
      subcategory: Summary text
      labels:
        sample: "{file}"
shell: "fastqc {input.fq}"
"#;
        let rule: Rule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.input[0].name.as_deref(), Some("fq"));
        assert_eq!(rule.output.len(), 2);
        assert_eq!(rule.output[0].value.path(), "010.fastqc/{file}_fastqc.zip");
        let report = rule.output[1].value.report().unwrap();
        assert_eq!(report.category.as_deref(), Some("Fastqc"));
        assert_eq!(report.labels["sample"], "{file}");
    }

    #[test]
    fn test_deserialize_positional_and_single() {
        let yaml = r#"
name: concat
input:
  - "a.txt"
  - { config: genome_db }
  - { expand: "020.bwa/{sample}.bam" }
output: "out.txt"
run: concat
"#;
        let rule: Rule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.input.len(), 3);
        assert!(rule.input.iter().all(|i| i.name.is_none()));
        assert_eq!(rule.input[1].value, InputSpec::Config { config: "genome_db".to_string() });
        assert_eq!(
            rule.input[2].value,
            InputSpec::Expand { expand: "020.bwa/{sample}.bam".to_string() }
        );
        assert_eq!(rule.output.len(), 1);
        assert_eq!(rule.run.as_deref(), Some("concat"));
    }

    #[test]
    fn test_deserialize_params() {
        let yaml = r#"
name: call
output: "x.vcf"
params:
  min_qual: 20
  ratio: 0.5
  strict: true
  genome: { config: snpeff_genome }
  tag: "{sample}-v1"
shell: "true"
"#;
        let rule: Rule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.params[0].value, ParamSpec::Integer(20));
        assert_eq!(rule.params[1].value, ParamSpec::Float(0.5));
        assert_eq!(rule.params[2].value, ParamSpec::Bool(true));
        assert_eq!(rule.params[3].value.template_text(), None);
        assert_eq!(rule.params[4].value.template_text().as_deref(), Some("{sample}-v1"));
    }

    #[test]
    fn test_deserialize_workflow_config_scalars() {
        let yaml = r#"
config:
  genome_db: /chr9.fa
  memory_gb: 4
  verbose: false
discover:
  - "000.fastq/{sample}.fastq"
  - { pattern: "{lane}.txt", directory: "lanes" }
rules: []
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(workflow.config["genome_db"], "/chr9.fa");
        assert_eq!(workflow.config["memory_gb"], "4");
        assert_eq!(workflow.config["verbose"], "false");
        assert_eq!(workflow.discover.len(), 2);
        assert!(matches!(workflow.discover[1], Discovery::Scoped { .. }));
    }

    #[test]
    fn test_deserialize_rejects_nested_config() {
        let yaml = "config:\n  nested:\n    a: 1\nrules: []\n";
        assert!(serde_yaml::from_str::<Workflow>(yaml).is_err());
    }

    #[test]
    fn test_set_config_overrides() {
        let mut workflow = Workflow::new();
        workflow.set_config("genome_db", "/a.fa");
        workflow.set_config("genome_db", "/b.fa");
        assert_eq!(workflow.config["genome_db"], "/b.fa");
    }
}
