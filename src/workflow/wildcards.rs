//! Wildcard Patterns
//!
//! A pattern is a file path template with named placeholders:
//!
//! - `{sample}` matches one or more characters, never crossing a `/`
//! - `{path,.+}` carries an explicit regex constraint; use it to declare a
//!   multi-segment wildcard
//!
//! Patterns are compiled once into anchored regular expressions. Matching
//! extracts [`Bindings`], rendering substitutes them back, and [`expand`]
//! produces every combination of a set of wildcard values.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::trace;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, WorkflowError};

/// Wildcard name to concrete value.
pub type Bindings = BTreeMap<String, String>;

/// Regex used for wildcards without an explicit constraint.
const DEFAULT_CONSTRAINT: &str = "[^/]+";

static WILDCARD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid wildcard name regex"));

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Wildcard {
        name: String,
        constraint: Option<String>,
    },
}

/// A compiled file path pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
    names: Vec<String>,
    greedy: Regex,
    lazy: Regex,
}

impl Pattern {
    /// Compiles a pattern.
    ///
    /// Fails with [`WorkflowError::MalformedPattern`] on unbalanced braces,
    /// empty or invalid wildcard names, duplicate names, or a constraint that
    /// is not a valid regex.
    ///
    /// # Example
    /// ```
    /// use pipewright::workflow::wildcards::Pattern;
    ///
    /// let pattern = Pattern::compile("reads/{sample}.fastq").unwrap();
    /// let bindings = pattern.matches("reads/s1.fastq").unwrap().unwrap();
    /// assert_eq!(bindings["sample"], "s1");
    /// ```
    pub fn compile(source: &str) -> Result<Self> {
        let segments = parse_segments(source)?;

        let mut names = Vec::new();
        let mut body = String::new();
        for segment in &segments {
            match segment {
                Segment::Literal(text) => body.push_str(&regex::escape(text)),
                Segment::Wildcard { name, constraint } => {
                    if names.contains(name) {
                        return Err(malformed(
                            source,
                            format!("wildcard '{{{}}}' appears more than once", name),
                        ));
                    }
                    names.push(name.clone());
                    let constraint = constraint.as_deref().unwrap_or(DEFAULT_CONSTRAINT);
                    body.push_str(&format!("(?P<{}>{})", name, constraint));
                }
            }
        }

        let greedy = Regex::new(&format!("^(?:{})$", body))
            .map_err(|e| malformed(source, format!("invalid constraint: {}", e)))?;
        let lazy = Regex::new(&format!("^(?U:{})$", body))
            .map_err(|e| malformed(source, format!("invalid constraint: {}", e)))?;

        Ok(Self {
            source: source.to_string(),
            segments,
            names,
            greedy,
            lazy,
        })
    }

    /// Returns the pattern text as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Wildcard names in order of appearance.
    pub fn wildcard_names(&self) -> &[String] {
        &self.names
    }

    /// Wildcard names as a set.
    pub fn wildcard_set(&self) -> BTreeSet<String> {
        self.names.iter().cloned().collect()
    }

    /// Returns true if the pattern contains at least one wildcard.
    pub fn has_wildcards(&self) -> bool {
        !self.names.is_empty()
    }

    /// Matches a concrete path against the pattern.
    ///
    /// Returns `Ok(None)` when the path does not match. A path that can be
    /// split between the wildcards in more than one way is rejected with
    /// [`WorkflowError::AmbiguousMatch`].
    pub fn matches(&self, path: &str) -> Result<Option<Bindings>> {
        let Some(greedy) = self.greedy.captures(path) else {
            return Ok(None);
        };

        let bindings: Bindings = self
            .names
            .iter()
            .filter_map(|name| greedy.name(name).map(|m| (name.clone(), m.as_str().to_string())))
            .collect();

        // The greedy and the greed-swapped matcher pick the two extreme
        // splits; they agree exactly when only one split exists.
        if let Some(lazy) = self.lazy.captures(path) {
            let differs = self.names.iter().any(|name| {
                lazy.name(name).map(|m| m.as_str()) != bindings.get(name).map(String::as_str)
            });
            if differs {
                return Err(WorkflowError::AmbiguousMatch {
                    pattern: self.source.clone(),
                    path: path.to_string(),
                });
            }
        }

        trace!("'{}' matched '{}' with {:?}", path, self.source, bindings);
        Ok(Some(bindings))
    }

    /// Substitutes bindings into the pattern.
    ///
    /// Bindings for wildcards the pattern does not use are ignored.
    pub fn render(&self, bindings: &Bindings) -> Result<String> {
        let mut rendered = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Wildcard { name, .. } => {
                    let value = bindings.get(name).ok_or_else(|| WorkflowError::UnboundWildcard {
                        pattern: self.source.clone(),
                        wildcard: name.clone(),
                    })?;
                    rendered.push_str(value);
                }
            }
        }
        Ok(rendered)
    }

    /// Directory part of the literal prefix before the first wildcard.
    ///
    /// `"000.fastq/{sample}.fastq"` yields `"000.fastq"`, a pattern that
    /// starts with a wildcard yields `""`.
    pub fn literal_dir(&self) -> &str {
        let prefix = match self.segments.first() {
            Some(Segment::Literal(text)) => text.as_str(),
            _ => "",
        };
        match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Expands patterns over every combination of wildcard values.
///
/// The first value list varies slowest, like nested loops written in the
/// order the lists are given. Each pattern is expanded in turn, so the
/// result is grouped by pattern.
///
/// # Example
/// ```
/// use pipewright::workflow::wildcards::{expand, Pattern};
///
/// let patterns = vec![Pattern::compile("{sample}.{lane}.fq").unwrap()];
/// let values = vec![
///     ("sample".to_string(), vec!["a".to_string(), "b".to_string()]),
///     ("lane".to_string(), vec!["1".to_string(), "2".to_string()]),
/// ];
/// let paths = expand(&patterns, &values).unwrap();
/// assert_eq!(paths, vec!["a.1.fq", "a.2.fq", "b.1.fq", "b.2.fq"]);
/// ```
pub fn expand(patterns: &[Pattern], values: &[(String, Vec<String>)]) -> Result<Vec<String>> {
    let mut combinations = vec![Bindings::new()];
    for (name, list) in values {
        combinations = combinations
            .into_iter()
            .flat_map(|base| {
                list.iter().map(move |value| {
                    let mut next = base.clone();
                    next.insert(name.clone(), value.clone());
                    next
                })
            })
            .collect();
    }

    let mut paths = Vec::with_capacity(patterns.len() * combinations.len());
    for pattern in patterns {
        for bindings in &combinations {
            paths.push(pattern.render(bindings)?);
        }
    }
    Ok(paths)
}

fn malformed(pattern: &str, reason: impl Into<String>) -> WorkflowError {
    WorkflowError::MalformedPattern {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

fn parse_segments(source: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = source.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                // Constraints may contain braces of their own (`\d{3}`).
                let mut depth = 1;
                let mut inner = String::new();
                for c in chars.by_ref() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    inner.push(c);
                }
                if depth != 0 {
                    return Err(malformed(source, "unterminated '{'"));
                }

                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }

                let (name, constraint) = match inner.split_once(',') {
                    Some((name, constraint)) => (name.trim(), Some(constraint.to_string())),
                    None => (inner.trim(), None),
                };
                if !WILDCARD_NAME.is_match(name) {
                    return Err(malformed(source, format!("invalid wildcard name '{}'", name)));
                }
                if constraint.as_deref().is_some_and(str::is_empty) {
                    return Err(malformed(source, format!("empty constraint for '{{{}}}'", name)));
                }
                segments.push(Segment::Wildcard {
                    name: name.to_string(),
                    constraint,
                });
            }
            '}' => return Err(malformed(source, "unbalanced '}'")),
            _ => literal.push(ch),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_compile_collects_names() {
        let pattern = Pattern::compile("{id}_{replicate}.txt").unwrap();
        assert_eq!(pattern.wildcard_names(), &["id", "replicate"]);
        assert!(pattern.has_wildcards());
    }

    #[test]
    fn test_compile_plain_path() {
        let pattern = Pattern::compile("030.samtools/snps.vcf").unwrap();
        assert!(!pattern.has_wildcards());
        assert!(pattern.matches("030.samtools/snps.vcf").unwrap().is_some());
        assert!(pattern.matches("030.samtools/snps_vcf").unwrap().is_none());
    }

    #[test]
    fn test_compile_duplicate_wildcard() {
        let result = Pattern::compile("{sample}/{sample}.bam");
        assert!(matches!(result, Err(WorkflowError::MalformedPattern { .. })));
    }

    #[test]
    fn test_compile_unbalanced() {
        assert!(Pattern::compile("reads/{sample.fastq").is_err());
        assert!(Pattern::compile("reads/sample}.fastq").is_err());
        assert!(Pattern::compile("reads/{}.fastq").is_err());
        assert!(Pattern::compile("reads/{1abc}.fastq").is_err());
    }

    #[test]
    fn test_compile_invalid_constraint() {
        let result = Pattern::compile("{sample,[a-}.txt");
        assert!(matches!(result, Err(WorkflowError::MalformedPattern { .. })));
    }

    #[test]
    fn test_match_extracts_bindings() {
        let pattern = Pattern::compile("010.fastqc/{file}_fastqc.zip").unwrap();
        let result = pattern.matches("010.fastqc/s1_fastqc.zip").unwrap();
        assert_eq!(result, Some(bindings(&[("file", "s1")])));
    }

    #[test]
    fn test_match_does_not_cross_separator() {
        let pattern = Pattern::compile("out/{s}.a").unwrap();
        assert!(pattern.matches("out/x/y.a").unwrap().is_none());
    }

    #[test]
    fn test_match_multi_segment_constraint() {
        let pattern = Pattern::compile("out/{path,.+}.a").unwrap();
        let result = pattern.matches("out/x/y.a").unwrap().unwrap();
        assert_eq!(result["path"], "x/y");
    }

    #[test]
    fn test_match_constraint_with_braces() {
        let pattern = Pattern::compile("run{id,\\d{3}}.log").unwrap();
        assert!(pattern.matches("run042.log").unwrap().is_some());
        assert!(pattern.matches("run42.log").unwrap().is_none());
    }

    #[test]
    fn test_match_rejects_ambiguous_split() {
        let pattern = Pattern::compile("{a}_{b}.txt").unwrap();
        assert!(pattern.matches("x_y.txt").unwrap().is_some());

        let result = pattern.matches("x_y_z.txt");
        assert!(matches!(result, Err(WorkflowError::AmbiguousMatch { .. })));
    }

    #[test]
    fn test_match_requires_non_empty_value() {
        let pattern = Pattern::compile("out/{s}.a").unwrap();
        assert!(pattern.matches("out/.a").unwrap().is_none());
    }

    #[test]
    fn test_render() {
        let pattern = Pattern::compile("020.bwa/{sample}.bam").unwrap();
        let rendered = pattern.render(&bindings(&[("sample", "s1"), ("extra", "x")])).unwrap();
        assert_eq!(rendered, "020.bwa/s1.bam");
    }

    #[test]
    fn test_render_unbound() {
        let pattern = Pattern::compile("020.bwa/{sample}.bam").unwrap();
        let result = pattern.render(&Bindings::new());
        match result {
            Err(WorkflowError::UnboundWildcard { wildcard, .. }) => assert_eq!(wildcard, "sample"),
            other => panic!("expected UnboundWildcard, got {:?}", other),
        }
    }

    #[test]
    fn test_render_match_round_trip() {
        let cases = [
            ("in/{s}.fastq", bindings(&[("s", "sample_1")])),
            ("{a}/{b}.txt", bindings(&[("a", "x.y"), ("b", "z_w")])),
            ("{d,.+}/final.{ext}", bindings(&[("d", "deep/nested"), ("ext", "vcf")])),
            ("reports/{kind}-v{version,\\d+}.html", bindings(&[("kind", "qc"), ("version", "12")])),
        ];

        for (source, expected) in cases {
            let pattern = Pattern::compile(source).unwrap();
            let path = pattern.render(&expected).unwrap();
            let matched = pattern.matches(&path).unwrap();
            assert_eq!(matched.as_ref(), Some(&expected), "round trip for {}", source);
            assert_eq!(pattern.render(&matched.unwrap()).unwrap(), path);
        }
    }

    #[test]
    fn test_literal_dir() {
        assert_eq!(Pattern::compile("000.fastq/{sample}.fastq").unwrap().literal_dir(), "000.fastq");
        assert_eq!(Pattern::compile("a/b/{x}/c.txt").unwrap().literal_dir(), "a/b");
        assert_eq!(Pattern::compile("{sample}.fastq").unwrap().literal_dir(), "");
        assert_eq!(Pattern::compile("prefix_{s}.txt").unwrap().literal_dir(), "");
    }

    #[test]
    fn test_expand_order() {
        let patterns = vec![
            Pattern::compile("{s}.a").unwrap(),
            Pattern::compile("{s}.b").unwrap(),
        ];
        let values = vec![("s".to_string(), vec!["x".to_string(), "y".to_string()])];

        let paths = expand(&patterns, &values).unwrap();
        assert_eq!(paths, vec!["x.a", "y.a", "x.b", "y.b"]);
    }

    #[test]
    fn test_expand_outer_list_varies_slowest() {
        let patterns = vec![Pattern::compile("{s}/{r}").unwrap()];
        let values = vec![
            ("s".to_string(), vec!["1".to_string(), "2".to_string()]),
            ("r".to_string(), vec!["a".to_string(), "b".to_string(), "c".to_string()]),
        ];

        let paths = expand(&patterns, &values).unwrap();
        assert_eq!(paths, vec!["1/a", "1/b", "1/c", "2/a", "2/b", "2/c"]);
    }

    #[test]
    fn test_expand_missing_values() {
        let patterns = vec![Pattern::compile("{s}/{r}").unwrap()];
        let values = vec![("s".to_string(), vec!["1".to_string()])];
        assert!(expand(&patterns, &values).is_err());
    }

    #[test]
    fn test_expand_empty_list_yields_nothing() {
        let patterns = vec![Pattern::compile("{s}.a").unwrap()];
        let values = vec![("s".to_string(), Vec::new())];
        assert!(expand(&patterns, &values).unwrap().is_empty());
    }
}
