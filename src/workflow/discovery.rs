//! Sample Discovery
//!
//! Derives the concrete wildcard values of a workflow (usually sample
//! names) by scanning input directories. Discovery runs once, before rules
//! are registered, and produces an immutable [`SampleSet`].

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{Result, WorkflowError};
use crate::workflow::model::Discovery;
use crate::workflow::wildcards::{Bindings, Pattern};

/// Lists the distinct wildcard values found under `directory`.
///
/// Every file below `directory` is matched by its relative path (with `/`
/// separators) against `pattern`. Results are ordered by relative path. A
/// missing directory yields no values.
pub fn discover(pattern: &Pattern, directory: &Path) -> Result<Vec<Bindings>> {
    if !directory.is_dir() {
        warn!(
            "Discovery directory '{}' does not exist; no values for '{}'",
            directory.display(),
            pattern
        );
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    collect_files(directory, directory, &mut files)?;
    files.sort();

    let mut found: Vec<Bindings> = Vec::new();
    for relative in &files {
        if let Some(bindings) = pattern.matches(relative)? {
            if !found.contains(&bindings) {
                debug!("Discovered {:?} from '{}'", bindings, relative);
                found.push(bindings);
            }
        }
    }

    Ok(found)
}

/// Discovers values for a pattern rooted at `base`.
///
/// The pattern's literal directory prefix selects the scanned directory:
/// `"000.fastq/{sample}.fastq"` scans `base/000.fastq` for `{sample}.fastq`.
pub fn glob_wildcards(pattern: &str, base: &Path) -> Result<Vec<Bindings>> {
    let compiled = Pattern::compile(pattern)?;
    let dir = compiled.literal_dir();
    if dir.is_empty() {
        return discover(&compiled, base);
    }

    let relative = &pattern[dir.len() + 1..];
    let scoped = Pattern::compile(relative)?;
    discover(&scoped, &base.join(dir))
}

/// Discovered values per wildcard name, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet {
    lists: Vec<(String, Vec<String>)>,
}

impl SampleSet {
    /// Creates an empty sample set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every discovery declaration against `base`.
    pub fn from_discoveries(discoveries: &[Discovery], base: &Path) -> Result<Self> {
        let mut samples = Self::new();

        for discovery in discoveries {
            let found = match discovery {
                Discovery::Pattern(pattern) => glob_wildcards(pattern, base)?,
                Discovery::Scoped { pattern, directory } => {
                    let compiled = Pattern::compile(pattern)?;
                    discover(&compiled, &base.join(directory))?
                }
            };

            let names = match discovery {
                Discovery::Pattern(p) | Discovery::Scoped { pattern: p, .. } => {
                    Pattern::compile(p)?.wildcard_names().to_vec()
                }
            };
            if names.is_empty() {
                return Err(WorkflowError::MalformedPattern {
                    pattern: discovery_pattern(discovery).to_string(),
                    reason: "discovery pattern declares no wildcards".to_string(),
                });
            }

            for bindings in found {
                for name in &names {
                    if let Some(value) = bindings.get(name) {
                        samples.insert(name, value);
                    }
                }
            }
            for name in &names {
                samples.ensure(name);
            }
        }

        for (name, values) in &samples.lists {
            info!("  {{{}}} -> {} values", name, values.len());
        }
        Ok(samples)
    }

    /// Adds a value to a wildcard's list unless already present.
    pub fn insert(&mut self, name: &str, value: &str) {
        let list = self.ensure(name);
        if !list.iter().any(|v| v == value) {
            list.push(value.to_string());
        }
    }

    /// Builder form of [`insert`](Self::insert) for a whole list.
    pub fn with_values(mut self, name: &str, values: &[&str]) -> Self {
        self.ensure(name);
        for value in values {
            self.insert(name, value);
        }
        self
    }

    fn ensure(&mut self, name: &str) -> &mut Vec<String> {
        let index = match self.lists.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                self.lists.push((name.to_string(), Vec::new()));
                self.lists.len() - 1
            }
        };
        &mut self.lists[index].1
    }

    /// Values of one wildcard.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.lists
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// Returns true if values were discovered (or declared) for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Value lists for the given wildcards, in declaration order.
    ///
    /// Names without discovered values are skipped; callers validate first.
    pub fn lists_for(&self, names: &[String]) -> Vec<(String, Vec<String>)> {
        self.lists
            .iter()
            .filter(|(n, _)| names.contains(n))
            .cloned()
            .collect()
    }

    /// Returns true if no wildcard has been discovered.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

fn discovery_pattern(discovery: &Discovery) -> &str {
    match discovery {
        Discovery::Pattern(p) | Discovery::Scoped { pattern: p, .. } => p,
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<String>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| WorkflowError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| WorkflowError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, files)?;
        } else if let Some(relative) = relative_slash_path(root, &path) {
            files.push(relative);
        }
    }
    Ok(())
}

fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative: PathBuf = path.strip_prefix(root).ok()?.to_path_buf();
    let parts: Option<Vec<&str>> = relative.iter().map(|c| c.to_str()).collect();
    Some(parts?.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(dir: &Path, relative: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_discover_sorted_distinct() {
        let temp_dir = tempdir().unwrap();
        touch(temp_dir.path(), "s2.fastq");
        touch(temp_dir.path(), "s1.fastq");
        touch(temp_dir.path(), "notes.txt");

        let pattern = Pattern::compile("{sample}.fastq").unwrap();
        let found = discover(&pattern, temp_dir.path()).unwrap();

        let samples: Vec<&str> = found.iter().map(|b| b["sample"].as_str()).collect();
        assert_eq!(samples, vec!["s1", "s2"]);
    }

    #[test]
    fn test_discover_nested_paths() {
        let temp_dir = tempdir().unwrap();
        touch(temp_dir.path(), "a/reads.fq");
        touch(temp_dir.path(), "b/reads.fq");
        touch(temp_dir.path(), "b/other.fq");

        let pattern = Pattern::compile("{sample}/reads.fq").unwrap();
        let found = discover(&pattern, temp_dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0]["sample"], "a");
        assert_eq!(found[1]["sample"], "b");
    }

    #[test]
    fn test_discover_missing_directory() {
        let pattern = Pattern::compile("{sample}.fastq").unwrap();
        let found = discover(&pattern, Path::new("/nonexistent/reads")).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_glob_wildcards_uses_literal_prefix() {
        let temp_dir = tempdir().unwrap();
        touch(temp_dir.path(), "000.fastq/x.fastq");
        touch(temp_dir.path(), "000.fastq/y.fastq");
        touch(temp_dir.path(), "elsewhere/z.fastq");

        let found = glob_wildcards("000.fastq/{sample}.fastq", temp_dir.path()).unwrap();
        let samples: Vec<&str> = found.iter().map(|b| b["sample"].as_str()).collect();
        assert_eq!(samples, vec!["x", "y"]);
    }

    #[test]
    fn test_sample_set_from_discoveries() {
        let temp_dir = tempdir().unwrap();
        touch(temp_dir.path(), "reads/b_L2.fq");
        touch(temp_dir.path(), "reads/a_L1.fq");
        touch(temp_dir.path(), "reads/a_L2.fq");

        let discoveries = vec![Discovery::Scoped {
            pattern: "{sample}_{lane}.fq".to_string(),
            directory: "reads".to_string(),
        }];
        let samples = SampleSet::from_discoveries(&discoveries, temp_dir.path()).unwrap();

        assert_eq!(samples.get("sample").unwrap(), &["a", "b"]);
        assert_eq!(samples.get("lane").unwrap(), &["L1", "L2"]);
    }

    #[test]
    fn test_sample_set_empty_discovery_still_declares_name() {
        let temp_dir = tempdir().unwrap();
        let discoveries = vec![Discovery::Pattern("missing/{sample}.fq".to_string())];
        let samples = SampleSet::from_discoveries(&discoveries, temp_dir.path()).unwrap();

        assert!(samples.contains("sample"));
        assert!(samples.get("sample").unwrap().is_empty());
    }

    #[test]
    fn test_sample_set_rejects_wildcard_free_pattern() {
        let temp_dir = tempdir().unwrap();
        let discoveries = vec![Discovery::Pattern("reads/all.fq".to_string())];
        assert!(SampleSet::from_discoveries(&discoveries, temp_dir.path()).is_err());
    }

    #[test]
    fn test_lists_for_keeps_declaration_order() {
        let samples = SampleSet::new()
            .with_values("sample", &["x", "y"])
            .with_values("lane", &["1"]);

        let names = vec!["lane".to_string(), "sample".to_string()];
        let lists = samples.lists_for(&names);
        assert_eq!(lists[0].0, "sample");
        assert_eq!(lists[1].0, "lane");
    }
}
