//! Job Functions
//!
//! In-process actions a rule can name with `run:` instead of a shell
//! command, and the [`ActionArgs`] bundle both kinds of action receive.

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use log::debug;

use crate::workflow::model::Named;
use crate::workflow::template::split_key;
use crate::workflow::{Bindings, Job};

/// Result of a job function.
pub type FunctionResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Everything an action can see about its job.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionArgs {
    pub rule: String,
    pub inputs: Vec<Named<Vec<String>>>,
    pub outputs: Vec<Named<String>>,
    pub params: Vec<Named<String>>,
    pub logs: Vec<Named<String>>,
    pub wildcards: Bindings,
    pub config: BTreeMap<String, String>,
    /// Directory relative paths are resolved against
    pub working_dir: PathBuf,
}

impl ActionArgs {
    pub fn from_job(job: &Job, config: &BTreeMap<String, String>, working_dir: &Path) -> Self {
        Self {
            rule: job.rule.clone(),
            inputs: job.inputs.clone(),
            outputs: job.outputs.clone(),
            params: job.params.clone(),
            logs: job.logs.clone(),
            wildcards: job.wildcards.clone(),
            config: config.clone(),
            working_dir: working_dir.to_path_buf(),
        }
    }

    /// Resolves a template placeholder key.
    ///
    /// Lists render space separated. Entries are addressed by name or by
    /// position (`input.0`).
    pub fn lookup(&self, key: &str) -> Option<String> {
        let (namespace, member) = split_key(key);
        match (namespace, member) {
            ("rule", None) => Some(self.rule.clone()),
            ("input", None) => Some(self.input_paths().join(" ")),
            ("input", Some(member)) => find_entry(&self.inputs, member).map(|paths| paths.join(" ")),
            ("output", None) => Some(join(&self.outputs)),
            ("output", Some(member)) => find_entry(&self.outputs, member).cloned(),
            ("log", None) => Some(join(&self.logs)),
            ("log", Some(member)) => find_entry(&self.logs, member).cloned(),
            ("params", Some(member)) => find_entry(&self.params, member).cloned(),
            ("wildcards", Some(name)) => self.wildcards.get(name).cloned(),
            ("config", Some(name)) => self.config.get(name).cloned(),
            _ => None,
        }
    }

    /// Every input path in declaration order.
    pub fn input_paths(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .flat_map(|entry| entry.value.iter().map(String::as_str))
            .collect()
    }

    pub fn output_paths(&self) -> Vec<&str> {
        self.outputs.iter().map(|entry| entry.value.as_str()).collect()
    }

    /// Paths of the input entry `name`.
    pub fn input(&self, name: &str) -> Option<&[String]> {
        find_entry(&self.inputs, name).map(Vec::as_slice)
    }

    pub fn output(&self, name: &str) -> Option<&str> {
        find_entry(&self.outputs, name).map(String::as_str)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        find_entry(&self.params, name).map(String::as_str)
    }

    /// Joins a relative path onto the working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.working_dir.join(path)
    }
}

fn find_entry<'a, T>(entries: &'a [Named<T>], member: &str) -> Option<&'a T> {
    entries
        .iter()
        .find(|entry| entry.name.as_deref() == Some(member))
        .or_else(|| member.parse::<usize>().ok().and_then(|index| entries.get(index)))
        .map(|entry| &entry.value)
}

fn join(entries: &[Named<String>]) -> String {
    entries
        .iter()
        .map(|entry| entry.value.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// An in-process job action.
///
/// Implemented for any `Fn(&ActionArgs) -> FunctionResult` closure.
pub trait JobFunction: Send + Sync {
    fn call(&self, args: &ActionArgs) -> FunctionResult;
}

impl<F> JobFunction for F
where
    F: Fn(&ActionArgs) -> FunctionResult + Send + Sync,
{
    fn call(&self, args: &ActionArgs) -> FunctionResult {
        self(args)
    }
}

/// Named job functions.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn JobFunction>>,
}

impl FunctionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in `touch` and `concat`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("touch", touch);
        registry.register("concat", concat);
        registry
    }

    /// Registers a function, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: JobFunction + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

/// Creates every output, or updates its modification time.
pub fn touch(args: &ActionArgs) -> FunctionResult {
    for output in args.output_paths() {
        let path = args.resolve(output);
        let file = File::options().create(true).append(true).open(&path)?;
        file.set_modified(SystemTime::now())?;
        debug!("Touched {}", path.display());
    }
    Ok(())
}

/// Writes the concatenation of all inputs into every output.
pub fn concat(args: &ActionArgs) -> FunctionResult {
    let mut content = Vec::new();
    for input in args.input_paths() {
        content.extend(fs::read(args.resolve(input))?);
    }
    for output in args.output_paths() {
        fs::write(args.resolve(output), &content)?;
    }
    Ok(())
}
