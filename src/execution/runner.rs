//! Individual Job Execution
//!
//! Handles the execution of a single job including:
//! - Output and log directory creation
//! - Shell template rendering and script generation
//! - In-process function calls
//! - Routing process output to log files

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, error, warn};

use super::functions::{ActionArgs, FunctionRegistry};
use super::record::{ExecutionRecord, StreamSink};
use crate::error::{Result, WorkflowError};
use crate::workflow::template::Template;
use crate::workflow::{Job, JobAction};

/// Shell used when none is configured.
pub const DEFAULT_SHELL: &str = "bash";

/// Runs jobs in a working directory.
#[derive(Debug, Clone)]
pub struct JobRunner {
    working_dir: PathBuf,
    shell: String,
    config: BTreeMap<String, String>,
    functions: FunctionRegistry,
    script_dir: PathBuf,
}

impl JobRunner {
    pub fn new(working_dir: impl Into<PathBuf>, config: BTreeMap<String, String>, functions: FunctionRegistry) -> Self {
        Self {
            working_dir: working_dir.into(),
            shell: DEFAULT_SHELL.to_string(),
            config,
            functions,
            script_dir: std::env::temp_dir().join("pipewright_scripts"),
        }
    }

    /// Sets the shell that executes job scripts.
    pub fn set_shell(&mut self, shell: impl Into<String>) {
        self.shell = shell.into();
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Builds the arguments the job's action receives.
    pub fn action_args(&self, job: &Job) -> ActionArgs {
        ActionArgs::from_job(job, &self.config, &self.working_dir)
    }

    /// Renders the shell command of a job, or describes its function call.
    pub fn describe_action(&self, job: &Job) -> Result<String> {
        match &job.action {
            JobAction::Shell(text) => render_shell(job, text, &self.action_args(job)),
            JobAction::Function(name) => Ok(format!("<function {}>", name)),
        }
    }

    /// Executes a job and records the outcome.
    ///
    /// Never panics and never returns an error: every failure ends up in
    /// the returned record.
    pub fn run(&self, job: &Job) -> ExecutionRecord {
        let mut record = ExecutionRecord::started(job.id, job.label());

        let outcome = self.prepare_directories(job).and_then(|()| match &job.action {
            JobAction::Shell(text) => self.run_shell(job, text, &mut record),
            JobAction::Function(name) => self.run_function(job, name),
        });

        match outcome {
            Ok(()) => {
                debug!("{} completed successfully", job);
                record.succeed();
            }
            Err(e) => {
                error!("{}", e);
                record.fail(e.to_string());
            }
        }
        record
    }

    /// Creates parent directories for outputs and logs.
    fn prepare_directories(&self, job: &Job) -> Result<()> {
        for path in job.output_paths().chain(job.log_paths()) {
            let full = self.working_dir.join(path);
            if let Some(parent) = full.parent() {
                if !parent.exists() {
                    fs::create_dir_all(parent).map_err(|e| WorkflowError::io(parent, e))?;
                    debug!("Created directory: {}", parent.display());
                }
            }
        }
        Ok(())
    }

    fn run_shell(&self, job: &Job, text: &str, record: &mut ExecutionRecord) -> Result<()> {
        let command_text = render_shell(job, text, &self.action_args(job))?;
        let script_path = self.create_execution_script(job, &command_text)?;

        let (stdout, stderr, stdout_sink, stderr_sink) = self.open_streams(job)?;
        record.stdout = stdout_sink;
        record.stderr = stderr_sink;

        let mut cmd = Command::new(&self.shell);
        cmd.arg(&script_path)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        debug!("Executing {} in {}", job, self.working_dir.display());

        let status = cmd.status();

        if let Err(e) = fs::remove_file(&script_path) {
            warn!("Failed to clean up script {}: {}", script_path.display(), e);
        }

        let status = status.map_err(|e| job_error(job, format!("failed to start '{}': {}", self.shell, e)))?;
        record.exit_code = status.code();

        if status.success() {
            Ok(())
        } else {
            let reason = match status.code() {
                Some(code) => format!("command exited with status {}", code),
                None => "command terminated by signal".to_string(),
            };
            Err(job_error(job, reason))
        }
    }

    fn run_function(&self, job: &Job, name: &str) -> Result<()> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| job_error(job, format!("no function named '{}'", name)))?;
        let args = self.action_args(job);

        match panic::catch_unwind(AssertUnwindSafe(|| function.call(&args))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(job_error(job, format!("function '{}' failed: {}", name, e))),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(job_error(job, format!("function '{}' panicked: {}", name, message)))
            }
        }
    }

    /// Picks stdout/stderr destinations from the job's logs.
    ///
    /// Logs named `stdout`/`out` and `stderr`/`err` receive their stream;
    /// without such names the first log receives both; without logs both
    /// streams are inherited.
    fn open_streams(&self, job: &Job) -> Result<(Stdio, Stdio, StreamSink, StreamSink)> {
        let out_log = job.log("stdout").or_else(|| job.log("out"));
        let err_log = job.log("stderr").or_else(|| job.log("err"));

        if out_log.is_none() && err_log.is_none() {
            let Some(first) = job.logs.first() else {
                return Ok((Stdio::inherit(), Stdio::inherit(), StreamSink::Inherited, StreamSink::Inherited));
            };
            let file = self.create_log(&first.value)?;
            let clone = file
                .try_clone()
                .map_err(|e| WorkflowError::io(self.working_dir.join(&first.value), e))?;
            let sink = StreamSink::Log(first.value.clone());
            return Ok((Stdio::from(file), Stdio::from(clone), sink.clone(), sink));
        }

        let (stdout, stdout_sink) = match out_log {
            Some(path) => (Stdio::from(self.create_log(path)?), StreamSink::Log(path.to_string())),
            None => (Stdio::inherit(), StreamSink::Inherited),
        };
        let (stderr, stderr_sink) = match err_log {
            Some(path) => (Stdio::from(self.create_log(path)?), StreamSink::Log(path.to_string())),
            None => (Stdio::inherit(), StreamSink::Inherited),
        };
        Ok((stdout, stderr, stdout_sink, stderr_sink))
    }

    fn create_log(&self, path: &str) -> Result<File> {
        let full = self.working_dir.join(path);
        File::create(&full).map_err(|e| WorkflowError::io(full, e))
    }

    /// Creates a temporary script for job execution.
    fn create_execution_script(&self, job: &Job, command_text: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.script_dir).map_err(|e| WorkflowError::io(&self.script_dir, e))?;

        let script_path = self
            .script_dir
            .join(format!("job_{}_{}.sh", std::process::id(), job.id));
        let io_err = |e| WorkflowError::io(&script_path, e);

        let mut file = File::create(&script_path).map_err(io_err)?;
        writeln!(file, "#!/usr/bin/env {}", self.shell).map_err(io_err)?;
        writeln!(file, "set -euo pipefail").map_err(io_err)?;
        writeln!(file, "{}", command_text).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755)).map_err(io_err)?;
        }

        Ok(script_path)
    }
}

fn job_error(job: &Job, reason: impl Into<String>) -> WorkflowError {
    WorkflowError::JobExecution {
        job: job.label(),
        reason: reason.into(),
    }
}

fn render_shell(job: &Job, text: &str, args: &ActionArgs) -> Result<String> {
    let template_error = |reason| WorkflowError::Template {
        owner: job.label(),
        reason,
    };
    let template = Template::parse(text).map_err(template_error)?;
    template.render(|key| args.lookup(key)).map_err(template_error)
}
