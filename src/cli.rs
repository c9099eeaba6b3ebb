//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Default workflow file used when none is specified.
pub const DEFAULT_WORKFLOW: &str = "workflow.yaml";

#[derive(Parser, Debug)]
#[command(name = "pipewright", version, about = "Rule-based workflow engine for file-driven pipelines")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the workflow YAML file
    #[arg(short, long, global = true, default_value = DEFAULT_WORKFLOW)]
    pub workflow: PathBuf,

    /// Directory for sample discovery and job execution
    #[arg(short = 'd', long, global = true)]
    pub working_dir: Option<PathBuf>,

    /// Override or add a workflow config entry
    #[arg(short, long = "config", global = true, value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub config: Vec<(String, String)>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the requested targets (default targets when none are given)
    Run {
        /// Output paths to build
        targets: Vec<String>,

        /// Show what would run without running it
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of jobs running at once
        #[arg(short, long, default_value_t = num_cpus::get())]
        jobs: usize,

        /// Write the aggregated report here (.json for JSON, otherwise HTML)
        #[arg(long)]
        report: Option<PathBuf>,

        /// Rerun the jobs producing the requested targets
        #[arg(short, long)]
        force: bool,

        /// Stop scheduling new jobs once this file exists
        #[arg(long)]
        stop_file: Option<PathBuf>,
    },

    /// Print the job graph in Graphviz dot format
    Dag {
        /// Output paths to build
        targets: Vec<String>,
    },
}

/// Parses `KEY=VALUE`.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("ref=genome/hg38.fa").unwrap(),
            ("ref".to_string(), "genome/hg38.fa".to_string())
        );
        assert_eq!(parse_key_value("opts=a=b").unwrap().1, "a=b");
        assert_eq!(parse_key_value("empty=").unwrap().1, "");
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_parse_run_arguments() {
        let cli = Cli::try_parse_from([
            "pipewright",
            "--workflow",
            "pipeline.yaml",
            "run",
            "out/a.txt",
            "out/b.txt",
            "--jobs",
            "3",
            "--dry-run",
            "-c",
            "ref=hg38.fa",
        ])
        .unwrap();

        assert_eq!(cli.workflow, PathBuf::from("pipeline.yaml"));
        assert_eq!(cli.config, vec![("ref".to_string(), "hg38.fa".to_string())]);
        match cli.command {
            Command::Run {
                targets, jobs, dry_run, force, ..
            } => {
                assert_eq!(targets, vec!["out/a.txt", "out/b.txt"]);
                assert_eq!(jobs, 3);
                assert!(dry_run);
                assert!(!force);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_default_workflow_path() {
        let cli = Cli::try_parse_from(["pipewright", "dag"]).unwrap();
        assert_eq!(cli.workflow, PathBuf::from(DEFAULT_WORKFLOW));
        assert!(matches!(cli.command, Command::Dag { ref targets } if targets.is_empty()));
    }
}
