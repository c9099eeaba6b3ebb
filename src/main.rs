//! Pipewright CLI Entry Point
//!
//! # Usage
//!
//! ```bash
//! # Build the default targets of ./workflow.yaml
//! pipewright run
//!
//! # Preview what would run for specific targets
//! pipewright --workflow pipeline.yaml run 020.bwa/s1.bam --dry-run
//!
//! # Run in a data directory with 8 jobs and an HTML report
//! pipewright --working-dir /data/analysis run --jobs 8 --report report.html
//!
//! # Print the job graph
//! pipewright dag | dot -Tsvg > dag.svg
//! ```

mod cli;

use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use log::{error, info};

use cli::{Cli, Command};
use pipewright::execution::{Engine, RecordStatus, RunSummary};
use pipewright::workflow::load_workflow;
use pipewright::{APP_NAME, VERSION};

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    eprintln!();
    eprintln!("{} v{}", APP_NAME.bold(), VERSION);
    eprintln!();
}

/// Prints the per-status counts and failed jobs.
fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "=".repeat(60));
    if summary.dry_run {
        println!("{}", "Dry run complete".bold());
    } else if summary.is_success() {
        println!("{}", "Workflow completed successfully".green().bold());
    } else if summary.cancelled {
        println!("{}", "Workflow cancelled".yellow().bold());
    } else {
        println!("{}", "Workflow failed".red().bold());
    }
    println!("{}", "=".repeat(60));

    println!("  Executed:    {}", summary.executed);
    println!("  Succeeded:   {}", summary.count(RecordStatus::Succeeded).to_string().green());
    println!("  Up to date:  {}", summary.count(RecordStatus::UpToDate));
    println!("  Failed:      {}", summary.count(RecordStatus::Failed).to_string().red());
    println!(
        "  Skipped:     {}",
        summary.count(RecordStatus::SkippedFailedDependency).to_string().yellow()
    );
    println!("  Cancelled:   {}", summary.count(RecordStatus::Cancelled));
    println!("  Time:        {:.2}s", summary.elapsed.as_secs_f64());

    for record in summary.failed() {
        println!(
            "  {} {}: {}",
            "x".red(),
            record.label,
            record.error.as_deref().unwrap_or("unknown error")
        );
    }
}

/// Main application entry point. Returns whether the run fully succeeded.
fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let mut workflow = load_workflow(&cli.workflow).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        format!("Could not load workflow from '{}': {}", cli.workflow.display(), e)
    })?;

    for (key, value) in cli.config {
        info!("Config override: {}={}", key, value);
        workflow.set_config(key, value);
    }

    info!("Workflow loaded: {} rules", workflow.len());

    let mut engine = Engine::new(workflow);
    if let Some(dir) = cli.working_dir {
        if !dir.is_dir() {
            return Err(format!("Working directory does not exist: {}", dir.display()).into());
        }
        engine.set_working_dir(dir);
    }
    info!("Working directory: {}", engine.working_dir().display());

    match cli.command {
        Command::Run {
            targets,
            dry_run,
            jobs,
            report,
            force,
            stop_file,
        } => {
            engine.set_max_parallel(jobs);
            engine.set_dry_run(dry_run);
            engine.set_force(force);
            if let Some(path) = stop_file {
                info!("Stop file: {}", path.display());
                engine.set_stop_file(path);
            }
            if let Some(path) = report {
                engine.set_report_path(path);
            }
            if dry_run {
                info!("Mode: DRY RUN (commands will not execute)");
            }

            let summary = engine.run(&targets)?;
            if !summary.dry_run && summary.executed > 0 {
                println!("{}", summary.timeline.gantt_chart());
            }
            print_summary(&summary);
            Ok(summary.is_success())
        }
        Command::Dag { targets } => {
            let plan = engine.plan(&targets)?;
            print!("{}", plan.dag.to_dot());
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    print_banner();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
