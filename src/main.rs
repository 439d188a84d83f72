//! hostcare - host diagnostics and light remediation
//!
//! Collects CPU, memory, disk, process, cache and hardware readings, turns
//! them into a ranked list of issues, and applies a small set of fixes with
//! explicit confirmation before anything irreversible happens.

mod config;
mod core;
mod diagnostics;
mod error;
mod events;
mod integrations;
mod output;
mod remediation;
mod scheduler;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::core::envelope::{close_process, fix_issue, run_diagnostics};
use crate::core::DiagnosticsEngine;
use crate::diagnostics::ThresholdPolicy;
use crate::events::{EventKind, EventLog};
use crate::integrations::Capabilities;
use crate::remediation::{FixAction, Outcome};
use crate::scheduler::{EngineTasks, Scheduler};

#[derive(Parser)]
#[command(name = "hostcare")]
#[command(author = "Hostcare Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Host diagnostics and light remediation", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "HOSTCARE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run diagnostics and list issues, most severe first
    Diagnose {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply the fix for an issue id (e.g. high_cpu_usage) or action (e.g. cleanCache)
    Fix {
        issue_id: String,

        /// Close a suggested process without asking
        #[arg(short, long)]
        yes: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Terminate a process by PID
    Kill {
        pid: u32,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Clean configured cache directories
    CleanCache {
        /// Clean only this directory
        #[arg(short, long, value_name = "PATH")]
        path: Option<PathBuf>,
    },

    /// Show the size of configured cache directories
    ScanCache,

    /// List the processes using the most memory
    Processes {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show recorded events
    History {
        /// How many days back to look
        #[arg(short, long, default_value = "7")]
        days: i64,

        /// Only events of this kind (e.g. diagnostics_run)
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Summarize recorded events
    Report {
        #[arg(short, long, default_value = "7")]
        days: i64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run scheduled tasks until interrupted
    Schedule,

    /// Write the default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

fn setup_logging(verbosity: u8) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let log_dir = Config::log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "hostcare.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}

async fn confirm(prompt: &str) -> Result<bool> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{prompt} [y/N] ").as_bytes()).await?;
    stdout.flush().await?;

    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keep the guard alive for the duration of the program
    let _logging_guard = setup_logging(cli.verbose)?;

    if let Commands::Init { force } = cli.command {
        let path = cli
            .config
            .or_else(Config::default_path)
            .context("no configuration directory on this platform; pass --config")?;
        return config::init_config(&path, force);
    }

    let config = Config::load_or_default(cli.config.as_deref())?;
    let log = Arc::new(EventLog::new(config.event_log_path()));
    let engine = Arc::new(
        DiagnosticsEngine::new(
            Capabilities::host(config.command_timeout(), config.own_paths()),
            ThresholdPolicy::new(config.thresholds.clone()),
            config.remediation_settings(),
        )
        .with_events(log.clone())
        .with_scan_timeout(config.command_timeout()),
    );

    match cli.command {
        Commands::Diagnose { json } => {
            let envelope = run_diagnostics(&engine).await;
            if json {
                print_json(&envelope)?;
            } else {
                output::print_issues(&envelope);
            }
            if let Some(err) = envelope.error {
                anyhow::bail!(err);
            }
        }
        Commands::Fix {
            issue_id,
            yes,
            json,
        } => {
            let envelope = fix_issue(&engine, &issue_id).await;
            if json {
                print_json(&envelope)?;
            }
            let Some(result) = envelope.result else {
                anyhow::bail!(envelope.error.unwrap_or_default());
            };
            if !json {
                output::print_remediation(&result);
            }

            let mut changed = result.outcome == Outcome::Fixed;
            if let (Outcome::Suggestion, Some(info)) = (result.outcome, &result.process_info) {
                let prompt = format!("Close {} (PID: {})?", info.name, info.pid);
                if yes || confirm(&prompt).await? {
                    let closed = close_process(&engine, info.pid).await;
                    if json {
                        print_json(&closed)?;
                    } else {
                        output::print_close(&closed);
                    }
                    changed = closed.success;
                }
            }

            if changed {
                if let Some(kind) = FixAction::resolve(&issue_id).map(FixAction::issue) {
                    if engine.is_present(kind.id()).await {
                        println!("Issue {kind} is still present.");
                    } else {
                        println!("Issue {kind} resolved.");
                    }
                }
            }
        }
        Commands::Kill { pid, yes } => {
            if yes || confirm(&format!("Terminate process {pid}?")).await? {
                let closed = close_process(&engine, pid).await;
                output::print_close(&closed);
                if !closed.success {
                    std::process::exit(1);
                }
            }
        }
        Commands::CleanCache { path } => {
            let report = engine.clean_cache(path.as_deref()).await;
            println!("{}", report.message());
            output::print_clean_report(&report);
        }
        Commands::ScanCache => {
            let locations = engine.scan_cache().await;
            output::print_cache_locations(&locations);
        }
        Commands::Processes { limit } => {
            let mut processes = engine.processes().await;
            processes.sort_by(|a, b| b.memory_percent.total_cmp(&a.memory_percent));
            processes.truncate(limit);
            let rows: Vec<_> = processes.iter().collect();
            output::print_processes(&rows);
        }
        Commands::History { days, kind } => {
            let kind = kind.map(|k| k.parse::<EventKind>()).transpose()?;
            let until = Utc::now();
            let since = until - ChronoDuration::days(days);
            let events = log.history(kind, since, until).await?;
            output::print_history(&events);

            if kind.is_none() && !events.is_empty() {
                let summary = log.summary(since, until).await?;
                let by_severity: Vec<String> = summary
                    .events_by_severity
                    .iter()
                    .map(|(severity, count)| format!("{severity}: {count}"))
                    .collect();
                println!(
                    "\n{} events ({})",
                    summary.total_events,
                    by_severity.join(", ")
                );
            }
        }
        Commands::Report { days, json } => {
            let report = log.generate_report(days).await?;
            if json {
                print_json(&report)?;
            } else {
                output::print_report(&report);
            }
        }
        Commands::Schedule => {
            let scheduler = Scheduler::new(config.schedule.tasks.clone());
            output::print_schedule(scheduler.tasks());
            println!("\nScheduler running. Press Ctrl-C to stop.");

            let runner = EngineTasks::new(Arc::clone(&engine), Arc::clone(&log));
            let shutdown = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %err, "failed to listen for Ctrl-C");
                }
            };
            let state = scheduler.run(&runner, shutdown).await;
            for (task, at) in &state.last_runs {
                println!("{task} last ran at {}", at.format("%Y-%m-%d %H:%M"));
            }
            println!("Scheduler stopped.");
        }
        Commands::Init { .. } => {}
    }

    Ok(())
}
