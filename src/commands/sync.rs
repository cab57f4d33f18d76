//! `gitsynq push` and `gitsynq pull`.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use colored::Colorize;
use indicatif::HumanBytes;
use tokio_util::sync::CancellationToken;

use super::EXIT_SYNC_FAILED;
use crate::config::Config;
use crate::sync::{Pipeline, PullOptions, PushOptions, SyncOutcome};
use crate::transport::SshDialer;
use crate::ui::{ConsoleReporter, Reporter, SilentReporter};

pub async fn push(
    config: &Config,
    project_root: &Path,
    full: bool,
    json: bool,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let dialer = SshDialer::new();
    let reporter = reporter(json);
    let pipeline = Pipeline::new(config, project_root, &dialer, reporter.as_ref(), cancel);
    let outcome = pipeline.push(PushOptions { full }).await;
    Ok(finish(&outcome, json))
}

pub async fn pull(
    config: &Config,
    project_root: &Path,
    push_upstream: bool,
    json: bool,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let dialer = SshDialer::new();
    let reporter = reporter(json);
    let pipeline = Pipeline::new(config, project_root, &dialer, reporter.as_ref(), cancel);
    let outcome = pipeline.pull(PullOptions { push_upstream }).await;
    Ok(finish(&outcome, json))
}

fn reporter(json: bool) -> Box<dyn Reporter> {
    if json {
        Box::new(SilentReporter)
    } else {
        Box::new(ConsoleReporter::new())
    }
}

/// Print the outcome and map it to an exit code.
fn finish(outcome: &SyncOutcome, json: bool) -> ExitCode {
    if json {
        let value = match outcome {
            Ok(success) => success.to_json(),
            Err(failure) => failure.to_json(),
        };
        println!("{value}");
    } else {
        match outcome {
            Ok(success) => {
                eprintln!(
                    "\n{} {} {} ({}, {}) -> {}",
                    "✓".green().bold(),
                    success.operation.to_string().bold(),
                    success.bundle.name,
                    success.bundle.mode,
                    HumanBytes(success.bundle.size),
                    success.destination
                );
            }
            Err(failure) => {
                eprintln!("\n{} {}", "✗".red().bold(), failure.to_string().red());
                if let Some(diagnostics) = &failure.diagnostics {
                    for line in diagnostics.lines() {
                        eprintln!("  {}", line.dimmed());
                    }
                }
            }
        }
    }

    match outcome {
        Ok(_) => ExitCode::SUCCESS,
        Err(failure) => {
            tracing::debug!(stage = %failure.stage, cancelled = failure.is_cancelled(), "sync failed");
            ExitCode::from(EXIT_SYNC_FAILED)
        }
    }
}
