//! Subcommand handlers.
//!
//! Each handler returns the process exit code; unexpected errors bubble up
//! as `anyhow::Error` and are reported by `main`.

pub mod info;
pub mod init;
pub mod sync;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Commands};
use crate::config::{Config, ConfigError};

/// Sync pipeline failed.
pub const EXIT_SYNC_FAILED: u8 = 1;
/// Bad invocation or unusable configuration.
pub const EXIT_USAGE: u8 = 2;

pub async fn dispatch(cli: &Cli, cancel: CancellationToken) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("failed to determine working directory")?;
    let config_path = Config::resolve_path(cli.config.as_deref(), &cwd);

    match &cli.command {
        Commands::Init {
            host,
            user,
            port,
            key,
            remote_path,
            name,
            branch,
            force,
        } => init::run(
            &cwd,
            &config_path,
            init::InitArgs {
                host,
                user,
                port: *port,
                key: key.as_deref(),
                remote_path,
                name: name.as_deref(),
                branch: branch.as_deref(),
                force: *force,
            },
        ),
        Commands::Push { full, json } => {
            let Some(config) = load_config(&config_path, *json) else {
                return Ok(ExitCode::from(EXIT_USAGE));
            };
            if !require_git(*json) {
                return Ok(ExitCode::from(EXIT_USAGE));
            }
            sync::push(&config, &cwd, *full, *json, cancel).await
        }
        Commands::Pull {
            push_upstream,
            json,
        } => {
            let Some(config) = load_config(&config_path, *json) else {
                return Ok(ExitCode::from(EXIT_USAGE));
            };
            if !require_git(*json) {
                return Ok(ExitCode::from(EXIT_USAGE));
            }
            sync::pull(&config, &cwd, *push_upstream, *json, cancel).await
        }
        Commands::Hooks => info::hooks(&cwd),
        Commands::Status => {
            let Some(config) = load_config(&config_path, false) else {
                return Ok(ExitCode::from(EXIT_USAGE));
            };
            info::status(&config, &config_path, &cwd)
        }
    }
}

/// Load config, reporting failure in the requested format.
fn load_config(path: &Path, json: bool) -> Option<Config> {
    match Config::load(path) {
        Ok(config) => Some(config),
        Err(e) => {
            report_config_error(&e, json);
            None
        }
    }
}

fn report_config_error(err: &ConfigError, json: bool) {
    tracing::debug!(error = ?err, "config error");
    report_usage_error("config", &err.to_string(), json);
}

/// Push and pull shell out to git; fail early with a clear message if it is missing.
fn require_git(json: bool) -> bool {
    match which::which("git") {
        Ok(path) => {
            tracing::debug!(git = %path.display(), "found git");
            true
        }
        Err(e) => {
            report_usage_error("preflight", &format!("git not found on PATH: {e}"), json);
            false
        }
    }
}

fn report_usage_error(stage: &str, message: &str, json: bool) {
    if json {
        let value = serde_json::json!({
            "ok": false,
            "stage": stage,
            "error": message,
        });
        println!("{value}");
    } else {
        eprintln!("{} {}", "✗".red().bold(), message.red());
    }
}
