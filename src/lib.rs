//! gitsynq: move git history to hosts without upstream access.
//!
//! Local commits are packed into a git bundle, shipped over SSH/SFTP, and
//! folded into a working copy on the remote host by a single shell script.
//! `pull` runs the same path in reverse.

pub mod bundle;
pub mod cli;
pub mod commands;
pub mod config;
pub mod hooks;
pub mod sync;
pub mod transport;
pub mod ui;

use std::process::ExitCode;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use cli::{Cli, ColorWhen};

/// Library entrypoint: apply global flags and dispatch the subcommand.
pub async fn run(cli: Cli, cancel: CancellationToken) -> Result<ExitCode> {
    match cli.color {
        ColorWhen::Always => colored::control::set_override(true),
        ColorWhen::Never => colored::control::set_override(false),
        ColorWhen::Auto => {}
    }
    commands::dispatch(&cli, cancel).await
}
