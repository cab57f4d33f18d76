//! `gitsynq init`: write `.gitsynq.toml` for the current repository.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::Colorize;

use super::EXIT_USAGE;
use crate::bundle::Bundler;
use crate::config::{Config, ConfigError};
use crate::hooks::HookRunner;

pub struct InitArgs<'a> {
    pub host: &'a str,
    pub user: &'a str,
    pub port: u16,
    pub key: Option<&'a Path>,
    pub remote_path: &'a str,
    pub name: Option<&'a str>,
    pub branch: Option<&'a str>,
    pub force: bool,
}

pub fn run(cwd: &Path, config_path: &Path, args: InitArgs<'_>) -> Result<ExitCode> {
    let name = match args.name {
        Some(name) => name.to_string(),
        None => default_project_name(cwd),
    };

    let bundler = Bundler::new(cwd, "origin");
    let branch = match args.branch {
        Some(branch) => branch.to_string(),
        None => match bundler.current_branch() {
            Ok(Some(branch)) => branch,
            Ok(None) => "main".to_string(),
            Err(e) => {
                tracing::debug!(error = %e, "could not read current branch");
                "main".to_string()
            }
        },
    };
    if !bundler.is_repository().unwrap_or(false) {
        eprintln!(
            "{} {} is not a git repository yet; push will fail until it is",
            "!".yellow().bold(),
            cwd.display()
        );
    }

    let mut config = Config::new(args.host, args.user, name);
    config.server.port = args.port;
    config.server.ssh_key_path = args.key.map(Path::to_path_buf);
    config.server.remote_path = args.remote_path.to_string();
    config.project.branch = branch;

    match config.save(config_path, args.force) {
        Ok(()) => {}
        Err(e @ (ConfigError::AlreadyExists(_) | ConfigError::Invalid(_))) => {
            eprintln!("{} {}", "✗".red().bold(), e.to_string().red());
            return Ok(ExitCode::from(EXIT_USAGE));
        }
        Err(e) => return Err(e).context("failed to write config"),
    }

    HookRunner::new(cwd)
        .ensure_dir()
        .context("failed to create hooks directory")?;

    tracing::info!(path = %config_path.display(), "wrote config");
    eprintln!(
        "{} Wrote {} ({} -> {}@{}:{})",
        "✓".green().bold(),
        config_path.display(),
        config.project.name.bold(),
        config.server.user,
        config.server.host,
        config.server.remote_path
    );
    eprintln!("  {}", "Next: gitsynq push --full".dimmed());
    Ok(ExitCode::SUCCESS)
}

fn default_project_name(cwd: &Path) -> String {
    cwd.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "project".to_string())
}
