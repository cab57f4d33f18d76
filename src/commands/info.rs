//! Read-only commands: `gitsynq hooks` and `gitsynq status`.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::Colorize;

use crate::bundle::Bundler;
use crate::config::Config;
use crate::hooks::{self, HookRunner};

const RECENT_COMMITS: usize = 5;

pub fn hooks(project_root: &Path) -> Result<ExitCode> {
    let runner = HookRunner::new(project_root);
    runner
        .ensure_dir()
        .with_context(|| format!("failed to create {}", runner.dir().display()))?;

    println!("{:<12} {:<10} {}", "HOOK".bold(), "STATUS".bold(), "PATH".bold());
    for status in runner.statuses() {
        let label = if status.active {
            format!("{:<10}", "active").green()
        } else {
            format!("{:<10}", "not set").dimmed()
        };
        println!(
            "{:<12} {} {}",
            status.hook.name(),
            label,
            hooks::display_path(status.hook)
        );
    }
    println!(
        "\n{}",
        format!(
            "Add an executable script under {}/ to enable a hook.",
            hooks::HOOKS_DIR
        )
        .dimmed()
    );
    Ok(ExitCode::SUCCESS)
}

pub fn status(config: &Config, config_path: &Path, project_root: &Path) -> Result<ExitCode> {
    let bundler = Bundler::new(project_root, &config.project.upstream);

    println!("{}", "Config".bold());
    println!("  file:     {}", config_path.display());
    println!(
        "  server:   {}@{}:{}",
        config.server.user, config.server.host, config.server.port
    );
    println!("  remote:   {}/{}", config.server.remote_path, config.project.name);
    println!(
        "  branch:   {} (tracking {}/{})",
        config.project.branch, config.project.upstream, config.project.branch
    );
    println!("  bundles:  {}", config.bundle.directory.display());

    let active = HookRunner::new(project_root)
        .statuses()
        .into_iter()
        .filter(|s| s.active)
        .map(|s| s.hook.name())
        .collect::<Vec<_>>();
    println!(
        "  hooks:    {}",
        if active.is_empty() {
            "none".to_string()
        } else {
            active.join(", ")
        }
    );

    println!("\n{}", "Recent commits".bold());
    let commits = bundler
        .recent_commits(RECENT_COMMITS)
        .context("failed to read commit log")?;
    if commits.is_empty() {
        println!("  {}", "(no commits)".dimmed());
    }
    for line in commits {
        println!("  {line}");
    }
    Ok(ExitCode::SUCCESS)
}
