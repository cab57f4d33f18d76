//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorWhen {
    #[default]
    Auto,
    Always,
    Never,
}

/// gitsynq - sync git repositories to air-gapped hosts over SSH
#[derive(Parser, Debug)]
#[command(name = "gitsynq")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Run 'gitsynq init' in a repository to get started.")]
pub struct Cli {
    /// Path to the config file (default: ./.gitsynq.toml)
    #[arg(long, global = true, env = "GITSYNQ_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output mode
    #[arg(long, global = true, value_enum, default_value_t = ColorWhen::Auto)]
    pub color: ColorWhen,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a config file for this repository
    Init {
        /// Remote host name or address
        #[arg(long)]
        host: String,

        /// Remote user
        #[arg(short, long)]
        user: String,

        /// SSH port
        #[arg(short, long, default_value_t = 22)]
        port: u16,

        /// Private key tried before the default keys
        #[arg(short = 'k', long, value_name = "PATH")]
        key: Option<PathBuf>,

        /// Root directory on the remote host
        #[arg(long, default_value = "~/gitsynq")]
        remote_path: String,

        /// Project name (default: current directory name)
        #[arg(short, long)]
        name: Option<String>,

        /// Branch to sync (default: current branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Bundle local commits and apply them on the remote host
    Push {
        /// Bundle the whole repository instead of new commits only
        #[arg(short, long)]
        full: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Bundle the remote working copy and merge it locally
    Pull {
        /// Push the merged branch to the upstream remote afterwards
        #[arg(long)]
        push_upstream: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show lifecycle hook status
    Hooks,

    /// Show config and recent commits
    Status,
}

impl Cli {
    /// Log filter directive implied by `-v` / `-q`, if any.
    pub fn log_directive(&self) -> Option<&'static str> {
        if self.quiet {
            return Some("warn");
        }
        match self.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        }
    }
}
