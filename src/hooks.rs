//! Lifecycle hooks: optional executables run before and after a sync.
//!
//! Hooks live in `.gitsynq-hooks/<name>` under the project root. A missing
//! hook is a successful no-op. A present hook runs with inherited stdout and
//! stderr, and its exit status decides success.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

/// Hooks directory, relative to the project root.
pub const HOOKS_DIR: &str = ".gitsynq-hooks";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    PrePush,
    PostPush,
    PrePull,
    PostPull,
}

impl Hook {
    pub const ALL: [Hook; 4] = [Hook::PrePush, Hook::PostPush, Hook::PrePull, Hook::PostPull];

    pub fn name(self) -> &'static str {
        match self {
            Hook::PrePush => "pre-push",
            Hook::PostPush => "post-push",
            Hook::PrePull => "pre-pull",
            Hook::PostPull => "post-pull",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum HookError {
    #[error("failed to run hook {hook} ({path}): {source}")]
    Spawn {
        hook: Hook,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("hook {hook} exited with {}", .status.map(|s| format!("status {s}")).unwrap_or_else(|| "a signal".to_string()))]
    Failed { hook: Hook, status: Option<i32> },
}

/// Whether a hook is installed, for `gitsynq hooks`.
#[derive(Debug, Clone)]
pub struct HookStatus {
    pub hook: Hook,
    pub path: PathBuf,
    pub active: bool,
}

/// Finds and runs hooks for one project.
#[derive(Debug, Clone)]
pub struct HookRunner {
    project_root: PathBuf,
}

impl HookRunner {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    pub fn dir(&self) -> PathBuf {
        self.project_root.join(HOOKS_DIR)
    }

    pub fn path(&self, hook: Hook) -> PathBuf {
        self.dir().join(hook.name())
    }

    pub fn statuses(&self) -> Vec<HookStatus> {
        Hook::ALL
            .iter()
            .map(|&hook| {
                let path = self.path(hook);
                HookStatus {
                    hook,
                    active: path.is_file(),
                    path,
                }
            })
            .collect()
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.dir())
    }

    /// Run `hook` if installed. Returns whether anything ran.
    pub fn run(&self, hook: Hook) -> Result<bool, HookError> {
        let path = self.path(hook);
        if !path.is_file() {
            tracing::debug!(hook = %hook, "hook not installed");
            return Ok(false);
        }

        tracing::info!(hook = %hook, path = %path.display(), "running hook");
        let status = Command::new(&path)
            .current_dir(&self.project_root)
            .status()
            .map_err(|source| HookError::Spawn {
                hook,
                path: path.clone(),
                source,
            })?;

        if status.success() {
            Ok(true)
        } else {
            Err(HookError::Failed {
                hook,
                status: status.code(),
            })
        }
    }
}

/// Relative display path for a hook, e.g. `.gitsynq-hooks/pre-push`.
pub fn display_path(hook: Hook) -> String {
    Path::new(HOOKS_DIR).join(hook.name()).display().to_string()
}
