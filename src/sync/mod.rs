//! Sync pipelines: push a bundle to the remote host, or pull one back.
//!
//! # Push
//!
//! ```text
//! Idle → PreHook → Snapshotting ─(incremental failed)→ Snapshotting(full)
//!      → Connected → Uploading → Reconciling → PostHook → Done
//! ```
//!
//! Any stage may end the run in `Failed(stage)`. Only the snapshot stage
//! retries (once, incremental → full). A post hook failure is reported but
//! does not fail an otherwise successful sync. The session acquired at
//! `Connected` is closed exactly once on every path out of the pipeline.
//!
//! Cancellation is checked before every stage; a running transfer is allowed
//! to finish, but no later stage starts.
//!
//! # Example
//!
//! ```rust,ignore
//! use gitsynq::sync::{Pipeline, PushOptions};
//! use gitsynq::transport::SshDialer;
//!
//! let dialer = SshDialer::new();
//! let pipeline = Pipeline::new(&config, &project_root, &dialer, &reporter, cancel);
//! let success = pipeline.push(PushOptions::default()).await?;
//! println!("pushed {}", success.bundle.name);
//! ```

pub mod pull;
pub mod push;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::bundle::{BundleArtifact, BundleError, BundleMode, Bundler};
use crate::config::Config;
use crate::hooks::{Hook, HookError, HookRunner};
use crate::transport::{Dialer, RemoteSession, TransportError};
use crate::ui::Reporter;

pub use pull::PullOptions;
pub use push::PushOptions;

/// Pipeline stage names used in failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Hook,
    Snapshot,
    Connect,
    Upload,
    Reconcile,
    Download,
    Merge,
    UpstreamPush,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hook => "hook",
            Self::Snapshot => "snapshot",
            Self::Connect => "connect",
            Self::Upload => "upload",
            Self::Reconcile => "reconcile",
            Self::Download => "download",
            Self::Merge => "merge",
            Self::UpstreamPush => "upstream push",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Push,
    Pull,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// Cause of a failed stage.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("cancelled")]
    Cancelled,
}

/// A run that ended in `Failed(stage)`.
#[derive(Error, Debug)]
#[error("{operation} failed at {stage} stage: {error}")]
pub struct SyncFailure {
    pub operation: Operation,
    pub stage: Stage,
    #[source]
    pub error: StageError,
    /// Raw output from git or the remote shell, if the failing step produced any.
    pub diagnostics: Option<String>,
}

impl SyncFailure {
    fn new(operation: Operation, stage: Stage, error: impl Into<StageError>) -> Self {
        let error = error.into();
        let diagnostics = match &error {
            StageError::Bundle(e) => e.diagnostics().map(str::to_string),
            StageError::Transport(TransportError::RemoteCommand { output, .. }) => {
                Some(output.clone())
            }
            _ => None,
        }
        .filter(|d| !d.trim().is_empty());
        Self {
            operation,
            stage,
            error,
            diagnostics,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.error,
            StageError::Cancelled | StageError::Transport(TransportError::Cancelled)
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "ok": false,
            "operation": self.operation,
            "stage": self.stage,
            "error": self.error.to_string(),
            "diagnostics": self.diagnostics,
        })
    }
}

/// Bundle identity reported on success.
#[derive(Debug, Clone, Serialize)]
pub struct BundleSummary {
    pub name: String,
    pub path: PathBuf,
    pub mode: BundleMode,
    pub size: u64,
    pub created_at: String,
}

impl From<&BundleArtifact> for BundleSummary {
    fn from(artifact: &BundleArtifact) -> Self {
        Self {
            name: artifact.file_name(),
            path: artifact.path.clone(),
            mode: artifact.mode,
            size: artifact.size,
            created_at: artifact.created_at.to_rfc3339(),
        }
    }
}

/// A run that reached `Done`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSuccess {
    pub operation: Operation,
    pub bundle: BundleSummary,
    /// `user@host:/path/to/working/copy`
    pub destination: String,
    /// Output of the remote script.
    pub remote_output: String,
    /// Set when the post hook failed after the sync itself succeeded.
    pub post_hook_error: Option<String>,
}

impl SyncSuccess {
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert("ok".into(), serde_json::Value::Bool(true));
        }
        value
    }
}

pub type SyncOutcome = Result<SyncSuccess, SyncFailure>;

/// Everything a pipeline run needs, borrowed from the caller.
pub struct Pipeline<'a, D: Dialer> {
    config: &'a Config,
    project_root: PathBuf,
    dialer: &'a D,
    reporter: &'a dyn Reporter,
    hooks: HookRunner,
    cancel: CancellationToken,
}

impl<'a, D: Dialer> Pipeline<'a, D> {
    pub fn new(
        config: &'a Config,
        project_root: &Path,
        dialer: &'a D,
        reporter: &'a dyn Reporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            project_root: project_root.to_path_buf(),
            dialer,
            reporter,
            hooks: HookRunner::new(project_root),
            cancel,
        }
    }

    fn bundler(&self) -> Bundler {
        Bundler::new(&self.project_root, &self.config.project.upstream)
    }

    /// Local bundle directory, resolved against the project root.
    fn bundle_dir(&self) -> PathBuf {
        let dir = &self.config.bundle.directory;
        if dir.is_absolute() {
            dir.clone()
        } else {
            self.project_root.join(dir)
        }
    }

    /// Fail with `stage` if cancellation was requested before it starts.
    fn checkpoint(&self, operation: Operation, stage: Stage) -> Result<(), SyncFailure> {
        if self.cancel.is_cancelled() {
            tracing::info!(stage = %stage, "cancelled before stage");
            return Err(SyncFailure::new(operation, stage, StageError::Cancelled));
        }
        Ok(())
    }

    fn run_pre_hook(&self, operation: Operation, hook: Hook) -> Result<(), SyncFailure> {
        self.checkpoint(operation, Stage::Hook)?;
        if self.hooks.run(hook).map_err(|e| SyncFailure::new(operation, Stage::Hook, e))? {
            self.reporter.success(&format!("Hook {hook} passed"));
        }
        Ok(())
    }

    /// Post hooks never fail the run; the error is reported and returned for the summary.
    fn run_post_hook(&self, hook: Hook) -> Option<String> {
        if self.cancel.is_cancelled() {
            tracing::info!(hook = %hook, "cancelled before post hook, skipping it");
            return Some("cancelled before post hook".to_string());
        }
        match self.hooks.run(hook) {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(hook = %hook, error = %e, "post hook failed");
                self.reporter.warn(&format!("{e} (sync itself succeeded)"));
                Some(e.to_string())
            }
        }
    }

    fn connect(&self, operation: Operation) -> Result<D::Session, SyncFailure> {
        self.checkpoint(operation, Stage::Connect)?;
        let endpoint = self.config.endpoint();
        self.reporter
            .step(&format!("Connecting to {}...", endpoint.display_target()));
        let session = self
            .dialer
            .dial(&endpoint)
            .map_err(|e| SyncFailure::new(operation, Stage::Connect, e))?;
        self.reporter
            .success(&format!("Connected to {}", endpoint.display_target()));
        Ok(session)
    }

    /// Close the session exactly once, keeping the primary result.
    fn release<T>(
        &self,
        session: D::Session,
        result: Result<T, SyncFailure>,
    ) -> Result<T, SyncFailure> {
        if let Err(e) = session.close() {
            tracing::warn!(error = %e, "closing session failed");
            if result.is_ok() {
                self.reporter.warn(&e.to_string());
            }
        }
        result
    }

    /// Resolve the remote root (expanding `~`) on an open session.
    fn remote_root(
        &self,
        operation: Operation,
        session: &mut D::Session,
    ) -> Result<String, SyncFailure> {
        session
            .expand_remote_path(&self.config.server.remote_path)
            .map_err(|e| SyncFailure::new(operation, Stage::Connect, e))
    }

    fn destination(&self, repo_path: &str) -> String {
        format!(
            "{}@{}:{}",
            self.config.server.user, self.config.server.host, repo_path
        )
    }
}

/// Run a blocking transfer without stalling the async runtime.
///
/// Requires the multi-threaded runtime.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    tokio::task::block_in_place(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Hook.to_string(), "hook");
        assert_eq!(Stage::UpstreamPush.to_string(), "upstream push");
    }

    #[test]
    fn test_failure_collects_diagnostics() {
        let failure = SyncFailure::new(
            Operation::Push,
            Stage::Reconcile,
            TransportError::RemoteCommand {
                status: 1,
                output: "fatal: not a git repository".into(),
            },
        );
        assert_eq!(
            failure.diagnostics.as_deref(),
            Some("fatal: not a git repository")
        );
        assert_eq!(
            failure.to_string(),
            "push failed at reconcile stage: remote command exited with status 1"
        );
        let json = failure.to_json();
        assert_eq!(json["ok"], false);
        assert_eq!(json["stage"], "reconcile");
    }

    #[test]
    fn test_failure_drops_blank_diagnostics() {
        let failure = SyncFailure::new(
            Operation::Pull,
            Stage::Merge,
            BundleError::Invalid {
                output: "  \n".into(),
            },
        );
        assert!(failure.diagnostics.is_none());
    }

    #[test]
    fn test_cancelled_failure() {
        let failure = SyncFailure::new(Operation::Push, Stage::Upload, StageError::Cancelled);
        assert!(failure.is_cancelled());
        let failure = SyncFailure::new(Operation::Push, Stage::Reconcile, TransportError::Cancelled);
        assert!(failure.is_cancelled());
    }
}
