//! Git bundle snapshots: creation, verification and reconciliation.
//!
//! A bundle is the unit of transfer. The local side produces one (full or
//! incremental), the transport ships it, and a shell script on the remote host
//! folds it into a working copy. History computation is delegated to the `git`
//! binary; everything here is process plumbing around it.
//!
//! - **git**: local bundle operations ([`Bundler`])
//! - **remote**: scripts executed on the remote host ([`ReconcilePlan`], [`ExportPlan`])

pub mod git;
pub mod remote;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

use crate::transport::TransportError;

pub use git::{Bundler, MergeOutcome};
pub use remote::{ExportPlan, ReconcileFailure, ReconcilePlan, export, reconcile};

/// Bundles smaller than this are treated as empty.
///
/// This is a structural heuristic: an empty bundle container (header plus an
/// empty pack) is roughly this size. A legitimate diff can only fall below it
/// in pathological cases. [`Bundler::create_incremental`] asks git for the
/// revision count first, so this threshold is a second line of detection.
pub const MIN_BUNDLE_SIZE: u64 = 100;

/// Branch name merged when the configured branch is absent from a bundle.
pub const LEGACY_BRANCH: &str = "master";

/// Errors from bundle operations.
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("failed to run git: {0}")]
    GitUnavailable(#[source] std::io::Error),

    #[error("failed to prepare bundle directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("git bundle create failed: {output}")]
    Creation { output: String },

    #[error("no tracking reference {reference} for branch {branch}; a full bundle is required")]
    NoTrackingReference { branch: String, reference: String },

    #[error("no new commits on {branch} to bundle")]
    Empty { branch: String },

    #[error("invalid or incompatible bundle: {output}")]
    Invalid { output: String },

    #[error("reconciliation failed ({failure}): {output}")]
    Reconciliation {
        failure: ReconcileFailure,
        output: String,
    },

    #[error("remote bundle export failed: {output}")]
    Export { output: String },

    #[error("git push {remote} {branch} failed: {output}")]
    UpstreamPush {
        remote: String,
        branch: String,
        output: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BundleError {
    /// Raw diagnostic text captured from git or the remote shell, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            BundleError::Creation { output }
            | BundleError::Invalid { output }
            | BundleError::Reconciliation { output, .. }
            | BundleError::Export { output }
            | BundleError::UpstreamPush { output, .. } => Some(output.as_str()),
            BundleError::Transport(TransportError::RemoteCommand { output, .. }) => {
                Some(output.as_str())
            }
            _ => None,
        }
    }
}

/// How much history a bundle carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleMode {
    /// Every ref and everything reachable from it.
    Full,
    /// Only commits on the branch missing from its tracking ref.
    Incremental,
}

impl fmt::Display for BundleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Incremental => write!(f, "incremental"),
        }
    }
}

/// A bundle file on local disk.
#[derive(Debug, Clone)]
pub struct BundleArtifact {
    pub path: PathBuf,
    pub project: String,
    pub branch: String,
    pub mode: BundleMode,
    pub created_at: DateTime<Local>,
    pub size: u64,
}

impl BundleArtifact {
    /// File name component of the bundle path.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Deterministic bundle file name: `<project>-<YYYYmmdd-HHMMSS>.bundle`.
pub fn bundle_file_name(project: &str, at: &DateTime<Local>) -> String {
    format!("{}-{}.bundle", project, at.format("%Y%m%d-%H%M%S"))
}

/// Full path for a new bundle under `dir`.
pub fn bundle_path(dir: &Path, project: &str, at: &DateTime<Local>) -> PathBuf {
    dir.join(bundle_file_name(project, at))
}
