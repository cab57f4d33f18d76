//! Shell scripts that run on the remote host.
//!
//! Reconciliation happens in a single remote shell invocation so that the
//! working copy is never left between steps by a dropped connection halfway
//! through a sequence of round trips. The script reports its outcome through
//! its exit status:
//!
//! | status | meaning                                     |
//! |--------|---------------------------------------------|
//! | 0      | working copy updated (or nothing to merge)  |
//! | 3      | bundle failed verification / clone / fetch  |
//! | 4      | every merge candidate conflicted            |
//! | 5      | filesystem or repository setup failed       |
//!
//! Concurrent reconciliation against the same remote path is not guarded.
//! Callers that may race must serialize externally (one writer per path).

use std::fmt;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::BundleError;
use super::git::merge_targets;
use crate::transport::{RemoteSession, TransportError};

pub const EXIT_INVALID_BUNDLE: i32 = 3;
pub const EXIT_MERGE_CONFLICT: i32 = 4;
pub const EXIT_SETUP_FAILED: i32 = 5;

/// Why a reconciliation script failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileFailure {
    InvalidBundle,
    MergeConflict,
    SetupFailed,
    Other(i32),
}

impl ReconcileFailure {
    pub fn from_status(status: i32) -> Self {
        match status {
            EXIT_INVALID_BUNDLE => Self::InvalidBundle,
            EXIT_MERGE_CONFLICT => Self::MergeConflict,
            EXIT_SETUP_FAILED => Self::SetupFailed,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ReconcileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBundle => write!(f, "invalid bundle"),
            Self::MergeConflict => write!(f, "merge conflict"),
            Self::SetupFailed => write!(f, "repository setup failed"),
            Self::Other(status) => write!(f, "exit status {status}"),
        }
    }
}

/// Inputs for reconciling one uploaded bundle into a remote working copy.
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub bundle_path: String,
    pub repo_path: String,
    pub branch: String,
    /// Temporary remote name, unique per bundle.
    pub remote_name: String,
}

impl ReconcilePlan {
    pub fn new(
        bundle_path: impl Into<String>,
        repo_path: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        let bundle_path = bundle_path.into();
        let remote_name = temp_remote_name(&bundle_path);
        Self {
            bundle_path,
            repo_path: repo_path.into(),
            branch: branch.into(),
            remote_name,
        }
    }

    /// Render the reconciliation script.
    pub fn script(&self) -> String {
        let targets: Vec<String> = merge_targets(&self.branch)
            .iter()
            .map(|t| shell_words::quote(t).into_owned())
            .collect();

        format!(
            r#"set -u
BUNDLE_PATH={bundle}
REPO_PATH={repo}
BRANCH={branch}
TMP_REMOTE={remote}

if [ ! -d "$REPO_PATH/.git" ]; then
    if [ -d "$REPO_PATH" ] && [ -n "$(ls -A "$REPO_PATH" 2>/dev/null)" ]; then
        echo "initializing repository in existing directory $REPO_PATH"
        git init -q "$REPO_PATH" || exit {setup}
        git -C "$REPO_PATH" symbolic-ref HEAD "refs/heads/$BRANCH" || exit {setup}
    else
        echo "cloning $REPO_PATH from bundle"
        mkdir -p "$(dirname "$REPO_PATH")" || exit {setup}
        if ! git clone -q "$BUNDLE_PATH" "$REPO_PATH"; then
            echo "clone from bundle failed (an incremental bundle cannot seed a new repository; push with --full)"
            exit {invalid}
        fi
        cd "$REPO_PATH" || exit {setup}
        git checkout -q "$BRANCH" 2>/dev/null || git checkout -q -b "$BRANCH" || exit {setup}
        rm -f "$BUNDLE_PATH"
        exit 0
    fi
fi

cd "$REPO_PATH" || exit {setup}
echo "updating existing repository $REPO_PATH"
if ! verify_out=$(git bundle verify "$BUNDLE_PATH" 2>&1); then
    echo "$verify_out"
    echo "bundle verification failed"
    exit {invalid}
fi

git remote remove "$TMP_REMOTE" >/dev/null 2>&1
git remote add "$TMP_REMOTE" "$BUNDLE_PATH" || exit {setup}

status=0
if git fetch -q "$TMP_REMOTE"; then
    attempted=0
    merged=0
    for target in {targets}; do
        git rev-parse --verify -q "refs/remotes/$TMP_REMOTE/$target^{{commit}}" >/dev/null || continue
        attempted=1
        if git merge --no-edit "$TMP_REMOTE/$target"; then
            merged=1
            break
        fi
        git merge --abort >/dev/null 2>&1
    done
    if [ "$attempted" -eq 0 ]; then
        echo "bundle carries no merge candidate; nothing to merge"
    elif [ "$merged" -eq 0 ]; then
        echo "merge failed for every candidate"
        status={conflict}
    fi
else
    echo "fetch from bundle failed"
    status={invalid}
fi

git remote remove "$TMP_REMOTE" >/dev/null 2>&1 || echo "warning: failed to remove temporary remote $TMP_REMOTE"
if [ "$status" -eq 0 ]; then
    rm -f "$BUNDLE_PATH"
fi
exit "$status"
"#,
            bundle = shell_words::quote(&self.bundle_path),
            repo = shell_words::quote(&self.repo_path),
            branch = shell_words::quote(&self.branch),
            remote = shell_words::quote(&self.remote_name),
            targets = targets.join(" "),
            setup = EXIT_SETUP_FAILED,
            invalid = EXIT_INVALID_BUNDLE,
            conflict = EXIT_MERGE_CONFLICT,
        )
    }
}

/// Inputs for writing a full bundle of a remote working copy (used by pull).
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub repo_path: String,
    pub bundle_path: String,
}

impl ExportPlan {
    pub fn script(&self) -> String {
        format!(
            r#"set -u
REPO_PATH={repo}
BUNDLE_PATH={bundle}

if [ ! -d "$REPO_PATH/.git" ]; then
    echo "no repository at $REPO_PATH"
    exit {invalid}
fi
mkdir -p "$(dirname "$BUNDLE_PATH")" || exit {setup}
cd "$REPO_PATH" || exit {setup}
git bundle create "$BUNDLE_PATH" --all || exit {invalid}
"#,
            repo = shell_words::quote(&self.repo_path),
            bundle = shell_words::quote(&self.bundle_path),
            invalid = EXIT_INVALID_BUNDLE,
            setup = EXIT_SETUP_FAILED,
        )
    }
}

/// Reconcile an uploaded bundle into the remote working copy.
///
/// Returns the script's combined output. A bundle without any merge candidate
/// succeeds; so does re-applying an already merged bundle.
pub async fn reconcile<S: RemoteSession>(
    session: &mut S,
    cancel: &CancellationToken,
    plan: &ReconcilePlan,
) -> Result<String, BundleError> {
    tracing::debug!(
        bundle = %plan.bundle_path,
        repo = %plan.repo_path,
        branch = %plan.branch,
        "reconciling remote working copy"
    );
    match session.run(cancel, &plan.script()).await {
        Ok(output) => Ok(output),
        Err(TransportError::RemoteCommand { status, output }) => {
            Err(BundleError::Reconciliation {
                failure: ReconcileFailure::from_status(status),
                output,
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Write a full bundle of the remote working copy at `plan.bundle_path`.
pub async fn export<S: RemoteSession>(
    session: &mut S,
    cancel: &CancellationToken,
    plan: &ExportPlan,
) -> Result<String, BundleError> {
    match session.run(cancel, &plan.script()).await {
        Ok(output) => Ok(output),
        Err(TransportError::RemoteCommand { output, .. }) => Err(BundleError::Export { output }),
        Err(e) => Err(e.into()),
    }
}

/// Remote name derived from the bundle file name, e.g. `gitsynq-svc-20240309-070501`.
fn temp_remote_name(bundle_path: &str) -> String {
    let file = bundle_path.rsplit('/').next().unwrap_or(bundle_path);
    let stem = file.strip_suffix(".bundle").unwrap_or(file);
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "gitsynq-bundle".to_string()
    } else {
        format!("gitsynq-{cleaned}")
    }
}
