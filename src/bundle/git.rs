//! Local bundle operations backed by the `git` binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Local;

use super::{BundleArtifact, BundleError, BundleMode, LEGACY_BRANCH, MIN_BUNDLE_SIZE};

/// Name of the temporary remote a bundle is registered under while merging.
const TEMP_REMOTE: &str = "gitsynq-bundle";

/// Captured result of one git invocation.
#[derive(Debug)]
struct GitOutput {
    success: bool,
    /// stdout followed by stderr, verbatim.
    combined: String,
    stdout: String,
}

/// Result of merging a bundle into a local repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// `target` was merged into the current branch.
    Merged { target: String },
    /// The bundle carried neither the branch nor the legacy branch.
    NothingToMerge,
}

/// Runs bundle operations against one local repository.
#[derive(Debug, Clone)]
pub struct Bundler {
    repo_dir: PathBuf,
    /// Remote whose `<upstream>/<branch>` is the tracking ref.
    upstream: String,
}

impl Bundler {
    pub fn new(repo_dir: impl Into<PathBuf>, upstream: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            upstream: upstream.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn git(&self, args: &[&str]) -> Result<GitOutput, BundleError> {
        tracing::debug!(repo = %self.repo_dir.display(), args = ?args, "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(BundleError::GitUnavailable)?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut combined = stdout.clone();
        combined.push_str(&stderr);
        Ok(GitOutput {
            success: output.status.success(),
            combined,
            stdout,
        })
    }

    /// Name of the remote-tracking ref for `branch`, e.g. `refs/remotes/origin/main`.
    pub fn tracking_ref(&self, branch: &str) -> String {
        format!("refs/remotes/{}/{}", self.upstream, branch)
    }

    fn ensure_parent(dest: &Path) -> Result<(), BundleError> {
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| BundleError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    fn artifact(
        dest: &Path,
        project: &str,
        branch: &str,
        mode: BundleMode,
    ) -> Result<BundleArtifact, BundleError> {
        let size = std::fs::metadata(dest)
            .map_err(|source| BundleError::Directory {
                path: dest.to_path_buf(),
                source,
            })?
            .len();
        Ok(BundleArtifact {
            path: dest.to_path_buf(),
            project: project.to_string(),
            branch: branch.to_string(),
            mode,
            created_at: Local::now(),
            size,
        })
    }

    /// Bundle every ref and all reachable history.
    ///
    /// On failure a partially written file may remain at `dest`; callers must
    /// treat it as invalid.
    pub fn create_full(
        &self,
        dest: &Path,
        project: &str,
        branch: &str,
    ) -> Result<BundleArtifact, BundleError> {
        Self::ensure_parent(dest)?;
        let dest_str = dest.to_string_lossy();
        let out = self.git(&["bundle", "create", &dest_str, "--all"])?;
        if !out.success {
            return Err(BundleError::Creation {
                output: out.combined,
            });
        }

        let artifact = Self::artifact(dest, project, branch, BundleMode::Full)?;
        tracing::info!(
            path = %dest.display(),
            bytes = artifact.size,
            "created full bundle"
        );
        Ok(artifact)
    }

    /// Bundle the commits on `branch` that its tracking ref does not have.
    pub fn create_incremental(
        &self,
        dest: &Path,
        project: &str,
        branch: &str,
    ) -> Result<BundleArtifact, BundleError> {
        let tracking = self.tracking_ref(branch);
        if !self.ref_exists(&tracking)? {
            return Err(BundleError::NoTrackingReference {
                branch: branch.to_string(),
                reference: format!("{}/{}", self.upstream, branch),
            });
        }

        let range = format!("{tracking}..refs/heads/{branch}");
        if self.count_revisions(&range)? == 0 {
            return Err(BundleError::Empty {
                branch: branch.to_string(),
            });
        }

        Self::ensure_parent(dest)?;
        let dest_str = dest.to_string_lossy();
        let out = self.git(&["bundle", "create", &dest_str, &range])?;
        if !out.success {
            return Err(BundleError::Creation {
                output: out.combined,
            });
        }

        let artifact = Self::artifact(dest, project, branch, BundleMode::Incremental)?;
        if artifact.size < MIN_BUNDLE_SIZE {
            if let Err(e) = std::fs::remove_file(dest) {
                tracing::warn!(path = %dest.display(), error = %e, "failed to remove empty bundle");
            }
            return Err(BundleError::Empty {
                branch: branch.to_string(),
            });
        }

        tracing::info!(
            path = %dest.display(),
            range = %range,
            bytes = artifact.size,
            "created incremental bundle"
        );
        Ok(artifact)
    }

    /// Ask git whether the bundle is well formed and applicable to this repository.
    pub fn verify(&self, bundle: &Path) -> Result<(), BundleError> {
        let bundle_str = bundle.to_string_lossy();
        let out = self.git(&["bundle", "verify", &bundle_str])?;
        if !out.success {
            return Err(BundleError::Invalid {
                output: out.combined,
            });
        }
        Ok(())
    }

    /// Merge a bundle into the current branch of this repository.
    ///
    /// Tries `branch` first and then [`LEGACY_BRANCH`]. A bundle carrying
    /// neither is not an error.
    pub fn merge(&self, bundle: &Path, branch: &str) -> Result<MergeOutcome, BundleError> {
        self.verify(bundle)?;

        let remote = TempRemote::register(self, bundle)?;
        let fetch = self.git(&["fetch", "--quiet", remote.name()])?;
        if !fetch.success {
            return Err(BundleError::Invalid {
                output: fetch.combined,
            });
        }

        let mut failures = String::new();
        for target in merge_targets(branch) {
            let remote_ref = format!("refs/remotes/{}/{}", remote.name(), target);
            if !self.ref_exists(&remote_ref)? {
                continue;
            }
            let out = self.git(&["merge", "--no-edit", &remote_ref])?;
            if out.success {
                tracing::info!(target = %target, "merged bundle");
                return Ok(MergeOutcome::Merged { target });
            }
            failures.push_str(&out.combined);
            let abort = self.git(&["merge", "--abort"])?;
            if !abort.success {
                tracing::debug!(output = %abort.combined.trim(), "merge --abort had nothing to abort");
            }
        }

        if failures.is_empty() {
            tracing::info!(branch = %branch, "bundle has nothing to merge");
            Ok(MergeOutcome::NothingToMerge)
        } else {
            Err(BundleError::Reconciliation {
                failure: super::ReconcileFailure::MergeConflict,
                output: failures,
            })
        }
    }

    /// Push `branch` to the upstream remote.
    pub fn push_upstream(&self, branch: &str) -> Result<(), BundleError> {
        let out = self.git(&["push", &self.upstream, branch])?;
        if !out.success {
            return Err(BundleError::UpstreamPush {
                remote: self.upstream.clone(),
                branch: branch.to_string(),
                output: out.combined,
            });
        }
        tracing::info!(remote = %self.upstream, branch = %branch, "pushed upstream");
        Ok(())
    }

    /// One line per commit for the last `n` commits, newest first.
    pub fn recent_commits(&self, n: usize) -> Result<Vec<String>, BundleError> {
        let limit = format!("-{n}");
        let out = self.git(&["log", &limit, "--oneline", "--decorate"])?;
        if !out.success {
            // Unborn branch: no commits yet.
            return Ok(Vec::new());
        }
        Ok(out.stdout.lines().map(str::to_string).collect())
    }

    /// Short name of the checked-out branch, `None` on a detached HEAD.
    pub fn current_branch(&self) -> Result<Option<String>, BundleError> {
        let out = self.git(&["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if !out.success {
            return Ok(None);
        }
        let name = out.stdout.trim();
        Ok((!name.is_empty()).then(|| name.to_string()))
    }

    pub fn is_repository(&self) -> Result<bool, BundleError> {
        Ok(self.git(&["rev-parse", "--git-dir"])?.success)
    }

    fn ref_exists(&self, reference: &str) -> Result<bool, BundleError> {
        let spec = format!("{reference}^{{commit}}");
        Ok(self.git(&["rev-parse", "--verify", "--quiet", &spec])?.success)
    }

    fn count_revisions(&self, range: &str) -> Result<u64, BundleError> {
        let out = self.git(&["rev-list", "--count", range])?;
        if !out.success {
            return Err(BundleError::Creation {
                output: out.combined,
            });
        }
        parse_count(&out)
    }
}

/// A count git could not produce is a creation failure, never an empty range.
fn parse_count(out: &GitOutput) -> Result<u64, BundleError> {
    out.stdout
        .trim()
        .parse()
        .map_err(|_| BundleError::Creation {
            output: out.combined.clone(),
        })
}

/// Candidate refs to merge from a bundle, in order, without duplicates.
pub(crate) fn merge_targets(branch: &str) -> Vec<String> {
    let mut targets = vec![branch.to_string()];
    if branch != LEGACY_BRANCH {
        targets.push(LEGACY_BRANCH.to_string());
    }
    targets
}

/// A bundle registered as a git remote for the lifetime of this guard.
///
/// Dropping the guard removes the remote. Removal is best-effort: a failure
/// is logged and never masks the result of the merge it guarded.
struct TempRemote<'a> {
    bundler: &'a Bundler,
}

impl<'a> TempRemote<'a> {
    fn register(bundler: &'a Bundler, bundle: &Path) -> Result<Self, BundleError> {
        // Replace any stale registration left by an interrupted run.
        let stale = bundler.git(&["remote", "remove", TEMP_REMOTE])?;
        if stale.success {
            tracing::debug!(remote = TEMP_REMOTE, "removed stale bundle remote");
        }

        let bundle_str = bundle.to_string_lossy();
        let out = bundler.git(&["remote", "add", TEMP_REMOTE, &bundle_str])?;
        if !out.success {
            return Err(BundleError::Invalid {
                output: out.combined,
            });
        }
        Ok(Self { bundler })
    }

    fn name(&self) -> &'static str {
        TEMP_REMOTE
    }
}

impl Drop for TempRemote<'_> {
    fn drop(&mut self) {
        match self.bundler.git(&["remote", "remove", TEMP_REMOTE]) {
            Ok(out) if out.success => {}
            Ok(out) => tracing::warn!(
                remote = TEMP_REMOTE,
                output = %out.combined.trim(),
                "failed to remove temporary bundle remote"
            ),
            Err(e) => tracing::warn!(
                remote = TEMP_REMOTE,
                error = %e,
                "failed to remove temporary bundle remote"
            ),
        }
    }
}
