//! Push pipeline: snapshot local history and fold it into the remote working copy.

use chrono::Local;
use indicatif::HumanBytes;

use super::{BundleSummary, Operation, Pipeline, Stage, SyncFailure, SyncSuccess, blocking};
use crate::bundle::{self, BundleArtifact, BundleError, BundleMode, ReconcilePlan};
use crate::hooks::Hook;
use crate::transport::{Dialer, RemoteSession, remote_join};

const OP: Operation = Operation::Push;

#[derive(Debug, Clone, Copy, Default)]
pub struct PushOptions {
    /// Skip the incremental attempt and bundle everything.
    pub full: bool,
}

impl<D: Dialer> Pipeline<'_, D> {
    /// Run the push pipeline to `Done` or `Failed(stage)`.
    pub async fn push(&self, options: PushOptions) -> Result<SyncSuccess, SyncFailure> {
        tracing::info!(
            project = %self.config.project.name,
            branch = %self.config.project.branch,
            full = options.full,
            "starting push"
        );

        self.run_pre_hook(OP, Hook::PrePush)?;
        let artifact = self.snapshot(options)?;

        let mut session = self.connect(OP)?;
        let result = self.deliver(&mut session, &artifact).await;
        let (destination, remote_output) = self.release(session, result)?;

        self.reporter
            .success(&format!("Synced {} to {}", artifact.file_name(), destination));
        let post_hook_error = self.run_post_hook(Hook::PostPush);

        if !self.config.bundle.keep {
            match std::fs::remove_file(&artifact.path) {
                Ok(()) => tracing::debug!(path = %artifact.path.display(), "removed local bundle"),
                Err(e) => tracing::warn!(
                    path = %artifact.path.display(),
                    error = %e,
                    "failed to remove local bundle"
                ),
            }
        }

        Ok(SyncSuccess {
            operation: OP,
            bundle: BundleSummary::from(&artifact),
            destination,
            remote_output,
            post_hook_error,
        })
    }

    /// Create the bundle: incremental first, full once on any incremental failure.
    fn snapshot(&self, options: PushOptions) -> Result<BundleArtifact, SyncFailure> {
        self.checkpoint(OP, Stage::Snapshot)?;
        let bundler = self.bundler();
        let project = &self.config.project.name;
        let branch = &self.config.project.branch;
        let dir = self.bundle_dir();

        if !options.full {
            self.reporter.step("Creating incremental bundle...");
            let dest = bundle::bundle_path(&dir, project, &Local::now());
            match bundler.create_incremental(&dest, project, branch) {
                Ok(artifact) => {
                    self.report_bundle(&artifact);
                    return Ok(artifact);
                }
                Err(e) => {
                    tracing::info!(error = %e, "incremental bundle unavailable, falling back to full");
                    self.reporter
                        .warn(&format!("Incremental bundle failed ({e}); creating full bundle"));
                    discard_partial(&dest, &e);
                }
            }
        }

        self.reporter.step("Creating full bundle...");
        let dest = bundle::bundle_path(&dir, project, &Local::now());
        let artifact = bundler.create_full(&dest, project, branch).map_err(|e| {
            discard_partial(&dest, &e);
            SyncFailure::new(OP, Stage::Snapshot, e)
        })?;
        self.report_bundle(&artifact);
        Ok(artifact)
    }

    fn report_bundle(&self, artifact: &BundleArtifact) {
        let label = match artifact.mode {
            BundleMode::Full => "Full",
            BundleMode::Incremental => "Incremental",
        };
        self.reporter.success(&format!(
            "{label} bundle created: {} ({})",
            artifact.file_name(),
            HumanBytes(artifact.size)
        ));
    }

    /// Stages that need the session: upload then reconcile.
    async fn deliver(
        &self,
        session: &mut D::Session,
        artifact: &BundleArtifact,
    ) -> Result<(String, String), SyncFailure> {
        let root = self.remote_root(OP, session)?;
        let remote_bundle = remote_join(&root, &artifact.file_name());
        let repo_path = remote_join(&root, &self.config.project.name);

        self.checkpoint(OP, Stage::Upload)?;
        self.reporter.transfer_started("Uploading", artifact.size);
        let uploaded = blocking(|| {
            let mut progress = |done: u64, total: u64| self.reporter.transfer_progress(done, total);
            session.upload(&artifact.path, &remote_bundle, Some(&mut progress))
        });
        self.reporter.transfer_finished();
        let uploaded = uploaded.map_err(|e| SyncFailure::new(OP, Stage::Upload, e))?;
        self.reporter
            .success(&format!("Uploaded {} to {remote_bundle}", HumanBytes(uploaded)));

        self.checkpoint(OP, Stage::Reconcile)?;
        self.reporter.step("Updating remote repository...");
        let plan = ReconcilePlan::new(&remote_bundle, &repo_path, &self.config.project.branch);
        let output = bundle::reconcile(session, &self.cancel, &plan)
            .await
            .map_err(|e| SyncFailure::new(OP, Stage::Reconcile, e))?;
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            self.reporter.info(line);
        }

        Ok((self.destination(&repo_path), output))
    }
}

/// A failed bundle write may leave a partial file; it must never be shipped.
fn discard_partial(dest: &std::path::Path, cause: &BundleError) {
    if dest.exists() {
        match std::fs::remove_file(dest) {
            Ok(()) => tracing::debug!(path = %dest.display(), cause = %cause, "removed partial bundle"),
            Err(e) => tracing::warn!(path = %dest.display(), error = %e, "failed to remove partial bundle"),
        }
    }
}
