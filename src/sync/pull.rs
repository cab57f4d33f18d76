//! Pull pipeline: bundle the remote working copy and merge it locally.

use chrono::Local;
use indicatif::HumanBytes;

use super::{BundleSummary, Operation, Pipeline, Stage, SyncFailure, SyncSuccess, blocking};
use crate::bundle::{self, BundleArtifact, BundleMode, ExportPlan, MergeOutcome};
use crate::hooks::Hook;
use crate::transport::{Dialer, RemoteSession, remote_join};

const OP: Operation = Operation::Pull;

#[derive(Debug, Clone, Copy, Default)]
pub struct PullOptions {
    /// Push the merged branch to the upstream remote afterwards.
    pub push_upstream: bool,
}

impl<D: Dialer> Pipeline<'_, D> {
    /// Run the pull pipeline to `Done` or `Failed(stage)`.
    pub async fn pull(&self, options: PullOptions) -> Result<SyncSuccess, SyncFailure> {
        tracing::info!(
            project = %self.config.project.name,
            branch = %self.config.project.branch,
            push_upstream = options.push_upstream,
            "starting pull"
        );

        self.run_pre_hook(OP, Hook::PrePull)?;

        let mut session = self.connect(OP)?;
        let result = self.fetch_remote(&mut session).await;
        let (artifact, repo_path, remote_output) = self.release(session, result)?;

        self.checkpoint(OP, Stage::Merge)?;
        self.reporter.step("Merging remote changes...");
        let bundler = self.bundler();
        let branch = &self.config.project.branch;
        match bundler
            .merge(&artifact.path, branch)
            .map_err(|e| SyncFailure::new(OP, Stage::Merge, e))?
        {
            MergeOutcome::Merged { target } => self
                .reporter
                .success(&format!("Merged {target} from {}", artifact.file_name())),
            MergeOutcome::NothingToMerge => self
                .reporter
                .warn(&format!("Remote bundle has neither {branch} nor {}", bundle::LEGACY_BRANCH)),
        }

        if options.push_upstream {
            self.checkpoint(OP, Stage::UpstreamPush)?;
            self.reporter
                .step(&format!("Pushing {branch} to {}...", self.config.project.upstream));
            bundler
                .push_upstream(branch)
                .map_err(|e| SyncFailure::new(OP, Stage::UpstreamPush, e))?;
            self.reporter
                .success(&format!("Pushed {branch} to {}", self.config.project.upstream));
        }

        let post_hook_error = self.run_post_hook(Hook::PostPull);

        Ok(SyncSuccess {
            operation: OP,
            bundle: BundleSummary::from(&artifact),
            destination: self.destination(&repo_path),
            remote_output,
            post_hook_error,
        })
    }

    /// Stages that need the session: export, download, remote cleanup.
    async fn fetch_remote(
        &self,
        session: &mut D::Session,
    ) -> Result<(BundleArtifact, String, String), SyncFailure> {
        let root = self.remote_root(OP, session)?;
        let project = &self.config.project.name;
        let created_at = Local::now();
        let local_path = bundle::bundle_path(&self.bundle_dir(), project, &created_at);
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let remote_bundle = remote_join(&root, &format!("pull-{file_name}"));
        let repo_path = remote_join(&root, project);

        self.checkpoint(OP, Stage::Snapshot)?;
        self.reporter.step("Creating bundle on remote...");
        let plan = ExportPlan {
            repo_path: repo_path.clone(),
            bundle_path: remote_bundle.clone(),
        };
        let output = bundle::export(session, &self.cancel, &plan)
            .await
            .map_err(|e| SyncFailure::new(OP, Stage::Snapshot, e))?;

        self.checkpoint(OP, Stage::Download)?;
        self.reporter.transfer_started("Downloading", 0);
        let downloaded = blocking(|| {
            let mut progress = |done: u64, total: u64| self.reporter.transfer_progress(done, total);
            session.download(&remote_bundle, &local_path, Some(&mut progress))
        });
        self.reporter.transfer_finished();
        // The export is single-use whether or not it arrived.
        if let Err(e) = session.remove_remote_file(&remote_bundle) {
            tracing::warn!(path = %remote_bundle, error = %e, "failed to remove remote bundle");
        }
        let size = downloaded.map_err(|e| SyncFailure::new(OP, Stage::Download, e))?;
        self.reporter.success(&format!(
            "Downloaded {file_name} ({})",
            HumanBytes(size)
        ));

        let artifact = BundleArtifact {
            path: local_path,
            project: project.clone(),
            branch: self.config.project.branch.clone(),
            mode: BundleMode::Full,
            created_at,
            size,
        };
        Ok((artifact, repo_path, output))
    }
}
