//! The deployment engine: the seven-stage pipeline that turns a verified
//! push event into an atomically published release.

pub mod executor;
pub mod lock;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use self::executor::{Executor, ExecutorError, DEFAULT_KEEP_RELEASES};
use crate::project::Project;
use crate::security::exec::{self, ExecutionResult};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("deployment cancelled")]
    Cancelled,
    #[error("{stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: ExecutorError,
    },
}

/// A single deployment run for one project. The caller must hold the
/// project's deployment lock for the lifetime of this value; the engine owns
/// the project's filesystem subtree while it runs.
pub struct Deployment {
    project: Arc<Project>,
    executor: Executor,
    expose_output: bool,
    outputs: Vec<String>,
}

impl Deployment {
    pub fn new(project: Arc<Project>, expose_output: bool) -> Self {
        let executor = Executor::new(&project.path);
        Self {
            project,
            executor,
            expose_output,
            outputs: Vec::new(),
        }
    }

    /// Runs the full zero-downtime pipeline. Cancellation is checked between
    /// stages; each stage is bounded by its own timeout. On failure before
    /// the cutover stage, `current` still points at the old release.
    pub async fn execute(&mut self, cancel: &CancellationToken) -> Result<(), DeployError> {
        let project = Arc::clone(&self.project);
        let name = project.name.as_str();

        self.check_cancelled(cancel, "before start")?;

        info!(project = name, branch = %project.branch, "starting deployment");

        // Stage 1: materialize the new release from the current one.
        info!(project = name, "stage 1: materializing release");
        let (release_dir, result) = self
            .executor
            .create_release(Duration::from_secs(project.pull_timeout))
            .await
            .map_err(|source| self.stage_error("materialize release", source))?;
        self.collect_output("materialize", Some(&result));
        info!(project = name, release = %release_dir.display(), "release materialized");

        self.check_cancelled(cancel, "after materialize")?;

        // Stage 2: bring the release up to date with the target branch.
        info!(project = name, branch = %project.branch, "stage 2: updating from origin");
        let results = self
            .executor
            .run_git_update(
                &release_dir,
                &project.branch,
                Duration::from_secs(project.pull_timeout),
            )
            .await
            .map_err(|source| self.stage_error("git update", source))?;
        for result in &results {
            self.collect_output("git_update", Some(result));
        }

        self.check_cancelled(cancel, "after git update")?;

        // Stage 3: merge shared files into the release.
        info!(project = name, "stage 3: syncing shared files");
        let shared = self
            .executor
            .copy_shared_files(&release_dir)
            .await
            .map_err(|source| self.stage_error("sync shared", source))?;
        self.collect_output("sync_shared", shared.as_ref());

        self.check_cancelled(cancel, "after shared sync")?;

        // Stage 4: build the release in place.
        if project.post_deploy.is_empty() {
            info!(project = name, "stage 4: no post-deploy commands configured");
        } else {
            info!(
                project = name,
                command_count = project.post_deploy.len(),
                "stage 4: running post-deploy commands"
            );
            let results = self
                .executor
                .run_hooks(
                    "post_deploy",
                    &project.post_deploy,
                    &release_dir,
                    Duration::from_secs(project.post_deploy_timeout),
                )
                .await
                .map_err(|source| self.stage_error("post-deploy", source))?;
            for result in &results {
                self.collect_output("post_deploy", Some(result));
            }
        }

        self.check_cancelled(cancel, "before cutover")?;

        // Stage 5: atomic cutover. Everything before this point left the
        // live release untouched.
        info!(project = name, release = %release_dir.display(), "stage 5: activating release");
        self.executor
            .update_current_symlink(&release_dir)
            .map_err(|source| self.stage_error("activate", source))?;

        self.check_cancelled(cancel, "after cutover")?;

        // Stage 6: post-activate hooks run inside the now-live release.
        if project.post_activate.is_empty() {
            info!(project = name, "stage 6: no post-activate commands configured");
        } else {
            info!(
                project = name,
                command_count = project.post_activate.len(),
                "stage 6: running post-activate commands"
            );
            let current_dir = project.path.join("current");
            let results = self
                .executor
                .run_hooks(
                    "post_activate",
                    &project.post_activate,
                    &current_dir,
                    Duration::from_secs(project.post_activate_timeout),
                )
                .await
                .map_err(|source| self.stage_error("post-activate", source))?;
            for result in &results {
                self.collect_output("post_activate", Some(result));
            }
        }

        // Stage 7: retention. A failed trim never fails a published release.
        info!(
            project = name,
            keep = DEFAULT_KEEP_RELEASES,
            "stage 7: cleaning up old releases"
        );
        if let Err(err) = self.executor.cleanup_old_releases(DEFAULT_KEEP_RELEASES) {
            warn!(project = name, error = %err, "release cleanup failed");
            self.outputs.push(format!("Warning: cleanup failed: {err}"));
        }

        info!(project = name, "deployment completed successfully");
        Ok(())
    }

    /// Combined subprocess output accumulated across stages. Only surfaced
    /// when the operator opted into output exposure.
    pub fn combined_output(&self) -> Option<String> {
        if self.expose_output {
            Some(self.outputs.join("\n"))
        } else {
            None
        }
    }

    fn check_cancelled(
        &self,
        cancel: &CancellationToken,
        at: &'static str,
    ) -> Result<(), DeployError> {
        if cancel.is_cancelled() {
            warn!(project = %self.project.name, at, "deployment cancelled");
            return Err(DeployError::Cancelled);
        }
        Ok(())
    }

    fn stage_error(&self, stage: &'static str, source: ExecutorError) -> DeployError {
        DeployError::Stage { stage, source }
    }

    fn collect_output(&mut self, step: &str, result: Option<&ExecutionResult>) {
        let Some(result) = result else { return };
        let output = exec::redact_secrets(result.output.trim(), &[self.project.secret.as_str()]);
        if output.is_empty() {
            return;
        }

        info!(
            project = %self.project.name,
            step,
            output = %output,
            "command output"
        );
        self.outputs.push(output);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::project::{
        DEFAULT_POST_ACTIVATE_TIMEOUT, DEFAULT_POST_DEPLOY_TIMEOUT, DEFAULT_PULL_TIMEOUT,
    };

    fn project_for(tmp: &TempDir) -> Arc<Project> {
        Arc::new(Project {
            name: "app".into(),
            path: tmp.path().to_path_buf(),
            secret: "unused".into(),
            branch: "main".into(),
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            post_deploy_timeout: DEFAULT_POST_DEPLOY_TIMEOUT,
            post_activate_timeout: DEFAULT_POST_ACTIVATE_TIMEOUT,
            post_deploy: Vec::new(),
            post_activate: Vec::new(),
        })
    }

    #[tokio::test]
    async fn fails_without_initial_release() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("releases")).unwrap();
        fs::create_dir(tmp.path().join("shared")).unwrap();

        let mut deployment = Deployment::new(project_for(&tmp), false);
        let err = deployment
            .execute(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeployError::Stage {
                stage: "materialize release",
                source: ExecutorError::NoInitialRelease
            }
        ));
    }

    #[tokio::test]
    async fn aborts_when_cancelled_before_start() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut deployment = Deployment::new(project_for(&tmp), false);
        let err = deployment.execute(&cancel).await.unwrap_err();
        assert!(matches!(err, DeployError::Cancelled));
    }

    #[tokio::test]
    async fn output_is_withheld_unless_exposed() {
        let tmp = TempDir::new().unwrap();
        let hidden = Deployment::new(project_for(&tmp), false);
        assert!(hidden.combined_output().is_none());

        let mut exposed = Deployment::new(project_for(&tmp), true);
        exposed.outputs.push("cloning...".into());
        assert_eq!(exposed.combined_output().as_deref(), Some("cloning..."));
    }
}
