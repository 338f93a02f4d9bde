use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use thiserror::Error;
use tracing::warn;

use crate::fsutil;
use crate::security::exec::{self, ExecError, ExecutionResult, SandboxedExecutor};
use crate::security::paths::{sanitize_path_for_symlink, PathError};
use crate::security::validate::{validate_branch_name, ValidationError};

/// Fixed timeout for merging shared files into a release.
pub const SHARED_FILES_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of releases kept after a successful deployment.
pub const DEFAULT_KEEP_RELEASES: usize = 5;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no current release found, the project must be provisioned before its first deploy")]
    NoInitialRelease,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("no current release found (current symlink missing)")]
    MissingCurrent,
    #[error("cannot restore: only one release exists (need at least 2 releases)")]
    OnlyOneRelease,
    #[error("current release '{0}' not found in releases directory")]
    CurrentNotInReleases(String),
    #[error("cannot restore: current release '{0}' is already the oldest")]
    AlreadyOldest(String),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

/// Runs the filesystem side of a deployment for one project root. All
/// subprocesses go through the sandboxed executor; every path that ends up
/// in a symlink or an `rm` is containment-checked against the project root
/// first.
#[derive(Debug)]
pub struct Executor {
    project_root: PathBuf,
    sandbox: SandboxedExecutor,
}

impl Executor {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            sandbox: SandboxedExecutor::new(&project_root),
            project_root,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    fn releases_dir(&self) -> PathBuf {
        self.project_root.join("releases")
    }

    fn current_link(&self) -> PathBuf {
        self.project_root.join("current")
    }

    /// Stage 1: creates `releases/<timestamp>` by copying the tree behind
    /// `current` (preserving `.git`). Fails when no current release exists;
    /// the very first release is provisioned out of band.
    pub async fn create_release(
        &self,
        timeout: Duration,
    ) -> Result<(PathBuf, ExecutionResult), ExecutorError> {
        let timestamp = Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
        let release_dir = self.releases_dir().join(timestamp);

        let current_link = self.current_link();
        if !fsutil::symlink_exists(&current_link) {
            return Err(ExecutorError::NoInitialRelease);
        }

        let current_path =
            fsutil::resolve_symlink(&current_link).map_err(|source| ExecutorError::Io {
                context: "failed to resolve current symlink".to_string(),
                source,
            })?;
        sanitize_path_for_symlink(&self.project_root, &current_path)?;

        let argv = argv(&[
            "cp",
            "-a",
            &current_path.to_string_lossy(),
            &release_dir.to_string_lossy(),
        ]);
        let result = self.sandbox.execute(&argv, timeout).await?;
        if !result.ok() {
            return Err(ExecError::NonZeroExit {
                command: exec::format_command(&argv),
                code: result.exit_code,
                output: result.output,
            }
            .into());
        }

        Ok((release_dir, result))
    }

    /// Stage 2: discards local drift and pulls the target branch inside the
    /// new release.
    pub async fn run_git_update(
        &self,
        release_dir: &Path,
        branch: &str,
        timeout: Duration,
    ) -> Result<Vec<ExecutionResult>, ExecutorError> {
        validate_branch_name(branch)?;
        sanitize_path_for_symlink(&self.project_root, release_dir)?;

        let mut results = Vec::new();
        for command in [
            argv(&["git", "reset", "--hard", "HEAD"]),
            argv(&["git", "pull", "origin", branch]),
        ] {
            let result = self.run_in_dir(&command, release_dir, timeout).await?;
            let ok = result.ok();
            let code = result.exit_code;
            let output = result.output.clone();
            results.push(result);
            if !ok {
                return Err(ExecError::NonZeroExit {
                    command: exec::format_command(&command),
                    code,
                    output,
                }
                .into());
            }
        }

        Ok(results)
    }

    /// Stage 3: merges `shared/` into the release. A missing or empty shared
    /// directory is a no-op, not an error.
    pub async fn copy_shared_files(
        &self,
        release_dir: &Path,
    ) -> Result<Option<ExecutionResult>, ExecutorError> {
        let shared_dir = self.project_root.join("shared");

        if !fsutil::dir_exists(&shared_dir) {
            return Ok(None);
        }
        let empty = shared_dir
            .read_dir()
            .map_err(|source| ExecutorError::Io {
                context: "failed to read shared directory".to_string(),
                source,
            })?
            .next()
            .is_none();
        if empty {
            return Ok(None);
        }

        sanitize_path_for_symlink(&self.project_root, &shared_dir)?;
        sanitize_path_for_symlink(&self.project_root, release_dir)?;

        let argv = argv(&[
            "rsync",
            "-a",
            &format!("{}/", shared_dir.display()),
            &format!("{}/", release_dir.display()),
        ]);
        let result = self.sandbox.execute(&argv, SHARED_FILES_TIMEOUT).await?;
        if !result.ok() {
            return Err(ExecError::NonZeroExit {
                command: exec::format_command(&argv),
                code: result.exit_code,
                output: result.output,
            }
            .into());
        }

        Ok(Some(result))
    }

    /// Stages 4 and 6: runs configured hook commands sequentially in
    /// `work_dir`. Hooks come from validated configuration and are not
    /// allowlist-restricted; each command gets the full `timeout` to itself.
    /// The first failure aborts the sequence.
    pub async fn run_hooks(
        &self,
        field: &str,
        hooks: &[Vec<String>],
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<Vec<ExecutionResult>, ExecutorError> {
        let mut results = Vec::with_capacity(hooks.len());

        for (i, command) in hooks.iter().enumerate() {
            let result = exec::run_command(command, work_dir, timeout)
                .await
                .map_err(|err| annotate_hook_error(field, i, err))?;
            let ok = result.ok();
            let code = result.exit_code;
            let output = result.output.clone();
            results.push(result);

            if !ok {
                return Err(ExecError::NonZeroExit {
                    command: format!("{field}[{i}]: {}", exec::format_command(command)),
                    code,
                    output,
                }
                .into());
            }
        }

        Ok(results)
    }

    /// Stage 5: atomically repoints `current` at the new release, using a
    /// project-root-relative target so the tree stays relocatable.
    pub fn update_current_symlink(&self, release_dir: &Path) -> Result<(), ExecutorError> {
        sanitize_path_for_symlink(&self.project_root, release_dir)?;

        let relative = release_dir
            .strip_prefix(&self.project_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| release_dir.to_path_buf());

        fsutil::update_symlink_atomic(&self.current_link(), &relative).map_err(|source| {
            ExecutorError::Io {
                context: "failed to update current symlink".to_string(),
                source,
            }
        })
    }

    /// Stage 7: removes old releases, keeping the newest `keep` plus,
    /// always, the release `current` points at. Release names sort
    /// lexicographically in chronological order.
    pub fn cleanup_old_releases(&self, keep: usize) -> Result<(), ExecutorError> {
        let releases_dir = self.releases_dir();
        let mut releases =
            list_release_names(&releases_dir).map_err(|source| ExecutorError::Io {
                context: "failed to read releases directory".to_string(),
                source,
            })?;

        if releases.len() <= keep {
            return Ok(());
        }

        let current_name = fsutil::resolve_symlink(&self.current_link())
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));

        releases.sort_unstable_by(|a, b| b.cmp(a));

        for name in &releases[keep..] {
            if Some(name.as_str()) == current_name.as_deref() {
                continue;
            }

            let release_path = releases_dir.join(name);
            if sanitize_path_for_symlink(&self.project_root, &release_path).is_err() {
                warn!(release = %name, "skipping deletion of release outside project root");
                continue;
            }

            if let Err(err) = std::fs::remove_dir_all(&release_path) {
                warn!(release = %name, error = %err, "failed to remove old release");
            }
        }

        Ok(())
    }

    /// Switches `current` back to the release preceding it. Fails when the
    /// current release is the oldest or the only one.
    pub fn restore_previous_release(&self) -> Result<(String, String), RestoreError> {
        let current_link = self.current_link();
        if !fsutil::symlink_exists(&current_link) {
            return Err(RestoreError::MissingCurrent);
        }

        let current_path =
            fsutil::resolve_symlink(&current_link).map_err(|source| RestoreError::Io {
                context: "failed to resolve current symlink".to_string(),
                source,
            })?;
        sanitize_path_for_symlink(&self.project_root, &current_path)?;

        let current_name = current_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RestoreError::CurrentNotInReleases(current_path.display().to_string()))?;

        let releases_dir = self.releases_dir();
        let mut releases =
            list_release_names(&releases_dir).map_err(|source| RestoreError::Io {
                context: "failed to read releases directory".to_string(),
                source,
            })?;

        if releases.len() < 2 {
            return Err(RestoreError::OnlyOneRelease);
        }

        // Newest first; the entry after current is the previous release.
        releases.sort_unstable_by(|a, b| b.cmp(a));

        let current_index = releases
            .iter()
            .position(|name| *name == current_name)
            .ok_or_else(|| RestoreError::CurrentNotInReleases(current_name.clone()))?;

        if current_index >= releases.len() - 1 {
            return Err(RestoreError::AlreadyOldest(current_name));
        }

        let previous_name = releases[current_index + 1].clone();
        let previous_path = releases_dir.join(&previous_name);
        sanitize_path_for_symlink(&self.project_root, &previous_path)?;

        self.update_current_symlink(&previous_path)
            .map_err(|err| match err {
                ExecutorError::Io { context, source } => RestoreError::Io { context, source },
                ExecutorError::Path(err) => RestoreError::Path(err),
                other => RestoreError::Io {
                    context: other.to_string(),
                    source: std::io::Error::other("symlink update failed"),
                },
            })?;

        Ok((current_name, previous_name))
    }

    async fn run_in_dir(
        &self,
        command: &[String],
        dir: &Path,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecutorError> {
        let sandbox = SandboxedExecutor::new(dir);
        Ok(sandbox.execute(command, timeout).await?)
    }
}

fn annotate_hook_error(field: &str, index: usize, err: ExecError) -> ExecutorError {
    match err {
        ExecError::Spawn { command, source } => ExecError::Spawn {
            command: format!("{field}[{index}]: {command}"),
            source,
        }
        .into(),
        ExecError::Timeout { command, timeout } => ExecError::Timeout {
            command: format!("{field}[{index}]: {command}"),
            timeout,
        }
        .into(),
        other => other.into(),
    }
}

fn list_release_names(releases_dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in releases_dir.read_dir()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    /// Builds a project tree with the given releases; `current` points at
    /// the last one.
    fn project_tree(releases: &[&str]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        let releases_dir = tmp.path().join("releases");
        fs::create_dir(&releases_dir).unwrap();
        fs::create_dir(tmp.path().join("shared")).unwrap();

        for name in releases {
            let dir = releases_dir.join(name);
            fs::create_dir_all(dir.join(".git")).unwrap();
            fs::write(dir.join("app.txt"), format!("release {name}")).unwrap();
        }

        if let Some(last) = releases.last() {
            std::os::unix::fs::symlink(
                Path::new("releases").join(last),
                tmp.path().join("current"),
            )
            .unwrap();
        }

        tmp
    }

    #[tokio::test]
    async fn create_release_copies_current_tree() {
        let tmp = project_tree(&["2025-01-01-00-00-00"]);
        let executor = Executor::new(tmp.path());

        let (release_dir, result) = executor
            .create_release(Duration::from_secs(30))
            .await
            .unwrap();
        assert!(result.ok());
        assert!(release_dir.join(".git").is_dir());
        assert_eq!(
            fs::read_to_string(release_dir.join("app.txt")).unwrap(),
            "release 2025-01-01-00-00-00"
        );
    }

    #[tokio::test]
    async fn create_release_requires_current() {
        let tmp = project_tree(&[]);
        let executor = Executor::new(tmp.path());

        let err = executor
            .create_release(Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::NoInitialRelease));
    }

    #[tokio::test]
    async fn copy_shared_is_noop_when_shared_empty() {
        let tmp = project_tree(&["2025-01-01-00-00-00"]);
        let executor = Executor::new(tmp.path());
        let release = tmp.path().join("releases").join("2025-01-01-00-00-00");

        let result = executor.copy_shared_files(&release).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn hooks_run_sequentially_and_abort_on_failure() {
        let tmp = project_tree(&["2025-01-01-00-00-00"]);
        let executor = Executor::new(tmp.path());
        let release = tmp.path().join("releases").join("2025-01-01-00-00-00");

        let hooks = vec![
            argv(&["touch", "built"]),
            argv(&["cp", "missing-file", "dest"]),
            argv(&["touch", "never-reached"]),
        ];
        let err = executor
            .run_hooks("post_deploy", &hooks, &release, Duration::from_secs(30))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutorError::Exec(ExecError::NonZeroExit { .. })));
        assert!(release.join("built").exists());
        assert!(!release.join("never-reached").exists());
    }

    #[tokio::test]
    async fn hook_spawn_failure_names_the_hook() {
        let tmp = project_tree(&["2025-01-01-00-00-00"]);
        let executor = Executor::new(tmp.path());
        let release = tmp.path().join("releases").join("2025-01-01-00-00-00");

        let hooks = vec![argv(&["no-such-binary-xyz"])];
        let err = executor
            .run_hooks("post_activate", &hooks, &release, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("post_activate[0]"));
    }

    #[test]
    fn cutover_uses_relative_target_and_is_atomic() {
        let tmp = project_tree(&["2025-01-01-00-00-00", "2025-01-02-00-00-00"]);
        let executor = Executor::new(tmp.path());
        let new_release = tmp.path().join("releases").join("2025-01-01-00-00-00");

        executor.update_current_symlink(&new_release).unwrap();

        let target = fs::read_link(tmp.path().join("current")).unwrap();
        assert!(target.is_relative());
        assert!(tmp
            .path()
            .join("current")
            .canonicalize()
            .unwrap()
            .ends_with("2025-01-01-00-00-00"));
    }

    #[test]
    fn retention_keeps_newest_k() {
        let tmp = project_tree(&[
            "2025-01-01-00-00-00",
            "2025-01-02-00-00-00",
            "2025-01-03-00-00-00",
            "2025-01-04-00-00-00",
        ]);
        let executor = Executor::new(tmp.path());

        executor.cleanup_old_releases(2).unwrap();

        let remaining = list_release_names(&tmp.path().join("releases")).unwrap();
        let mut remaining = remaining;
        remaining.sort();
        assert_eq!(remaining, vec!["2025-01-03-00-00-00", "2025-01-04-00-00-00"]);
    }

    #[test]
    fn retention_never_trims_the_current_release() {
        let tmp = project_tree(&["2025-01-01-00-00-00"]);
        // Add newer releases but keep current pointing at the oldest.
        for name in [
            "2025-01-02-00-00-00",
            "2025-01-03-00-00-00",
            "2025-01-04-00-00-00",
        ] {
            fs::create_dir_all(tmp.path().join("releases").join(name)).unwrap();
        }

        let executor = Executor::new(tmp.path());
        executor.cleanup_old_releases(2).unwrap();

        let mut remaining = list_release_names(&tmp.path().join("releases")).unwrap();
        remaining.sort();
        // The two newest survive plus the current target.
        assert_eq!(remaining, vec![
            "2025-01-01-00-00-00",
            "2025-01-03-00-00-00",
            "2025-01-04-00-00-00",
        ]);
    }

    #[test]
    fn restore_switches_to_previous_release() {
        let tmp = project_tree(&["2025-01-01-00-00-00", "2025-01-02-00-00-00"]);
        let executor = Executor::new(tmp.path());

        let (old, new) = executor.restore_previous_release().unwrap();
        assert_eq!(old, "2025-01-02-00-00-00");
        assert_eq!(new, "2025-01-01-00-00-00");
        assert!(tmp
            .path()
            .join("current")
            .canonicalize()
            .unwrap()
            .ends_with("2025-01-01-00-00-00"));

        // Current is now the oldest release; a second restore must fail.
        let err = executor.restore_previous_release().unwrap_err();
        assert!(matches!(err, RestoreError::AlreadyOldest(_)));
    }

    #[test]
    fn restore_requires_two_releases() {
        let tmp = project_tree(&["2025-01-01-00-00-00"]);
        let executor = Executor::new(tmp.path());
        assert!(matches!(
            executor.restore_previous_release().unwrap_err(),
            RestoreError::OnlyOneRelease
        ));
    }

    #[test]
    fn restore_requires_current_symlink() {
        let tmp = project_tree(&[]);
        let executor = Executor::new(tmp.path());
        assert!(matches!(
            executor.restore_previous_release().unwrap_err(),
            RestoreError::MissingCurrent
        ));
    }
}
