//! End-to-end pipeline test against a real git origin: materialize, pull,
//! hooks, atomic cutover, and rollback.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use deplobox::deployment::executor::Executor;
use deplobox::deployment::Deployment;
use deplobox::project::{
    Project, DEFAULT_POST_ACTIVATE_TIMEOUT, DEFAULT_POST_DEPLOY_TIMEOUT, DEFAULT_PULL_TIMEOUT,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .arg("-c")
        .arg("user.email=dev@example.com")
        .arg("-c")
        .arg("user.name=dev")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git invocation");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Creates an origin repository with one commit and a project tree whose
/// single release is a clone of it.
fn setup(origin: &TempDir, root: &TempDir) {
    git(origin.path(), &["init", "-b", "main"]);
    fs::write(origin.path().join("app.txt"), "version 1\n").unwrap();
    git(origin.path(), &["add", "."]);
    git(origin.path(), &["commit", "-m", "initial"]);

    let releases = root.path().join("releases");
    fs::create_dir(&releases).unwrap();
    fs::create_dir(root.path().join("shared")).unwrap();

    let first_release = releases.join("2025-01-01-00-00-00");
    git(root.path(), &[
        "clone",
        origin.path().to_str().unwrap(),
        first_release.to_str().unwrap(),
    ]);

    std::os::unix::fs::symlink(
        Path::new("releases").join("2025-01-01-00-00-00"),
        root.path().join("current"),
    )
    .unwrap();
}

fn project(root: &Path, hooks: bool) -> Arc<Project> {
    let (post_deploy, post_activate) = if hooks {
        (
            vec![vec!["touch".to_string(), "built.flag".to_string()]],
            vec![vec!["touch".to_string(), "activated.flag".to_string()]],
        )
    } else {
        (Vec::new(), Vec::new())
    };

    Arc::new(Project {
        name: "app".to_string(),
        path: root.to_path_buf(),
        secret: "unused-by-the-engine".to_string(),
        branch: "main".to_string(),
        pull_timeout: DEFAULT_PULL_TIMEOUT,
        post_deploy_timeout: DEFAULT_POST_DEPLOY_TIMEOUT,
        post_activate_timeout: DEFAULT_POST_ACTIVATE_TIMEOUT,
        post_deploy,
        post_activate,
    })
}

#[tokio::test]
async fn full_pipeline_publishes_a_new_release() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }

    let origin = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    setup(&origin, &root);

    // A second commit lands upstream; the deployment must pick it up.
    fs::write(origin.path().join("app.txt"), "version 2\n").unwrap();
    git(origin.path(), &["add", "."]);
    git(origin.path(), &["commit", "-m", "update"]);

    let mut deployment = Deployment::new(project(root.path(), true), false);
    deployment
        .execute(&CancellationToken::new())
        .await
        .expect("deployment succeeds");

    // A second release exists and current resolves to it.
    let releases: Vec<String> = fs::read_dir(root.path().join("releases"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(releases.len(), 2);

    let current = root.path().join("current").canonicalize().unwrap();
    assert!(!current.ends_with("2025-01-01-00-00-00"));

    // The pull brought the tree up to date and the hooks ran in the right
    // places.
    assert_eq!(
        fs::read_to_string(current.join("app.txt")).unwrap(),
        "version 2\n"
    );
    assert!(current.join("built.flag").exists());
    assert!(current.join("activated.flag").exists());

    // The original release was left untouched.
    let old = root.path().join("releases").join("2025-01-01-00-00-00");
    assert_eq!(
        fs::read_to_string(old.join("app.txt")).unwrap(),
        "version 1\n"
    );
}

#[tokio::test]
async fn failed_build_hook_leaves_current_untouched() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }

    let origin = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    setup(&origin, &root);

    let mut failing = (*project(root.path(), false)).clone();
    failing.post_deploy = vec![vec!["cp".to_string(), "missing".to_string(), "dest".to_string()]];

    let mut deployment = Deployment::new(Arc::new(failing), false);
    deployment
        .execute(&CancellationToken::new())
        .await
        .expect_err("post-deploy hook fails");

    // The cutover never happened.
    let current = root.path().join("current").canonicalize().unwrap();
    assert!(current.ends_with("2025-01-01-00-00-00"));
}

#[tokio::test]
async fn deploy_then_restore_round_trip() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }

    let origin = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    setup(&origin, &root);

    let mut deployment = Deployment::new(project(root.path(), false), false);
    deployment
        .execute(&CancellationToken::new())
        .await
        .expect("deployment succeeds");

    let current = root.path().join("current").canonicalize().unwrap();
    assert!(!current.ends_with("2025-01-01-00-00-00"));

    // Roll back to the previous release.
    let executor = Executor::new(root.path());
    let (_, restored) = executor.restore_previous_release().unwrap();
    assert_eq!(restored, "2025-01-01-00-00-00");

    let current = root.path().join("current").canonicalize().unwrap();
    assert!(current.ends_with("2025-01-01-00-00-00"));
}
