//! Project records: validated deployment targets loaded from the projects
//! configuration file.

pub mod command;
pub mod config;
pub mod registry;

use std::path::PathBuf;

use serde::Deserialize;

pub const DEFAULT_PULL_TIMEOUT: u64 = 60;
pub const DEFAULT_POST_DEPLOY_TIMEOUT: u64 = 300;
pub const DEFAULT_POST_ACTIVATE_TIMEOUT: u64 = 300;

/// A hook entry as written in the configuration file: either a shell-quoted
/// command line or a pre-split argument vector. Normalized to argv at load;
/// the split is never deferred to execution time.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HookCommand {
    Line(String),
    Argv(Vec<String>),
}

/// A validated deployment project. Immutable after config load.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    /// Canonical absolute path to the project root (contains `current`,
    /// `releases/`, `shared/`).
    pub path: PathBuf,
    pub secret: String,
    pub branch: String,
    /// Seconds allowed for release materialization and the git update.
    pub pull_timeout: u64,
    pub post_deploy_timeout: u64,
    pub post_activate_timeout: u64,
    /// Normalized argv vectors, run sequentially in the release dir.
    pub post_deploy: Vec<Vec<String>>,
    /// Normalized argv vectors, run sequentially in `current` after cutover.
    pub post_activate: Vec<Vec<String>>,
}

impl Project {
    /// True when a push ref targets this project's configured branch.
    pub fn matches_ref(&self, git_ref: &str) -> bool {
        git_ref == format!("refs/heads/{}", self.branch)
    }
}
