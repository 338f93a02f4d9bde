use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

static GIT_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://github\.com/[a-zA-Z0-9_-]+/[a-zA-Z0-9_.-]+(?:\.git)?$")
        .expect("git url pattern")
});

static BRANCH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9/_.-]+$").expect("branch pattern"));

static PROJECT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("project pattern"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("only GitHub HTTPS URLs are allowed, got {0}")]
    HostNotAllowed(String),
    #[error("URL contains invalid characters or format")]
    InvalidUrlFormat,
    #[error("branch name cannot be empty")]
    EmptyBranch,
    #[error("branch name cannot start with '-'")]
    BranchLeadingDash,
    #[error("branch name contains invalid characters")]
    BranchInvalidChars,
    #[error("project name cannot be empty")]
    EmptyProjectName,
    #[error("project name cannot start with '-' or '.'")]
    ProjectLeadingPunctuation,
    #[error("project name contains invalid characters (only a-z, A-Z, 0-9, _, - allowed)")]
    ProjectInvalidChars,
}

/// Ensures a URL is safe to hand to `git clone`. Only HTTPS GitHub URLs pass.
pub fn validate_git_url(raw: &str) -> Result<(), ValidationError> {
    let url = Url::parse(raw).map_err(|err| ValidationError::InvalidUrl(err.to_string()))?;

    if url.scheme() != "https" || url.host_str() != Some("github.com") {
        return Err(ValidationError::HostNotAllowed(format!(
            "{}://{}",
            url.scheme(),
            url.host_str().unwrap_or("")
        )));
    }

    if !GIT_URL_PATTERN.is_match(raw) {
        return Err(ValidationError::InvalidUrlFormat);
    }

    Ok(())
}

/// Ensures a branch name is safe to pass as a git argument.
pub fn validate_branch_name(branch: &str) -> Result<(), ValidationError> {
    if branch.is_empty() {
        return Err(ValidationError::EmptyBranch);
    }
    if branch.starts_with('-') {
        return Err(ValidationError::BranchLeadingDash);
    }
    if !BRANCH_PATTERN.is_match(branch) {
        return Err(ValidationError::BranchInvalidChars);
    }
    Ok(())
}

/// Ensures a project name is safe for use in paths and URLs.
pub fn validate_project_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyProjectName);
    }
    if name.starts_with('-') || name.starts_with('.') {
        return Err(ValidationError::ProjectLeadingPunctuation);
    }
    if !PROJECT_PATTERN.is_match(name) {
        return Err(ValidationError::ProjectInvalidChars);
    }
    Ok(())
}
