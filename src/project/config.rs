use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::command::split_command_line;
use super::{
    HookCommand, Project, DEFAULT_POST_ACTIVATE_TIMEOUT, DEFAULT_POST_DEPLOY_TIMEOUT,
    DEFAULT_PULL_TIMEOUT,
};
use crate::fsutil;
use crate::security::secrets::validate_secret;
use crate::security::validate::{validate_branch_name, validate_project_name};

/// Root structure of the projects configuration file.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub projects: HashMap<String, ProjectConfig>,
}

/// Raw per-project configuration as written by the operator.
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub pull_timeout: Option<u64>,
    #[serde(default)]
    pub post_deploy_timeout: Option<u64>,
    #[serde(default)]
    pub post_activate_timeout: Option<u64>,
    #[serde(default)]
    pub post_deploy: Vec<HookCommand>,
    #[serde(default)]
    pub post_activate: Vec<HookCommand>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration for project '{project}':\n{}", .errors.join("\n"))]
    Invalid {
        project: String,
        errors: Vec<String>,
    },
}

/// Loads and validates the projects configuration. Every project must pass
/// all checks; the first failing project aborts the load with the full list
/// of its problems.
pub fn load_config(
    config_path: &Path,
    projects_root: Option<&Path>,
) -> Result<HashMap<String, Project>, ConfigError> {
    let data = std::fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;

    let config: ConfigFile = serde_yaml::from_str(&data)?;

    let mut projects = HashMap::new();
    for (name, project_config) in config.projects {
        let project = build_project(&name, project_config, projects_root).map_err(|errors| {
            ConfigError::Invalid {
                project: name.clone(),
                errors,
            }
        })?;
        projects.insert(name, project);
    }

    Ok(projects)
}

/// Validates one raw project record and normalizes it into a `Project`.
/// Collects every problem rather than stopping at the first.
fn build_project(
    name: &str,
    config: ProjectConfig,
    projects_root: Option<&Path>,
) -> Result<Project, Vec<String>> {
    let mut errors = Vec::new();

    if let Err(err) = validate_project_name(name) {
        errors.push(format!("  - invalid project name: {err}"));
    }

    let real_path = match &config.path {
        None => {
            errors.push("  - missing required 'path' field".to_string());
            None
        }
        Some(path) => validate_project_path(path, projects_root, &mut errors),
    };

    match &config.secret {
        None => errors.push("  - missing required 'secret' field".to_string()),
        Some(secret) => {
            if let Err(err) = validate_secret(secret) {
                errors.push(format!("  - {err}"));
            }
        }
    }

    let branch = config.branch.unwrap_or_else(|| "main".to_string());
    if let Err(err) = validate_branch_name(&branch) {
        errors.push(format!("  - invalid branch '{branch}': {err}"));
    }

    let post_deploy = normalize_hooks("post_deploy", &config.post_deploy, &mut errors);
    let post_activate = normalize_hooks("post_activate", &config.post_activate, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(Project {
        name: name.to_string(),
        path: real_path.expect("path errors were collected above"),
        secret: config.secret.expect("secret errors were collected above"),
        branch,
        // Zero means unset; the defaults apply.
        pull_timeout: config
            .pull_timeout
            .filter(|&t| t != 0)
            .unwrap_or(DEFAULT_PULL_TIMEOUT),
        post_deploy_timeout: config
            .post_deploy_timeout
            .filter(|&t| t != 0)
            .unwrap_or(DEFAULT_POST_DEPLOY_TIMEOUT),
        post_activate_timeout: config
            .post_activate_timeout
            .filter(|&t| t != 0)
            .unwrap_or(DEFAULT_POST_ACTIVATE_TIMEOUT),
        post_deploy,
        post_activate,
    })
}

/// Checks the project path is absolute, exists, has the release layout, and
/// lies within the optional allowed root. Returns the canonical path.
fn validate_project_path(
    path: &Path,
    projects_root: Option<&Path>,
    errors: &mut Vec<String>,
) -> Option<PathBuf> {
    if !path.is_absolute() {
        errors.push(format!("  - path must be absolute, got '{}'", path.display()));
        return None;
    }

    let real_path = match path.canonicalize() {
        Ok(p) => p,
        Err(err) => {
            errors.push(format!("  - cannot resolve path '{}': {err}", path.display()));
            return None;
        }
    };

    if !real_path.is_dir() {
        errors.push(format!("  - path is not a directory: '{}'", real_path.display()));
        return Some(real_path);
    }

    let current = real_path.join("current");
    if !fsutil::symlink_exists(&current) {
        errors.push(format!(
            "  - missing 'current' symlink (provision the project first): '{}'",
            real_path.display()
        ));
    } else {
        match fsutil::resolve_symlink(&current) {
            Err(err) => errors.push(format!("  - 'current' symlink is broken: {err}")),
            Ok(current_target) => {
                if !current_target.join(".git").exists() {
                    errors.push(format!(
                        "  - current release is not a git repository (missing .git): '{}'",
                        current_target.display()
                    ));
                }
            }
        }
    }

    for dir in ["shared", "releases"] {
        if !fsutil::dir_exists(&real_path.join(dir)) {
            errors.push(format!(
                "  - missing '{dir}' directory (provision the project first): '{}'",
                real_path.display()
            ));
        }
    }

    if let Some(root) = projects_root {
        match root.canonicalize() {
            Ok(root_path) => {
                if !real_path.starts_with(&root_path) {
                    errors.push(format!(
                        "  - path '{}' is outside allowed root '{}'",
                        real_path.display(),
                        root_path.display()
                    ));
                }
            }
            Err(err) => {
                errors.push(format!(
                    "  - cannot resolve projects root '{}': {err}",
                    root.display()
                ));
            }
        }
    }

    Some(real_path)
}

/// Normalizes hook entries to argv vectors. String entries are shell-split
/// once here; list entries must be non-empty.
fn normalize_hooks(
    field: &str,
    hooks: &[HookCommand],
    errors: &mut Vec<String>,
) -> Vec<Vec<String>> {
    let mut normalized = Vec::with_capacity(hooks.len());

    for (i, hook) in hooks.iter().enumerate() {
        match hook {
            HookCommand::Line(line) => match split_command_line(line) {
                Ok(argv) => normalized.push(argv),
                Err(err) => errors.push(format!("  - {field}[{i}]: {err}")),
            },
            HookCommand::Argv(argv) => {
                if argv.is_empty() {
                    errors.push(format!("  - {field}[{i}]: empty command list"));
                } else {
                    normalized.push(argv.clone());
                }
            }
        }
    }

    normalized
}
