use std::env;
use std::path::PathBuf;

/// Environment-only knobs. The serve command's flags carry their own
/// `DEPLOBOX_*` fallbacks; these two have no flag equivalent.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// When set, every project's canonical path must lie within this root.
    pub projects_root: Option<PathBuf>,
    /// Include accumulated subprocess output in failure records. Insecure;
    /// strictly opt-in.
    pub expose_output: bool,
}

impl Config {
    pub fn new() -> Config {
        _ = dotenvy::dotenv();

        Config {
            projects_root: env::var("DEPLOBOX_PROJECTS_ROOT").ok().map(PathBuf::from),
            expose_output: env::var("DEPLOBOX_EXPOSE_OUTPUT")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}

/// Default locations searched for the projects file when `--config` is not
/// given, in order.
pub fn default_config_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./projects.yaml"),
        PathBuf::from("/etc/deplobox/projects.yaml"),
    ]
}

/// First existing path from `default_config_paths`, if any.
pub fn find_config_file() -> Option<PathBuf> {
    default_config_paths().into_iter().find(|p| p.is_file())
}
