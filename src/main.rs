use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use deplobox::cli::{Cli, Commands};
use deplobox::config::{self, Config};
use deplobox::deployment::executor::Executor;
use deplobox::history::History;
use deplobox::project::config::load_config;
use deplobox::project::registry::Registry;
use deplobox::server::{self, AppState};
use deplobox::{fsutil, security};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            log,
            db,
            host,
            port,
            test_mode,
        } => serve(config, log, db, host, port, test_mode).await,
        Commands::Restore { project, config } => restore(&project, &config),
    }
}

async fn serve(
    config_file: Option<PathBuf>,
    log_path: PathBuf,
    db_path: PathBuf,
    host: String,
    port: u16,
    test_mode: bool,
) -> anyhow::Result<()> {
    init_logging(&log_path)?;

    let env_config = Config::new();

    let config_file = match config_file {
        Some(path) => path,
        None => config::find_config_file().with_context(|| {
            let searched: Vec<String> = config::default_config_paths()
                .iter()
                .map(|p| format!("  - {}", p.display()))
                .collect();
            format!(
                "no configuration file found in default locations:\n{}\nuse --config to specify a custom location",
                searched.join("\n")
            )
        })?,
    };

    info!(config = %config_file.display(), "loading configuration");
    let projects = load_config(&config_file, env_config.projects_root.as_deref())
        .context("failed to load configuration")?;
    info!(count = projects.len(), "configuration validated");

    if projects.is_empty() {
        warn!("no projects configured; the server will start but won't handle any deployments");
    }

    for project in projects.values() {
        if security::secrets::is_weak_secret(&project.secret) {
            warn!(project = %project.name, "configured secret looks weak; consider regenerating it");
        }
    }

    let registry = Registry::new(projects);

    let history = if test_mode {
        None
    } else {
        info!(db = %db_path.display(), "initializing history database");
        Some(
            History::new(&db_path)
                .await
                .context("failed to initialize history database")?,
        )
    };

    let state = AppState::new(registry, history, env_config.expose_output, test_mode);
    server::serve(state, &host, port).await
}

fn restore(project_name: &str, config_file: &Path) -> anyhow::Result<()> {
    let env_config = Config::new();
    let projects = load_config(config_file, env_config.projects_root.as_deref())
        .with_context(|| format!("failed to load config from {}", config_file.display()))?;

    let project = projects
        .get(project_name)
        .with_context(|| format!("project '{project_name}' not found in {}", config_file.display()))?;

    println!("Restoring project '{project_name}' to previous release...");
    let executor = Executor::new(&project.path);
    let (old_release, new_release) = executor
        .restore_previous_release()
        .context("restore failed")?;

    println!();
    println!("Restore successful!");
    println!("  Previous (current): {old_release}");
    println!("  Restored to:        {new_release}");
    println!();
    println!("The 'current' symlink now points to: {new_release}");

    Ok(())
}

/// Structured logs to stdout plus an append-only log file with tightened
/// permissions.
fn init_logging(log_path: &Path) -> anyhow::Result<()> {
    if let Some(dir) = log_path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        }
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;
    fsutil::set_secure_permissions(log_path, fsutil::MODE_SENSITIVE_FILE)
        .with_context(|| format!("failed to set log file permissions on {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(log_file)),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    Ok(())
}
