use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Secure, lightweight GitHub webhook receiver for zero-downtime
/// deployments: Capistrano-style releases with atomic symlink switching.
#[derive(Parser)]
#[command(name = "deplobox", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the webhook server
    Serve {
        /// Path to the projects.yaml configuration file
        #[arg(short, long, env = "DEPLOBOX_CONFIG_FILE")]
        config: Option<PathBuf>,

        /// Path to the log file
        #[arg(long, env = "DEPLOBOX_LOG_FILE", default_value = "./deployments.log")]
        log: PathBuf,

        /// Path to the SQLite history database
        #[arg(long, env = "DEPLOBOX_DB_PATH", default_value = "./deployments.db")]
        db: PathBuf,

        /// Host to bind to
        #[arg(long, env = "DEPLOBOX_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, env = "DEPLOBOX_PORT", default_value_t = 5000)]
        port: u16,

        /// Test mode: disable history recording and rate limiting
        #[arg(long, env = "DEPLOBOX_TEST_MODE")]
        test_mode: bool,
    },

    /// Restore a project to its previous release
    Restore {
        /// Name of the project to restore
        project: String,

        /// Path to the projects config file
        #[arg(
            short,
            long,
            env = "DEPLOBOX_CONFIG_FILE",
            default_value = "/etc/deplobox/projects.yaml"
        )]
        config: PathBuf,
    },
}
