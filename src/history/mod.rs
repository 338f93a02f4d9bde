//! Durable deployment history, backed by an embedded SQLite database.

pub mod schema;

use std::collections::HashMap;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

pub use self::schema::{DeploymentRecord, DeploymentStatus, NewDeployment};
use crate::fsutil;

/// Deployment history store. All writes funnel through a single pooled
/// connection, matching SQLite's single-writer discipline.
#[derive(Debug)]
pub struct History {
    pool: SqlitePool,
}

impl History {
    /// Opens (creating if necessary) the history database and its schema.
    pub async fn new(db_path: &Path) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        // The database holds deployment metadata including error output.
        if let Err(err) = fsutil::set_secure_permissions(db_path, fsutil::MODE_SENSITIVE_FILE) {
            info!(path = %db_path.display(), error = %err, "could not tighten database permissions");
        }

        let history = Self { pool };
        history.init_schema().await?;
        Ok(history)
    }

    /// In-memory store for tests.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let history = Self { pool };
        history.init_schema().await?;
        Ok(history)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deployments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project TEXT NOT NULL,
                branch TEXT NOT NULL,
                ref TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                duration_seconds REAL,
                commit_hash TEXT,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_project_started
            ON deployments(project, started_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts a deployment row and returns its id. `started_at` is stamped
    /// here; a terminal status without an explicit `completed_at` gets the
    /// same stamp.
    pub async fn record_deployment(&self, record: NewDeployment) -> Result<i64, sqlx::Error> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let completed_at = match record.completed_at {
            Some(at) => Some(at),
            None if record.status.is_terminal() => Some(now.clone()),
            None => None,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO deployments
                (project, branch, ref, status, started_at, completed_at,
                 duration_seconds, commit_hash, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.project)
        .bind(&record.branch)
        .bind(&record.git_ref)
        .bind(record.status)
        .bind(&now)
        .bind(&completed_at)
        .bind(record.duration_seconds)
        .bind(&record.commit_hash)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent deployment for a project, if any.
    pub async fn latest_deployment(
        &self,
        project: &str,
    ) -> Result<Option<DeploymentRecord>, sqlx::Error> {
        sqlx::query_as::<_, DeploymentRecord>(
            r#"
            SELECT id, project, branch, ref, status, started_at, completed_at,
                   duration_seconds, commit_hash, error_message
            FROM deployments
            WHERE project = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(project)
        .fetch_optional(&self.pool)
        .await
    }

    /// The most recent `limit` deployments for a project, newest first.
    pub async fn deployment_history(
        &self,
        project: &str,
        limit: i64,
    ) -> Result<Vec<DeploymentRecord>, sqlx::Error> {
        sqlx::query_as::<_, DeploymentRecord>(
            r#"
            SELECT id, project, branch, ref, status, started_at, completed_at,
                   duration_seconds, commit_hash, error_message
            FROM deployments
            WHERE project = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(project)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// The latest row for every project that has ever deployed.
    pub async fn all_projects_status(
        &self,
    ) -> Result<HashMap<String, DeploymentRecord>, sqlx::Error> {
        let rows = sqlx::query_as::<_, DeploymentRecord>(
            r#"
            SELECT d.id, d.project, d.branch, d.ref, d.status, d.started_at,
                   d.completed_at, d.duration_seconds, d.commit_hash, d.error_message
            FROM deployments d
            INNER JOIN (
                SELECT project, MAX(id) AS max_id
                FROM deployments
                GROUP BY project
            ) latest
            ON d.project = latest.project AND d.id = latest.max_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|record| (record.project.clone(), record))
            .collect())
    }
}
