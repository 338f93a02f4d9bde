use serde::{Deserialize, Serialize};

/// Terminal and transient states a deployment can be recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Success,
    Failed,
    Skipped,
    Rejected,
    InProgress,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeploymentStatus::InProgress)
    }
}

/// One row of deployment history. Timestamps are RFC-3339 UTC strings.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeploymentRecord {
    pub id: i64,
    pub project: String,
    pub branch: String,
    #[serde(rename = "ref")]
    #[sqlx(rename = "ref")]
    pub git_ref: String,
    pub status: DeploymentStatus,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_seconds: Option<f64>,
    pub commit_hash: Option<String>,
    pub error_message: Option<String>,
}

/// A deployment to be recorded. `started_at` is stamped at insert time;
/// terminal statuses get `completed_at` filled when the caller left it out.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub project: String,
    pub branch: String,
    pub git_ref: String,
    pub status: DeploymentStatus,
    pub completed_at: Option<String>,
    pub duration_seconds: Option<f64>,
    pub commit_hash: Option<String>,
    pub error_message: Option<String>,
}
