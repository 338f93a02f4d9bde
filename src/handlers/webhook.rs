use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::Path;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::deployment::Deployment;
use crate::history::{DeploymentStatus, NewDeployment};
use crate::project::Project;
use crate::security::signature::verify_signature;
use crate::security::validate::validate_project_name;
use crate::server::AppState;

/// Maximum accepted webhook payload, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 1_000_000;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_HEADER: &str = "x-github-event";

/// Webhook ingestion. The request is authenticated, gated, and locked here;
/// the deployment itself runs on a detached tracked task after the 202 is
/// sent, so the response never waits on a stage.
pub async fn handle(
    Path(project_name): Path<String>,
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!(project = %project_name, "webhook received");

    if let Err(err) = validate_project_name(&project_name) {
        warn!(project = %project_name, error = %err, "invalid project name in webhook request");
        return reply(
            StatusCode::BAD_REQUEST,
            json!({ "error": format!("Invalid project name: {err}") }),
        );
    }

    let project = match state.registry.get(&project_name) {
        Ok(project) => project,
        Err(_) => {
            warn!(project = %project_name, "project not found");
            return reply(StatusCode::NOT_FOUND, json!({ "error": "Unknown project" }));
        }
    };

    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if content_length.is_some_and(|len| len > MAX_PAYLOAD_BYTES)
        || body.len() > MAX_PAYLOAD_BYTES
    {
        warn!(project = %project_name, "payload too large");
        return reply(
            StatusCode::PAYLOAD_TOO_LARGE,
            json!({ "error": "Payload too large" }),
        );
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type != "application/json" {
        warn!(project = %project_name, content_type, "invalid content type");
        return reply(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            json!({ "error": "Invalid content type" }),
        );
    }

    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if event != "push" {
        info!(project = %project_name, event, "ignoring non-push event");
        return reply(StatusCode::OK, json!({ "message": "Ignoring non-push event" }));
    }

    // The body stays opaque bytes until the signature over those exact bytes
    // verifies.
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !verify_signature(&body, signature, &project.secret) {
        warn!(project = %project_name, "invalid signature");
        return reply(StatusCode::FORBIDDEN, json!({ "error": "Invalid signature" }));
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(_) | Err(_) => {
            warn!(project = %project_name, "invalid JSON payload");
            return reply(
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid JSON payload" }),
            );
        }
    };

    if payload.as_object().is_some_and(|map| map.is_empty()) {
        info!(project = %project_name, "empty payload, skipping");
        return reply(StatusCode::OK, json!({ "message": "Missing payload, skipping" }));
    }

    let git_ref = payload
        .get("ref")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if !project.matches_ref(&git_ref) {
        info!(
            project = %project_name,
            git_ref,
            target_branch = %project.branch,
            "not target branch, skipping"
        );
        return reply(
            StatusCode::OK,
            json!({ "message": "Not target branch, skipping" }),
        );
    }

    if !state.locks.try_lock(&project_name) {
        warn!(project = %project_name, "deployment already in progress, rejecting");

        if let Some(history) = &state.history {
            let record = NewDeployment {
                project: project_name.clone(),
                branch: project.branch.clone(),
                git_ref: git_ref.clone(),
                status: DeploymentStatus::Rejected,
                completed_at: None,
                duration_seconds: None,
                commit_hash: None,
                error_message: Some("Deployment already in progress".to_string()),
            };
            if let Err(err) = history.record_deployment(record).await {
                error!(project = %project_name, error = %err, "failed to record rejection");
            }
        }

        return reply(
            StatusCode::TOO_MANY_REQUESTS,
            json!({ "error": "Deployment already in progress" }),
        );
    }

    let commit_hash = payload
        .get("after")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from);

    info!(project = %project_name, "lock acquired, starting async deployment");

    // Acknowledge before the long-running stages; GitHub gives webhooks ten
    // seconds. The task is tracked so shutdown can drain it.
    let response = reply(
        StatusCode::ACCEPTED,
        json!({ "message": "Deployment accepted", "project": project_name.clone() }),
    );

    let task_state = state.clone();
    state.deployments.spawn(async move {
        run_deployment(task_state, project, project_name, git_ref, commit_hash).await;
    });

    response
}

/// Runs the pipeline, records the terminal history row, and releases the
/// project lock. Everything here happens after the 202; nothing can change
/// the client-visible status anymore.
async fn run_deployment(
    state: AppState,
    project: Arc<Project>,
    project_name: String,
    git_ref: String,
    commit_hash: Option<String>,
) {
    let started = Instant::now();
    let cancel: CancellationToken = state.shutdown.child_token();

    let mut deployment = Deployment::new(Arc::clone(&project), state.expose_output);
    let result = deployment.execute(&cancel).await;
    let duration = started.elapsed().as_secs_f64();

    let (status, error_message) = match &result {
        Ok(()) => (DeploymentStatus::Success, None),
        Err(err) => {
            let mut message = err.to_string();
            if let Some(output) = deployment.combined_output() {
                if !output.is_empty() {
                    message = format!("{message}\n{output}");
                }
            }
            (DeploymentStatus::Failed, Some(message))
        }
    };

    if let Some(history) = &state.history {
        let record = NewDeployment {
            project: project_name.clone(),
            branch: project.branch.clone(),
            git_ref,
            status,
            completed_at: None,
            duration_seconds: Some(duration),
            commit_hash,
            error_message: error_message.clone(),
        };
        if let Err(err) = history.record_deployment(record).await {
            error!(project = %project_name, error = %err, "failed to record deployment history");
        }
    }

    match result {
        Ok(()) => info!(project = %project_name, duration_seconds = duration, "deployment completed"),
        Err(err) => error!(project = %project_name, error = %err, "deployment failed"),
    }

    state.locks.unlock(&project_name);
}

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}
