use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::json;
use tracing::{error, warn};

use crate::security::validate::validate_project_name;
use crate::server::AppState;

/// Number of rows returned in the `recent_deployments` list.
const RECENT_DEPLOYMENTS_LIMIT: i64 = 10;

/// Read-only deployment status for one project: the latest row plus recent
/// history.
pub async fn status(
    Path(project_name): Path<String>,
    Extension(state): Extension<AppState>,
) -> Response {
    if let Err(err) = validate_project_name(&project_name) {
        warn!(project = %project_name, error = %err, "invalid project name in status request");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("Invalid project name: {err}") })),
        )
            .into_response();
    }

    if state.registry.get(&project_name).is_err() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Unknown project" })),
        )
            .into_response();
    }

    let Some(history) = &state.history else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "History not available in test mode" })),
        )
            .into_response();
    };

    let latest = match history.latest_deployment(&project_name).await {
        Ok(latest) => latest,
        Err(err) => {
            error!(project = %project_name, error = %err, "failed to get latest deployment");
            return fetch_error();
        }
    };

    let recent = match history
        .deployment_history(&project_name, RECENT_DEPLOYMENTS_LIMIT)
        .await
    {
        Ok(recent) => recent,
        Err(err) => {
            error!(project = %project_name, error = %err, "failed to get deployment history");
            return fetch_error();
        }
    };

    (
        StatusCode::OK,
        Json(json!({
            "project": project_name,
            "latest_deployment": latest,
            "recent_deployments": recent,
        })),
    )
        .into_response()
}

fn fetch_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Failed to fetch deployment status" })),
    )
        .into_response()
}
