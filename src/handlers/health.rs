use axum::{Extension, Json};
use serde_json::{json, Value};

use crate::server::AppState;

/// Liveness plus the set of configured projects. Never touches the lock
/// manager or the history store.
pub async fn check(Extension(state): Extension<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "projects": state.registry.list(),
        "project_count": state.registry.count(),
    }))
}
