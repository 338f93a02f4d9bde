//! Router assembly, shared state, and the serve/drain lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::{get, post};
use axum::{middleware, Extension, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use crate::deployment::lock::LockManager;
use crate::handlers;
use crate::history::History;
use crate::middlewares::{self, rate_limit};
use crate::project::registry::Registry;

/// Hard wall-time limit for any single request. The webhook handler replies
/// well inside this; deployments run on detached tasks.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Process-scoped singletons shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    /// Absent in test mode; status reads then answer 503.
    pub history: Option<Arc<History>>,
    pub locks: Arc<LockManager>,
    /// Tracks detached deployment tasks so shutdown can drain them.
    pub deployments: TaskTracker,
    /// Parent token for per-deployment cancellation.
    pub shutdown: CancellationToken,
    pub expose_output: bool,
    pub test_mode: bool,
}

impl AppState {
    pub fn new(
        registry: Registry,
        history: Option<History>,
        expose_output: bool,
        test_mode: bool,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            history: history.map(Arc::new),
            locks: Arc::new(LockManager::new()),
            deployments: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            expose_output,
            test_mode,
        }
    }
}

/// Builds the full middleware-wrapped router. Outermost first: request id,
/// real IP, panic recovery, request timeout, access log, global rate limit;
/// the webhook route carries its own stricter limiter.
pub fn router(state: AppState) -> Router {
    // Payload size is enforced in the webhook handler itself, after the
    // project lookup, so oversize requests get the documented JSON error.
    let webhook = Router::new().route("/in/:project", post(handlers::webhook::handle));

    let webhook = if state.test_mode {
        webhook
    } else {
        webhook.layer(middleware::from_fn_with_state(
            rate_limit::webhook_limiter(),
            rate_limit::rate_limit,
        ))
    };

    let mut app = Router::new()
        .route("/health", get(handlers::health::check))
        .route("/status/:project", get(handlers::status::status))
        .merge(webhook);

    if !state.test_mode {
        app = app.layer(middleware::from_fn_with_state(
            rate_limit::global_limiter(),
            rate_limit::rate_limit,
        ));
    }

    app.layer(middleware::from_fn(middlewares::access_log))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn(middlewares::client_ip))
        .layer(middleware::from_fn(middlewares::request_id))
        .layer(Extension(state))
}

/// Binds, serves until a shutdown signal, then drains in-flight deployments
/// before closing the history store.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = router(state.clone());

    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind to {host}:{port}"))?;
    info!(host, port, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server failed")?;

    info!("draining in-flight deployments");
    state.deployments.close();
    state.deployments.wait().await;

    if let Some(history) = &state.history {
        history.close().await;
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
