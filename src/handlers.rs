use crate::config::Config;
use crate::errors::AppError;
use crate::models::{Lead, ScoringConfig};
use crate::proxy_pool::ProxyPool;
use crate::run_state::RunStatus;
use crate::runner::BatchRunner;
use crate::sink::{EmittedRun, MemorySink};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Drives scoring runs and owns the run state machine.
    pub runner: Arc<BatchRunner>,
    /// Holds the records of the last completed run.
    pub sink: Arc<MemorySink>,
    /// Outbound proxy rotation, when proxying is enabled.
    pub proxy_pool: Option<Arc<ProxyPool>>,
}

/// Body of `POST /api/v1/scoring/start`.
#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    pub leads: Vec<Lead>,
    #[serde(default)]
    pub config: ScoringConfig,
}

/// Routes without middleware; the binary adds its layers on top.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/scoring/start", post(start_run))
        .route("/api/v1/scoring/status", get(run_status))
        .route("/api/v1/scoring/results", get(run_results))
        .route("/api/v1/scoring/cancel", post(cancel_run))
        .route("/api/v1/scoring/reset", post(reset_run))
        .with_state(state)
}

/// Health check endpoint.
///
/// Returns the service status and version with the worker count and proxy pool figures.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let proxies = state.proxy_pool.as_ref().map(|pool| {
        json!({
            "active": pool.len(),
            "retired": pool.retired_count(),
        })
    });

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-lead-scoring",
            "version": env!("CARGO_PKG_VERSION"),
            "workers": state.config.run.worker_pool_size,
            "proxies": proxies,
        })),
    )
}

/// POST /api/v1/scoring/start
///
/// Starts a scoring run in the background. A machine left in `completed` or
/// `error` by the previous run is reset first.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `request` - Leads to score and the scoring configuration.
///
/// # Returns
///
/// * `202 Accepted` with the run id, `409` while another run is live, `400`
///   for an empty or oversized batch.
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    tracing::info!(
        "POST /scoring/start - {} lead(s), min_debt {}",
        request.leads.len(),
        request.config.min_debt
    );

    if request.leads.is_empty() {
        return Err(AppError::BadRequest("No leads supplied".to_string()));
    }

    let machine = state.runner.state();
    if machine.status().state.is_terminal() {
        if let Err(e) = machine.reset() {
            tracing::warn!("Could not clear finished run before start: {}", e);
        }
    }

    let handle = state.runner.start(request.leads, request.config)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "run_id": handle.run_id,
            "status": machine.status(),
        })),
    ))
}

/// GET /api/v1/scoring/status
pub async fn run_status(State(state): State<Arc<AppState>>) -> Json<RunStatus> {
    Json(state.runner.state().status())
}

/// GET /api/v1/scoring/results
///
/// Records emitted by the last completed run, best score first.
pub async fn run_results(
    State(state): State<Arc<AppState>>,
) -> Result<Json<EmittedRun>, AppError> {
    state
        .sink
        .latest()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No completed scoring run yet".to_string()))
}

/// POST /api/v1/scoring/cancel
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let run_id = state.runner.state().cancel()?;
    tracing::info!("POST /scoring/cancel - run {}", run_id);

    Ok(Json(json!({
        "run_id": run_id,
        "message": "Cancellation requested",
    })))
}

/// POST /api/v1/scoring/reset
pub async fn reset_run(State(state): State<Arc<AppState>>) -> Result<Json<RunStatus>, AppError> {
    let machine = state.runner.state();
    machine.reset()?;
    Ok(Json(machine.status()))
}
