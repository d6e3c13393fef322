/// HTTP tests for the scoring API
/// Drives the router in-process through tower's `oneshot`, no sockets
use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt as _;

use rust_lead_scoring::config::Config;
use rust_lead_scoring::enrichment::EnrichmentOrchestrator;
use rust_lead_scoring::handlers::{self, AppState};
use rust_lead_scoring::models::{DebtFact, DebtType, FactData, Lead, SourceFact, SourceKind};
use rust_lead_scoring::run_state::RunStateMachine;
use rust_lead_scoring::runner::BatchRunner;
use rust_lead_scoring::sink::MemorySink;
use rust_lead_scoring::sources::SourceAdapter;

const BODY_LIMIT: usize = 1024 * 1024;

/// Every lead owes a bank 300k.
struct BankDebt;

#[async_trait]
impl SourceAdapter for BankDebt {
    fn kind(&self) -> SourceKind {
        SourceKind::Debt
    }

    async fn fetch(&self, _lead: &Lead) -> SourceFact {
        SourceFact::ok(FactData::Debt(DebtFact {
            amount: 300_000.0,
            debt_type: DebtType::Bank,
            creditor: "АО Банк".to_string(),
            count: 1,
        }))
    }
}

fn test_router() -> Router {
    let config = Config::default();
    let sink = Arc::new(MemorySink::new());
    let orchestrator = Arc::new(EnrichmentOrchestrator::new(
        vec![Arc::new(BankDebt) as Arc<dyn SourceAdapter>],
        Duration::from_secs(5),
    ));
    let runner = BatchRunner::new(
        orchestrator,
        Arc::new(RunStateMachine::new()),
        sink.clone(),
        config.run.clone(),
    )
    .with_evaluation_date(NaiveDate::from_ymd_opt(2024, 9, 15).unwrap());

    handlers::router(Arc::new(AppState {
        config,
        runner: Arc::new(runner),
        sink,
        proxy_pool: None,
    }))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .expect("build request");

    let response = app.clone().oneshot(request).await.expect("oneshot");
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

async fn wait_for_state(app: &Router, state: &str) -> Value {
    for _ in 0..100 {
        let (_, status) = call(app, "GET", "/api/v1/scoring/status", None).await;
        if status["state"] == state {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run never reached state {}", state);
}

fn leads() -> Value {
    json!([
        {"lead_id": "1", "fio": "Иванов Иван Иванович", "inn": "500100732259", "phone": "+79001112233"},
        {"lead_id": "2", "fio": "Сидорова Анна Петровна", "dob": "1990-01-31"}
    ])
}

#[tokio::test]
async fn test_health_reports_service_and_pool() {
    let app = test_router();

    let (status, body) = call(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "rust-lead-scoring");
    assert_eq!(body["workers"], 4);
    assert!(body["proxies"].is_null());
}

#[tokio::test]
async fn test_initial_status_is_idle() {
    let app = test_router();

    let (status, body) = call(&app, "GET", "/api/v1/scoring/status", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert_eq!(body["progress"], 0);
    assert_eq!(body["message"], "Ready");
}

#[tokio::test]
async fn test_start_run_scores_and_serves_results() {
    let app = test_router();

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/scoring/start",
        Some(json!({"leads": leads(), "config": {"min_debt": 250000}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = body["run_id"].clone();
    assert!(run_id.is_string());

    let finished = wait_for_state(&app, "completed").await;
    assert_eq!(finished["progress"], 100);
    assert_eq!(finished["total_contacts"], 2);
    assert_eq!(finished["run_id"], run_id);

    let (status, results) = call(&app, "GET", "/api/v1/scoring/results", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(results["run_id"], run_id);
    let records = results["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["lead_id"], "1");
    assert_eq!(records[0]["score"], 75);
    assert_eq!(records[0]["group"], "bank_only_no_property");
    assert_eq!(records[1]["phone"], "");
}

#[tokio::test]
async fn test_completed_run_can_be_restarted() {
    let app = test_router();

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/scoring/start",
        Some(json!({"leads": leads()})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for_state(&app, "completed").await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/scoring/start",
        Some(json!({"leads": leads()})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for_state(&app, "completed").await;
}

#[tokio::test]
async fn test_start_without_leads_is_bad_request() {
    let app = test_router();

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/scoring/start",
        Some(json!({"leads": []})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_results_before_any_run_is_not_found() {
    let app = test_router();

    let (status, body) = call(&app, "GET", "/api/v1/scoring/results", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_cancel_without_live_run_conflicts() {
    let app = test_router();

    let (status, body) = call(&app, "POST", "/api/v1/scoring/cancel", None).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "No scoring run is in progress");
}

#[tokio::test]
async fn test_reset_returns_idle_status() {
    let app = test_router();

    let (status, body) = call(&app, "POST", "/api/v1/scoring/reset", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
}
