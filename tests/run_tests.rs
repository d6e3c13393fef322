/// Batch run tests
/// Drives the runner end to end with in-process registry stand-ins
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_lead_scoring::config::RunSettings;
use rust_lead_scoring::enrichment::EnrichmentOrchestrator;
use rust_lead_scoring::errors::{RunError, SourceError};
use rust_lead_scoring::models::{
    DebtFact, DebtType, FactData, Lead, ScoringConfig, SourceFact, SourceKind,
};
use rust_lead_scoring::run_state::{RunState, RunStateError, RunStateMachine};
use rust_lead_scoring::runner::{BatchRunner, StartError};
use rust_lead_scoring::sink::MemorySink;
use rust_lead_scoring::sources::SourceAdapter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Debt registry stand-in answering from a fixed table.
struct DebtTable {
    debts: HashMap<String, DebtFact>,
}

#[async_trait]
impl SourceAdapter for DebtTable {
    fn kind(&self) -> SourceKind {
        SourceKind::Debt
    }

    async fn fetch(&self, lead: &Lead) -> SourceFact {
        SourceFact::ok(FactData::Debt(
            self.debts.get(&lead.lead_id).cloned().unwrap_or_default(),
        ))
    }
}

/// Registry that is always down.
struct Broken;

#[async_trait]
impl SourceAdapter for Broken {
    fn kind(&self) -> SourceKind {
        SourceKind::Tax
    }

    async fn fetch(&self, _lead: &Lead) -> SourceFact {
        SourceFact::from_error(
            SourceKind::Tax,
            &SourceError::Transient("connection reset".to_string()),
        )
    }
}

/// Registry that answers after a delay and records peak concurrency.
struct Slow {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Slow {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SourceAdapter for Slow {
    fn kind(&self) -> SourceKind {
        SourceKind::Property
    }

    async fn fetch(&self, _lead: &Lead) -> SourceFact {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        SourceFact::ok(FactData::Property(Default::default()))
    }
}

fn lead(id: &str) -> Lead {
    Lead {
        lead_id: id.to_string(),
        fio: "Петров Пётр Петрович".to_string(),
        inn: Some("500100732259".to_string()),
        phone: Some(format!("+7900{}", id)),
        ..Default::default()
    }
}

fn debt(amount: f64, debt_type: DebtType, count: u32) -> DebtFact {
    DebtFact {
        amount,
        debt_type,
        creditor: "ПАО Банк".to_string(),
        count,
    }
}

fn settings(worker_pool_size: usize, max_errors_before_fail: usize) -> RunSettings {
    RunSettings {
        worker_pool_size,
        source_timeout: Duration::from_secs(10),
        max_errors_before_fail,
        max_leads_per_run: 100,
    }
}

fn runner(
    adapters: Vec<Arc<dyn SourceAdapter>>,
    settings: RunSettings,
) -> (Arc<BatchRunner>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let orchestrator = Arc::new(EnrichmentOrchestrator::new(
        adapters,
        settings.source_timeout,
    ));
    let runner = BatchRunner::new(
        orchestrator,
        Arc::new(RunStateMachine::new()),
        sink.clone(),
        settings,
    )
    .with_evaluation_date(NaiveDate::from_ymd_opt(2024, 9, 15).unwrap());
    (Arc::new(runner), sink)
}

fn debt_table() -> Arc<dyn SourceAdapter> {
    let mut debts = HashMap::new();
    debts.insert("a".to_string(), debt(300_000.0, DebtType::Bank, 1));
    debts.insert("b".to_string(), debt(0.0, DebtType::Unknown, 0));
    debts.insert("c".to_string(), debt(300_000.0, DebtType::Microfinance, 4));
    debts.insert("d".to_string(), debt(300_000.0, DebtType::Bank, 1));
    Arc::new(DebtTable { debts })
}

#[tokio::test]
async fn test_completed_run_emits_sorted_targets() {
    let (runner, sink) = runner(vec![debt_table()], settings(2, 10));

    let outcome = runner
        .run(
            vec![lead("a"), lead("b"), lead("c"), lead("d")],
            ScoringConfig::default(),
        )
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.lead_errors, 0);

    // scored results keep input order
    let ids: Vec<&str> = outcome
        .scored
        .iter()
        .map(|s| s.enriched.lead.lead_id.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c", "d"]);

    // targets only, best first, ties in input order
    let emitted: Vec<(&str, i32)> = outcome
        .emitted
        .iter()
        .map(|r| (r.lead_id.as_str(), r.score))
        .collect();
    assert_eq!(emitted, vec![("c", 80), ("a", 75), ("d", 75)]);

    let stored = sink.latest().unwrap();
    assert_eq!(stored.run_id, outcome.run_id);
    assert_eq!(stored.records, outcome.emitted);

    let status = runner.state().status();
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.progress, 100);
    assert_eq!(status.total_contacts, Some(3));
    assert_eq!(status.run_id, Some(outcome.run_id));
}

#[tokio::test]
async fn test_filters_narrow_emitted_records_only() {
    let (runner, sink) = runner(vec![debt_table()], settings(2, 10));

    let config = ScoringConfig {
        only_property: true,
        ..Default::default()
    };
    let outcome = runner
        .run(vec![lead("a"), lead("c")], config)
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert!(outcome.scored.iter().all(|s| s.result.is_target));
    assert!(outcome.emitted.is_empty());
    assert_eq!(sink.latest().unwrap().records.len(), 0);
    assert_eq!(runner.state().status().total_contacts, Some(0));
}

#[tokio::test]
async fn test_second_start_is_rejected_while_running() {
    let slow = Slow::new(Duration::from_secs(30));
    let (runner, _sink) = runner(vec![slow as Arc<dyn SourceAdapter>], settings(1, 10));

    let first = runner
        .start(vec![lead("a")], ScoringConfig::default())
        .unwrap();
    let second = runner.start(vec![lead("b")], ScoringConfig::default());

    assert_eq!(
        second.unwrap_err(),
        StartError::State(RunStateError::AlreadyRunning)
    );
    assert_eq!(runner.state().status().run_id, Some(first.run_id));

    runner.state().cancel().unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), first.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.error, Some(RunError::Cancelled));
}

#[tokio::test]
async fn test_oversized_batch_is_rejected_before_starting() {
    let (runner, _sink) = runner(
        vec![debt_table()],
        RunSettings {
            max_leads_per_run: 2,
            ..settings(1, 10)
        },
    );

    let result = runner.start(
        vec![lead("a"), lead("b"), lead("c")],
        ScoringConfig::default(),
    );

    assert_eq!(
        result.unwrap_err(),
        StartError::TooManyLeads { count: 3, limit: 2 }
    );
    assert_eq!(runner.state().status().state, RunState::Idle);
}

#[tokio::test]
async fn test_error_ceiling_fails_the_run() {
    let (runner, sink) = runner(vec![Arc::new(Broken) as Arc<dyn SourceAdapter>], settings(1, 2));
    let leads: Vec<Lead> = ["a", "b", "c", "d", "e"].into_iter().map(lead).collect();

    let outcome = runner.run(leads, ScoringConfig::default()).await.unwrap();

    assert_eq!(
        outcome.error,
        Some(RunError::BatchFatal {
            errors: 3,
            ceiling: 2
        })
    );
    assert_eq!(outcome.lead_errors, 3);
    assert!(outcome.emitted.is_empty());
    assert!(sink.latest().is_none());

    let status = runner.state().status();
    assert_eq!(status.state, RunState::Error);
    assert_eq!(status.errors.len(), 1);
    assert_eq!(status.message, status.errors[0]);
}

#[tokio::test]
async fn test_lead_errors_below_ceiling_still_complete() {
    let (runner, sink) = runner(vec![Arc::new(Broken) as Arc<dyn SourceAdapter>], settings(2, 5));

    let outcome = runner
        .run(vec![lead("a"), lead("b")], ScoringConfig::default())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.lead_errors, 2);
    assert_eq!(outcome.scored.len(), 2);
    assert!(sink.latest().is_some());
    assert_eq!(runner.state().status().state, RunState::Completed);
}

#[tokio::test]
async fn test_cancel_stops_run_without_emitting() {
    let slow = Slow::new(Duration::from_secs(30));
    let (runner, sink) = runner(vec![slow.clone() as Arc<dyn SourceAdapter>], settings(2, 10));
    let leads: Vec<Lead> = ["a", "b", "c", "d"].into_iter().map(lead).collect();

    let handle = runner.start(leads, ScoringConfig::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runner.state().cancel().unwrap(), handle.run_id);

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.error, Some(RunError::Cancelled));
    assert!(outcome.scored.is_empty());
    assert!(outcome.emitted.is_empty());
    assert!(sink.latest().is_none());

    let status = runner.state().status();
    assert_eq!(status.state, RunState::Error);
    assert_eq!(status.message, "Scoring run cancelled");

    // a terminal machine accepts a new run after reset
    runner.state().reset().unwrap();
    assert_eq!(runner.state().status().state, RunState::Idle);
}

#[tokio::test]
async fn test_worker_pool_bounds_concurrency() {
    let slow = Slow::new(Duration::from_millis(20));
    let (runner, _sink) = runner(vec![slow.clone() as Arc<dyn SourceAdapter>], settings(3, 10));
    let ids: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    let leads: Vec<Lead> = ids.iter().map(|id| lead(id)).collect();

    let outcome = runner.run(leads, ScoringConfig::default()).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.scored.len(), 10);
    assert!(slow.peak.load(Ordering::SeqCst) <= 3);
    assert!(slow.peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_empty_batch_completes_with_no_contacts() {
    let (runner, sink) = runner(vec![debt_table()], settings(2, 10));

    let outcome = runner.run(Vec::new(), ScoringConfig::default()).await.unwrap();

    assert!(outcome.is_success());
    assert!(outcome.scored.is_empty());
    assert_eq!(sink.latest().unwrap().records.len(), 0);
    assert_eq!(runner.state().status().total_contacts, Some(0));
}
