//! Batch driver.
//!
//! Pushes leads through a bounded pool of per-lead tasks (enrich then
//! score), tracks progress on the run state machine, enforces the lead
//! error ceiling, and hands filtered, sorted target records to the sink.

use chrono::NaiveDate;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::captcha::{AntiCaptchaSolver, CaptchaSolver};
use crate::config::{Config, RunSettings};
use crate::enrichment::EnrichmentOrchestrator;
use crate::errors::{AppError, ResultExt, RunError};
use crate::models::{
    EnrichedLead, Lead, ScoredLeadRecord, ScoringConfig, ScoringResult, SourceStatus,
};
use crate::proxy_pool::ProxyPool;
use crate::registry_client::RegistryClient;
use crate::run_state::{RunStateError, RunStateMachine, RunTicket};
use crate::scoring::ScoringEngine;
use crate::sink::ResultSink;
use crate::sources::default_adapters;

/// One lead that made it through enrichment and scoring.
#[derive(Debug, Clone)]
pub struct ScoredLead {
    /// Position in the submitted batch.
    pub index: usize,
    pub enriched: EnrichedLead,
    pub result: ScoringResult,
}

impl ScoredLead {
    /// No source answered `ok` while at least one failed outright.
    pub fn is_lead_error(&self) -> bool {
        self.enriched.count_status(SourceStatus::Ok) == 0
            && self.enriched.count_status(SourceStatus::Error) > 0
    }
}

/// What a run produced. On failure `scored` still holds every lead that
/// finished before the run stopped, and nothing was emitted.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    /// Input order.
    pub scored: Vec<ScoredLead>,
    /// Records handed to the sink.
    pub emitted: Vec<ScoredLeadRecord>,
    pub lead_errors: usize,
    pub error: Option<RunError>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    State(RunStateError),
    TooManyLeads { count: usize, limit: usize },
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::State(e) => write!(f, "{}", e),
            StartError::TooManyLeads { count, limit } => write!(
                f,
                "Batch of {} leads exceeds the limit of {} per run",
                count, limit
            ),
        }
    }
}

impl std::error::Error for StartError {}

impl From<RunStateError> for StartError {
    fn from(err: RunStateError) -> Self {
        StartError::State(err)
    }
}

impl From<StartError> for AppError {
    fn from(err: StartError) -> Self {
        match err {
            StartError::State(e) => e.into(),
            e @ StartError::TooManyLeads { .. } => AppError::BadRequest(e.to_string()),
        }
    }
}

/// Handle to a run started in the background.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: Uuid,
    join: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub async fn wait(self) -> Result<RunOutcome, AppError> {
        self.join
            .await
            .map_err(|e| AppError::InternalError(format!("run task failed: {}", e)))
    }
}

enum LeadOutcome {
    Scored(ScoredLead),
    Cancelled,
}

pub struct BatchRunner {
    orchestrator: Arc<EnrichmentOrchestrator>,
    state: Arc<RunStateMachine>,
    sink: Arc<dyn ResultSink>,
    settings: RunSettings,
    as_of: Option<NaiveDate>,
}

impl BatchRunner {
    pub fn new(
        orchestrator: Arc<EnrichmentOrchestrator>,
        state: Arc<RunStateMachine>,
        sink: Arc<dyn ResultSink>,
        settings: RunSettings,
    ) -> Self {
        Self {
            orchestrator,
            state,
            sink,
            settings,
            as_of: None,
        }
    }

    /// Wires the registry adapters described by `config`. `pool` is `None`
    /// when proxying is disabled.
    pub fn from_config(
        config: &Config,
        pool: Option<Arc<ProxyPool>>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let http = Arc::new(RegistryClient::new(
            pool,
            &config.proxy,
            config.request_timeout,
            config.retry,
        ));

        let solver: Option<Arc<dyn CaptchaSolver>> =
            match AntiCaptchaSolver::from_settings(&config.captcha) {
                Some(solver) => {
                    tracing::info!("✓ Captcha solver configured: {}", config.captcha.api_url);
                    Some(Arc::new(solver))
                }
                None => {
                    tracing::warn!("CAPTCHA_API_KEY not set, debt registry will be unavailable");
                    None
                }
            };

        let adapters = default_adapters(&config.registries, http, solver);
        let orchestrator = Arc::new(EnrichmentOrchestrator::new(
            adapters,
            config.run.source_timeout,
        ));

        Self::new(
            orchestrator,
            Arc::new(RunStateMachine::new()),
            sink,
            config.run.clone(),
        )
    }

    /// Pins the scoring evaluation date instead of using today's date.
    pub fn with_evaluation_date(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn state(&self) -> &Arc<RunStateMachine> {
        &self.state
    }

    fn engine(&self) -> ScoringEngine {
        self.as_of
            .map(ScoringEngine::new)
            .unwrap_or_else(ScoringEngine::today)
    }

    /// Claims the state machine and runs the batch in the background.
    pub fn start(
        self: &Arc<Self>,
        leads: Vec<Lead>,
        config: ScoringConfig,
    ) -> Result<RunHandle, StartError> {
        let limit = self.settings.max_leads_per_run;
        if leads.len() > limit {
            return Err(StartError::TooManyLeads {
                count: leads.len(),
                limit,
            });
        }

        let ticket = self
            .state
            .start(format!("Scoring {} leads", leads.len()))?;
        let run_id = ticket.run_id;

        let runner = Arc::clone(self);
        let join = tokio::spawn(async move { runner.execute(ticket, leads, config).await });

        Ok(RunHandle { run_id, join })
    }

    /// Starts a run and waits for it to finish.
    pub async fn run(
        self: &Arc<Self>,
        leads: Vec<Lead>,
        config: ScoringConfig,
    ) -> Result<RunOutcome, AppError> {
        self.start(leads, config)?.wait().await
    }

    async fn execute(
        self: Arc<Self>,
        ticket: RunTicket,
        leads: Vec<Lead>,
        config: ScoringConfig,
    ) -> RunOutcome {
        let RunTicket { run_id, cancel } = ticket;
        let engine = self.engine();
        let config = Arc::new(config);
        let pool_size = self.settings.worker_pool_size.max(1);
        let ceiling = self.settings.max_errors_before_fail;
        let total = leads.len();

        tracing::info!(
            "Run {}: {} lead(s), {} worker(s), evaluation date {}",
            run_id,
            total,
            pool_size,
            engine.as_of()
        );

        let mut queue = leads.into_iter().enumerate();
        let mut tasks: JoinSet<LeadOutcome> = JoinSet::new();
        let mut scored: Vec<ScoredLead> = Vec::with_capacity(total);
        let mut finished = 0usize;
        let mut lead_errors = 0usize;
        let mut fatal: Option<RunError> = None;

        loop {
            while fatal.is_none() && !is_cancelled(&cancel) && tasks.len() < pool_size {
                let Some((index, lead)) = queue.next() else {
                    break;
                };
                let orchestrator = Arc::clone(&self.orchestrator);
                let config = Arc::clone(&config);
                let stop = cancel.clone();
                tasks.spawn(async move {
                    tokio::select! {
                        enriched = orchestrator.enrich(&lead) => {
                            let result = engine.score(&enriched, &config);
                            LeadOutcome::Scored(ScoredLead { index, enriched, result })
                        }
                        _ = cancelled(stop) => LeadOutcome::Cancelled,
                    }
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok(LeadOutcome::Scored(lead)) => {
                    finished += 1;
                    if lead.is_lead_error() {
                        lead_errors += 1;
                        tracing::warn!(
                            "Lead {} failed on every source it reached",
                            lead.enriched.lead.lead_id
                        );
                    }
                    scored.push(lead);
                }
                Ok(LeadOutcome::Cancelled) => continue,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    finished += 1;
                    lead_errors += 1;
                    tracing::error!("✗ Lead task crashed in run {}: {}", run_id, e);
                }
            }

            if fatal.is_none() && lead_errors > ceiling {
                tracing::error!(
                    "Run {}: {} lead errors exceeded the ceiling of {}, aborting",
                    run_id,
                    lead_errors,
                    ceiling
                );
                fatal = Some(RunError::BatchFatal {
                    errors: lead_errors,
                    ceiling,
                });
                tasks.abort_all();
                continue;
            }

            if fatal.is_none() {
                let progress = (finished * 100 / total.max(1)).min(99) as u8;
                if let Err(e) = self.state.update_progress(
                    run_id,
                    progress,
                    format!("Processed {}/{} leads", finished, total),
                ) {
                    tracing::debug!("Run {}: progress update rejected: {}", run_id, e);
                }
            }
        }

        scored.sort_by_key(|lead| lead.index);

        let error = interrupted(fatal, is_cancelled(&cancel), finished, total);
        if let Some(error) = error {
            self.finish_failed(run_id, &error);
            return RunOutcome {
                run_id,
                scored,
                emitted: Vec::new(),
                lead_errors,
                error: Some(error),
            };
        }

        let emitted = select_targets(&scored, &config);
        let target_count = emitted.len();
        let delivered = self
            .sink
            .emit(run_id, emitted.clone())
            .await
            .with_context(|| format!("Emitting results of run {}", run_id));

        let error = match delivered {
            Ok(()) => {
                if let Err(e) = self.state.complete(
                    run_id,
                    target_count,
                    format!(
                        "Scored {} leads, {} target(s) emitted",
                        scored.len(),
                        target_count
                    ),
                ) {
                    tracing::error!("Run {}: completion rejected: {}", run_id, e);
                }
                None
            }
            Err(e) => {
                let error = RunError::Sink(e.to_string());
                self.finish_failed(run_id, &error);
                Some(error)
            }
        };

        RunOutcome {
            run_id,
            emitted: if error.is_none() { emitted } else { Vec::new() },
            scored,
            lead_errors,
            error,
        }
    }

    fn finish_failed(&self, run_id: Uuid, error: &RunError) {
        if let Err(e) = self.state.fail(run_id, vec![error.to_string()]) {
            tracing::error!("Run {}: failure transition rejected: {}", run_id, e);
        }
    }
}

/// Target leads that pass the downstream filters, best score first. Equal
/// scores keep input order.
pub fn select_targets(scored: &[ScoredLead], config: &ScoringConfig) -> Vec<ScoredLeadRecord> {
    let mut targets: Vec<&ScoredLead> = scored
        .iter()
        .filter(|lead| lead.result.is_target && config.admits(&lead.enriched))
        .collect();
    targets.sort_by(|a, b| b.result.score.cmp(&a.result.score));
    targets
        .into_iter()
        .map(|lead| ScoredLeadRecord::new(&lead.enriched.lead, &lead.result))
        .collect()
}

/// A cancel that lands after every lead finished does not fail the run.
fn interrupted(
    fatal: Option<RunError>,
    cancel_requested: bool,
    finished: usize,
    total: usize,
) -> Option<RunError> {
    fatal.or_else(|| (cancel_requested && finished < total).then_some(RunError::Cancelled))
}

fn is_cancelled(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Resolves once the run is cancelled. A closed channel never resolves.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}
