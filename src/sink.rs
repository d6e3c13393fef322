use async_trait::async_trait;
use std::sync::RwLock;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::ScoredLeadRecord;

/// Receives the scored records of each completed run, already filtered and
/// sorted by score descending.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn emit(&self, run_id: Uuid, records: Vec<ScoredLeadRecord>) -> Result<(), AppError>;
}

/// Records emitted by one run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EmittedRun {
    pub run_id: Uuid,
    pub records: Vec<ScoredLeadRecord>,
}

/// Keeps the most recent run's records in memory.
#[derive(Default)]
pub struct MemorySink {
    latest: RwLock<Option<EmittedRun>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<EmittedRun> {
        self.latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        *self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn emit(&self, run_id: Uuid, records: Vec<ScoredLeadRecord>) -> Result<(), AppError> {
        tracing::info!("Storing {} record(s) for run {}", records.len(), run_id);
        *self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(EmittedRun { run_id, records });
        Ok(())
    }
}
