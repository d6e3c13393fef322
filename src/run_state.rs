//! Lifecycle of a single scoring run.
//!
//! `idle -> running -> {completed, error}`, then `reset` back to `idle`.
//! The machine does no work itself; the batch runner drives every
//! transition and each transition names the run it belongs to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Error,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Error)
    }
}

/// Snapshot returned by [`RunStateMachine::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub state: RunState,
    /// Percent, `0..=100`. Unspecified once the run has failed.
    pub progress: u8,
    pub message: String,
    /// Number of target leads; set on completion.
    pub total_contacts: Option<usize>,
    /// Triggering error messages; set on failure.
    pub errors: Vec<String>,
    pub run_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            progress: 0,
            message: "Ready".to_string(),
            total_contacts: None,
            errors: Vec::new(),
            run_id: None,
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStateError {
    /// A run is in progress.
    AlreadyRunning,
    /// The previous run finished and the machine has not been reset.
    NotIdle(RunState),
    /// The operation needs a live run.
    NotRunning,
    /// The transition names a run that is not the live one.
    StaleRun(Uuid),
}

impl fmt::Display for RunStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStateError::AlreadyRunning => write!(f, "A scoring run is already in progress"),
            RunStateError::NotIdle(state) => {
                write!(f, "Run state is {:?}; reset before starting", state)
            }
            RunStateError::NotRunning => write!(f, "No scoring run is in progress"),
            RunStateError::StaleRun(id) => write!(f, "Run {} is not the live run", id),
        }
    }
}

impl std::error::Error for RunStateError {}

impl From<RunStateError> for AppError {
    fn from(err: RunStateError) -> Self {
        AppError::Conflict(err.to_string())
    }
}

/// Handed to the driver by a successful [`RunStateMachine::start`].
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub run_id: Uuid,
    /// Flips to `true` when the run is cancelled.
    pub cancel: watch::Receiver<bool>,
}

struct Inner {
    status: RunStatus,
    cancel: Option<watch::Sender<bool>>,
}

pub struct RunStateMachine {
    inner: Mutex<Inner>,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: RunStatus::default(),
                cancel: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live<'a>(inner: &'a mut Inner, run_id: Uuid) -> Result<&'a mut Inner, RunStateError> {
        match (inner.status.state, inner.status.run_id) {
            (RunState::Running, Some(live)) if live == run_id => Ok(inner),
            (RunState::Running, _) => Err(RunStateError::StaleRun(run_id)),
            _ => Err(RunStateError::NotRunning),
        }
    }

    /// `idle -> running`. Leaves the state untouched when rejected.
    pub fn start(&self, message: impl Into<String>) -> Result<RunTicket, RunStateError> {
        let mut inner = self.lock();
        match inner.status.state {
            RunState::Idle => {}
            RunState::Running => return Err(RunStateError::AlreadyRunning),
            other => return Err(RunStateError::NotIdle(other)),
        }

        let run_id = Uuid::new_v4();
        let (tx, rx) = watch::channel(false);
        inner.status = RunStatus {
            state: RunState::Running,
            progress: 0,
            message: message.into(),
            run_id: Some(run_id),
            started_at: Some(Utc::now()),
            ..RunStatus::default()
        };
        inner.cancel = Some(tx);

        tracing::info!("Run {} started", run_id);
        Ok(RunTicket { run_id, cancel: rx })
    }

    /// Lower percentages are ignored; the message always updates.
    pub fn update_progress(
        &self,
        run_id: Uuid,
        progress: u8,
        message: impl Into<String>,
    ) -> Result<(), RunStateError> {
        let mut guard = self.lock();
        let inner = Self::live(&mut guard, run_id)?;
        inner.status.progress = inner.status.progress.max(progress.min(100));
        inner.status.message = message.into();
        Ok(())
    }

    /// `running -> completed` with the number of target leads.
    pub fn complete(
        &self,
        run_id: Uuid,
        total_contacts: usize,
        message: impl Into<String>,
    ) -> Result<(), RunStateError> {
        let mut guard = self.lock();
        let inner = Self::live(&mut guard, run_id)?;
        inner.status.state = RunState::Completed;
        inner.status.progress = 100;
        inner.status.message = message.into();
        inner.status.total_contacts = Some(total_contacts);
        inner.status.finished_at = Some(Utc::now());
        inner.cancel = None;

        tracing::info!("✓ Run {} completed with {} target lead(s)", run_id, total_contacts);
        Ok(())
    }

    /// `running -> error`. The first error becomes the status message.
    pub fn fail(&self, run_id: Uuid, errors: Vec<String>) -> Result<(), RunStateError> {
        let mut guard = self.lock();
        let inner = Self::live(&mut guard, run_id)?;
        inner.status.state = RunState::Error;
        inner.status.message = errors
            .first()
            .cloned()
            .unwrap_or_else(|| "Scoring run failed".to_string());
        inner.status.errors = errors;
        inner.status.finished_at = Some(Utc::now());
        inner.cancel = None;

        tracing::error!("✗ Run {} failed: {}", run_id, inner.status.message);
        Ok(())
    }

    /// Signals the live run to stop. The driver performs the `error`
    /// transition once it has drained.
    pub fn cancel(&self) -> Result<Uuid, RunStateError> {
        let inner = self.lock();
        let (RunState::Running, Some(run_id), Some(tx)) =
            (inner.status.state, inner.status.run_id, inner.cancel.as_ref())
        else {
            return Err(RunStateError::NotRunning);
        };
        tx.send_replace(true);
        tracing::warn!("Run {} cancellation requested", run_id);
        Ok(run_id)
    }

    /// Terminal (or idle) `-> idle`. Rejected while running.
    pub fn reset(&self) -> Result<(), RunStateError> {
        let mut inner = self.lock();
        if inner.status.state == RunState::Running {
            return Err(RunStateError::AlreadyRunning);
        }
        inner.status = RunStatus::default();
        inner.cancel = None;
        Ok(())
    }

    pub fn status(&self) -> RunStatus {
        self.lock().status.clone()
    }
}
