//! Processing-state reporting
//!
//! A backfill run ends in exactly one terminal state, reported once through a
//! [`ProcessingStateReporter`]. The wire names match what the hosting runtime
//! displays (`PROCESSING_COMPLETE`, ...).

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::error::{Result, UniquenessError};

/// Terminal state message when no backfill target is configured.
pub const NO_BACKFILL_TARGET: &str = "Existing documents were not checked for uniqueness because there is no backfill collection or backfill field name configured. If you want to fill in missing checks, reconfigure this instance.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingState {
    #[serde(rename = "PROCESSING_COMPLETE")]
    Complete,
    #[serde(rename = "PROCESSING_WARNING")]
    Warning,
    #[serde(rename = "PROCESSING_FAILED")]
    Failed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Complete => "PROCESSING_COMPLETE",
            ProcessingState::Warning => "PROCESSING_WARNING",
            ProcessingState::Failed => "PROCESSING_FAILED",
        }
    }

    /// Complete with no errors, Warning when some documents succeeded,
    /// Failed otherwise.
    pub fn from_counts(success_count: u64, error_count: u64) -> Self {
        if error_count == 0 {
            ProcessingState::Complete
        } else if success_count > 0 {
            ProcessingState::Warning
        } else {
            ProcessingState::Failed
        }
    }
}

impl FromStr for ProcessingState {
    type Err = UniquenessError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PROCESSING_COMPLETE" => Ok(ProcessingState::Complete),
            "PROCESSING_WARNING" => Ok(ProcessingState::Warning),
            "PROCESSING_FAILED" => Ok(ProcessingState::Failed),
            _ => Err(UniquenessError::serialization(format!(
                "Invalid processing state: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal state plus its human-readable summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingReport {
    pub state: ProcessingState,
    pub message: String,
}

impl ProcessingReport {
    pub fn new(state: ProcessingState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }

    pub fn no_backfill_target() -> Self {
        Self::new(ProcessingState::Complete, NO_BACKFILL_TARGET)
    }

    /// Summary of a finished backfill run.
    pub fn from_counts(success_count: u64, error_count: u64, elapsed_ms: u64) -> Self {
        let state = ProcessingState::from_counts(success_count, error_count);
        let message = match state {
            ProcessingState::Complete => format!(
                "Successfully checked uniqueness for {} documents in {}ms.",
                success_count, elapsed_ms
            ),
            ProcessingState::Warning | ProcessingState::Failed => format!(
                "Successfully checked uniqueness for {} documents, {} errors in {}ms. See function logs for specific error messages.",
                success_count, error_count, elapsed_ms
            ),
        };
        Self { state, message }
    }
}

#[async_trait]
pub trait ProcessingStateReporter: Send + Sync {
    async fn set_processing_state(&self, report: ProcessingReport) -> Result<()>;
}

/// Emits reports as log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

#[async_trait]
impl ProcessingStateReporter for LogReporter {
    async fn set_processing_state(&self, report: ProcessingReport) -> Result<()> {
        match report.state {
            ProcessingState::Complete => info!(state = %report.state, "{}", report.message),
            ProcessingState::Warning => warn!(state = %report.state, "{}", report.message),
            ProcessingState::Failed => error!(state = %report.state, "{}", report.message),
        }
        Ok(())
    }
}

/// Keeps every report it receives.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    reports: Mutex<Vec<ProcessingReport>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ProcessingReport> {
        self.reports.lock().clone()
    }

    pub fn last(&self) -> Option<ProcessingReport> {
        self.reports.lock().last().cloned()
    }
}

#[async_trait]
impl ProcessingStateReporter for MemoryReporter {
    async fn set_processing_state(&self, report: ProcessingReport) -> Result<()> {
        self.reports.lock().push(report);
        Ok(())
    }
}
