//! Backfill task queue
//!
//! The orchestrator only ever enqueues; popping and retrying belong to the
//! worker that drains the queue. [`drain_backfill`] is that worker for the
//! in-process [`LocalTaskQueue`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{error, info, warn};
use uniqfield_storage::DocumentStore;

use crate::backfill::{BackfillOrchestrator, BackfillStep, BackfillTask};
use crate::error::{Result, UniquenessError};
use crate::reporter::ProcessingReport;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: BackfillTask) -> Result<()>;
}

/// A task plus the number of failed attempts so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub task: BackfillTask,
    pub attempts: u32,
}

/// In-process FIFO queue.
#[derive(Debug, Default)]
pub struct LocalTaskQueue {
    tasks: Mutex<VecDeque<QueuedTask>>,
}

impl LocalTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: BackfillTask) {
        self.tasks.lock().push_back(QueuedTask { task, attempts: 0 });
    }

    pub fn pop(&self) -> Option<QueuedTask> {
        self.tasks.lock().pop_front()
    }

    /// Put a failed task back at the head of the queue.
    pub fn retry(&self, queued: QueuedTask) {
        self.tasks.lock().push_front(queued);
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, task: BackfillTask) -> Result<()> {
        self.push(task);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per task, first run included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, error: &UniquenessError, attempts_so_far: u32) -> bool {
        error.category().is_retryable() && attempts_so_far < self.max_attempts
    }
}

#[derive(Debug, Default)]
pub struct DrainSummary {
    /// Orchestrator invocations, failed ones included.
    pub steps: usize,
    pub retries: usize,
    /// Terminal report, if the run reached one.
    pub report: Option<ProcessingReport>,
    /// Error that made the driver give up on a task.
    pub abandoned: Option<UniquenessError>,
}

/// Run queued backfill steps until the queue is empty.
pub async fn drain_backfill<S>(
    orchestrator: &BackfillOrchestrator<S>,
    queue: &LocalTaskQueue,
    policy: RetryPolicy,
) -> DrainSummary
where
    S: DocumentStore + 'static,
{
    let mut summary = DrainSummary::default();

    while let Some(mut queued) = queue.pop() {
        summary.steps += 1;
        match orchestrator.run_step(queued.task.clone()).await {
            Ok(BackfillStep::Continue { .. }) => {}
            Ok(BackfillStep::Finished { report, .. }) => {
                info!("Backfill drained: {}", report.state);
                summary.report = Some(report);
            }
            Err(e) => {
                queued.attempts += 1;
                if policy.should_retry(&e, queued.attempts) {
                    warn!(
                        "Backfill step failed (attempt {}/{}), retrying: {}",
                        queued.attempts, policy.max_attempts, e
                    );
                    summary.retries += 1;
                    queue.retry(queued);
                } else {
                    error!(
                        "Backfill step abandoned after {} attempt(s) [{}]: {}",
                        queued.attempts,
                        e.category(),
                        e
                    );
                    summary.abandoned = Some(e);
                }
            }
        }
    }
    summary
}
