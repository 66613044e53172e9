//! Bulk writer
//!
//! Issues many independent writes concurrently, bounded by a semaphore.
//! Every write carries a caller-chosen tag (e.g. the id of the document that
//! produced it) so failures can be attributed after [`BulkWriter::close`].
//!
//! Writes are not atomic with one another. `close` must be awaited before the
//! outcome of any enqueued write is known; a writer dropped without closing
//! leaves its writes running detached.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::{DocPath, DocumentStore, Fields, Write};
use crate::{Result, StorageError};

/// Default number of writes allowed in flight at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 20;

struct PendingWrite {
    tag: String,
    path: DocPath,
    handle: JoinHandle<Result<()>>,
}

/// A write that failed, with the tag it was enqueued under.
#[derive(Debug)]
pub struct BulkWriteFailure {
    pub tag: String,
    pub path: DocPath,
    pub error: StorageError,
}

/// Outcome of all writes issued through one writer.
#[derive(Debug, Default)]
pub struct BulkWriteReport {
    pub written: usize,
    pub failures: Vec<BulkWriteFailure>,
}

impl BulkWriteReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Tags with at least one failed write.
    pub fn failed_tags(&self) -> HashSet<&str> {
        self.failures.iter().map(|f| f.tag.as_str()).collect()
    }
}

pub struct BulkWriter<S> {
    store: Arc<S>,
    permits: Arc<Semaphore>,
    pending: Mutex<Vec<PendingWrite>>,
}

impl<S> BulkWriter<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(store: Arc<S>, max_in_flight: usize) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, tag: impl Into<String>, path: DocPath, body: Fields) {
        self.enqueue(tag.into(), Write::Set { path, body });
    }

    pub fn update(&self, tag: impl Into<String>, path: DocPath, fields: Fields) {
        self.enqueue(tag.into(), Write::Update { path, fields });
    }

    pub fn delete(&self, tag: impl Into<String>, path: DocPath) {
        self.enqueue(tag.into(), Write::Delete { path });
    }

    /// Writes enqueued and not yet collected by `close`.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    fn enqueue(&self, tag: String, write: Write) {
        let store = Arc::clone(&self.store);
        let permits = Arc::clone(&self.permits);
        let path = write.path().clone();

        let handle = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| StorageError::unavailable("Bulk writer closed"))?;
            match write {
                Write::Set { path, body } => store.set(&path, body).await,
                Write::Update { path, fields } => store.update(&path, fields).await,
                Write::Delete { path } => store.delete(&path).await,
            }
        });

        self.pending.lock().push(PendingWrite { tag, path, handle });
    }

    /// Wait for every enqueued write and report the outcome.
    pub async fn close(self) -> BulkWriteReport {
        let pending = self.pending.into_inner();
        let mut report = BulkWriteReport::default();

        for write in pending {
            let outcome = match write.handle.await {
                Ok(result) => result,
                Err(join_err) => Err(StorageError::database(format!(
                    "Bulk write task failed: {}",
                    join_err
                ))),
            };
            match outcome {
                Ok(()) => report.written += 1,
                Err(error) => {
                    warn!("Bulk write to {} failed: {}", write.path, error);
                    report.failures.push(BulkWriteFailure {
                        tag: write.tag,
                        path: write.path,
                        error,
                    });
                }
            }
        }

        debug!(
            "Bulk writer closed: {} written, {} failed",
            report.written,
            report.failures.len()
        );
        report
    }
}
