//! Backfill orchestrator
//!
//! Brings an existing collection under the uniqueness constraint, one page
//! per invocation. Progress lives only in the task payload: each step either
//! enqueues the next cursor or reports a terminal processing state.
//!
//! ```text
//! Running ──(full page)──▶ Running (re-enqueued, offset + 250)
//!    │
//!    └──(short page)──▶ Complete | Warning | Failed
//! ```
//!
//! # Repair mode
//!
//! Existing documents are not rejected on conflict. A document whose key is
//! already claimed by another document gets the claiming entry flagged with
//! `duplicate: true`; documents sharing a key within one page are grouped so
//! the lowest id claims the entry.
//!
//! # Pagination
//!
//! Pages are addressed by numeric offset into the id-ordered collection.
//! Documents created or deleted in the collection while a backfill is running
//! can shift the offsets, so some documents may be skipped or processed twice.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uniqfield_storage::{BulkWriter, Document, DocumentStore, Fields, DEFAULT_MAX_IN_FLIGHT};

use crate::config::ExtensionConfig;
use crate::error::Result;
use crate::key::{IndexKey, KeyNormalizer, NonStringValue};
use crate::queue::TaskQueue;
use crate::reporter::{ProcessingReport, ProcessingStateReporter};
use crate::target::{FieldTarget, DUPLICATE_FIELD};

/// Documents read per invocation.
pub const DOCS_PER_BACKFILL: usize = 250;

/// Milliseconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp_millis())
}

// ═══════════════════════════════════════════════════════════════════════════
// Task payload and cursor
// ═══════════════════════════════════════════════════════════════════════════

/// Queue payload. Every field is optional; the first task is `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
}

impl BackfillTask {
    pub fn initial() -> Self {
        Self::default()
    }

    /// Fill in defaults; a missing start time means this run starts now.
    pub fn resolve(&self, now_ms: i64) -> BackfillCursor {
        BackfillCursor {
            offset: self.offset.unwrap_or(0),
            success_count: self.success_count.unwrap_or(0),
            error_count: self.error_count.unwrap_or(0),
            start_time: self.start_time.unwrap_or(now_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillCursor {
    pub offset: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub start_time: i64,
}

impl BackfillCursor {
    pub fn to_task(&self) -> BackfillTask {
        BackfillTask {
            offset: Some(self.offset),
            success_count: Some(self.success_count),
            error_count: Some(self.error_count),
            start_time: Some(self.start_time),
        }
    }

    fn tally(&self, page: &PageSummary) -> Self {
        Self {
            offset: self.offset,
            success_count: self.success_count + page.success_count,
            error_count: self.error_count + page.error_count,
            start_time: self.start_time,
        }
    }
}

/// Per-page counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageSummary {
    /// Documents read from the collection.
    pub fetched: usize,
    pub success_count: u64,
    pub error_count: u64,
    /// Entries created for documents that had none.
    pub indexed: usize,
    /// Entries flagged as duplicated.
    pub duplicates: usize,
    /// Documents with no constrained value.
    pub skipped: usize,
}

/// Result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillStep {
    /// Page was full; `next` has been enqueued.
    Continue {
        next: BackfillCursor,
        page: PageSummary,
    },
    /// Terminal state has been reported.
    Finished {
        report: ProcessingReport,
        page: PageSummary,
    },
}

impl BackfillStep {
    pub fn page(&self) -> &PageSummary {
        match self {
            BackfillStep::Continue { page, .. } | BackfillStep::Finished { page, .. } => page,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════════════════════

/// Documents of one page sharing a key, in id order.
struct KeyGroup {
    key: IndexKey,
    members: Vec<(String, String)>,
}

impl KeyGroup {
    fn ids(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(id, _)| id.as_str())
    }

    fn has_duplicates(&self) -> bool {
        self.members.len() > 1
    }
}

pub struct BackfillOrchestrator<S> {
    store: Arc<S>,
    queue: Arc<dyn TaskQueue>,
    reporter: Arc<dyn ProcessingStateReporter>,
    target: Option<FieldTarget>,
    normalizer: KeyNormalizer,
    max_in_flight: usize,
    clock: Clock,
}

impl<S> BackfillOrchestrator<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        queue: Arc<dyn TaskQueue>,
        reporter: Arc<dyn ProcessingStateReporter>,
        target: Option<FieldTarget>,
        normalizer: KeyNormalizer,
    ) -> Self {
        Self {
            store,
            queue,
            reporter,
            target,
            normalizer,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            clock: system_clock(),
        }
    }

    pub fn from_config(
        config: &ExtensionConfig,
        store: Arc<S>,
        queue: Arc<dyn TaskQueue>,
        reporter: Arc<dyn ProcessingStateReporter>,
    ) -> Self {
        Self::new(
            store,
            queue,
            reporter,
            config.backfill_target(),
            config.normalizer(),
        )
        .with_max_in_flight(config.bulk_max_in_flight)
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn target(&self) -> Option<&FieldTarget> {
        self.target.as_ref()
    }

    /// Process one page.
    ///
    /// # Errors
    ///
    /// A failed page read, enqueue or state report is returned as is; the
    /// task is not retried here. Per-document failures are only counted.
    pub async fn run_step(&self, task: BackfillTask) -> Result<BackfillStep> {
        let cursor = task.resolve((self.clock)());

        let Some(target) = &self.target else {
            let report = ProcessingReport::no_backfill_target();
            self.reporter.set_processing_state(report.clone()).await?;
            info!("No backfill target configured");
            return Ok(BackfillStep::Finished {
                report,
                page: PageSummary::default(),
            });
        };

        info!(
            "Backfilling {} from offset {}",
            target.index_collection(),
            cursor.offset
        );
        let docs = self
            .store
            .list_documents(target.collection(), cursor.offset as usize, DOCS_PER_BACKFILL)
            .await?;

        let page = self.process_page(target, docs).await;
        let totals = cursor.tally(&page);

        if page.fetched == DOCS_PER_BACKFILL {
            let next = BackfillCursor {
                offset: cursor.offset + DOCS_PER_BACKFILL as u64,
                ..totals
            };
            self.queue.enqueue(next.to_task()).await?;
            info!(
                "Page at offset {} done ({} ok, {} errors), next offset {}",
                cursor.offset, page.success_count, page.error_count, next.offset
            );
            return Ok(BackfillStep::Continue { next, page });
        }

        let elapsed_ms = ((self.clock)() - totals.start_time).max(0) as u64;
        let report =
            ProcessingReport::from_counts(totals.success_count, totals.error_count, elapsed_ms);
        self.reporter.set_processing_state(report.clone()).await?;
        info!(
            "Backfill of {} finished: {}",
            target.index_collection(),
            report.state
        );
        Ok(BackfillStep::Finished { report, page })
    }

    async fn process_page(&self, target: &FieldTarget, docs: Vec<Document>) -> PageSummary {
        let mut page = PageSummary {
            fetched: docs.len(),
            ..PageSummary::default()
        };

        let mut groups: BTreeMap<IndexKey, KeyGroup> = BTreeMap::new();
        for doc in docs {
            let value = doc.field(target.field_name());
            match self.normalizer.normalize_value(value) {
                Ok(None) => {
                    debug!("Document {} without unique field, no processing is required", doc.id);
                    page.skipped += 1;
                    page.success_count += 1;
                }
                Ok(Some(key)) => {
                    let raw = value.and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    groups
                        .entry(key.clone())
                        .or_insert_with(|| KeyGroup {
                            key,
                            members: Vec::new(),
                        })
                        .members
                        .push((doc.id, raw));
                }
                Err(NonStringValue(found)) => {
                    warn!(
                        "Error executing backfill with {}: document {} has non-string {} value {}",
                        target.collection(),
                        doc.id,
                        target.field_name(),
                        found
                    );
                    page.error_count += 1;
                }
            }
        }

        let groups: Vec<KeyGroup> = groups.into_values().collect();
        let lookups = join_all(groups.iter().map(|group| async move {
            let path = target.index_path(&group.key)?;
            let existing = self.store.get(&path).await?;
            Ok::<_, crate::error::UniquenessError>((path, existing))
        }))
        .await;

        let writer = BulkWriter::new(Arc::clone(&self.store), self.max_in_flight);
        let mut failed_groups: Vec<&KeyGroup> = Vec::new();
        let mut written_groups: Vec<&KeyGroup> = Vec::new();

        for (group, lookup) in groups.iter().zip(lookups) {
            let (path, existing) = match lookup {
                Ok(found) => found,
                Err(e) => {
                    warn!(
                        "Error executing backfill with {}: {}: {}",
                        target.collection(),
                        group.key,
                        e
                    );
                    failed_groups.push(group);
                    continue;
                }
            };
            let tag = group.key.as_str();
            let (claimant, raw) = &group.members[0];

            match existing {
                None => {
                    let mut entry = target.index_entry(claimant, raw);
                    if group.has_duplicates() {
                        entry.extend(FieldTarget::duplicate_marker());
                        self.log_duplicate(target, group);
                        page.duplicates += 1;
                    }
                    writer.set(tag, path, entry);
                    page.indexed += 1;
                }
                Some(entry) => {
                    let owner = entry_owner(&entry);
                    let owned_here = owner.map_or(false, |o| group.ids().any(|id| id == o));
                    if !owned_here || group.has_duplicates() {
                        if entry.get(DUPLICATE_FIELD) != Some(&serde_json::Value::Bool(true)) {
                            writer.update(tag, path, FieldTarget::duplicate_marker());
                        }
                        self.log_duplicate(target, group);
                        page.duplicates += 1;
                    }
                }
            }
            written_groups.push(group);
        }

        let report = writer.close().await;
        let failed_tags: HashSet<&str> = report.failed_tags();

        for group in failed_groups {
            page.error_count += group.members.len() as u64;
        }
        for group in written_groups {
            let members = group.members.len() as u64;
            if failed_tags.contains(group.key.as_str()) {
                warn!(
                    "Error executing backfill with {}: {}: index write failed",
                    target.collection(),
                    group.key
                );
                page.error_count += members;
            } else {
                page.success_count += members;
            }
        }
        page
    }

    fn log_duplicate(&self, target: &FieldTarget, group: &KeyGroup) {
        warn!(
            "Document with unique field already existed, document with field {} with value {} in {} collection is duplicated",
            target.field_name(),
            group.key,
            target.collection()
        );
    }
}

fn entry_owner(entry: &Fields) -> Option<&str> {
    entry.get(uniqfield_storage::ID_FIELD).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::LocalTaskQueue;
    use crate::reporter::{MemoryReporter, ProcessingState};
    use serde_json::json;
    use uniqfield_storage::{DocPath, MemoryDocumentStore};

    struct Harness {
        store: Arc<MemoryDocumentStore>,
        queue: Arc<LocalTaskQueue>,
        reporter: Arc<MemoryReporter>,
        orchestrator: BackfillOrchestrator<MemoryDocumentStore>,
    }

    fn harness(target: Option<FieldTarget>) -> Harness {
        let store = Arc::new(MemoryDocumentStore::new());
        let queue = Arc::new(LocalTaskQueue::new());
        let reporter = Arc::new(MemoryReporter::new());
        let orchestrator = BackfillOrchestrator::new(
            Arc::clone(&store),
            queue.clone(),
            reporter.clone(),
            target,
            KeyNormalizer::new(false),
        )
        .with_clock(Arc::new(|| 1_000i64));
        Harness {
            store,
            queue,
            reporter,
            orchestrator,
        }
    }

    fn users() -> Option<FieldTarget> {
        FieldTarget::new("users", "username").ok()
    }

    async fn put(store: &MemoryDocumentStore, collection: &str, id: &str, body: serde_json::Value) {
        let serde_json::Value::Object(body) = body else {
            panic!("body must be an object")
        };
        store
            .set(&DocPath::new(collection, id).unwrap(), body)
            .await
            .unwrap();
    }

    #[test]
    fn test_task_payload_defaults() {
        let task: BackfillTask = serde_json::from_value(json!({})).unwrap();
        let cursor = task.resolve(42);
        assert_eq!(cursor.offset, 0);
        assert_eq!(cursor.success_count, 0);
        assert_eq!(cursor.start_time, 42);

        let task: BackfillTask =
            serde_json::from_value(json!({"offset": 250, "successCount": 249, "errorCount": 1, "startTime": 7}))
                .unwrap();
        assert_eq!(task.resolve(42).start_time, 7);
        assert_eq!(
            serde_json::to_value(task.resolve(42).to_task()).unwrap(),
            json!({"offset": 250, "successCount": 249, "errorCount": 1, "startTime": 7})
        );
    }

    #[tokio::test]
    async fn test_no_target_reports_complete() {
        let h = harness(None);
        let step = h.orchestrator.run_step(BackfillTask::initial()).await.unwrap();

        let BackfillStep::Finished { report, .. } = step else {
            panic!("expected Finished")
        };
        assert_eq!(report, ProcessingReport::no_backfill_target());
        assert_eq!(h.reporter.last(), Some(report));
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_empty_collection_completes() {
        let h = harness(users());
        let step = h.orchestrator.run_step(BackfillTask::initial()).await.unwrap();

        let BackfillStep::Finished { report, page } = step else {
            panic!("expected Finished")
        };
        assert_eq!(page.fetched, 0);
        assert_eq!(report.state, ProcessingState::Complete);
        assert_eq!(
            report.message,
            "Successfully checked uniqueness for 0 documents in 0ms."
        );
    }

    #[tokio::test]
    async fn test_short_page_indexes_and_flags_duplicates() {
        let h = harness(users());
        put(&h.store, "users", "1", json!({"username": "johnDoe"})).await;
        put(&h.store, "users", "2", json!({"username": "janeDoe"})).await;
        put(&h.store, "users", "3", json!({"username": "johnDoe"})).await;
        put(&h.store, "users", "4", json!({"age": 3})).await;
        put(&h.store, "users-username", "janeDoe", json!({"id": "99", "username": "janeDoe"})).await;

        let step = h.orchestrator.run_step(BackfillTask::initial()).await.unwrap();
        let page = *step.page();
        assert_eq!(page.fetched, 4);
        assert_eq!(page.success_count, 4);
        assert_eq!(page.error_count, 0);
        assert_eq!(page.skipped, 1);
        assert_eq!(page.indexed, 1);
        assert_eq!(page.duplicates, 2);

        let john = h
            .store
            .get(&DocPath::new("users-username", "johnDoe").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            serde_json::Value::Object(john),
            json!({"id": "1", "username": "johnDoe", "duplicate": true})
        );
        let jane = h
            .store
            .get(&DocPath::new("users-username", "janeDoe").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            serde_json::Value::Object(jane),
            json!({"id": "99", "username": "janeDoe", "duplicate": true})
        );
        assert_eq!(h.reporter.last().unwrap().state, ProcessingState::Complete);
    }

    #[tokio::test]
    async fn test_already_indexed_document_is_untouched() {
        let h = harness(users());
        put(&h.store, "users", "1", json!({"username": "johnDoe"})).await;
        put(&h.store, "users-username", "johnDoe", json!({"id": "1", "username": "johnDoe"})).await;

        let step = h.orchestrator.run_step(BackfillTask::initial()).await.unwrap();
        assert_eq!(step.page().duplicates, 0);
        assert_eq!(step.page().indexed, 0);
        assert_eq!(step.page().success_count, 1);
    }

    #[tokio::test]
    async fn test_full_page_enqueues_next_cursor() {
        let h = harness(users());
        for i in 0..DOCS_PER_BACKFILL {
            put(&h.store, "users", &format!("u{:04}", i), json!({"username": format!("name{}", i)})).await;
        }

        let step = h
            .orchestrator
            .run_step(BackfillTask {
                success_count: Some(10),
                start_time: Some(500),
                ..BackfillTask::default()
            })
            .await
            .unwrap();

        let BackfillStep::Continue { next, page } = step else {
            panic!("expected Continue")
        };
        assert_eq!(page.success_count, DOCS_PER_BACKFILL as u64);
        assert_eq!(next.offset, DOCS_PER_BACKFILL as u64);
        assert_eq!(next.success_count, 10 + DOCS_PER_BACKFILL as u64);
        assert_eq!(next.start_time, 500);
        assert_eq!(h.queue.len(), 1);
        assert!(h.reporter.last().is_none());
    }

    #[tokio::test]
    async fn test_write_and_value_failures_are_counted() {
        let h = harness(users());
        put(&h.store, "users", "1", json!({"username": "johnDoe"})).await;
        put(&h.store, "users", "2", json!({"username": 42})).await;
        put(&h.store, "users", "3", json!({"username": "janeDoe"})).await;
        h.store.fail_writes_to("johnDoe");

        let step = h.orchestrator.run_step(BackfillTask::initial()).await.unwrap();
        let BackfillStep::Finished { report, page } = step else {
            panic!("expected Finished")
        };
        assert_eq!(page.success_count, 1);
        assert_eq!(page.error_count, 2);
        assert_eq!(report.state, ProcessingState::Warning);
    }

    #[tokio::test]
    async fn test_listing_failure_is_returned() {
        let h = harness(users());
        h.store.fail_next_listings(1);

        let err = h
            .orchestrator
            .run_step(BackfillTask::initial())
            .await
            .unwrap_err();
        assert!(err.category().is_retryable());
        assert!(h.reporter.last().is_none());
        assert!(h.queue.is_empty());
    }
}
