/*
 * Uniqfield Orchestration - Field Uniqueness Engine
 *
 * Enforces that one field of a collection holds unique values, using an
 * index collection `<collection>-<fieldName>` keyed by the normalized value.
 *
 * Architecture:
 * - Key Normalizer (plain or MD5-hashed keys)
 * - Uniqueness Enforcer (create/update in transactions, delete in a batch)
 * - Callable Service (auth + request validation)
 * - Backfill Orchestrator (paged, resumable, repair mode)
 * - Task Queue + Processing-State Reporter
 */

// Public modules
pub mod backfill;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod key;
pub mod logging;
pub mod queue;
pub mod reporter;
pub mod request;
pub mod service;
pub mod target;

// Re-exports
pub use backfill::{
    BackfillCursor, BackfillOrchestrator, BackfillStep, BackfillTask, Clock, PageSummary,
    DOCS_PER_BACKFILL,
};
pub use config::ExtensionConfig;
pub use enforcer::{MutationOutcome, UniquenessEnforcer};
pub use error::{ErrorCategory, Result, UniquenessError};
pub use key::{IndexKey, KeyNormalizer};
pub use logging::init_logging;
pub use queue::{drain_backfill, DrainSummary, LocalTaskQueue, QueuedTask, RetryPolicy, TaskQueue};
pub use reporter::{
    LogReporter, MemoryReporter, ProcessingReport, ProcessingState, ProcessingStateReporter,
};
pub use request::{
    CallContext, ChangeType, Mutation, MutationRequest, MutationResponse, ValidatedMutation,
};
pub use service::{FieldUniquenessService, SUCCESS_MESSAGE};
pub use target::FieldTarget;
