//! uniqfield-storage - Document store port and adapters
//!
//! > "One collection, one field, one owner per value."
//!
//! The store models a schemaless document database: named collections of
//! JSON documents addressed by id, with single writes, unconditional write
//! batches, read-then-write transactions and offset pagination. The
//! uniqueness engine in `uniqfield-orchestration` only talks to the store
//! through the [`DocumentStore`] port.
//!
//! ## Adapters
//!
//! - [`MemoryDocumentStore`]: in-process, serialized transactions, fault injection
//! - [`SqliteDocumentStore`]: single-table SQLite backend (feature `sqlite`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use uniqfield_storage::{DocPath, DocumentStore, MemoryDocumentStore, WriteBatch};
//!
//! let store = MemoryDocumentStore::new();
//! let mut batch = WriteBatch::new();
//! batch
//!     .delete(DocPath::new("users", "123")?)
//!     .delete(DocPath::new("users-username", "johnDoe")?);
//! store.commit_batch(batch).await?;
//! ```

pub mod bulk;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use bulk::{BulkWriteFailure, BulkWriteReport, BulkWriter, DEFAULT_MAX_IN_FLIGHT};
pub use domain::{
    validate_collection_path, DocPath, Document, DocumentStore, Fields, SnapshotReader,
    Transaction, Write, WriteBatch, ID_FIELD,
};
pub use infrastructure::MemoryDocumentStore;

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteDocumentStore;
