//! Domain layer for the document store
//!
//! # Domain Models
//!
//! - `DocPath`: Validated `<collection>/<id>` address of a document
//! - `Document`: Document id plus its field map
//! - `Write` / `WriteBatch`: Buffered mutations
//!
//! # Port Trait
//!
//! - `DocumentStore`: Primary storage abstraction (single writes, batches,
//!   transactions, offset pagination)
//!
//! # Examples
//!
//! ```rust,ignore
//! use uniqfield_storage::domain::{DocPath, DocumentStore, Transaction};
//!
//! async fn claim(store: &impl DocumentStore) -> uniqfield_storage::Result<bool> {
//!     let entry = DocPath::new("users-username", "johnDoe")?;
//!     store
//!         .run_transaction(|txn: &mut Transaction<'_>| {
//!             if txn.get(&entry)?.is_some() {
//!                 return Ok(false);
//!             }
//!             txn.set(entry.clone(), serde_json::Map::new());
//!             Ok(true)
//!         })
//!         .await
//! }
//! ```

mod transaction;

pub use transaction::{SnapshotReader, Transaction};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::{Result, StorageError};

/// Field map of a stored document.
pub type Fields = serde_json::Map<String, Value>;

/// Name of the field that mirrors the document id inside stored bodies.
pub const ID_FIELD: &str = "id";

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Address of a single document: collection path plus document id.
///
/// Collection paths are one or more `/`-separated segments with an odd
/// segment count (`users`, `orgs/acme/users`). Document ids are non-empty,
/// contain no `/`, and are not `.` or `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    collection: String,
    id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let collection = collection.into();
        let id = id.into();
        validate_collection_path(&collection)?;
        validate_document_id(&id)?;
        Ok(Self { collection, id })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Check a collection path (`users`, `orgs/acme/users`).
pub fn validate_collection_path(collection: &str) -> Result<()> {
    let segments: Vec<&str> = collection.split('/').collect();
    if collection.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(StorageError::invalid_path(format!(
            "Invalid collection path: '{}'",
            collection
        )));
    }
    if segments.len() % 2 == 0 {
        return Err(StorageError::invalid_path(format!(
            "Collection path '{}' points at a document, not a collection",
            collection
        )));
    }
    Ok(())
}

fn validate_document_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id == "." || id == ".." {
        return Err(StorageError::invalid_path(format!(
            "Invalid document id: '{}'",
            id
        )));
    }
    Ok(())
}

/// A document as read from or written to a collection.
///
/// `fields` never contains the `id` key; [`Document::into_body`] puts it back
/// so stored bodies mirror the id (`users/123 == {id: "123", ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Fields::new(),
        }
    }

    /// Build from a stored body. A mirrored `id` key in the body is dropped.
    pub fn from_body(id: impl Into<String>, mut body: Fields) -> Self {
        body.remove(ID_FIELD);
        Self {
            id: id.into(),
            fields: body,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Typed accessor for a named field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Stored representation: `{id, ...fields}`.
    pub fn into_body(self) -> Fields {
        let mut body = Fields::with_capacity(self.fields.len() + 1);
        body.insert(ID_FIELD.to_string(), Value::String(self.id));
        body.extend(self.fields);
        body
    }

    pub fn to_body(&self) -> Fields {
        self.clone().into_body()
    }
}

/// A single buffered mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Create or overwrite the whole document.
    Set { path: DocPath, body: Fields },
    /// Merge top-level fields into an existing document; fails with
    /// `NotFound` if the document does not exist.
    Update { path: DocPath, fields: Fields },
    /// Remove the document. Deleting a missing document is not an error.
    Delete { path: DocPath },
}

impl Write {
    pub fn path(&self) -> &DocPath {
        match self {
            Write::Set { path, .. } | Write::Update { path, .. } | Write::Delete { path } => path,
        }
    }
}

/// Ordered group of writes committed together without preconditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: DocPath, body: Fields) -> &mut Self {
        self.writes.push(Write::Set { path, body });
        self
    }

    pub fn update(&mut self, path: DocPath, fields: Fields) -> &mut Self {
        self.writes.push(Write::Update { path, fields });
        self
    }

    pub fn delete(&mut self, path: DocPath) -> &mut Self {
        self.writes.push(Write::Delete { path });
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Shallow merge used by `Write::Update`: top-level keys in `patch` replace
/// those in `target`.
pub fn merge_fields(target: &mut Fields, patch: Fields) {
    for (key, value) in patch {
        target.insert(key, value);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait: DocumentStore
// ═══════════════════════════════════════════════════════════════════════════

/// Document store abstraction
///
/// # Core Operations
///
/// 1. **Single writes**: `get`, `set`, `update`, `delete`
/// 2. **Batches**: `commit_batch` applies a `WriteBatch` with no
///    precondition check. Adapters may apply it atomically but callers must
///    not rely on readers never observing a partially applied batch.
/// 3. **Transactions**: `run_transaction` executes a unit of work against a
///    consistent view; its buffered writes commit all-or-nothing, and nothing
///    is written when the work returns an error.
/// 4. **Scans**: `list_documents` pages through a collection in ascending
///    document-id order by numeric offset. Offsets are not stable when the
///    collection is mutated between calls.
///
/// # Implementations
///
/// - `MemoryDocumentStore`: in-process maps
/// - `SqliteDocumentStore`: SQLite adapter (feature `sqlite`)
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document body.
    async fn get(&self, path: &DocPath) -> Result<Option<Fields>>;

    /// Create or overwrite a document.
    async fn set(&self, path: &DocPath, body: Fields) -> Result<()>;

    /// Merge fields into an existing document.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::NotFound` if the document doesn't exist
    async fn update(&self, path: &DocPath, fields: Fields) -> Result<()>;

    /// Delete a document (no-op if missing).
    async fn delete(&self, path: &DocPath) -> Result<()>;

    /// Apply a batch of writes in order.
    async fn commit_batch(&self, batch: WriteBatch) -> Result<()>;

    /// Run `work` as a read-then-write transaction.
    ///
    /// Reads inside `work` observe committed state; writes are buffered on
    /// the handle and committed together once `work` returns `Ok`. An `Err`
    /// from `work`, or a failure while committing, leaves the store
    /// untouched.
    async fn run_transaction<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<StorageError> + Send,
        F: FnOnce(&mut Transaction<'_>) -> std::result::Result<T, E> + Send;

    /// Page through a collection in document-id order.
    async fn list_documents(
        &self,
        collection: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Document>>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
