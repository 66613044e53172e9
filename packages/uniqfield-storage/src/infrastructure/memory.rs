//! In-memory document store
//!
//! BTreeMap-backed implementation for tests and local runs. Transactions hold
//! the write lock for their whole duration, so they are fully serialized.
//! Faults can be injected to exercise storage-failure paths.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::domain::{
    merge_fields, DocPath, Document, DocumentStore, Fields, SnapshotReader, Transaction, Write,
    WriteBatch,
};
use crate::{Result, StorageError};

type Collections = BTreeMap<String, BTreeMap<String, Fields>>;

#[derive(Debug, Default)]
struct Faults {
    /// Document ids whose writes fail with `Unavailable`.
    write_ids: HashSet<String>,
    /// Number of upcoming `list_documents` calls that fail.
    list_failures: usize,
}

#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<RwLock<Collections>>,
    faults: Arc<Mutex<Faults>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write addressed to a document with this id fail.
    pub fn fail_writes_to(&self, id: impl Into<String>) {
        self.faults.lock().write_ids.insert(id.into());
    }

    /// Make the next `count` page reads fail.
    pub fn fail_next_listings(&self, count: usize) {
        self.faults.lock().list_failures = count;
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    /// Number of documents currently stored in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    fn check_write_faults<'w>(&self, writes: impl IntoIterator<Item = &'w Write>) -> Result<()> {
        let faults = self.faults.lock();
        if faults.write_ids.is_empty() {
            return Ok(());
        }
        for write in writes {
            if faults.write_ids.contains(write.path().id()) {
                return Err(StorageError::unavailable(format!(
                    "Injected write failure for {}",
                    write.path()
                )));
            }
        }
        Ok(())
    }

    fn commit(&self, collections: &mut Collections, writes: Vec<Write>) -> Result<()> {
        self.check_write_faults(&writes)?;
        apply_writes(collections, writes)
    }
}

fn lookup<'c>(collections: &'c Collections, path: &DocPath) -> Option<&'c Fields> {
    collections
        .get(path.collection())
        .and_then(|docs| docs.get(path.id()))
}

/// Apply writes in order; on any failure nothing is applied.
fn apply_writes(collections: &mut Collections, writes: Vec<Write>) -> Result<()> {
    let mut staged: BTreeMap<DocPath, Option<Fields>> = BTreeMap::new();

    for write in writes {
        let path = write.path().clone();
        let current = match staged.get(&path) {
            Some(body) => body.clone(),
            None => lookup(collections, &path).cloned(),
        };
        let next = match write {
            Write::Set { body, .. } => Some(body),
            Write::Update { fields, .. } => {
                let mut body = current.ok_or_else(|| StorageError::not_found(&path))?;
                merge_fields(&mut body, fields);
                Some(body)
            }
            Write::Delete { .. } => None,
        };
        staged.insert(path, next);
    }

    for (path, body) in staged {
        match body {
            Some(body) => {
                collections
                    .entry(path.collection().to_string())
                    .or_default()
                    .insert(path.id().to_string(), body);
            }
            None => {
                if let Some(docs) = collections.get_mut(path.collection()) {
                    docs.remove(path.id());
                    if docs.is_empty() {
                        collections.remove(path.collection());
                    }
                }
            }
        }
    }
    Ok(())
}

struct LockedReader<'c> {
    collections: &'c Collections,
}

impl SnapshotReader for LockedReader<'_> {
    fn read(&mut self, path: &DocPath) -> Result<Option<Fields>> {
        Ok(lookup(self.collections, path).cloned())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Fields>> {
        Ok(lookup(&self.collections.read(), path).cloned())
    }

    async fn set(&self, path: &DocPath, body: Fields) -> Result<()> {
        let write = Write::Set {
            path: path.clone(),
            body,
        };
        self.commit(&mut self.collections.write(), vec![write])
    }

    async fn update(&self, path: &DocPath, fields: Fields) -> Result<()> {
        let write = Write::Update {
            path: path.clone(),
            fields,
        };
        self.commit(&mut self.collections.write(), vec![write])
    }

    async fn delete(&self, path: &DocPath) -> Result<()> {
        let write = Write::Delete { path: path.clone() };
        self.commit(&mut self.collections.write(), vec![write])
    }

    async fn commit_batch(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.commit(&mut self.collections.write(), batch.into_writes())
    }

    async fn run_transaction<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<StorageError> + Send,
        F: FnOnce(&mut Transaction<'_>) -> std::result::Result<T, E> + Send,
    {
        let mut collections = self.collections.write();

        let (output, writes) = {
            let mut reader = LockedReader {
                collections: &collections,
            };
            let mut txn = Transaction::new(&mut reader);
            let output = work(&mut txn)?;
            (output, txn.into_writes())
        };

        self.commit(&mut collections, writes)?;
        Ok(output)
    }

    async fn list_documents(
        &self,
        collection: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Document>> {
        {
            let mut faults = self.faults.lock();
            if faults.list_failures > 0 {
                faults.list_failures -= 1;
                return Err(StorageError::unavailable(format!(
                    "Injected listing failure for {}",
                    collection
                )));
            }
        }

        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .skip(offset)
                    .take(limit)
                    .map(|(id, body)| Document::from_body(id.clone(), body.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
