//! SQLite document store
//!
//! All collections share one `documents` table keyed by
//! `(collection, doc_id)`; bodies are stored as JSON text. Transactions use
//! `BEGIN IMMEDIATE` so the existence check and the writes that depend on it
//! run under SQLite's write lock.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::domain::{
    merge_fields, DocPath, Document, DocumentStore, Fields, SnapshotReader, Transaction, Write,
    WriteBatch,
};
use crate::{Result, StorageError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based DocumentStore implementation
#[derive(Clone)]
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDocumentStore {
    /// Open (or create) a store at the given path
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite store (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, doc_id)
            )",
            [],
        )?;
        Ok(())
    }
}

fn read_body(conn: &Connection, path: &DocPath) -> Result<Option<Fields>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND doc_id = ?2",
            params![path.collection(), path.id()],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

fn write_body(conn: &Connection, path: &DocPath, body: &Fields) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO documents (collection, doc_id, body) VALUES (?1, ?2, ?3)",
        params![path.collection(), path.id(), serde_json::to_string(body)?],
    )?;
    Ok(())
}

fn apply_write(conn: &Connection, write: Write) -> Result<()> {
    match write {
        Write::Set { path, body } => write_body(conn, &path, &body),
        Write::Update { path, fields } => {
            let mut body = read_body(conn, &path)?.ok_or_else(|| StorageError::not_found(&path))?;
            merge_fields(&mut body, fields);
            write_body(conn, &path, &body)
        }
        Write::Delete { path } => {
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2",
                params![path.collection(), path.id()],
            )?;
            Ok(())
        }
    }
}

struct TxReader<'c> {
    conn: &'c Connection,
}

impl SnapshotReader for TxReader<'_> {
    fn read(&mut self, path: &DocPath) -> Result<Option<Fields>> {
        read_body(self.conn, path)
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Fields>> {
        let conn = self.conn.lock();
        read_body(&conn, path)
    }

    async fn set(&self, path: &DocPath, body: Fields) -> Result<()> {
        let conn = self.conn.lock();
        write_body(&conn, path, &body)
    }

    async fn update(&self, path: &DocPath, fields: Fields) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        apply_write(
            &tx,
            Write::Update {
                path: path.clone(),
                fields,
            },
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> Result<()> {
        let conn = self.conn.lock();
        apply_write(&conn, Write::Delete { path: path.clone() })
    }

    async fn commit_batch(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let count = batch.len();
        for write in batch.into_writes() {
            apply_write(&tx, write)?;
        }
        tx.commit()?;
        debug!("Committed batch of {} writes", count);
        Ok(())
    }

    async fn run_transaction<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<StorageError> + Send,
        F: FnOnce(&mut Transaction<'_>) -> std::result::Result<T, E> + Send,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let (output, writes) = {
            let mut reader = TxReader { conn: &tx };
            let mut txn = Transaction::new(&mut reader);
            // Dropping `tx` on the error path rolls back.
            let output = work(&mut txn)?;
            (output, txn.into_writes())
        };

        for write in writes {
            apply_write(&tx, write)?;
        }
        tx.commit().map_err(StorageError::from)?;
        Ok(output)
    }

    async fn list_documents(
        &self,
        collection: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT doc_id, body FROM documents
             WHERE collection = ?1
             ORDER BY doc_id
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![collection, limit as i64, offset as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, raw)| -> Result<Document> {
                Ok(Document::from_body(id, serde_json::from_str(&raw)?))
            })
            .collect()
    }
}
