//! Unit-of-work handle passed to `DocumentStore::run_transaction`.

use super::{DocPath, Fields, Write};
use crate::{Result, StorageError};

/// Read access to the state a transaction runs against.
///
/// Implemented by each adapter over its own locked view (a held map guard, an
/// open SQLite transaction).
pub trait SnapshotReader {
    fn read(&mut self, path: &DocPath) -> Result<Option<Fields>>;
}

/// Transaction handle.
///
/// All reads must happen before the first write. Reads see committed state,
/// not the handle's own buffered writes.
pub struct Transaction<'a> {
    reader: &'a mut dyn SnapshotReader,
    writes: Vec<Write>,
}

impl<'a> Transaction<'a> {
    pub fn new(reader: &'a mut dyn SnapshotReader) -> Self {
        Self {
            reader,
            writes: Vec::new(),
        }
    }

    pub fn get(&mut self, path: &DocPath) -> Result<Option<Fields>> {
        if !self.writes.is_empty() {
            return Err(StorageError::transaction(format!(
                "Read of {} after a write in the same transaction",
                path
            )));
        }
        self.reader.read(path)
    }

    pub fn set(&mut self, path: DocPath, body: Fields) {
        self.writes.push(Write::Set { path, body });
    }

    pub fn update(&mut self, path: DocPath, fields: Fields) {
        self.writes.push(Write::Update { path, fields });
    }

    pub fn delete(&mut self, path: DocPath) {
        self.writes.push(Write::Delete { path });
    }

    pub fn pending_writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    struct EmptyReader;

    impl SnapshotReader for EmptyReader {
        fn read(&mut self, _path: &DocPath) -> Result<Option<Fields>> {
            Ok(None)
        }
    }

    #[test]
    fn test_reads_after_writes_are_rejected() {
        let mut reader = EmptyReader;
        let mut txn = Transaction::new(&mut reader);
        let path = DocPath::new("users", "1").unwrap();

        assert!(txn.get(&path).unwrap().is_none());
        txn.delete(path.clone());

        let err = txn.get(&path).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transaction);
    }

    #[test]
    fn test_writes_are_buffered_in_order() {
        let mut reader = EmptyReader;
        let mut txn = Transaction::new(&mut reader);

        txn.set(DocPath::new("users", "1").unwrap(), Fields::new());
        txn.delete(DocPath::new("users-username", "old").unwrap());

        let writes = txn.into_writes();
        assert_eq!(writes.len(), 2);
        assert!(matches!(writes[0], Write::Set { .. }));
        assert!(matches!(writes[1], Write::Delete { .. }));
    }
}
