//! Job records in a single redb database.
//!
//! - Key: `"<STRATEGY>_<index>"`
//! - Value: record bytes (format tag + bincode)
//!
//! redb holds an exclusive lock on the file, so only one process may have
//! the store open. Use it for single-host sweeps and for compacting a
//! finished file store.

use std::fs;
use std::path::Path;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, TableError};
use tracing::debug;

use super::{JobStore, decode_record, encode_record};
use crate::error::StoreError;
use crate::evaluation::JobRecord;
use crate::types::JobKey;

const JOBS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

fn db_error(e: impl Into<redb::Error>) -> StoreError {
    StoreError::Database(e.into())
}

pub struct RedbJobStore {
    db: Database,
}

impl RedbJobStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let db = Database::create(path).map_err(db_error)?;
        Ok(Self { db })
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize, StoreError> {
        let read_txn = self.db.begin_read().map_err(db_error)?;
        let table = match read_txn.open_table(JOBS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(0),
            Err(e) => return Err(db_error(e)),
        };
        Ok(table.len().map_err(db_error)? as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl JobStore for RedbJobStore {
    fn put(&self, record: &JobRecord) -> Result<(), StoreError> {
        let bytes = encode_record(record)?;
        let key = record.key.to_string();

        let write_txn = self.db.begin_write().map_err(db_error)?;
        {
            let mut table = write_txn.open_table(JOBS_TABLE).map_err(db_error)?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(db_error)?;
        }
        write_txn.commit().map_err(db_error)?;

        debug!(key = %record.key, "stored job record");
        Ok(())
    }

    fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        let read_txn = self.db.begin_read().map_err(db_error)?;
        let table = match read_txn.open_table(JOBS_TABLE) {
            Ok(table) => table,
            // Nothing has been written yet
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(db_error(e)),
        };

        let key = key.to_string();
        match table.get(key.as_str()).map_err(db_error)? {
            Some(guard) => decode_record(guard.value()).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::record;
    use crate::sweep::strategy::StrategyKind;

    #[test]
    fn test_empty_database_has_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbJobStore::open(&dir.path().join("jobs.redb")).unwrap();
        assert_eq!(store.get(&JobKey::new("RO", 0)).unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_put_get_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbJobStore::open(&dir.path().join("nested/jobs.redb")).unwrap();

        let first = record(StrategyKind::Wercs, 2);
        store.put(&first).unwrap();
        store.put(&record(StrategyKind::Wercs, 3)).unwrap();
        store.put(&first).unwrap();

        assert_eq!(store.len().unwrap(), 2);
        let back = store.get(&first.key).unwrap().unwrap();
        assert_eq!(back.combination, first.combination);
        assert!(store.contains(&JobKey::new("WERCS", 3)).unwrap());
        assert!(!store.contains(&JobKey::new("WERCS", 4)).unwrap());
    }

    #[test]
    fn test_reopen_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.redb");
        let r = record(StrategyKind::Gn, 11);
        {
            let store = RedbJobStore::open(&path).unwrap();
            store.put(&r).unwrap();
        }
        let store = RedbJobStore::open(&path).unwrap();
        assert_eq!(store.get(&r.key).unwrap().map(|b| b.key), Some(r.key));
    }
}
