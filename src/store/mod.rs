//! Durable job records, keyed by (strategy, combination index).
//!
//! Two layouts:
//!
//! | Store           | Layout                         | Concurrent writers       |
//! |-----------------|--------------------------------|--------------------------|
//! | `FileJobStore`  | `<dir>/<STRATEGY>_<index>.bin` | yes (atomic rename)      |
//! | `RedbJobStore`  | single `.redb` database        | no (one process at once) |
//!
//! Cluster sweeps use the file store: every job writes its own file and
//! never touches another job's. Both layouts share the same record bytes:
//! a little-endian `u32` format tag followed by the bincode-encoded record.

mod database;
mod files;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use database::RedbJobStore;
pub use files::FileJobStore;

use crate::error::StoreError;
use crate::evaluation::JobRecord;
use crate::types::JobKey;

/// Bump when `JobRecord` changes shape.
const RECORD_FORMAT: u32 = 1;

pub trait JobStore {
    /// Persist a record under its own key, replacing any previous one.
    fn put(&self, record: &JobRecord) -> Result<(), StoreError>;

    fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError>;

    fn contains(&self, key: &JobKey) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Where job records live. Serialized into every job descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StoreLocation {
    Files { dir: PathBuf },
    Redb { path: PathBuf },
}

impl Default for StoreLocation {
    fn default() -> Self {
        StoreLocation::Files {
            dir: PathBuf::from("results/jobs"),
        }
    }
}

/// Open the store at `location`, creating it if needed.
pub fn open_store(location: &StoreLocation) -> Result<Box<dyn JobStore>, StoreError> {
    Ok(match location {
        StoreLocation::Files { dir } => Box::new(FileJobStore::new(dir.clone())),
        StoreLocation::Redb { path } => Box::new(RedbJobStore::open(path)?),
    })
}

fn encode_record(record: &JobRecord) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(&(RECORD_FORMAT, record))?)
}

fn decode_record(bytes: &[u8]) -> Result<JobRecord, StoreError> {
    let format: u32 = bincode::deserialize(bytes)?;
    if format != RECORD_FORMAT {
        return Err(StoreError::Format {
            found: format,
            expected: RECORD_FORMAT,
        });
    }
    let (_, record): (u32, JobRecord) = bincode::deserialize(bytes)?;
    Ok(record)
}
