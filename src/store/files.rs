//! One file per job record.
//!
//! Writes go to a uniquely named temporary file in the same directory and
//! are renamed into place, so readers see either no record or a whole one.
//! Jobs on different hosts may share the directory, so temporary names are
//! random rather than derived from the process id.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{JobStore, decode_record, encode_record};
use crate::error::StoreError;
use crate::evaluation::JobRecord;
use crate::types::JobKey;

pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &JobKey) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl JobStore for FileJobStore {
    fn put(&self, record: &JobRecord) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;

        let target = self.path_for(&record.key);
        let bytes = encode_record(record)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{}.", record.key))
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| io_error(&self.dir, e))?;
        tmp.write_all(&bytes).map_err(|e| io_error(tmp.path(), e))?;
        // A failed persist drops the temporary file
        tmp.persist(&target).map_err(|e| io_error(&target, e.error))?;

        debug!(key = %record.key, path = %target.display(), "stored job record");
        Ok(())
    }

    fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => decode_record(&bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn contains(&self, key: &JobKey) -> Result<bool, StoreError> {
        Ok(self.path_for(key).is_file())
    }
}
