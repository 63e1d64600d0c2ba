use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::{RecordMeta, StoreBackend, StoreResult};
use crate::error::StoreError;
use crate::key::SessionKey;

const RECORD_EXTENSION: &str = "session";

/// Directory backend: one file per passivated session.
///
/// Writes go to a temporary file that is renamed into place, so readers
/// never observe a partially written record.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &SessionKey) -> PathBuf {
        self.root.join(format!("{key}.{RECORD_EXTENSION}"))
    }
}

impl StoreBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn put(&self, key: &SessionKey, bytes: &[u8]) -> StoreResult<()> {
        let path = self.record_path(key);
        let tmp = path.with_extension(format!("{RECORD_EXTENSION}.tmp"));

        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get(&self, key: &SessionKey) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(self.record_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &SessionKey) -> StoreResult<bool> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, key: &SessionKey) -> StoreResult<bool> {
        match fs::metadata(self.record_path(key)) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> StoreResult<Vec<RecordMeta>> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| StoreError::InvalidRecord(path.display().to_string()))?;
            let key: SessionKey = stem
                .parse()
                .map_err(|_| StoreError::InvalidRecord(path.display().to_string()))?;

            let metadata = match entry.metadata() {
                Ok(m) => m,
                // Deleted between read_dir and stat
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            records.push(RecordMeta {
                key,
                size: metadata.len(),
                stored_at: DateTime::<Utc>::from(metadata.modified()?),
            });
        }

        Ok(records)
    }
}
