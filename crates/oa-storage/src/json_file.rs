// json_file.rs — Single JSON document on the local filesystem.
//
// The document is written pretty-printed (2-space indent, UTF-8, non-ASCII
// kept as-is) to a sibling temp file which is then renamed over the target.
// Rename is atomic on the same filesystem, so readers in this or any other
// process see either the old document or the new one.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::backend::StorageBackend;
use crate::error::StorageError;

/// Stores the document as a JSON file.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for JsonFileStorage {
    fn save(&self, document: &Value) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(document)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        write_atomic(&self.path, json.as_bytes())?;
        tracing::debug!(path = %self.path.display(), bytes = json.len(), "saved json document");
        Ok(())
    }

    fn load(&self) -> Result<Option<Value>, StorageError> {
        let Some(bytes) = read_if_exists(&self.path)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(document) => Ok(Some(document)),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "stored document is not valid JSON; treating as empty"
                );
                Ok(None)
            }
        }
    }

    fn exists(&self) -> Result<bool, StorageError> {
        Ok(self.path.exists())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        remove_if_exists(&self.path)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Write `data` to `path` via a temp sibling and a rename.
/// Creates parent directories as needed.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StorageError::io(parent, source))?;
    }

    let file_name = path.file_name().ok_or_else(|| {
        StorageError::InvalidConfig(format!("'{}' is not a file path", path.display()))
    })?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp).map_err(|source| StorageError::io(&tmp, source))?;
    file.write_all(data)
        .and_then(|_| file.sync_all())
        .map_err(|source| StorageError::io(&tmp, source))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        StorageError::io(path, source)
    })
}

/// Read the whole file, or `None` if it does not exist.
pub(crate) fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StorageError::io(path, source)),
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::io(path, source)),
    }
}
