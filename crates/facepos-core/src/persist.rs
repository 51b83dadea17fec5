//! Whole-file replace: write to a temp file in the target directory, fsync, rename.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::DbError;

/// Stage `bytes` next to `path` without touching `path` itself.
pub(crate) fn stage(path: &Path, bytes: &[u8]) -> Result<NamedTempFile, DbError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Move a staged file over `path`.
pub(crate) fn commit(tmp: NamedTempFile, path: &Path) -> Result<(), DbError> {
    tmp.persist(path).map_err(|e| DbError::Io(e.error))?;
    Ok(())
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DbError> {
    commit(stage(path, bytes)?, path)
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), DbError> {
    write_atomic(path, &serde_json::to_vec(value)?)
}

/// Read and parse a JSON file; parse failures are reported as corruption.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, DbError> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| DbError::corrupt(path, e.to_string()))
}
