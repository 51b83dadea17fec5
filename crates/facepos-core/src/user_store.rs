//! One JSON document per user under `users/<identifier>.json`.

use std::path::{Path, PathBuf};

use crate::error::DbError;
use crate::persist;
use crate::types::{NewUser, UserRecord, SENTINEL_LABEL};

pub const USERS_DIR: &str = "users";

/// Derive the store identifier from an email: the part before the first `@`.
///
/// The identifier doubles as a file name and a vector-store label, so it is
/// restricted to `[A-Za-z0-9._+-]`, may not start with `.`, and may not be
/// the sentinel label.
pub fn identifier_for(email: &str) -> Result<String, DbError> {
    let (local, _) = email
        .split_once('@')
        .ok_or_else(|| DbError::InvalidEmail(email.to_string()))?;

    let safe = !local.is_empty()
        && !local.starts_with('.')
        && local != SENTINEL_LABEL
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'));
    if !safe {
        return Err(DbError::InvalidEmail(email.to_string()));
    }
    Ok(local.to_string())
}

pub struct UserStore {
    dir: PathBuf,
}

impl UserStore {
    /// Open (creating if needed) the users directory under `root`.
    pub fn open(root: &Path) -> Result<Self, DbError> {
        let dir = root.join(USERS_DIR);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{identifier}.json"))
    }

    pub fn exists(&self, identifier: &str) -> bool {
        self.path_for(identifier).is_file()
    }

    /// Write a fresh record seeded from `user` unless one already exists.
    ///
    /// Returns the stored record and whether it was created by this call.
    /// An existing record is returned unchanged.
    pub fn create_if_absent(
        &self,
        identifier: &str,
        user: &NewUser,
    ) -> Result<(UserRecord, bool), DbError> {
        if self.exists(identifier) {
            return Ok((self.load(identifier)?, false));
        }
        let record = UserRecord::from_new(user);
        self.save(identifier, &record)?;
        tracing::info!(identifier, "created user record");
        Ok((record, true))
    }

    pub fn load(&self, identifier: &str) -> Result<UserRecord, DbError> {
        let path = self.path_for(identifier);
        if !path.is_file() {
            return Err(DbError::NotFound(identifier.to_string()));
        }
        persist::read_json(&path)
    }

    /// Overwrite the stored document with `record`.
    pub fn save(&self, identifier: &str, record: &UserRecord) -> Result<(), DbError> {
        persist::write_json(&self.path_for(identifier), record)
    }

    /// Best-effort removal, used to roll back a half-finished enrollment.
    pub(crate) fn remove(&self, identifier: &str) {
        if let Err(e) = std::fs::remove_file(self.path_for(identifier)) {
            tracing::warn!(identifier, error = %e, "failed to roll back user record");
        }
    }

    /// Number of user documents on disk.
    pub fn count(&self) -> Result<usize, DbError> {
        let mut n = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                n += 1;
            }
        }
        Ok(n)
    }
}
