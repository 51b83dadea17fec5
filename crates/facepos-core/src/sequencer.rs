//! Durable order-id counter stored as decimal text in `orders.id`.

use std::path::{Path, PathBuf};

use crate::error::DbError;
use crate::persist;

pub const COUNTER_FILE: &str = "orders.id";

pub struct OrderSequencer {
    path: PathBuf,
}

impl OrderSequencer {
    /// Open the counter under `root`, writing `0` if the file is absent.
    pub fn open(root: &Path) -> Result<Self, DbError> {
        let path = root.join(COUNTER_FILE);
        if !path.is_file() {
            persist::write_atomic(&path, b"0")?;
            tracing::info!(path = %path.display(), "initialized order counter");
        }
        Ok(Self { path })
    }

    /// Value the next call to [`next`](Self::next) will issue.
    pub fn peek(&self) -> Result<u64, DbError> {
        let raw = std::fs::read_to_string(&self.path)?;
        raw.trim()
            .parse()
            .map_err(|e| DbError::corrupt(&self.path, format!("counter {raw:?}: {e}")))
    }

    /// Issue the current value and persist its successor.
    ///
    /// Callers serialize access; `&mut self` makes that explicit.
    pub fn next(&mut self) -> Result<u64, DbError> {
        let current = self.peek()?;
        let successor = current
            .checked_add(1)
            .ok_or_else(|| DbError::corrupt(&self.path, "counter overflow"))?;
        persist::write_atomic(&self.path, successor.to_string().as_bytes())?;
        tracing::debug!(order_id = current, "issued order id");
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_zero_and_increments() {
        let dir = tempfile::tempdir().unwrap();
        let mut seq = OrderSequencer::open(dir.path()).unwrap();
        assert_eq!(seq.next().unwrap(), 0);
        assert_eq!(seq.next().unwrap(), 1);
        assert_eq!(seq.peek().unwrap(), 2);
        assert_eq!(std::fs::read_to_string(dir.path().join(COUNTER_FILE)).unwrap(), "2");
    }

    #[test]
    fn test_continues_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut seq = OrderSequencer::open(dir.path()).unwrap();
            seq.next().unwrap();
            seq.next().unwrap();
        }
        let mut seq = OrderSequencer::open(dir.path()).unwrap();
        assert_eq!(seq.next().unwrap(), 2);
    }

    #[test]
    fn test_existing_value_respected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(COUNTER_FILE), "41\n").unwrap();
        let mut seq = OrderSequencer::open(dir.path()).unwrap();
        assert_eq!(seq.next().unwrap(), 41);
    }

    #[test]
    fn test_garbage_counter_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(COUNTER_FILE), "forty").unwrap();
        let mut seq = OrderSequencer::open(dir.path()).unwrap();
        assert!(matches!(seq.next(), Err(DbError::StoreCorrupt { .. })));
    }
}
