use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("invalid email: {0:?}")]
    InvalidEmail(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("no user record for identifier {0:?}")]
    NotFound(String),
    #[error("store corrupt at {path}: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },
    #[error("could not lock {resource} within {waited:?}; retry the request")]
    ConcurrentWriteConflict { resource: String, waited: Duration },
    #[error("embedding has {actual} components, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding component {index} is not finite ({value})")]
    InvalidEmbedding { index: usize, value: f32 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
