//! facepos-core: storage and matching for a face-recognition point of sale.
//!
//! Enrolled faces live in a flat vector table matched by RMS distance; each
//! user has a JSON document holding contact details and order history; order
//! ids come from a durable counter. [`Database`] ties the three together.

pub mod database;
pub mod embedder;
pub mod error;
mod lock;
mod persist;
pub mod sequencer;
pub mod types;
pub mod user_store;
pub mod vector_store;
pub mod vision;

pub use database::{Database, EnrollPolicy, Stats, StoreConfig, Validation};
pub use embedder::OnnxEmbedder;
pub use error::DbError;
pub use types::{
    AcceptanceWindow, Cart, Embedding, HistoryEntry, LineItem, NewUser, Price, UserRecord,
    SENTINEL_LABEL,
};
pub use vision::{BoundingBox, FaceDetector, FaceEmbedder, FixedRegion, VisionError};
