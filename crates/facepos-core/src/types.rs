use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::DbError;

/// Label of the reserved row that keeps the vector store non-empty.
pub const SENTINEL_LABEL: &str = "unidentified";

/// Component value of the sentinel embedding, far from any real face.
pub const SENTINEL_VALUE: f32 = 128.0;

/// Face embedding vector produced by the external model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// The sentinel embedding: `SENTINEL_VALUE` repeated `dim` times.
    pub fn sentinel(dim: usize) -> Self {
        Self {
            values: vec![SENTINEL_VALUE; dim],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Reject embeddings of the wrong length or with NaN/infinite components.
    ///
    /// Non-finite values cannot be persisted as JSON numbers, so they must be
    /// stopped before any write.
    pub fn check(&self, expected: usize) -> Result<(), DbError> {
        if self.values.len() != expected {
            return Err(DbError::DimensionMismatch {
                expected,
                actual: self.values.len(),
            });
        }
        match self.values.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(DbError::InvalidEmbedding {
                index,
                value: self.values[index],
            }),
            None => Ok(()),
        }
    }

    /// Root-mean-square distance: `sqrt(mean((a_i - b_i)^2))`.
    ///
    /// Accumulates in f64; the result is within rounding of the true distance,
    /// and `1 - d` narrowed to f32 lands on the intended score for the
    /// distances the acceptance window is tested at (e.g. `0.2` gives `0.8`).
    /// Both embeddings must have the same length; callers check this.
    pub fn rms_distance(&self, other: &Embedding) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| {
                let d = f64::from(*a) - f64::from(*b);
                d * d
            })
            .sum();
        (sum / self.values.len() as f64).sqrt()
    }
}

/// Inclusive score window a nearest match must fall in to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceWindow {
    pub min: f32,
    pub max: f32,
}

impl AcceptanceWindow {
    pub fn contains(&self, score: f32) -> bool {
        score >= self.min && score <= self.max
    }
}

impl Default for AcceptanceWindow {
    fn default() -> Self {
        Self { min: 0.8, max: 1.0 }
    }
}

/// Fields supplied when enrolling a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub phone: String,
    pub email: String,
}

impl NewUser {
    /// Build and validate a new user.
    pub fn new(
        name: impl Into<String>,
        phone: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<Self, DbError> {
        let user = Self {
            name: name.into(),
            phone: phone.into(),
            email: email.into(),
        };
        user.validate()?;
        Ok(user)
    }

    /// Reject empty fields and emails that do not yield a usable identifier.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.name.trim().is_empty() {
            return Err(DbError::MissingField("name"));
        }
        if self.phone.trim().is_empty() {
            return Err(DbError::MissingField("phone"));
        }
        if self.email.trim().is_empty() {
            return Err(DbError::MissingField("email"));
        }
        crate::user_store::identifier_for(&self.email).map(|_| ())
    }
}

/// Price as sent by the point-of-sale front end: a number or a text label ("10$").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Price {
    Amount(serde_json::Number),
    Label(String),
}

impl From<u64> for Price {
    fn from(v: u64) -> Self {
        Price::Amount(v.into())
    }
}

impl From<&str> for Price {
    fn from(v: &str) -> Self {
        Price::Label(v.to_string())
    }
}

fn default_count() -> u32 {
    1
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub price: Price,
    #[serde(default = "default_count")]
    pub count: u32,
}

/// One past order in a user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Day/month/2-digit-year, e.g. "19/10/26".
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub orders: Vec<LineItem>,
}

/// Per-user document, stored as `users/<identifier>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub phone: String,
    pub email: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl UserRecord {
    pub fn from_new(user: &NewUser) -> Self {
        Self {
            name: user.name.clone(),
            phone: user.phone.clone(),
            email: user.email.clone(),
            history: Vec::new(),
        }
    }
}

/// Items keyed by name, in the order they were added to the cart.
pub type Cart = IndexMap<String, LineItem>;
