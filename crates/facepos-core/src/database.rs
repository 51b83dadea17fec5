//! Identity database: composes the vector store, user records and the
//! order counter behind one handle that request handlers share.
//!
//! Lock order is always user → faces and user → orders, so the three
//! operations cannot deadlock against each other.

use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::DbError;
use crate::lock::{self, KeyedLocks};
use crate::sequencer::{OrderSequencer, COUNTER_FILE};
use crate::types::{AcceptanceWindow, Cart, Embedding, HistoryEntry, NewUser, UserRecord};
use crate::user_store::{identifier_for, UserStore, USERS_DIR};
use crate::vector_store::VectorStore;

/// Default embedding length of the face model.
pub const DEFAULT_VECTOR_SIZE: usize = 64;

/// Date format of history entries (day/month/2-digit-year).
pub const ORDER_DATE_FORMAT: &str = "%d/%m/%y";

const FACES_RESOURCE: &str = "face vectors";
const ORDERS_RESOURCE: &str = "order counter";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding `orders.id`, `users/`, `labels.json`, `faces.json`.
    pub root: PathBuf,
    pub vector_size: usize,
    pub acceptance: AcceptanceWindow,
    /// Longest a mutation waits for its resource before giving up.
    pub lock_timeout: Duration,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            vector_size: DEFAULT_VECTOR_SIZE,
            acceptance: AcceptanceWindow::default(),
            lock_timeout: Duration::from_secs(2),
        }
    }
}

/// What to do with name/phone/email when an already-enrolled email enrolls again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnrollPolicy {
    /// Keep the stored document as is.
    #[default]
    Preserve,
    /// Replace name, phone and email; history is kept.
    Overwrite,
}

/// Outcome of matching a face against the enrolled users.
///
/// A rejected match is a normal result, not an error.
#[derive(Debug, Clone)]
pub struct Validation {
    /// The matched user, if the match was accepted.
    pub user: Option<UserRecord>,
    /// Label of the nearest row (may be the sentinel).
    pub label: String,
    pub score: f32,
}

impl Validation {
    pub fn accepted(&self) -> bool {
        self.user.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub labels: usize,
    pub embeddings: usize,
    pub users: usize,
    pub next_order_id: u64,
}

pub struct Database {
    config: StoreConfig,
    faces: RwLock<VectorStore>,
    users: UserStore,
    user_locks: KeyedLocks,
    orders: Mutex<OrderSequencer>,
}

impl Database {
    /// Open the store at `config.root`, creating the directory tree, the
    /// counter (at `0`) and the sentinel row as needed.
    pub fn open(config: StoreConfig) -> Result<Self, DbError> {
        let root = &config.root;
        let fresh = !root.is_dir();
        if fresh {
            std::fs::create_dir_all(root.join(USERS_DIR))?;
            tracing::info!(root = %root.display(), "created data root");
        }

        let users = UserStore::open(root)?;
        // Re-creating the counter next to existing users would reissue ids.
        if !fresh && !root.join(COUNTER_FILE).is_file() && users.count()? > 0 {
            return Err(DbError::corrupt(
                root.join(COUNTER_FILE),
                "order counter missing while user records exist",
            ));
        }
        let orders = OrderSequencer::open(root)?;
        let faces = VectorStore::open(root, config.vector_size)?;

        Ok(Self {
            faces: RwLock::new(faces),
            users,
            user_locks: KeyedLocks::default(),
            orders: Mutex::new(orders),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Enroll a user: create the user document if absent and add the face row
    /// if the identifier has none yet.
    ///
    /// Writes happen in the order user creation, face row, field overwrite, so
    /// a failure at any step leaves the stored document as it was before the call.
    pub fn enroll(
        &self,
        user: &NewUser,
        embedding: &Embedding,
        policy: EnrollPolicy,
    ) -> Result<UserRecord, DbError> {
        user.validate()?;
        embedding.check(self.config.vector_size)?;
        let identifier = identifier_for(&user.email)?;

        let user_lock = self.user_locks.handle(&identifier);
        let _user_guard = lock::lock(&user_lock, &identifier, self.config.lock_timeout)?;

        let (mut record, created) = self.users.create_if_absent(&identifier, user)?;

        if let Err(e) = self.enroll_face(&identifier, embedding) {
            if created {
                self.users.remove(&identifier);
            }
            return Err(e);
        }

        if !created {
            let differs = record.name != user.name
                || record.phone != user.phone
                || record.email != user.email;
            match policy {
                EnrollPolicy::Overwrite if differs => {
                    record.name = user.name.clone();
                    record.phone = user.phone.clone();
                    record.email = user.email.clone();
                    self.users.save(&identifier, &record)?;
                    tracing::info!(identifier = %identifier, "re-enrollment overwrote user fields");
                }
                EnrollPolicy::Preserve if differs => {
                    tracing::warn!(identifier = %identifier, "re-enrollment with different fields; keeping stored record");
                }
                _ => {}
            }
        }

        Ok(record)
    }

    fn enroll_face(&self, identifier: &str, embedding: &Embedding) -> Result<bool, DbError> {
        let mut faces = lock::write(&self.faces, FACES_RESOURCE, self.config.lock_timeout)?;
        faces.enroll(identifier, embedding)
    }

    /// Match `embedding` against the enrolled faces.
    ///
    /// The nearest row is rejected if it is the sentinel or if its score is
    /// outside the acceptance window; otherwise the user's record is loaded.
    pub fn validate(&self, embedding: &Embedding) -> Result<Validation, DbError> {
        let nearest = {
            let faces = lock::read(&self.faces, FACES_RESOURCE, self.config.lock_timeout)?;
            faces.match_nearest(embedding)?
        };

        if nearest.is_sentinel() || !self.config.acceptance.contains(nearest.score) {
            tracing::debug!(label = %nearest.label, score = nearest.score, "validation rejected");
            return Ok(Validation {
                user: None,
                label: nearest.label,
                score: nearest.score,
            });
        }

        let record = self.users.load(&nearest.label)?;
        tracing::info!(identifier = %nearest.label, score = nearest.score, "validation accepted");
        Ok(Validation {
            user: Some(record),
            label: nearest.label,
            score: nearest.score,
        })
    }

    /// Record `cart` as a new order dated today. See [`record_order_on`](Self::record_order_on).
    pub fn record_order(&self, email: &str, cart: &Cart) -> Result<Option<u64>, DbError> {
        self.record_order_on(email, cart, chrono::Local::now().date_naive())
    }

    /// Append `cart` to the user's history under a fresh order id.
    ///
    /// An empty cart returns `None` without touching any file. The user is
    /// loaded before an id is drawn, so an unknown user consumes no id.
    pub fn record_order_on(
        &self,
        email: &str,
        cart: &Cart,
        date: NaiveDate,
    ) -> Result<Option<u64>, DbError> {
        if cart.is_empty() {
            return Ok(None);
        }
        let identifier = identifier_for(email)?;

        let user_lock = self.user_locks.handle(&identifier);
        let _user_guard = lock::lock(&user_lock, &identifier, self.config.lock_timeout)?;

        let mut record = self.users.load(&identifier)?;
        let order_id = {
            let mut orders = lock::lock(&self.orders, ORDERS_RESOURCE, self.config.lock_timeout)?;
            orders.next()?
        };

        record.history.push(HistoryEntry {
            date: date.format(ORDER_DATE_FORMAT).to_string(),
            id: Some(order_id),
            orders: cart.values().cloned().collect(),
        });
        self.users.save(&identifier, &record)?;

        tracing::info!(identifier = %identifier, order_id, items = cart.len(), "order recorded");
        Ok(Some(order_id))
    }

    pub fn user(&self, identifier: &str) -> Result<UserRecord, DbError> {
        self.users.load(identifier)
    }

    pub fn user_by_email(&self, email: &str) -> Result<UserRecord, DbError> {
        self.users.load(&identifier_for(email)?)
    }

    pub fn stats(&self) -> Result<Stats, DbError> {
        let (labels, embeddings) = {
            let faces = lock::read(&self.faces, FACES_RESOURCE, self.config.lock_timeout)?;
            (faces.labels().len(), faces.embeddings().len())
        };
        let next_order_id = lock::lock(&self.orders, ORDERS_RESOURCE, self.config.lock_timeout)?.peek()?;
        Ok(Stats {
            labels,
            embeddings,
            users: self.users.count()?,
            next_order_id,
        })
    }
}
