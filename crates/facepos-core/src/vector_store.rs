//! Face vector table: index-aligned labels and embeddings, persisted as two
//! JSON files (`labels.json`, `faces.json`) under the store root.
//!
//! Row 0 of a fresh store is the sentinel (`unidentified`, all components
//! `128.0`), so the table is never empty and unmatched queries land on a
//! label that callers reject.

use std::path::{Path, PathBuf};

use crate::error::DbError;
use crate::persist;
use crate::types::{Embedding, SENTINEL_LABEL};

pub const LABELS_FILE: &str = "labels.json";
pub const FACES_FILE: &str = "faces.json";

/// Nearest stored row for a query embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestMatch {
    pub label: String,
    pub index: usize,
    /// RMS distance to the query.
    pub distance: f64,
    /// `1 - distance`. Unbounded; callers gate it with an acceptance window.
    pub score: f32,
}

impl NearestMatch {
    pub fn is_sentinel(&self) -> bool {
        self.label == SENTINEL_LABEL
    }
}

pub struct VectorStore {
    labels_path: PathBuf,
    faces_path: PathBuf,
    dim: usize,
    labels: Vec<String>,
    embeddings: Vec<Embedding>,
}

impl VectorStore {
    /// Open the store under `root`, writing the sentinel row if neither file exists.
    pub fn open(root: &Path, dim: usize) -> Result<Self, DbError> {
        let labels_path = root.join(LABELS_FILE);
        let faces_path = root.join(FACES_FILE);

        match (labels_path.is_file(), faces_path.is_file()) {
            (false, false) => {
                let store = Self {
                    labels_path,
                    faces_path,
                    dim,
                    labels: vec![SENTINEL_LABEL.to_string()],
                    embeddings: vec![Embedding::sentinel(dim)],
                };
                store.save()?;
                tracing::info!(root = %root.display(), dim, "initialized vector store with sentinel");
                Ok(store)
            }
            (true, true) => {
                let labels: Vec<String> = persist::read_json(&labels_path)?;
                let embeddings: Vec<Embedding> = persist::read_json(&faces_path)?;
                let store = Self {
                    labels_path,
                    faces_path,
                    dim,
                    labels,
                    embeddings,
                };
                store.check()?;
                tracing::info!(rows = store.len(), dim, "loaded vector store");
                Ok(store)
            }
            (true, false) => Err(DbError::corrupt(faces_path, "missing while labels exist")),
            (false, true) => Err(DbError::corrupt(labels_path, "missing while faces exist")),
        }
    }

    fn check(&self) -> Result<(), DbError> {
        if self.labels.len() != self.embeddings.len() {
            return Err(DbError::corrupt(
                &self.faces_path,
                format!(
                    "{} labels but {} embeddings",
                    self.labels.len(),
                    self.embeddings.len()
                ),
            ));
        }
        if self.labels.is_empty() {
            return Err(DbError::corrupt(&self.labels_path, "no rows (sentinel missing)"));
        }
        if let Some((i, e)) = self
            .embeddings
            .iter()
            .enumerate()
            .find(|(_, e)| e.len() != self.dim)
        {
            return Err(DbError::corrupt(
                &self.faces_path,
                format!("row {i} has {} components, expected {}", e.len(), self.dim),
            ));
        }
        Ok(())
    }

    /// Stage both files, then swap them in. A crash between the two renames
    /// leaves mismatched lengths, which the next `open` reports as corrupt.
    fn save(&self) -> Result<(), DbError> {
        let faces = persist::stage(&self.faces_path, &serde_json::to_vec(&self.embeddings)?)?;
        let labels = persist::stage(&self.labels_path, &serde_json::to_vec(&self.labels)?)?;
        persist::commit(faces, &self.faces_path)?;
        persist::commit(labels, &self.labels_path)?;
        Ok(())
    }

    /// Insert `label` at the front unless it is already present.
    ///
    /// Returns `true` if a row was added. The in-memory table is only
    /// updated once both files have been written.
    pub fn enroll(&mut self, label: &str, embedding: &Embedding) -> Result<bool, DbError> {
        embedding.check(self.dim)?;
        if self.contains(label) {
            tracing::debug!(label, "label already enrolled; keeping first embedding");
            return Ok(false);
        }

        self.labels.insert(0, label.to_string());
        self.embeddings.insert(0, embedding.clone());
        if let Err(e) = self.save() {
            self.labels.remove(0);
            self.embeddings.remove(0);
            return Err(e);
        }

        tracing::info!(label, rows = self.len(), "enrolled face embedding");
        Ok(true)
    }

    /// Find the row with the smallest RMS distance to `query`.
    ///
    /// Every row is visited; ties keep the earliest row in stored order.
    pub fn match_nearest(&self, query: &Embedding) -> Result<NearestMatch, DbError> {
        query.check(self.dim)?;

        let mut best_idx = 0;
        let mut best_dist = f64::INFINITY;
        for (i, stored) in self.embeddings.iter().enumerate() {
            let d = stored.rms_distance(query);
            if d < best_dist {
                best_dist = d;
                best_idx = i;
            }
        }

        let label = self
            .labels
            .get(best_idx)
            .cloned()
            .ok_or_else(|| DbError::corrupt(&self.labels_path, "empty vector store"))?;

        Ok(NearestMatch {
            label,
            index: best_idx,
            distance: best_dist,
            score: (1.0 - best_dist) as f32,
        })
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }
}
