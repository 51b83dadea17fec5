use anyhow::{Context, Result};
use facepos_core::{AcceptanceWindow, StoreConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration: an optional TOML file named by `FACEPOS_CONFIG`,
/// overridden field by field by `FACEPOS_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store root holding `orders.id`, `users/` and the face vector files.
    pub data_dir: PathBuf,
    /// ONNX face embedding model, needed only for `--photo` input.
    pub model_path: String,
    /// Embedding length produced by the model.
    pub vector_size: usize,
    /// Lowest accepted match score (inclusive).
    pub min_score: f32,
    /// Highest accepted match score (inclusive).
    pub max_score: f32,
    /// How long a write waits for a busy resource before failing.
    pub lock_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facepos")
            .join("userdb");
        let window = AcceptanceWindow::default();

        Self {
            data_dir,
            model_path: "models/face_embedding.onnx".to_string(),
            vector_size: facepos_core::database::DEFAULT_VECTOR_SIZE,
            min_score: window.min,
            max_score: window.max,
            lock_timeout_ms: 2000,
        }
    }
}

impl Config {
    /// Load from `FACEPOS_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("FACEPOS_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply `FACEPOS_*` overrides. Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEPOS_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEPOS_MODEL_PATH") {
            self.model_path = v;
        }
        override_parsed(&lookup, "FACEPOS_VECTOR_SIZE", &mut self.vector_size);
        override_parsed(&lookup, "FACEPOS_MIN_SCORE", &mut self.min_score);
        override_parsed(&lookup, "FACEPOS_MAX_SCORE", &mut self.max_score);
        override_parsed(&lookup, "FACEPOS_LOCK_TIMEOUT_MS", &mut self.lock_timeout_ms);
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            root: self.data_dir.clone(),
            vector_size: self.vector_size,
            acceptance: AcceptanceWindow {
                min: self.min_score,
                max: self.max_score,
            },
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
        }
    }
}
