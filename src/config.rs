//! kestrel configuration from `.kestrel/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KestrelError, Result};
use crate::resilience::RetryPolicy;

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct KestrelConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub review: ReviewConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Root for both stores; sqlite and lance live under it.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kestrel")
        .to_string_lossy()
        .to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn sqlite_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("metadata.db")
    }

    pub fn lance_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("vectors")
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexerConfig {
    /// Extra ignore globs on top of .gitignore.
    #[serde(default)]
    pub ignore: Vec<String>,
    /// Bound on concurrently indexed files.
    #[serde(default = "default_parallel_files")]
    pub parallel_files: usize,
    /// Skip files larger than this many bytes.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_parallel_files() -> usize {
    4
}

fn default_max_file_bytes() -> u64 {
    2 * 1024 * 1024
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            ignore: Vec::new(),
            parallel_files: default_parallel_files(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// fastembed model enum variant name.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub cache_dir: Option<String>,
}

fn default_embedding_model() -> String {
    "BGESmallENV15".to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            cache_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Per-call deadline; 0 disables.
    #[serde(default)]
    pub call_deadline_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_exponential_base() -> f64 {
    2.0
}
fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential_base: default_exponential_base(),
            jitter: default_jitter(),
            call_deadline_ms: 0,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            exponential_base: self.exponential_base,
            jitter: self.jitter,
            deadline: (self.call_deadline_ms > 0)
                .then(|| Duration::from_millis(self.call_deadline_ms)),
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReviewConfig {
    #[serde(default = "default_top_k_similar")]
    pub top_k_similar: usize,
}

fn default_top_k_similar() -> usize {
    5
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            top_k_similar: default_top_k_similar(),
        }
    }
}

impl KestrelConfig {
    /// Load from `<root>/.kestrel/config.toml`; absent file means defaults.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(".kestrel").join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw).map_err(|e| {
            KestrelError::Configuration(format!("{}: {e}", path.display()))
        })
    }
}
