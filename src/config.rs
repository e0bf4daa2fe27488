//! Configuration parsing and validation.
//!
//! Kenny is configured via a TOML file (default: `config/kenny.toml`). The
//! config defines the database path, chunking caps, retrieval tuning, the
//! embedder endpoint, ingestion batching, per-operation timeouts, and the
//! chat bridge locations.
//!
//! There is exactly one authoritative database file per deployment. The
//! `KENNY_DB_PATH` environment variable overrides the configured path; no
//! other environment input affects semantics.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size; short paragraphs are glued up to this many tokens.
    #[serde(default = "default_soft_cap")]
    pub soft_cap_tokens: usize,
    /// Absolute chunk ceiling; oversized paragraphs are hard-split here.
    #[serde(default = "default_hard_cap")]
    pub hard_cap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            soft_cap_tokens: default_soft_cap(),
            hard_cap_tokens: default_hard_cap(),
        }
    }
}

fn default_soft_cap() -> usize {
    512
}
fn default_hard_cap() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_weight")]
    pub w_bm25: f64,
    #[serde(default = "default_weight")]
    pub w_vec: f64,
    /// Progressive threshold ladder, tried in order.
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<f64>,
    /// Last-resort recall floor when no ladder step yields enough results.
    #[serde(default = "default_floor")]
    pub floor: f64,
    /// Each channel fetches `candidate_multiplier × limit` candidates.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            w_bm25: default_weight(),
            w_vec: default_weight(),
            thresholds: default_thresholds(),
            floor: default_floor(),
            candidate_multiplier: default_candidate_multiplier(),
            default_limit: default_limit(),
        }
    }
}

fn default_weight() -> f64 {
    0.5
}
fn default_thresholds() -> Vec<f64> {
    vec![0.40, 0.25, 0.15, 0.05]
}
fn default_floor() -> f64 {
    0.01
}
fn default_candidate_multiplier() -> usize {
    2
}
fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Loopback embedder endpoint; the engine never manages its lifecycle.
    #[serde(default = "default_embed_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Advertised dimension; checked against responses when set.
    #[serde(default)]
    pub dim: Option<usize>,
    #[serde(default = "default_embed_batch")]
    pub batch_size: usize,
    /// Maximum concurrent in-flight embed calls.
    #[serde(default = "default_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-call timeout for pipeline embedding.
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
    /// Short timeout for the synchronous query embed in search.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embed_url(),
            model: default_model(),
            dim: None,
            batch_size: default_embed_batch(),
            max_in_flight: default_in_flight(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout(),
            query_timeout_ms: default_query_timeout(),
        }
    }
}

fn default_embed_url() -> String {
    "http://127.0.0.1:8787".to_string()
}
fn default_model() -> String {
    "nomic-embed-text-v1.5".to_string()
}
fn default_embed_batch() -> usize {
    64
}
fn default_in_flight() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_timeout() -> u64 {
    10
}
fn default_query_timeout() -> u64 {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_batch")]
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_ingest_batch(),
        }
    }
}

fn default_ingest_batch() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_pull_timeout")]
    pub adapter_pull_secs: u64,
    #[serde(default = "default_fts_timeout")]
    pub fts_query_secs: u64,
    #[serde(default = "default_vector_timeout")]
    pub vector_scan_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            adapter_pull_secs: default_pull_timeout(),
            fts_query_secs: default_fts_timeout(),
            vector_scan_secs: default_vector_timeout(),
        }
    }
}

fn default_pull_timeout() -> u64 {
    30
}
fn default_fts_timeout() -> u64 {
    2
}
fn default_vector_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChatConfig {
    /// Path to the external bridge's SQLite file. Read-only.
    pub bridge_db_path: Option<PathBuf>,
    /// Directory of archival text exports for bulk import.
    pub archive_dir: Option<PathBuf>,
}

impl Config {
    /// A config with all defaults pointing at the given database path.
    /// Used by tests and embedding applications that skip the TOML file.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            ingest: IngestConfig::default(),
            timeouts: TimeoutConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Ok(db_path) = std::env::var("KENNY_DB_PATH") {
        if !db_path.trim().is_empty() {
            config.db.path = PathBuf::from(db_path);
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.soft_cap_tokens == 0 {
        anyhow::bail!("chunking.soft_cap_tokens must be > 0");
    }
    if config.chunking.hard_cap_tokens < config.chunking.soft_cap_tokens {
        anyhow::bail!("chunking.hard_cap_tokens must be >= soft_cap_tokens");
    }

    if !(0.0..=1.0).contains(&config.retrieval.w_bm25)
        || !(0.0..=1.0).contains(&config.retrieval.w_vec)
    {
        anyhow::bail!("retrieval weights must be in [0.0, 1.0]");
    }
    if config.retrieval.w_bm25 + config.retrieval.w_vec <= 0.0 {
        anyhow::bail!("retrieval weights must not both be zero");
    }
    if config.retrieval.thresholds.is_empty() {
        anyhow::bail!("retrieval.thresholds must not be empty");
    }
    let mut prev = f64::INFINITY;
    for t in &config.retrieval.thresholds {
        if !(0.0..=1.0).contains(t) || *t <= config.retrieval.floor {
            anyhow::bail!("retrieval.thresholds must lie in (floor, 1.0]");
        }
        if *t >= prev {
            anyhow::bail!("retrieval.thresholds must be strictly descending");
        }
        prev = *t;
    }
    if config.retrieval.candidate_multiplier == 0 {
        anyhow::bail!("retrieval.candidate_multiplier must be > 0");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_in_flight == 0 {
        anyhow::bail!("embedding.max_in_flight must be > 0");
    }
    if config.embedding.model.trim().is_empty() {
        anyhow::bail!("embedding.model must not be empty");
    }

    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::with_db_path("/tmp/kenny.db");
        validate(&config).unwrap();
        assert_eq!(config.ingest.batch_size, 500);
        assert_eq!(config.chunking.soft_cap_tokens, 512);
        assert_eq!(config.retrieval.thresholds, vec![0.40, 0.25, 0.15, 0.05]);
    }

    #[test]
    fn rejects_ascending_thresholds() {
        let mut config = Config::with_db_path("/tmp/kenny.db");
        config.retrieval.thresholds = vec![0.05, 0.25];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_inverted_chunk_caps() {
        let mut config = Config::with_db_path("/tmp/kenny.db");
        config.chunking.soft_cap_tokens = 2048;
        assert!(validate(&config).is_err());
    }
}
