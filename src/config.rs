//! Configuration for askdb-rs
//!
//! Every entry point takes an explicit [`Config`] value; there is no hidden
//! process-wide state beyond the read-only index artifacts on disk.
//! [`Config::from_env`] applies the usual environment overrides for the CLI.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// OpenAI-compatible endpoint settings, opaque to the rest of the crate.
///
/// An empty `api_key` is acceptable for local endpoints (e.g. Ollama's
/// OpenAI-compatible server) as long as `api_base` points at them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// API key; read from `OPENAI_API_KEY` when absent
    pub api_key: Option<String>,
    /// Base URL override for OpenAI-compatible APIs
    pub api_base: Option<String>,
}

/// Settings for question/schema embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model name
    pub model: String,
    /// Number of texts per embedding request
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            batch_size: 16,
        }
    }
}

/// Generation settings for the SQL-producing model call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Chat model name
    pub model: String,
    /// Sampling temperature; kept low for code generation
    pub temperature: f32,
    /// Completion token cap
    pub max_tokens: u16,
    /// Optional stop sequences
    pub stop_sequences: Option<Vec<String>>,
    /// Per-call timeout; a hung endpoint must not stall a session
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_tokens: 1024,
            stop_sequences: None,
            timeout_secs: 60,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retrieval and prompt-budget settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of schema records to retrieve per question
    pub top_k: usize,
    /// Character budget for the composed prompt's schema section
    pub prompt_budget_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            prompt_budget_chars: 12_000,
        }
    }
}

/// Top-level configuration passed through every entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the persisted schema index artifacts
    pub index_dir: PathBuf,
    /// Maximum generate/validate cycles per question
    pub max_attempts: usize,
    pub endpoint: EndpointConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("schema_index"),
            max_attempts: 3,
            endpoint: EndpointConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl Config {
    /// Default configuration with environment overrides applied.
    ///
    /// Recognized variables: `OPENAI_API_KEY`, `OPENAI_API_BASE`,
    /// `ASKDB_EMBEDDING_MODEL`, `ASKDB_MODEL`, `ASKDB_INDEX_DIR`.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                config.endpoint.api_key = Some(key);
            }
        }
        if let Ok(base) = env::var("OPENAI_API_BASE") {
            if !base.is_empty() {
                config.endpoint.api_base = Some(base);
            }
        }
        if let Ok(model) = env::var("ASKDB_EMBEDDING_MODEL") {
            if !model.is_empty() {
                config.embedding.model = model;
            }
        }
        if let Ok(model) = env::var("ASKDB_MODEL") {
            if !model.is_empty() {
                config.generation.model = model;
            }
        }
        if let Ok(dir) = env::var("ASKDB_INDEX_DIR") {
            if !dir.is_empty() {
                config.index_dir = PathBuf::from(dir);
            }
        }

        config
    }
}
