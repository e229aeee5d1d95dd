//! Environment-based configuration.
//!
//! All workflow knobs — step budget, web-search result count, and the three
//! confidence thresholds — are injected from here; the core never hard-codes
//! them. The binary loads a `.env` file first (via `dotenvy`), then this
//! module reads the process environment.
//!
//! | Variable | Default | Purpose |
//! |----------|---------|---------|
//! | `RECURSION_LIMIT` | 10 | step budget per run |
//! | `K_SEARCH_RESULTS` | 5 | web results per online search |
//! | `RELEVANCE_THRESHOLD` | 0.75 | document relevance bar |
//! | `FAITHFULNESS_THRESHOLD` | 0.65 | hallucination bar |
//! | `COVERAGE_THRESHOLD` | 0.65 | question-coverage bar |
//! | `LLM_MODEL_NAME` | — | judge/generator model (required) |
//! | `LLM_API_KEY` | `random_string` | OpenAI-compatible API key |
//! | `LLM_BASE_URL` | `http://127.0.0.1:8080` | OpenAI-compatible server |
//! | `EMBEDDING_MODEL_NAME` | `text-embedding-3-small` | query embedder |
//! | `QDRANT_URL` | `http://localhost:6333` | vector store |
//! | `COLLECTION_NAME` | `domain_knowledge` | Qdrant collection |
//! | `RETRIEVAL_LIMIT` | 4 | documents fetched per question |
//! | `REQUEST_TIMEOUT_SECS` | 30 | per-HTTP-call timeout |

use std::time::Duration;

use thiserror::Error;

use crate::stages::StageThresholds;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("LLM_MODEL_NAME must be set")]
    MissingModelName,

    #[error("{0} must be within [0, 1]")]
    ThresholdOutOfRange(&'static str),

    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),
}

/// Application configuration for the workflow and its capability clients.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Model name for the judge/generator chat calls.
    pub model_name: String,

    /// API key for the OpenAI-compatible server.
    pub api_key: String,

    /// Base URL of the OpenAI-compatible server.
    pub llm_base_url: String,

    /// Model name for query embeddings.
    pub embedding_model: String,

    /// Qdrant connection URL.
    pub qdrant_url: String,

    /// Qdrant collection holding the domain documents.
    pub collection_name: String,

    /// How many documents to fetch per retrieval.
    pub retrieval_limit: usize,

    /// Web results per online search.
    pub search_results: usize,

    /// Step budget per workflow run.
    pub recursion_limit: usize,

    /// Document relevance bar (inclusive).
    pub relevance_threshold: f64,

    /// Hallucination bar (answers at or below are regenerated).
    pub faithfulness_threshold: f64,

    /// Question-coverage bar (strictly above releases the answer).
    pub coverage_threshold: f64,

    /// Timeout applied to each outgoing HTTP call.
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_name: String::new(),
            api_key: "random_string".to_string(),
            llm_base_url: "http://127.0.0.1:8080".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            qdrant_url: "http://localhost:6333".to_string(),
            collection_name: "domain_knowledge".to_string(),
            retrieval_limit: 4,
            search_results: 5,
            recursion_limit: 10,
            relevance_threshold: 0.75,
            faithfulness_threshold: 0.65,
            coverage_threshold: 0.65,
            request_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(model) = std::env::var("LLM_MODEL_NAME") {
            config.model_name = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.api_key = key;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm_base_url = url;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL_NAME") {
            config.embedding_model = model;
        }
        if let Ok(url) = std::env::var("QDRANT_URL") {
            config.qdrant_url = url;
        }
        if let Ok(name) = std::env::var("COLLECTION_NAME") {
            config.collection_name = name;
        }
        if let Ok(limit) = std::env::var("RETRIEVAL_LIMIT") {
            if let Ok(n) = limit.parse() {
                config.retrieval_limit = n;
            }
        }
        if let Ok(k) = std::env::var("K_SEARCH_RESULTS") {
            if let Ok(n) = k.parse() {
                config.search_results = n;
            }
        }
        if let Ok(limit) = std::env::var("RECURSION_LIMIT") {
            if let Ok(n) = limit.parse() {
                config.recursion_limit = n;
            }
        }
        if let Ok(t) = std::env::var("RELEVANCE_THRESHOLD") {
            if let Ok(v) = t.parse() {
                config.relevance_threshold = v;
            }
        }
        if let Ok(t) = std::env::var("FAITHFULNESS_THRESHOLD") {
            if let Ok(v) = t.parse() {
                config.faithfulness_threshold = v;
            }
        }
        if let Ok(t) = std::env::var("COVERAGE_THRESHOLD") {
            if let Ok(v) = t.parse() {
                config.coverage_threshold = v;
            }
        }
        if let Ok(t) = std::env::var("REQUEST_TIMEOUT_SECS") {
            if let Ok(v) = t.parse() {
                config.request_timeout_secs = v;
            }
        }

        config
    }

    /// Set the chat model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_name = model.into();
        self
    }

    /// Set the OpenAI-compatible server base URL.
    pub fn with_llm_base_url(mut self, url: impl Into<String>) -> Self {
        self.llm_base_url = url.into();
        self
    }

    /// Set the step budget.
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Set the web results per search.
    pub fn with_search_results(mut self, k: usize) -> Self {
        self.search_results = k;
        self
    }

    /// Check invariants before wiring clients.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_name.is_empty() {
            return Err(ConfigError::MissingModelName);
        }
        for (name, value) in [
            ("RELEVANCE_THRESHOLD", self.relevance_threshold),
            ("FAITHFULNESS_THRESHOLD", self.faithfulness_threshold),
            ("COVERAGE_THRESHOLD", self.coverage_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange(name));
            }
        }
        if self.recursion_limit == 0 {
            return Err(ConfigError::ZeroCount("RECURSION_LIMIT"));
        }
        if self.search_results == 0 {
            return Err(ConfigError::ZeroCount("K_SEARCH_RESULTS"));
        }
        if self.retrieval_limit == 0 {
            return Err(ConfigError::ZeroCount("RETRIEVAL_LIMIT"));
        }
        Ok(())
    }

    /// The three confidence thresholds as stage configuration.
    pub fn thresholds(&self) -> StageThresholds {
        StageThresholds {
            relevance: self.relevance_threshold,
            faithfulness: self.faithfulness_threshold,
            coverage: self.coverage_threshold,
        }
    }

    /// The per-call HTTP timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
