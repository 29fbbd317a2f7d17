//! Pipeline configuration.
//!
//! [`RagConfig`] holds every tunable policy value. Defaults match the
//! chunking and retrieval settings the pipeline has always used; none of
//! them are load-bearing, so all are overridable from a JSON file, from
//! `RAGDIGEST_*` environment variables, or through [`RagConfigBuilder`].

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    chunking::{Chunker, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    error::{Error, Result},
};

pub const DEFAULT_TOP_K: usize = 4;
pub const DEFAULT_HISTORY_TURNS: usize = 6;
pub const DEFAULT_MAP_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_GENERATION_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_EMBEDDING_TIMEOUT_MS: u64 = 30_000;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "RAGDIGEST_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    pub chunk_overlap: usize,
    /// Chunks retrieved per question.
    pub top_k: usize,
    /// Most recent conversation turns fed to the reduce phase.
    pub history_turns: usize,
    /// Upper bound on concurrent map calls.
    pub map_concurrency: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-call generation deadline in milliseconds.
    pub generation_timeout_ms: u64,
    /// Per-call embedding deadline in milliseconds.
    pub embedding_timeout_ms: u64,
    /// Retrieved chunks scoring below this are discarded before answering.
    pub similarity_threshold: Option<f32>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            history_turns: DEFAULT_HISTORY_TURNS,
            map_concurrency: DEFAULT_MAP_CONCURRENCY,
            temperature: 0.0,
            max_tokens: DEFAULT_MAX_TOKENS,
            generation_timeout_ms: DEFAULT_GENERATION_TIMEOUT_MS,
            embedding_timeout_ms: DEFAULT_EMBEDDING_TIMEOUT_MS,
            similarity_threshold: None,
        }
    }
}

impl RagConfig {
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Load a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RAGDIGEST_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
            raw.trim().parse().map_err(|_| {
                Error::InvalidConfiguration(format!(
                    "{ENV_PREFIX}{key} has an invalid value: {raw}"
                ))
            })
        }

        if let Some(v) = lookup("CHUNK_SIZE") {
            self.chunk_size = parse("CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("CHUNK_OVERLAP") {
            self.chunk_overlap = parse("CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = lookup("TOP_K") {
            self.top_k = parse("TOP_K", &v)?;
        }
        if let Some(v) = lookup("HISTORY_TURNS") {
            self.history_turns = parse("HISTORY_TURNS", &v)?;
        }
        if let Some(v) = lookup("MAP_CONCURRENCY") {
            self.map_concurrency = parse("MAP_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("TEMPERATURE") {
            self.temperature = parse("TEMPERATURE", &v)?;
        }
        if let Some(v) = lookup("MAX_TOKENS") {
            self.max_tokens = parse("MAX_TOKENS", &v)?;
        }
        if let Some(v) = lookup("GENERATION_TIMEOUT_MS") {
            self.generation_timeout_ms = parse("GENERATION_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("EMBEDDING_TIMEOUT_MS") {
            self.embedding_timeout_ms = parse("EMBEDDING_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("SIMILARITY_THRESHOLD") {
            self.similarity_threshold = Some(parse("SIMILARITY_THRESHOLD", &v)?);
        }

        self.validate()?;
        Ok(self)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        Chunker::new(self.chunk_size, self.chunk_overlap)?;
        if self.top_k == 0 {
            return Err(Error::InvalidConfiguration(
                "top_k must be greater than zero".to_string(),
            ));
        }
        if self.map_concurrency == 0 {
            return Err(Error::InvalidConfiguration(
                "map_concurrency must be greater than zero".to_string(),
            ));
        }
        if self.generation_timeout_ms == 0 || self.embedding_timeout_ms == 0 {
            return Err(Error::InvalidConfiguration(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::InvalidConfiguration(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if let Some(threshold) = self.similarity_threshold
            && !(-1.0..=1.0).contains(&threshold)
        {
            return Err(Error::InvalidConfiguration(format!(
                "similarity_threshold must be within -1.0..=1.0, got {threshold}"
            )));
        }
        Ok(())
    }

    /// The chunker described by this config.
    pub fn chunker(&self) -> Result<Chunker> {
        Chunker::new(self.chunk_size, self.chunk_overlap)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }
}

/// Builder for a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    pub fn history_turns(mut self, turns: usize) -> Self {
        self.config.history_turns = turns;
        self
    }

    pub fn map_concurrency(mut self, limit: usize) -> Self {
        self.config.map_concurrency = limit;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.config.max_tokens = max_tokens;
        self
    }

    /// Millisecond resolution; a zero duration fails validation.
    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.config.generation_timeout_ms = millis(timeout);
        self
    }

    /// Millisecond resolution; a zero duration fails validation.
    pub fn embedding_timeout(mut self, timeout: Duration) -> Self {
        self.config.embedding_timeout_ms = millis(timeout);
        self
    }

    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = Some(threshold);
        self
    }

    /// Build the config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `chunk_overlap >=
    /// chunk_size`, `top_k == 0`, `map_concurrency == 0`, or a value is out of
    /// range.
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}
