//! Configuration for building and querying a knowledge-base index.
//!
//! Everything is read from one TOML document:
//!
//! ```toml
//! index_path = "vector_store/index.db"
//! backend = "hnsw"          # optional, omitted means the best compiled-in backend
//! log_level = "info"
//!
//! [chunking]
//! max_passage_len = 500
//! overlap_fraction = 0.15
//! min_passage_len = 16
//!
//! [embedding]
//! provider = "hashing"
//! model_version = "v1"
//! dimension = 512
//!
//! [retrieval]
//! top_k = 5
//! min_similarity = 0.2
//!
//! [hnsw]
//! m = 16
//! ef_construction = 100
//! ef_search = 64
//! ```
//!
//! Every section and key is optional and falls back to its default.

use crate::error::{Error, Result};
use crate::storage::{HnswParams, StoreBackend};
use lore_ai_context::ChunkerConfig;
use lore_ai_embed::EmbedConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Query-time settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Passages requested when the caller does not pick `k`
    pub top_k: usize,
    /// Passages scoring below this cosine similarity are not used as context
    pub min_similarity: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.2,
        }
    }
}

impl RetrievalConfig {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::config("retrieval.top_k must be at least 1"));
        }
        if !(-1.0..=1.0).contains(&self.min_similarity) {
            return Err(Error::config(format!(
                "retrieval.min_similarity must be within -1.0..=1.0, got {}",
                self.min_similarity
            )));
        }
        Ok(())
    }
}

/// Top-level configuration shared by the indexer and the retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Location of the persisted index
    pub index_path: PathBuf,
    /// Requested backend; `None` picks the best one compiled in
    pub backend: Option<StoreBackend>,
    /// Maximum level for [`init_tracing`]
    pub log_level: String,
    pub chunking: ChunkerConfig,
    pub embedding: EmbedConfig,
    pub retrieval: RetrievalConfig,
    pub hnsw: HnswParams,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("vector_store/index.db"),
            backend: None,
            log_level: "info".to_string(),
            chunking: ChunkerConfig::default(),
            embedding: EmbedConfig::default(),
            retrieval: RetrievalConfig::default(),
            hnsw: HnswParams::default(),
        }
    }
}

impl RetrieverConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&content)
    }

    pub fn with_index_path<P: Into<PathBuf>>(mut self, index_path: P) -> Self {
        self.index_path = index_path.into();
        self
    }

    pub fn with_backend(mut self, backend: StoreBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_embedding(mut self, embedding: EmbedConfig) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkerConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    /// Backend this process will use.
    pub fn resolved_backend(&self) -> StoreBackend {
        StoreBackend::resolve(self.backend)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking
            .validate()
            .map_err(|e| Error::config(e.to_string()))?;
        self.embedding
            .validate()
            .map_err(|e| Error::config(e.to_string()))?;
        self.retrieval.validate()?;
        self.hnsw.validate()?;
        parse_level(&self.log_level)?;
        Ok(())
    }
}

fn parse_level(level: &str) -> Result<tracing::Level> {
    level
        .parse()
        .map_err(|_| Error::config(format!("unknown log level '{level}'")))
}

/// Install a global fmt subscriber at the configured level.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing(config: &RetrieverConfig) -> Result<()> {
    let level = parse_level(&config.log_level)?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok(); // Ignore if already initialized
    Ok(())
}
