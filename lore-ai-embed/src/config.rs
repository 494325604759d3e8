//! Configuration for embedding providers

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which embedding backend produces vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local feature-hashing bag-of-words embedder
    Hashing,
    /// ONNX sentence-transformer models via fastembed
    FastEmbed,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Hashing => "hashing",
            ProviderKind::FastEmbed => "fastembed",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for embedding models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Provider that turns text into vectors
    pub provider: ProviderKind,
    /// Name of the embedding model to use
    pub model_name: String,
    /// Version of the model; part of the identity stored with an index
    pub model_version: String,
    /// Vector length. Fixed for fastembed models, free for the hashing provider
    pub dimension: usize,
    /// Maximum batch size for embedding generation
    pub batch_size: usize,
    /// Whether to normalize embeddings
    pub normalize: bool,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self::hashing()
    }
}

impl EmbedConfig {
    /// Default hashing embedder: 512 buckets, normalized.
    pub fn hashing() -> Self {
        Self {
            provider: ProviderKind::Hashing,
            model_name: "fnv-bag-of-words".to_string(),
            model_version: "v1".to_string(),
            dimension: 512,
            batch_size: 32,
            normalize: true,
        }
    }

    /// The sentence-transformer model the knowledge base was tuned against.
    pub fn all_minilm_l6_v2() -> Self {
        Self {
            provider: ProviderKind::FastEmbed,
            model_name: "all-MiniLM-L6-v2".to_string(),
            model_version: "v1".to_string(),
            dimension: 384,
            batch_size: 16, // Smaller batch for ONNX inference
            normalize: true,
        }
    }

    /// Set the model version (builder style)
    pub fn with_model_version<S: Into<String>>(self, model_version: S) -> Self {
        Self {
            model_version: model_version.into(),
            ..self
        }
    }

    /// Set the vector dimension (builder style)
    pub fn with_dimension(self, dimension: usize) -> Self {
        Self { dimension, ..self }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set whether to normalize embeddings (builder style)
    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Reject settings no provider can work with.
    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(EmbedError::invalid_config("model_name must not be empty"));
        }
        if self.model_version.trim().is_empty() {
            return Err(EmbedError::invalid_config("model_version must not be empty"));
        }
        if self.dimension == 0 {
            return Err(EmbedError::invalid_config("dimension must be greater than zero"));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config(
                "batch_size must be greater than zero",
            ));
        }
        Ok(())
    }

    /// The identity vectors produced under this configuration carry.
    pub fn identity(&self) -> EmbedderIdentity {
        EmbedderIdentity {
            provider: self.provider.as_str().to_string(),
            model_name: self.model_name.clone(),
            model_version: self.model_version.clone(),
            dimension: self.dimension,
            normalized: self.normalize,
        }
    }
}

/// Identifies the embedder that produced a set of vectors.
///
/// An index records the identity it was built with; vectors from two
/// different identities live in different spaces and must never be compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbedderIdentity {
    /// Provider of the embedding model (e.g., "fastembed")
    pub provider: String,
    /// Name of the embedding model (e.g., "all-MiniLM-L6-v2")
    pub model_name: String,
    /// Version/revision of the model
    pub model_version: String,
    /// Dimension of the embedding vectors
    pub dimension: usize,
    /// Whether embeddings are normalized
    pub normalized: bool,
}

impl EmbedderIdentity {
    /// Create a unique identifier for this model configuration
    pub fn model_id(&self) -> String {
        let normalized_part = if self.normalized { "norm" } else { "raw" };
        format!(
            "{}:{}:{}:{}:{}",
            self.provider, self.model_name, self.model_version, self.dimension, normalized_part
        )
    }

    /// Vectors from `other` can be compared with vectors from `self`.
    pub fn is_compatible_with(&self, other: &EmbedderIdentity) -> bool {
        self.model_id() == other.model_id()
    }
}

impl fmt::Display for EmbedderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.model_id())
    }
}
