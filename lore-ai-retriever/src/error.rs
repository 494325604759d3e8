//! Error taxonomy for indexing and retrieval.

use lore_ai_context::ChunkError;
use lore_ai_embed::EmbedError;
use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Step of an index build that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Chunking,
    Embedding,
    Storing,
    Persisting,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            BuildStage::Chunking => "chunking",
            BuildStage::Embedding => "embedding",
            BuildStage::Storing => "storing",
            BuildStage::Persisting => "persisting",
        };
        f.write_str(stage)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A chunk id is already present in the store or repeated within a batch
    #[error("duplicate chunk id: {id}")]
    DuplicateId { id: String },

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector store is empty")]
    EmptyStore,

    /// The index was built by a different embedder than the one in use
    #[error("stale index: built with {index}, active embedder is {embedder}")]
    StaleIndex { index: String, embedder: String },

    /// An embedder returned a different number of vectors than texts it was given
    #[error("embedder returned {got} vectors for {expected} passages")]
    EmbeddingCount { expected: usize, got: usize },

    #[error(
        "index build failed while {stage}{}: {source}",
        .source_id.as_deref().map(|id| format!(" '{id}'")).unwrap_or_default()
    )]
    IndexBuild {
        stage: BuildStage,
        source_id: Option<String>,
        #[source]
        source: Box<Error>,
    },

    #[error("no index found at {}", .path.display())]
    IndexNotFound { path: PathBuf },

    #[error("corrupt index: {reason}")]
    CorruptIndex { reason: String },

    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),

    #[error("chunking error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl Error {
    pub(crate) fn build(stage: BuildStage, source_id: Option<&str>, source: Error) -> Self {
        Self::IndexBuild {
            stage,
            source_id: source_id.map(str::to_string),
            source: Box::new(source),
        }
    }

    pub(crate) fn corrupt<S: Into<String>>(reason: S) -> Self {
        Self::CorruptIndex {
            reason: reason.into(),
        }
    }

    pub(crate) fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
