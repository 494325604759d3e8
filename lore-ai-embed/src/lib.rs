//! # lore-ai-embed
//!
//! Text embedding providers for the lore retrieval pipeline. Every provider
//! implements the async [`EmbeddingProvider`] trait and reports an
//! [`EmbedderIdentity`], which the retriever stores with an index so that vectors
//! from different models are never compared.
//!
//! ## Providers
//!
//! - [`HashingProvider`]: deterministic feature-hashing bag-of-words vectors.
//!   Needs no model files, which makes it the default and the provider used in tests.
//! - `FastEmbedProvider` (feature `fastembed`): local ONNX sentence-transformer
//!   models (`all-MiniLM-L6-v2`) with a process-wide model cache.
//!
//! ## Quick Start
//!
//! ```
//! use lore_ai_embed::{EmbedConfig, EmbeddingProvider, create_provider};
//!
//! # async fn example() -> lore_ai_embed::Result<()> {
//! let provider = create_provider(&EmbedConfig::hashing()).await?;
//!
//! let texts = vec!["The Hexcore".to_string(), "Viktor's cane".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! assert_eq!(result.len(), 2);
//! assert_eq!(result.dimension, provider.embedding_dimension());
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] using the crate's [`EmbedError`] type.

pub mod config;
pub mod error;
pub mod hashing;
pub mod provider;

// Re-export main types for easy access
pub use config::{EmbedConfig, EmbedderIdentity, ProviderKind};
pub use error::{EmbedError, Result};
pub use hashing::HashingProvider;
#[cfg(feature = "fastembed")]
pub use provider::FastEmbedProvider;
pub use provider::{EmbeddingProvider, EmbeddingResult, create_provider};
