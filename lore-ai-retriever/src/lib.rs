//! lore-ai-retriever: grounded retrieval over a character knowledge base
//!
//! This crate builds a vector index from background documents and answers
//! questions with the passages most relevant to them, formatted as a context
//! block for a generative model.
//!
//! ## Key Modules
//!
//! - **[`storage`]**: `VectorStore` trait, HNSW and brute-force backends, persistence
//! - **[`indexer`]**: Offline pipeline from documents to a persisted index
//! - **[`retriever`]**: Query embedding, top-k search and context assembly
//! - **[`config`]**: TOML configuration and tracing setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lore_ai_embed::create_provider;
//! use lore_ai_retriever::{DocumentSet, Indexer, Retriever, RetrieverConfig};
//!
//! # async fn example() -> lore_ai_retriever::Result<()> {
//! let config = RetrieverConfig::default();
//! let embedder = create_provider(&config.embedding).await?;
//!
//! let mut documents = DocumentSet::new();
//! documents.insert("viktor_tech".into(), "# Hexcore\nThe Hexcore adapts.".into());
//! Indexer::from_config(&config)?
//!     .build(&documents, embedder.as_ref(), &config.index_path)
//!     .await?;
//!
//! let retriever = Retriever::open(&config, embedder).await?;
//! if let Some(context) = retriever.retrieve_default("What is the Hexcore?").await?.context() {
//!     println!("{context}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Documents → Chunker → Embedder → VectorStore → index file
//!                                       ↓
//! Query → Embedder → VectorStore::search → context block
//! ```

pub mod config;
pub mod error;
pub mod indexer;
pub mod retriever;
pub mod storage;

pub use config::{RetrievalConfig, RetrieverConfig, init_tracing};
pub use error::{BuildStage, Error, Result};
pub use indexer::{DocumentSet, Indexer};
pub use retriever::{ContextBlock, Retrieval, Retriever, assemble_context};
pub use storage::{
    EmbeddedRecord, HnswParams, RetrievalResult, ScoredChunk, StoreBackend, StoreIdentity,
    VectorStore, load_store,
};
