//! Query-time retrieval and context assembly.
//!
//! The [`Retriever`] embeds a question, asks the vector store for the nearest
//! passages and turns the ones that clear the similarity threshold into a
//! context block for the generator prompt. When nothing relevant is found it
//! says so with [`Retrieval::NoRelevantContext`] instead of returning an empty
//! block, so callers can fall back to ungrounded generation explicitly.

use crate::config::{RetrievalConfig, RetrieverConfig};
use crate::error::{Error, Result};
use crate::storage::{RetrievalResult, ScoredChunk, VectorStore, load_store};
use lore_ai_embed::EmbeddingProvider;
use std::sync::Arc;

/// First line of every context block
pub const CONTEXT_PREAMBLE: &str = "Here is relevant information from the knowledge base:";

/// Passages formatted for a prompt, together with the hits they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub text: String,
    pub passages: RetrievalResult,
}

/// Outcome of a retrieval.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    Grounded(ContextBlock),
    /// The store is empty or no passage cleared the similarity threshold
    NoRelevantContext,
}

impl Retrieval {
    pub fn is_grounded(&self) -> bool {
        matches!(self, Retrieval::Grounded(_))
    }

    /// The context text, if any passage was relevant.
    pub fn context(&self) -> Option<&str> {
        match self {
            Retrieval::Grounded(block) => Some(&block.text),
            Retrieval::NoRelevantContext => None,
        }
    }

    pub fn passages(&self) -> &[ScoredChunk] {
        match self {
            Retrieval::Grounded(block) => &block.passages,
            Retrieval::NoRelevantContext => &[],
        }
    }
}

/// Format passages as a context block, most similar first.
///
/// ```text
/// Here is relevant information from the knowledge base:
///
/// --- viktor_tech: Hexcore ---
/// The Hexcore ...
/// ```
pub fn assemble_context(passages: &[ScoredChunk]) -> String {
    let mut sections = Vec::with_capacity(passages.len() + 1);
    sections.push(CONTEXT_PREAMBLE.to_string());
    for passage in passages {
        sections.push(format!(
            "--- {} ---\n{}",
            passage.chunk.label(),
            passage.chunk.text
        ));
    }
    sections.join("\n\n")
}

/// Answers questions against a read-only index.
///
/// Cheap to share: the store and the embedder sit behind `Arc`s and every
/// method takes `&self`.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("store", self.store.identity())
            .field("records", &self.store.len())
            .field("embedder", &self.embedder.identity().model_id())
            .field("config", &self.config)
            .finish()
    }
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Load the persisted index named by `config` into this process's backend.
    ///
    /// Fails with [`Error::StaleIndex`] when the index was built by a different
    /// embedder than `embedder`.
    pub async fn open(
        config: &RetrieverConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let store = load_store(
            &config.index_path,
            config.resolved_backend(),
            &config.hnsw,
        )
        .await?;
        let retriever = Self::new(Arc::from(store), embedder, config.retrieval.clone());
        retriever.check_identity()?;
        Ok(retriever)
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    fn check_identity(&self) -> Result<()> {
        let index = &self.store.identity().embedder;
        let active = self.embedder.identity();
        if !index.is_compatible_with(&active) {
            return Err(Error::StaleIndex {
                index: index.model_id(),
                embedder: active.model_id(),
            });
        }
        Ok(())
    }

    /// The `k` passages most similar to `query`.
    pub async fn search(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        self.check_identity()?;
        let vector = self.embedder.embed_text(query).await?;
        self.store.search(&vector, k)
    }

    /// Retrieve up to `k` passages and assemble them into a context block.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Retrieval> {
        let hits = match self.search(query, k).await {
            Ok(hits) => hits,
            Err(Error::EmptyStore) => {
                tracing::debug!("Index is empty, no context for query");
                return Ok(Retrieval::NoRelevantContext);
            }
            Err(e) => return Err(e),
        };

        let found = hits.len();
        let passages: RetrievalResult = hits
            .into_iter()
            .filter(|hit| hit.score >= self.config.min_similarity)
            .collect();
        tracing::debug!(
            "Retrieved {} passages, {} above similarity {}",
            found,
            passages.len(),
            self.config.min_similarity
        );

        if passages.is_empty() {
            return Ok(Retrieval::NoRelevantContext);
        }
        Ok(Retrieval::Grounded(ContextBlock {
            text: assemble_context(&passages),
            passages,
        }))
    }

    /// [`Retriever::retrieve`] with the configured `top_k`.
    pub async fn retrieve_default(&self, query: &str) -> Result<Retrieval> {
        self.retrieve(query, self.config.top_k).await
    }
}
