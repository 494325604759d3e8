//! Offline index construction.
//!
//! The indexer turns a set of loaded documents into a persisted vector store:
//!
//! ```text
//! DocumentSet ─→ Chunker ─→ embed_texts (batches) ─→ fresh VectorStore ─→ save
//! ```
//!
//! Builds are all-or-nothing. Every record goes into a store that nothing else
//! can see, and the store is written to disk only after the last document has
//! been embedded, so a failed build leaves the previous index file untouched.

use crate::config::RetrieverConfig;
use crate::error::{BuildStage, Error, Result};
use crate::storage::{EmbeddedRecord, HnswParams, StoreBackend, VectorStore};
use lore_ai_context::{Chunk, Chunker, ChunkerConfig};
use lore_ai_embed::EmbeddingProvider;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

/// Loaded documents keyed by source id. Iteration order is the build order.
pub type DocumentSet = BTreeMap<String, String>;

/// Default number of passages sent to the embedder at once
pub const DEFAULT_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct Indexer {
    chunker: Chunker,
    backend: StoreBackend,
    hnsw: HnswParams,
    batch_size: usize,
}

impl Indexer {
    pub fn new(chunking: ChunkerConfig, backend: StoreBackend) -> Result<Self> {
        Ok(Self {
            chunker: Chunker::new(chunking)?,
            backend,
            hnsw: HnswParams::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Indexer with the chunking, backend, batch and graph settings of `config`.
    pub fn from_config(config: &RetrieverConfig) -> Result<Self> {
        Ok(
            Self::new(config.chunking.clone(), config.resolved_backend())?
                .with_batch_size(config.embedding.batch_size)
                .with_hnsw_params(config.hnsw.clone()),
        )
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_hnsw_params(mut self, hnsw: HnswParams) -> Self {
        self.hnsw = hnsw;
        self
    }

    pub fn backend(&self) -> StoreBackend {
        self.backend
    }

    /// Chunk, embed and store every document, then persist to `destination`.
    ///
    /// Returns the freshly built store. On error nothing is written.
    pub async fn build(
        &self,
        documents: &DocumentSet,
        embedder: &dyn EmbeddingProvider,
        destination: &Path,
    ) -> Result<Box<dyn VectorStore>> {
        let started = Instant::now();
        let mut store = self.backend.create(embedder.identity(), &self.hnsw);

        for (source_id, text) in documents {
            let chunks = self.chunker.chunk(text, source_id).map_err(|e| {
                Error::build(BuildStage::Chunking, Some(source_id.as_str()), e.into())
            })?;
            if chunks.is_empty() {
                tracing::warn!("Document '{}' produced no passages", source_id);
                continue;
            }
            tracing::debug!("Chunked '{}' into {} passages", source_id, chunks.len());

            let records = self
                .embed_chunks(chunks, embedder)
                .await
                .map_err(|e| Error::build(BuildStage::Embedding, Some(source_id.as_str()), e))?;
            store
                .add(records)
                .map_err(|e| Error::build(BuildStage::Storing, Some(source_id.as_str()), e))?;
        }

        store
            .save(destination)
            .await
            .map_err(|e| Error::build(BuildStage::Persisting, None, e))?;

        tracing::info!(
            "Built {} index with {} passages from {} documents in {:?} ({})",
            store.identity().backend,
            store.len(),
            documents.len(),
            started.elapsed(),
            store.identity().embedder
        );
        Ok(store)
    }

    /// Embed passages in batches, pairing each passage with its vector.
    ///
    /// The embedded text carries the section heading; the stored chunk does not.
    async fn embed_chunks(
        &self,
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Vec<EmbeddedRecord>> {
        let mut records = Vec::with_capacity(chunks.len());
        let mut remaining = chunks.into_iter().peekable();

        while remaining.peek().is_some() {
            let batch: Vec<Chunk> = remaining.by_ref().take(self.batch_size).collect();
            let texts: Vec<String> = batch.iter().map(Chunk::embedding_text).collect();

            let result = embedder.embed_texts(&texts).await?;
            if result.embeddings.len() != batch.len() {
                return Err(Error::EmbeddingCount {
                    expected: batch.len(),
                    got: result.embeddings.len(),
                });
            }
            tracing::trace!("Embedded batch of {} passages", batch.len());

            records.extend(
                batch
                    .into_iter()
                    .zip(result.embeddings)
                    .map(|(chunk, vector)| EmbeddedRecord::new(chunk, vector)),
            );
        }

        Ok(records)
    }
}
