//! Vector storage for embedded passages.
//!
//! A [`VectorStore`] owns an ordered list of [`EmbeddedRecord`]s, each pairing a
//! [`Chunk`] with the vector its embedder produced, and answers top-k cosine
//! similarity queries over them. Two backends implement the trait:
//!
//! - **HnswStore** (feature `hnsw`): hierarchical navigable small-world graph
//! - **BruteForceStore**: scores every record; always available
//!
//! ## Architecture
//!
//! ```text
//! StoreBackend::resolve ── create ──┬─ HnswStore
//!                                   └─ BruteForceStore
//!                  save / load_store ── persist (SQLite file)
//! ```
//!
//! Both backends score with [`similarity::cosine_similarity`] and break ties on
//! the lower insertion ordinal, so for the same records they agree on ids,
//! order and scores whenever the graph search visits the true neighbours.

use crate::error::{Error, Result};
use async_trait::async_trait;
use lore_ai_context::Chunk;
use lore_ai_embed::EmbedderIdentity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub mod brute_force;
#[cfg(feature = "hnsw")]
pub mod hnsw;
pub mod persist;
pub mod similarity;

pub use brute_force::BruteForceStore;
#[cfg(feature = "hnsw")]
pub use hnsw::HnswStore;

/// A passage together with its embedding. The pairing is never split.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

impl EmbeddedRecord {
    pub fn new(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self { chunk, vector }
    }
}

/// A search hit: the stored passage and its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Search hits ordered by descending similarity.
pub type RetrievalResult = Vec<ScoredChunk>;

/// Which similarity index answers queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Hnsw,
    BruteForce,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Hnsw => "hnsw",
            StoreBackend::BruteForce => "brute_force",
        }
    }

    /// Whether this backend was compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            StoreBackend::Hnsw => cfg!(feature = "hnsw"),
            StoreBackend::BruteForce => true,
        }
    }

    /// Best backend compiled into this build.
    pub fn probe() -> Self {
        if StoreBackend::Hnsw.is_available() {
            StoreBackend::Hnsw
        } else {
            StoreBackend::BruteForce
        }
    }

    /// Pick the backend for this process: the requested one when available,
    /// the probed one when nothing was requested, brute force otherwise.
    pub fn resolve(requested: Option<StoreBackend>) -> Self {
        match requested {
            None => Self::probe(),
            Some(backend) if backend.is_available() => backend,
            Some(backend) => {
                tracing::warn!(
                    "Backend '{}' is not available in this build, falling back to brute force",
                    backend
                );
                StoreBackend::BruteForce
            }
        }
    }

    /// Create an empty store for vectors produced by `embedder`.
    pub fn create(&self, embedder: EmbedderIdentity, params: &HnswParams) -> Box<dyn VectorStore> {
        match self {
            #[cfg(feature = "hnsw")]
            StoreBackend::Hnsw => Box::new(HnswStore::new(embedder, params.clone())),
            #[cfg(not(feature = "hnsw"))]
            StoreBackend::Hnsw => {
                let _ = params;
                tracing::warn!("HNSW backend not compiled in, creating a brute force store");
                Box::new(BruteForceStore::new(embedder))
            }
            StoreBackend::BruteForce => Box::new(BruteForceStore::new(embedder)),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hnsw" => Ok(StoreBackend::Hnsw),
            "brute_force" => Ok(StoreBackend::BruteForce),
            other => Err(Error::config(format!("unknown store backend '{other}'"))),
        }
    }
}

/// Graph construction and search parameters for the HNSW backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswParams {
    /// Max neighbours per node on upper layers; layer 0 allows twice as many
    pub m: usize,
    /// Beam width while inserting
    pub ef_construction: usize,
    /// Minimum beam width while searching
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 100,
            ef_search: 64,
        }
    }
}

impl HnswParams {
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(Error::config("hnsw.m must be at least 2"));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(Error::config(
                "hnsw.ef_construction and hnsw.ef_search must be positive",
            ));
        }
        Ok(())
    }
}

/// What a store's vectors mean and how they are indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreIdentity {
    pub embedder: EmbedderIdentity,
    pub backend: StoreBackend,
}

/// Similarity index over embedded passages.
///
/// Stores are filled once by the indexer through [`VectorStore::add`] and are
/// read-only afterwards; `search` takes `&self` so a finished store can be
/// shared behind an `Arc`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn identity(&self) -> &StoreIdentity;

    /// Vector length every record and query must have.
    fn dimension(&self) -> usize {
        self.identity().embedder.dimension
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records in insertion order.
    fn records(&self) -> &[EmbeddedRecord];

    /// Append records. Either every record is added or, on error, none is.
    fn add(&mut self, records: Vec<EmbeddedRecord>) -> Result<()>;

    /// Up to `k` records by descending cosine similarity to `query`.
    fn search(&self, query: &[f32], k: usize) -> Result<RetrievalResult>;

    /// Persist the store to `destination`, atomically replacing any existing file.
    async fn save(&self, destination: &Path) -> Result<()> {
        persist::save(self.identity(), self.records(), destination).await
    }
}

/// Load a persisted index into a store of the given backend.
pub async fn load_store(
    source: &Path,
    backend: StoreBackend,
    params: &HnswParams,
) -> Result<Box<dyn VectorStore>> {
    let loaded = persist::load(source).await?;
    tracing::info!(
        "Loading {} records from {} (built {} with {}, lore {}) into {} store",
        loaded.records.len(),
        source.display(),
        loaded.created_at.to_rfc3339(),
        loaded.backend,
        loaded.lore_version,
        backend
    );

    let mut store = backend.create(loaded.embedder, params);
    store.add(loaded.records)?;
    Ok(store)
}

/// Check a batch before any of it is stored.
pub(crate) fn validate_batch(
    known_ids: &HashSet<String>,
    dimension: usize,
    records: &[EmbeddedRecord],
) -> Result<()> {
    let mut batch_ids = HashSet::with_capacity(records.len());
    for record in records {
        if record.vector.len() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                got: record.vector.len(),
            });
        }
        if known_ids.contains(&record.chunk.id) || !batch_ids.insert(record.chunk.id.as_str()) {
            return Err(Error::DuplicateId {
                id: record.chunk.id.clone(),
            });
        }
    }
    Ok(())
}

/// Check a query against a store before searching.
pub(crate) fn validate_query(len: usize, dimension: usize, query: &[f32]) -> Result<()> {
    if len == 0 {
        return Err(Error::EmptyStore);
    }
    if query.len() != dimension {
        return Err(Error::DimensionMismatch {
            expected: dimension,
            got: query.len(),
        });
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_backend_resolution() {
        assert_eq!(
            StoreBackend::resolve(Some(StoreBackend::BruteForce)),
            StoreBackend::BruteForce
        );
        assert_eq!(StoreBackend::resolve(None), StoreBackend::probe());
        if cfg!(feature = "hnsw") {
            assert_eq!(StoreBackend::probe(), StoreBackend::Hnsw);
        } else {
            assert_eq!(
                StoreBackend::resolve(Some(StoreBackend::Hnsw)),
                StoreBackend::BruteForce
            );
        }
    }

    #[test]
    fn test_backend_names_round_trip() {
        for backend in [StoreBackend::Hnsw, StoreBackend::BruteForce] {
            assert_eq!(backend.as_str().parse::<StoreBackend>().unwrap(), backend);
        }
        assert!("faiss".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_created_store_matches_resolved_backend() {
        let backend = StoreBackend::resolve(None);
        let store = backend.create(identity(3), &HnswParams::default());
        assert_eq!(store.identity().backend, backend);
        assert_eq!(store.dimension(), 3);
        assert!(store.is_empty());
    }

    #[test]
    fn test_validate_batch() {
        let known: HashSet<String> = ["a#0".to_string()].into_iter().collect();

        assert!(validate_batch(&known, 2, &[record("b#0", vec![1.0, 0.0])]).is_ok());
        assert!(matches!(
            validate_batch(&known, 2, &[record("a#0", vec![1.0, 0.0])]),
            Err(Error::DuplicateId { id }) if id == "a#0"
        ));
        assert!(matches!(
            validate_batch(
                &known,
                2,
                &[record("c#0", vec![1.0, 0.0]), record("c#0", vec![0.0, 1.0])]
            ),
            Err(Error::DuplicateId { .. })
        ));
        assert!(matches!(
            validate_batch(&known, 2, &[record("d#0", vec![1.0])]),
            Err(Error::DimensionMismatch {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn test_validate_query_checks_emptiness_first() {
        assert!(matches!(
            validate_query(0, 3, &[1.0]),
            Err(Error::EmptyStore)
        ));
        assert!(matches!(
            validate_query(1, 3, &[1.0]),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(validate_query(1, 3, &[1.0, 0.0, 0.0]).is_ok());
    }
}
