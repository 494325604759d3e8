//! Exhaustive vector store. Scores every record on every query, which makes it
//! the reference the graph backend is checked against.

use super::similarity::{cosine_similarity, rank_order};
use super::{
    EmbeddedRecord, RetrievalResult, ScoredChunk, StoreBackend, StoreIdentity, VectorStore,
    validate_batch, validate_query,
};
use crate::error::Result;
use async_trait::async_trait;
use lore_ai_embed::EmbedderIdentity;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct BruteForceStore {
    identity: StoreIdentity,
    records: Vec<EmbeddedRecord>,
    ids: HashSet<String>,
}

impl BruteForceStore {
    pub fn new(embedder: EmbedderIdentity) -> Self {
        Self {
            identity: StoreIdentity {
                embedder,
                backend: StoreBackend::BruteForce,
            },
            records: Vec::new(),
            ids: HashSet::new(),
        }
    }
}

#[async_trait]
impl VectorStore for BruteForceStore {
    fn identity(&self) -> &StoreIdentity {
        &self.identity
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn records(&self) -> &[EmbeddedRecord] {
        &self.records
    }

    fn add(&mut self, records: Vec<EmbeddedRecord>) -> Result<()> {
        validate_batch(&self.ids, self.dimension(), &records)?;
        for record in records {
            self.ids.insert(record.chunk.id.clone());
            self.records.push(record);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<RetrievalResult> {
        validate_query(self.len(), self.dimension(), query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        Ok(scan(&self.records, query, k))
    }
}

/// Score every record against `query` and keep the best `k`.
pub(crate) fn scan(records: &[EmbeddedRecord], query: &[f32], k: usize) -> RetrievalResult {
    let mut scored: Vec<(usize, f32)> = records
        .iter()
        .enumerate()
        .map(|(ordinal, record)| (ordinal, cosine_similarity(query, &record.vector)))
        .collect();
    scored.sort_unstable_by(rank_order);
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(ordinal, score)| ScoredChunk {
            chunk: records[ordinal].chunk.clone(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{identity, record};
    use super::*;
    use crate::error::Error;

    fn store() -> BruteForceStore {
        let mut store = BruteForceStore::new(identity(2));
        store
            .add(vec![
                record("a#0", vec![1.0, 0.0]),
                record("a#1", vec![0.0, 1.0]),
                record("b#0", vec![1.0, 1.0]),
            ])
            .unwrap();
        store
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let results = store().search(&[1.0, 0.1], 3).unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a#0", "b#0", "a#1"]);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_k_is_clamped() {
        let store = store();
        assert_eq!(store.search(&[1.0, 0.0], 10).unwrap().len(), 3);
        assert!(store.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_equal_scores_prefer_earlier_records() {
        let mut store = BruteForceStore::new(identity(2));
        store
            .add(vec![
                record("late#0", vec![0.0, 1.0]),
                record("twin#0", vec![1.0, 0.0]),
                record("twin#1", vec![2.0, 0.0]),
            ])
            .unwrap();

        let results = store.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].chunk.id, "twin#0");
        assert_eq!(results[1].chunk.id, "twin#1");
    }

    #[test]
    fn test_failed_add_leaves_store_unchanged() {
        let mut store = store();
        let before = store.records().to_vec();

        let result = store.add(vec![
            record("c#0", vec![0.5, 0.5]),
            record("a#1", vec![0.3, 0.3]),
        ]);

        assert!(matches!(result, Err(Error::DuplicateId { id }) if id == "a#1"));
        assert_eq!(store.records(), before.as_slice());
        assert!(store.add(vec![record("c#0", vec![0.5, 0.5])]).is_ok());
    }

    #[test]
    fn test_empty_store_and_bad_queries() {
        let empty = BruteForceStore::new(identity(2));
        assert!(matches!(empty.search(&[1.0], 1), Err(Error::EmptyStore)));
        assert!(matches!(
            store().search(&[1.0, 0.0, 0.0], 1),
            Err(Error::DimensionMismatch {
                expected: 2,
                got: 3
            })
        ));
    }
}
