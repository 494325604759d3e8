//! HNSW (Hierarchical Navigable Small World) vector store.
//!
//! Records are nodes of a multi-layer proximity graph. Upper layers hold an
//! exponentially shrinking subset of nodes and act as an express lane: a query
//! descends greedily from the top layer to layer 1, then runs a beam search of
//! width `max(k, ef_search)` on layer 0. Candidates are rescored with the shared
//! cosine function, so the scores are exact even though the candidate set is
//! approximate.
//!
//! Level assignment uses a fixed-seed LCG. Inserting the same records in the
//! same order always produces the same graph.
//!
//! Pruning never removes the last inbound link of a node on a layer, so every
//! node stays reachable. Queries asking for the whole store, or for more
//! passages than the beam found, fall back to an exact scan.

use super::brute_force::scan;
use super::similarity::cosine_similarity;
use super::{
    EmbeddedRecord, HnswParams, RetrievalResult, ScoredChunk, StoreBackend, StoreIdentity,
    VectorStore, validate_batch, validate_query,
};
use crate::error::Result;
use async_trait::async_trait;
use lore_ai_embed::EmbedderIdentity;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

const RNG_SEED: u64 = 42;
const MAX_LEVEL: usize = 16;

/// A node id paired with its similarity to the current query.
///
/// Ordered so that "greater" means "better": higher score, then lower id.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    id: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Adjacency lists of one record, one list per layer it lives on.
#[derive(Debug, Clone)]
struct Node {
    neighbors: Vec<Vec<u32>>,
    /// Number of nodes linking to this one, per layer
    inbound: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct HnswStore {
    identity: StoreIdentity,
    params: HnswParams,
    records: Vec<EmbeddedRecord>,
    ids: HashSet<String>,
    nodes: Vec<Node>,
    entry_point: Option<u32>,
    level_max: usize,
    level_mult: f64,
    rng_state: u64,
}

impl HnswStore {
    pub fn new(embedder: EmbedderIdentity, params: HnswParams) -> Self {
        let level_mult = 1.0 / (params.m.max(2) as f64).ln();
        Self {
            identity: StoreIdentity {
                embedder,
                backend: StoreBackend::Hnsw,
            },
            params,
            records: Vec::new(),
            ids: HashSet::new(),
            nodes: Vec::new(),
            entry_point: None,
            level_max: 0,
            level_mult,
            rng_state: RNG_SEED,
        }
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// Number of layers above the base layer.
    pub fn top_level(&self) -> usize {
        self.level_max
    }

    fn max_neighbors(&self, level: usize) -> usize {
        if level == 0 {
            self.params.m * 2
        } else {
            self.params.m
        }
    }

    /// Draw a level from an exponential distribution: floor(-ln(U) * 1/ln(M)).
    fn select_level(&mut self) -> usize {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        let r = ((self.rng_state >> 32) as f64 / u32::MAX as f64).max(1e-9);
        ((-r.ln() * self.level_mult).floor() as usize).min(MAX_LEVEL)
    }

    fn similarity(&self, id: u32, query: &[f32]) -> f32 {
        cosine_similarity(query, &self.records[id as usize].vector)
    }

    fn layer(&self, id: u32, level: usize) -> &[u32] {
        self.nodes[id as usize]
            .neighbors
            .get(level)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Follow the best neighbour on one layer until no neighbour improves.
    fn greedy_closest(&self, entry: u32, query: &[f32], level: usize) -> u32 {
        let mut best = Candidate {
            score: self.similarity(entry, query),
            id: entry,
        };
        loop {
            let mut changed = false;
            for &neighbor in self.layer(best.id, level) {
                let candidate = Candidate {
                    score: self.similarity(neighbor, query),
                    id: neighbor,
                };
                if candidate > best {
                    best = candidate;
                    changed = true;
                }
            }
            if !changed {
                return best.id;
            }
        }
    }

    /// Beam search on one layer. Returns up to `ef` candidates, best first.
    fn search_layer(&self, entry: u32, query: &[f32], ef: usize, level: usize) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = HashSet::new();
        // Candidates: max-heap, explore the most similar first
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
        // Results: min-heap, the worst kept result sits on top
        let mut results: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();

        let start = Candidate {
            score: self.similarity(entry, query),
            id: entry,
        };
        visited.insert(entry);
        candidates.push(start);
        results.push(Reverse(start));

        while let Some(current) = candidates.pop() {
            // Nothing left that could beat the worst kept result
            if results.len() >= ef && results.peek().is_some_and(|Reverse(worst)| current < *worst)
            {
                break;
            }

            for &neighbor in self.layer(current.id, level) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let candidate = Candidate {
                    score: self.similarity(neighbor, query),
                    id: neighbor,
                };
                let improves = results
                    .peek()
                    .is_none_or(|Reverse(worst)| candidate > *worst);
                if improves || results.len() < ef {
                    candidates.push(candidate);
                    results.push(Reverse(candidate));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut found: Vec<Candidate> = results.into_iter().map(|Reverse(c)| c).collect();
        found.sort_unstable_by(|a, b| b.cmp(a));
        found
    }

    fn inbound(&self, id: u32, level: usize) -> u32 {
        self.nodes[id as usize]
            .inbound
            .get(level)
            .copied()
            .unwrap_or(0)
    }

    fn connect(&mut self, from: u32, to: u32, level: usize) {
        let node = &mut self.nodes[from as usize];
        while node.neighbors.len() <= level {
            node.neighbors.push(Vec::new());
        }
        if node.neighbors[level].contains(&to) {
            return;
        }
        node.neighbors[level].push(to);
        if let Some(count) = self.nodes[to as usize].inbound.get_mut(level) {
            *count += 1;
        }
    }

    /// Keep at most `limit` neighbours of `id` on `level`, most similar first.
    ///
    /// A neighbour whose only inbound link on this layer comes from `id` takes
    /// the place of the weakest kept neighbour that other nodes still link to.
    fn prune(&mut self, id: u32, level: usize, limit: usize) {
        let neighbors = self.layer(id, level);
        if neighbors.len() <= limit {
            return;
        }

        let base = &self.records[id as usize].vector;
        let mut kept: Vec<Candidate> = neighbors
            .iter()
            .map(|&n| Candidate {
                score: cosine_similarity(base, &self.records[n as usize].vector),
                id: n,
            })
            .collect();
        kept.sort_unstable_by(|a, b| b.cmp(a));
        let overflow = kept.split_off(limit);

        let mut dropped = Vec::with_capacity(overflow.len());
        for candidate in overflow {
            let evict = if self.inbound(candidate.id, level) <= 1 {
                kept.iter().rposition(|k| self.inbound(k.id, level) > 1)
            } else {
                None
            };
            match evict {
                Some(pos) => dropped.push(std::mem::replace(&mut kept[pos], candidate)),
                None => dropped.push(candidate),
            }
        }
        kept.sort_unstable_by(|a, b| b.cmp(a));

        for candidate in dropped {
            if let Some(count) = self.nodes[candidate.id as usize].inbound.get_mut(level) {
                *count = count.saturating_sub(1);
            }
        }
        self.nodes[id as usize].neighbors[level] = kept.into_iter().map(|c| c.id).collect();
    }

    /// Link the record at `id` (already pushed to `records`) into the graph.
    fn insert(&mut self, id: u32) {
        let level = self.select_level();
        self.nodes.push(Node {
            neighbors: vec![Vec::new(); level + 1],
            inbound: vec![0; level + 1],
        });

        let Some(mut entry) = self.entry_point else {
            self.entry_point = Some(id);
            self.level_max = level;
            return;
        };

        let query = self.records[id as usize].vector.clone();

        // Phase 1: greedy descent through the layers above the node's own
        for lc in (level + 1..=self.level_max).rev() {
            entry = self.greedy_closest(entry, &query, lc);
        }

        // Phase 2: connect on every shared layer, top down
        for lc in (0..=level.min(self.level_max)).rev() {
            let found = self.search_layer(entry, &query, self.params.ef_construction, lc);
            let limit = self.max_neighbors(lc);
            let selected: Vec<u32> = found.iter().take(limit).map(|c| c.id).collect();

            for &neighbor in &selected {
                self.connect(neighbor, id, lc);
                self.connect(id, neighbor, lc);
            }
            for &neighbor in &selected {
                self.prune(neighbor, lc, limit);
            }

            if let Some(best) = found.first() {
                entry = best.id;
            }
        }

        if level > self.level_max {
            self.entry_point = Some(id);
            self.level_max = level;
        }
    }
}

#[async_trait]
impl VectorStore for HnswStore {
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
            let id = self.records.len() as u32;
            self.ids.insert(record.chunk.id.clone());
            self.records.push(record);
            self.insert(id);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<RetrievalResult> {
        validate_query(self.len(), self.dimension(), query)?;
        let Some(mut entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        if k >= self.len() {
            return Ok(scan(&self.records, query, k));
        }

        for lc in (1..=self.level_max).rev() {
            entry = self.greedy_closest(entry, query, lc);
        }

        let ef = k.max(self.params.ef_search);
        let found = self.search_layer(entry, query, ef, 0);
        if found.len() < k {
            tracing::debug!(
                "Graph search reached {} of {} requested passages, scanning all records",
                found.len(),
                k
            );
            return Ok(scan(&self.records, query, k));
        }

        Ok(found
            .into_iter()
            .take(k)
            .map(|c| ScoredChunk {
                chunk: self.records[c.id as usize].chunk.clone(),
                score: c.score,
            })
            .collect())
    }
}
