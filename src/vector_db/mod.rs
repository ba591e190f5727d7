//! Embedding index: exact cosine segment plus lexical inverted index
//!
//! The index is derived state. The fragment store is authoritative; on open
//! the engine rebuilds both segments from stored fragments.
//!
//! Locking: `add`/`remove` take short exclusive locks; searches take shared
//! locks. While a rebuild swaps the semantic segment the `rebuilding` flag is
//! raised and semantic searches are answered lexically instead of waiting.

pub mod flat;
pub mod lexical;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};

use crate::config::IndexConfig;
use crate::errors::Result;
use crate::memory::types::FragmentId;

pub use flat::FlatSegment;
pub use lexical::LexicalIndex;

/// Which segment answers searches, fixed at startup from the embedding provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    Semantic,
    Lexical,
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Semantic => f.write_str("semantic"),
            Self::Lexical => f.write_str("lexical"),
        }
    }
}

/// A search hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: FragmentId,
    pub score: f32,
    pub created_at: DateTime<Utc>,
}

/// Higher score first, then more recent, then lower id
#[derive(PartialEq, Eq)]
struct Ranked(OrderedFloat<f32>, DateTime<Utc>, Reverse<FragmentId>);

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.0, self.1, &self.2).cmp(&(other.0, other.1, &other.2))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Bounded top-k selection, best first
pub(crate) fn top_k(hits: impl Iterator<Item = ScoredId>, k: usize) -> Vec<ScoredId> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::with_capacity(k + 1);
    for hit in hits {
        heap.push(Reverse(Ranked(
            OrderedFloat(hit.score),
            hit.created_at,
            Reverse(hit.id),
        )));
        if heap.len() > k {
            heap.pop();
        }
    }
    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse(Ranked(score, created_at, Reverse(id)))| ScoredId {
            id,
            score: score.into_inner(),
            created_at,
        })
        .collect()
}

/// Result of a search that may have degraded to the lexical segment
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub hits: Vec<ScoredId>,
    /// True when lexical scoring answered all or part of the search
    pub used_lexical: bool,
}

pub struct EmbeddingIndex {
    mode: IndexMode,
    config: IndexConfig,
    semantic: RwLock<FlatSegment>,
    lexical: RwLock<LexicalIndex>,
    generation: AtomicU64,
    /// Raised while the semantic segment is being replaced
    rebuilding: AtomicBool,
}

impl EmbeddingIndex {
    pub fn new(mode: IndexMode, dimension: Option<usize>, generation: u64, config: IndexConfig) -> Self {
        Self {
            mode,
            config,
            semantic: RwLock::new(FlatSegment::new(dimension)),
            lexical: RwLock::new(LexicalIndex::new()),
            generation: AtomicU64::new(generation),
            rebuilding: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> IndexMode {
        self.mode
    }

    pub fn dimension(&self) -> Option<usize> {
        self.semantic.read().dimension()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(AtomicOrdering::Acquire)
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(AtomicOrdering::SeqCst)
    }

    /// Number of vectors in the semantic segment
    pub fn len(&self) -> usize {
        self.semantic.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lexical_len(&self) -> usize {
        self.lexical.read().len()
    }

    /// Whether a vector of `len` dimensions would be accepted
    pub fn accepts_dimension(&self, len: usize) -> bool {
        self.semantic.read().check_dimension(len).is_ok()
    }

    /// Add a vector to the semantic segment.
    ///
    /// Dimension mismatch yields `RejectedInput`. In lexical mode vectors are
    /// ignored.
    pub fn add(&self, id: FragmentId, vector: &[f32], created_at: DateTime<Utc>) -> Result<()> {
        if self.mode == IndexMode::Lexical {
            return Ok(());
        }
        self.semantic.write().insert(id, vector, created_at)
    }

    /// Index content terms (always, in every mode)
    pub fn add_text(&self, id: FragmentId, content: &str, created_at: DateTime<Utc>) {
        self.lexical.write().insert(id, content, created_at);
    }

    /// Remove from both segments. Returns whether either held the id.
    pub fn remove(&self, id: &FragmentId) -> bool {
        let semantic = self.semantic.write().remove(id);
        let lexical = self.lexical.write().remove(id);
        semantic || lexical
    }

    /// Semantic top-k. `k = 0` or an empty index yields no hits.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredId>> {
        self.semantic
            .read()
            .search(query, k, self.config.min_similarity)
    }

    /// Lexical top-k by term overlap. Never fails.
    pub fn search_lexical(&self, text: &str, k: usize) -> Vec<ScoredId> {
        self.lexical
            .read()
            .search(text, k, self.config.min_lexical_score)
    }

    /// Semantic search when possible, lexical otherwise; a short semantic
    /// result is topped up with lexical hits not already present.
    pub fn search_with_fallback(&self, query: Option<&[f32]>, text: &str, k: usize) -> SearchOutcome {
        if k == 0 {
            return SearchOutcome::default();
        }

        let semantic = match (self.mode, query) {
            (IndexMode::Semantic, Some(vector)) if !self.is_rebuilding() => {
                match self.search(vector, k) {
                    Ok(hits) => Some(hits),
                    Err(e) => {
                        tracing::debug!("Semantic search rejected query, using lexical: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        let Some(mut hits) = semantic else {
            return SearchOutcome {
                hits: self.search_lexical(text, k),
                used_lexical: true,
            };
        };

        let mut used_lexical = false;
        if hits.len() < k {
            let seen: HashSet<FragmentId> = hits.iter().map(|h| h.id).collect();
            let extra: Vec<ScoredId> = self
                .search_lexical(text, k)
                .into_iter()
                .filter(|h| !seen.contains(&h.id))
                .take(k - hits.len())
                .collect();
            used_lexical = !extra.is_empty();
            hits.extend(extra);
        }
        SearchOutcome { hits, used_lexical }
    }

    /// Replace the semantic segment with a freshly built one and start a new
    /// generation. Searches issued meanwhile are answered lexically.
    pub fn rebuild(
        &self,
        entries: impl IntoIterator<Item = (FragmentId, Vec<f32>, DateTime<Utc>)>,
        dimension: Option<usize>,
    ) -> u64 {
        self.rebuilding.store(true, AtomicOrdering::SeqCst);

        let mut fresh = FlatSegment::new(dimension);
        let mut skipped = 0usize;
        for (id, vector, created_at) in entries {
            if fresh.insert(id, &vector, created_at).is_err() {
                skipped += 1;
            }
        }
        let size = fresh.len();
        *self.semantic.write() = fresh;
        let generation = self.generation.fetch_add(1, AtomicOrdering::AcqRel) + 1;

        self.rebuilding.store(false, AtomicOrdering::SeqCst);
        tracing::info!(
            generation,
            vectors = size,
            skipped,
            "Embedding index rebuilt"
        );
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn index(mode: IndexMode) -> EmbeddingIndex {
        EmbeddingIndex::new(mode, Some(2), 0, IndexConfig::default())
    }

    #[test]
    fn test_top_k_ordering_and_bound() {
        let now = Utc::now();
        let hits: Vec<_> = (0..10)
            .map(|i| ScoredId {
                id: FragmentId::new(),
                score: (i % 5) as f32 / 5.0,
                created_at: now - Duration::minutes(i),
            })
            .collect();
        let top = top_k(hits.into_iter(), 3);
        assert_eq!(top.len(), 3);
        assert!(top.windows(2).all(|w| w[0].score >= w[1].score));
        // Equal scores: more recent first
        assert_eq!(top[0].score, top[1].score);
        assert!(top[0].created_at > top[1].created_at);
    }

    #[test]
    fn test_mismatched_dimension_rejected() {
        let idx = index(IndexMode::Semantic);
        let err = idx.add(FragmentId::new(), &[1.0, 0.0, 0.0], Utc::now()).unwrap_err();
        assert_eq!(err.code(), "REJECTED_INPUT");
        assert!(idx.is_empty());
    }

    #[test]
    fn test_fallback_tops_up_with_lexical() {
        let idx = index(IndexMode::Semantic);
        let now = Utc::now();
        let vec_hit = FragmentId::new();
        let text_hit = FragmentId::new();
        idx.add(vec_hit, &[1.0, 0.0], now).unwrap();
        idx.add_text(vec_hit, "vector database internals", now);
        idx.add_text(text_hit, "database migration checklist", now);

        let outcome = idx.search_with_fallback(Some(&[1.0, 0.0]), "database", 5);
        assert_eq!(outcome.hits.len(), 2);
        assert_eq!(outcome.hits[0].id, vec_hit);
        assert!(outcome.used_lexical);
    }

    #[test]
    fn test_lexical_mode_ignores_vectors() {
        let idx = index(IndexMode::Lexical);
        let id = FragmentId::new();
        idx.add(id, &[1.0, 0.0], Utc::now()).unwrap();
        idx.add_text(id, "weekly planning notes", Utc::now());
        assert_eq!(idx.len(), 0);

        let outcome = idx.search_with_fallback(Some(&[1.0, 0.0]), "planning", 5);
        assert!(outcome.used_lexical);
        assert_eq!(outcome.hits[0].id, id);
    }

    #[test]
    fn test_rebuild_starts_new_generation() {
        let idx = index(IndexMode::Semantic);
        idx.add(FragmentId::new(), &[1.0, 0.0], Utc::now()).unwrap();

        let kept = FragmentId::new();
        let generation = idx.rebuild(
            vec![
                (kept, vec![0.0, 1.0, 0.0], Utc::now()),
                (FragmentId::new(), vec![1.0], Utc::now()),
            ],
            Some(3),
        );
        assert_eq!(generation, 1);
        assert_eq!(idx.dimension(), Some(3));
        assert_eq!(idx.len(), 1);
        assert!(!idx.is_rebuilding());
        assert_eq!(idx.search(&[0.0, 1.0, 0.0], 1).unwrap()[0].id, kept);
    }

    #[test]
    fn test_rebuilding_answers_lexically() {
        let idx = index(IndexMode::Semantic);
        let now = Utc::now();
        let vec_only = FragmentId::new();
        let text_hit = FragmentId::new();
        idx.add(vec_only, &[1.0, 0.0], now).unwrap();
        idx.add_text(vec_only, "quarterly budget review", now);
        idx.add_text(text_hit, "kernel upgrade window", now);

        idx.rebuilding.store(true, AtomicOrdering::SeqCst);
        let outcome = idx.search_with_fallback(Some(&[1.0, 0.0]), "kernel upgrade", 5);
        assert!(outcome.used_lexical);
        let ids: Vec<_> = outcome.hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![text_hit]);

        idx.rebuilding.store(false, AtomicOrdering::SeqCst);
        let outcome = idx.search_with_fallback(Some(&[1.0, 0.0]), "kernel upgrade", 5);
        assert_eq!(outcome.hits[0].id, vec_only);
    }

    #[test]
    fn test_remove_from_both_segments() {
        let idx = index(IndexMode::Semantic);
        let id = FragmentId::new();
        idx.add(id, &[1.0, 1.0], Utc::now()).unwrap();
        idx.add_text(id, "removable", Utc::now());
        assert!(idx.remove(&id));
        assert!(idx.search(&[1.0, 1.0], 5).unwrap().is_empty());
        assert!(idx.search_lexical("removable", 5).is_empty());
        assert!(!idx.remove(&id));
    }

    #[test]
    fn test_zero_k_is_empty() {
        let idx = index(IndexMode::Semantic);
        idx.add(FragmentId::new(), &[1.0, 0.0], Utc::now()).unwrap();
        assert!(idx.search(&[1.0, 0.0], 0).unwrap().is_empty());
        assert!(idx.search_with_fallback(Some(&[1.0, 0.0]), "x", 0).hits.is_empty());
    }
}
