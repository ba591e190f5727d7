//! Exact cosine segment
//!
//! Brute-force scan over L2-normalized vectors. One dimension per segment;
//! vectors of any other dimension are rejected.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::ScoredId;
use crate::errors::{EngineError, Result};
use crate::memory::types::FragmentId;

#[derive(Debug, Clone)]
struct FlatEntry {
    id: FragmentId,
    vector: Vec<f32>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FlatSegment {
    dimension: Option<usize>,
    entries: Vec<FlatEntry>,
    positions: HashMap<FragmentId, usize>,
}

fn normalized(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return vector.to_vec();
    }
    vector.iter().map(|x| x / norm).collect()
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl FlatSegment {
    /// A segment whose dimension is fixed by the first inserted vector when
    /// `dimension` is `None`
    pub fn new(dimension: Option<usize>) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &FragmentId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn check_dimension(&self, len: usize) -> Result<()> {
        match self.dimension {
            Some(d) if d != len => Err(EngineError::rejected(
                "embedding",
                format!("dimension {len} does not match index dimension {d}"),
            )),
            _ if len == 0 => Err(EngineError::rejected("embedding", "empty vector")),
            _ => Ok(()),
        }
    }

    /// Insert or replace the vector for `id`
    pub fn insert(&mut self, id: FragmentId, vector: &[f32], created_at: DateTime<Utc>) -> Result<()> {
        self.check_dimension(vector.len())?;
        self.dimension.get_or_insert(vector.len());

        let entry = FlatEntry {
            id,
            vector: normalized(vector),
            created_at,
        };
        match self.positions.get(&id) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.positions.insert(id, self.entries.len());
                self.entries.push(entry);
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &FragmentId) -> bool {
        let Some(pos) = self.positions.remove(id) else {
            return false;
        };
        self.entries.swap_remove(pos);
        if let Some(moved) = self.entries.get(pos) {
            self.positions.insert(moved.id, pos);
        }
        true
    }

    /// Top-k by cosine similarity, ties broken by recency
    pub fn search(&self, query: &[f32], k: usize, min_similarity: f32) -> Result<Vec<ScoredId>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dimension(query.len())?;

        let query = normalized(query);
        let hits = self.entries.iter().filter_map(|entry| {
            let score = dot(&query, &entry.vector).clamp(-1.0, 1.0);
            (score >= min_similarity).then_some(ScoredId {
                id: entry.id,
                score,
                created_at: entry.created_at,
            })
        });
        Ok(super::top_k(hits, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_search_orders_by_similarity() {
        let mut segment = FlatSegment::new(Some(3));
        let now = Utc::now();
        let a = FragmentId::new();
        let b = FragmentId::new();
        let c = FragmentId::new();
        segment.insert(a, &[1.0, 0.0, 0.0], now).unwrap();
        segment.insert(b, &[0.7, 0.7, 0.0], now).unwrap();
        segment.insert(c, &[0.0, 0.0, 1.0], now).unwrap();

        let hits = segment.search(&[1.0, 0.1, 0.0], 3, 0.2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, a);
        assert_eq!(hits[1].id, b);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_ties_prefer_recent() {
        let mut segment = FlatSegment::new(None);
        let now = Utc::now();
        let old = FragmentId::new();
        let new = FragmentId::new();
        segment.insert(old, &[1.0, 0.0], now - Duration::days(3)).unwrap();
        segment.insert(new, &[2.0, 0.0], now).unwrap();

        let hits = segment.search(&[1.0, 0.0], 2, 0.0).unwrap();
        assert_eq!(hits[0].id, new);
        assert_eq!(hits[1].id, old);
    }

    #[test]
    fn test_dimension_is_enforced() {
        let mut segment = FlatSegment::new(None);
        segment.insert(FragmentId::new(), &[1.0, 0.0], Utc::now()).unwrap();
        assert_eq!(segment.dimension(), Some(2));
        assert!(segment
            .insert(FragmentId::new(), &[1.0, 0.0, 0.0], Utc::now())
            .is_err());
        assert!(segment.search(&[1.0], 1, 0.0).is_err());
    }

    #[test]
    fn test_remove_keeps_positions_consistent() {
        let mut segment = FlatSegment::new(Some(2));
        let ids: Vec<_> = (0..4).map(|_| FragmentId::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            segment.insert(*id, &[1.0, i as f32], Utc::now()).unwrap();
        }
        assert!(segment.remove(&ids[0]));
        assert!(!segment.remove(&ids[0]));
        assert_eq!(segment.len(), 3);
        for id in &ids[1..] {
            assert!(segment.contains(id));
            assert!(segment.remove(id));
        }
        assert!(segment.is_empty());
    }

    #[test]
    fn test_zero_k() {
        let mut segment = FlatSegment::new(Some(2));
        segment.insert(FragmentId::new(), &[1.0, 0.0], Utc::now()).unwrap();
        assert!(segment.search(&[1.0, 0.0], 0, 0.0).unwrap().is_empty());
    }
}
