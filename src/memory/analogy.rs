//! Analogical Pattern Matcher
//!
//! Finds fragments from *other* contexts (no shared tag) that resemble a
//! source fragment in shape, function or causal structure. A same-tag match
//! is a duplicate, not an analogy.
//!
//! Per candidate:
//! - **structural**: Jaccard over sentence-shape bigrams, where stopwords
//!   stay verbatim, numbers become `N` and other words become `W`
//! - **functional**: same fragment type × content similarity
//! - **causal**: both use causal connectives → `0.5 + 0.5 × similarity`
//!
//! The strongest of the three decides the pattern type.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::reflection::contradiction::content_similarity;
use super::types::{FragmentId, MemoryFragment};
use crate::config::AnalogyConfig;
use crate::errors::{EngineError, Result};
use crate::similarity::jaccard;
use crate::vector_db::lexical::{is_stop_word, term_set, words};

const CAUSAL_PATTERN: &str = r"(?i)\b(because|therefore|causes?|caused|leads? to|led to|results? in|resulted in|due to|so that|consequently)\b";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Structural,
    Functional,
    Causal,
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Structural => "structural",
            Self::Functional => "functional",
            Self::Causal => "causal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analogy {
    pub fragment_id: FragmentId,
    pub pattern_type: PatternType,
    pub score: f32,
}

/// Sentence-shape bigrams of `text`
pub fn shape_bigrams(text: &str) -> HashSet<String> {
    let shape: Vec<String> = words(text)
        .into_iter()
        .map(|w| {
            if is_stop_word(&w) {
                w
            } else if w.chars().all(|c| c.is_ascii_digit()) {
                "N".to_string()
            } else {
                "W".to_string()
            }
        })
        .collect();
    shape
        .windows(2)
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .collect()
}

pub struct AnalogicalMatcher {
    config: AnalogyConfig,
    causal: Regex,
}

impl AnalogicalMatcher {
    pub fn new(config: AnalogyConfig) -> Result<Self> {
        let causal = Regex::new(CAUSAL_PATTERN)
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("invalid causal pattern: {e}")))?;
        Ok(Self { config, causal })
    }

    pub fn config(&self) -> &AnalogyConfig {
        &self.config
    }

    pub fn is_causal(&self, text: &str) -> bool {
        self.causal.is_match(text)
    }

    /// Best pattern and score for one candidate
    fn classify(
        &self,
        source: &MemoryFragment,
        source_shape: &HashSet<String>,
        source_terms: &HashSet<String>,
        source_causal: bool,
        candidate: &MemoryFragment,
    ) -> (PatternType, f32) {
        let candidate_terms = term_set(&candidate.content);
        let similarity =
            content_similarity(source, candidate, source_terms, &candidate_terms).clamp(0.0, 1.0);

        let structural = jaccard(source_shape, &shape_bigrams(&candidate.content));
        let functional = if source.fragment_type == candidate.fragment_type {
            similarity
        } else {
            0.0
        };
        let causal = if source_causal && self.is_causal(&candidate.content) {
            0.5 + 0.5 * similarity
        } else {
            0.0
        };

        let mut best = (PatternType::Structural, structural);
        for (pattern, score) in [(PatternType::Functional, functional), (PatternType::Causal, causal)] {
            if score > best.1 {
                best = (pattern, score);
            }
        }
        best
    }

    /// Analogies for `source` among `candidates`, best first
    pub fn find_analogies(
        &self,
        source: &MemoryFragment,
        candidates: &[MemoryFragment],
        limit: usize,
    ) -> Vec<Analogy> {
        if limit == 0 {
            return Vec::new();
        }
        let source_shape = shape_bigrams(&source.content);
        let source_terms = term_set(&source.content);
        let source_causal = self.is_causal(&source.content);

        let mut scored: Vec<(Analogy, &MemoryFragment)> = candidates
            .iter()
            .filter(|c| c.id != source.id && source.is_tag_disjoint(c))
            .filter_map(|c| {
                let (pattern_type, score) =
                    self.classify(source, &source_shape, &source_terms, source_causal, c);
                (score >= self.config.min_score).then_some((
                    Analogy {
                        fragment_id: c.id,
                        pattern_type,
                        score,
                    },
                    c,
                ))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.score
                .total_cmp(&a.0.score)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
                .then_with(|| a.0.fragment_id.cmp(&b.0.fragment_id))
        });
        scored.truncate(limit);
        scored.into_iter().map(|(analogy, _)| analogy).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::FragmentType;
    use chrono::{Duration, Utc};

    fn matcher() -> AnalogicalMatcher {
        AnalogicalMatcher::new(AnalogyConfig::default()).unwrap()
    }

    #[test]
    fn test_shape_bigrams() {
        let shape = shape_bigrams("The cache has 3 shards");
        // "has" is a stopword and stays verbatim
        assert!(shape.contains("the W"));
        assert!(shape.contains("has N"));
        assert!(shape.contains("N W"));
        assert_eq!(shape.len(), 4);
    }

    #[test]
    fn test_candidates_never_share_tags() {
        let m = matcher();
        let source = MemoryFragment::new("Latency rose because the cache was cold", FragmentType::Insight)
            .with_tags(["backend"]);
        let same_tag = MemoryFragment::new("Errors rose because the pool was small", FragmentType::Insight)
            .with_tags(["backend", "db"]);
        let other = MemoryFragment::new("Sales rose because the weather was warm", FragmentType::Insight)
            .with_tags(["retail"]);

        let found = m.find_analogies(&source, &[source.clone(), same_tag, other.clone()], 10);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].fragment_id, other.id);
        assert!(found[0].score >= 0.2);
    }

    #[test]
    fn test_causal_pattern_detected() {
        let m = matcher();
        let source = MemoryFragment::new("Deploys failed due to missing migrations", FragmentType::Event)
            .with_tags(["ops"]);
        let candidate = MemoryFragment::new("Prices climbed sharply last season because harvests shrank", FragmentType::Knowledge)
            .with_tags(["farming"]);
        let found = m.find_analogies(&source, &[candidate], 5);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pattern_type, PatternType::Causal);
        assert!(found[0].score >= 0.5);
    }

    #[test]
    fn test_ordering_score_then_recency() {
        let m = matcher();
        let now = Utc::now();
        let source = MemoryFragment::new("alpha beta gamma", FragmentType::Knowledge).with_tags(["a"]);
        let older = MemoryFragment::new("alpha beta gamma", FragmentType::Knowledge)
            .with_tags(["b"])
            .with_created_at(now - Duration::days(2));
        let newer = MemoryFragment::new("alpha beta gamma", FragmentType::Knowledge)
            .with_tags(["c"])
            .with_created_at(now);
        let found = m.find_analogies(&source, &[older.clone(), newer.clone()], 5);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].fragment_id, newer.id);
        assert_eq!(found[1].fragment_id, older.id);

        assert_eq!(m.find_analogies(&source, &[older, newer], 1).len(), 1);
    }

    #[test]
    fn test_weak_candidates_dropped() {
        let m = matcher();
        let source = MemoryFragment::new("Quarterly revenue grew", FragmentType::Knowledge).with_tags(["x"]);
        let weak = MemoryFragment::new("Is the kettle on in the kitchen right now?", FragmentType::Event)
            .with_tags(["y"]);
        assert!(m.find_analogies(&source, &[weak], 5).is_empty());
    }
}
