//! Contradiction detection
//!
//! Two fragments of the same type filed under a common tag are expected to
//! agree. When their content is nearly unrelated they are flagged for review.
//! Similarity is embedding cosine when both carry vectors of one dimension,
//! token Jaccard otherwise.

use std::collections::HashSet;

use crate::memory::types::{Finding, MemoryFragment, ReportKind};
use crate::similarity::{cosine_similarity, jaccard};
use crate::vector_db::lexical::term_set;

/// Content similarity used by reflection and analogy matching
pub fn content_similarity(
    a: &MemoryFragment,
    b: &MemoryFragment,
    a_terms: &HashSet<String>,
    b_terms: &HashSet<String>,
) -> f32 {
    match (&a.embedding, &b.embedding) {
        (Some(x), Some(y)) if x.len() == y.len() && !x.is_empty() => {
            cosine_similarity(x, y).max(0.0)
        }
        _ => jaccard(a_terms, b_terms),
    }
}

pub fn detect(fragments: &[MemoryFragment], threshold: f32, max_pairs: usize) -> Vec<Finding> {
    let terms: Vec<HashSet<String>> = fragments.iter().map(|f| term_set(&f.content)).collect();
    let mut findings = Vec::new();
    let mut examined = 0usize;

    'outer: for i in 0..fragments.len() {
        for j in (i + 1)..fragments.len() {
            let (a, b) = (&fragments[i], &fragments[j]);
            if a.fragment_type != b.fragment_type || !a.shares_tag_with(b) {
                continue;
            }
            if examined >= max_pairs {
                tracing::debug!(max_pairs, "Contradiction scan hit the pair cap");
                break 'outer;
            }
            examined += 1;

            let similarity = content_similarity(a, b, &terms[i], &terms[j]);
            if similarity < threshold {
                let shared: Vec<&str> = a.tags.intersection(&b.tags).map(String::as_str).collect();
                findings.push(Finding {
                    kind: ReportKind::Contradiction,
                    description: format!(
                        "{} fragments tagged [{}] diverge (similarity {similarity:.2}): \"{}\" vs \"{}\"",
                        a.fragment_type,
                        shared.join(", "),
                        a.preview(),
                        b.preview()
                    ),
                    severity: (1.0 - similarity).clamp(0.0, 1.0),
                    related_fragment_ids: vec![a.id, b.id],
                });
            }
        }
    }

    tracing::debug!(examined, flagged = findings.len(), "Contradiction scan complete");
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::FragmentType;

    #[test]
    fn test_flags_unrelated_same_tag_pair() {
        let a = MemoryFragment::new("Standup moved to 10am", FragmentType::Event).with_tags(["work"]);
        let b = MemoryFragment::new("Quarterly budget approved by finance", FragmentType::Event)
            .with_tags(["work"]);
        let findings = detect(&[a.clone(), b.clone()], 0.15, 100);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].related_fragment_ids, vec![a.id, b.id]);
        assert!((findings[0].severity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ignores_different_types_and_disjoint_tags() {
        let a = MemoryFragment::new("alpha beta", FragmentType::Event).with_tags(["work"]);
        let b = MemoryFragment::new("gamma delta", FragmentType::Knowledge).with_tags(["work"]);
        let c = MemoryFragment::new("epsilon zeta", FragmentType::Event).with_tags(["home"]);
        assert!(detect(&[a, b, c], 0.15, 100).is_empty());
    }

    #[test]
    fn test_similar_pair_is_not_flagged() {
        let a = MemoryFragment::new("release train ships friday", FragmentType::Event)
            .with_tags(["release"]);
        let b = MemoryFragment::new("the release train ships on friday", FragmentType::Event)
            .with_tags(["release"]);
        assert!(detect(&[a, b], 0.15, 100).is_empty());
    }

    #[test]
    fn test_embeddings_take_precedence() {
        let a = MemoryFragment::new("same words here", FragmentType::Insight)
            .with_tags(["t"])
            .with_embedding(vec![1.0, 0.0]);
        let b = MemoryFragment::new("same words here", FragmentType::Insight)
            .with_tags(["t"])
            .with_embedding(vec![0.0, 1.0]);
        assert_eq!(detect(&[a, b], 0.15, 100).len(), 1);
    }

    #[test]
    fn test_pair_cap() {
        let fragments: Vec<_> = (0..10)
            .map(|i| {
                MemoryFragment::new(format!("unique{i} token{i}"), FragmentType::Event).with_tags(["x"])
            })
            .collect();
        assert_eq!(detect(&fragments, 0.15, 5).len(), 5);
    }
}
