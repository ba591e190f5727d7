//! Lexical inverted index
//!
//! Maintained for every fragment regardless of index mode. Serves as the
//! search path whenever embeddings are unavailable or the semantic segment is
//! being rebuilt.
//!
//! Score: `|Q ∩ D| / |Q|` over stemmed, stopword-free terms.

use chrono::{DateTime, Utc};
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use super::ScoredId;
use crate::memory::types::FragmentId;

static STEMMER: OnceLock<Stemmer> = OnceLock::new();

fn stemmer() -> &'static Stemmer {
    STEMMER.get_or_init(|| Stemmer::create(Algorithm::English))
}

/// Check if word is a stop word (no information content)
pub fn is_stop_word(word: &str) -> bool {
    const STOP_WORDS: &[&str] = &[
        // Articles
        "a", "an", "the",
        // Demonstratives
        "this", "that", "these", "those",
        // Prepositions
        "at", "in", "on", "to", "for", "of", "from", "by", "with", "about", "into",
        "through", "during", "before", "after", "above", "below", "between", "under", "over",
        // Conjunctions
        "and", "or", "but", "nor", "yet", "both", "either", "neither",
        // Pronouns
        "i", "me", "my", "we", "our", "you", "your", "he", "him", "his", "she", "her", "it",
        "its", "they", "them", "their", "what", "which", "who", "whom",
        // Auxiliaries
        "is", "am", "are", "was", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "shall", "should", "can",
        // Misc
        "not", "no", "as", "if", "then", "than", "too", "very", "just", "there", "here",
        "when", "where", "why", "how", "all", "any", "each", "some", "such", "only", "own",
        "same", "other", "again", "further", "once",
    ];

    STOP_WORDS.contains(&word)
}

/// Lowercased alphanumeric words, in order, stopwords included
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Index terms: lowercase, alphanumeric split, stopwords removed, stemmed
pub fn tokenize(text: &str) -> Vec<String> {
    let stemmer = stemmer();
    words(text)
        .into_iter()
        .filter(|w| !is_stop_word(w))
        .map(|w| stemmer.stem(&w).into_owned())
        .collect()
}

/// Distinct index terms of `text`
pub fn term_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

#[derive(Debug)]
struct LexicalDoc {
    terms: HashSet<String>,
    created_at: DateTime<Utc>,
}

/// Term → fragment postings
#[derive(Debug, Default)]
pub struct LexicalIndex {
    postings: HashMap<String, HashSet<FragmentId>>,
    docs: HashMap<FragmentId, LexicalDoc>,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn contains(&self, id: &FragmentId) -> bool {
        self.docs.contains_key(id)
    }

    /// Index (or re-index) a fragment's content
    pub fn insert(&mut self, id: FragmentId, text: &str, created_at: DateTime<Utc>) {
        self.remove(&id);
        let terms = term_set(text);
        for term in &terms {
            self.postings.entry(term.clone()).or_default().insert(id);
        }
        self.docs.insert(id, LexicalDoc { terms, created_at });
    }

    pub fn remove(&mut self, id: &FragmentId) -> bool {
        let Some(doc) = self.docs.remove(id) else {
            return false;
        };
        for term in doc.terms {
            if let Some(ids) = self.postings.get_mut(&term) {
                ids.remove(id);
                if ids.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
        true
    }

    /// Score every document sharing at least one query term
    pub fn search(&self, query: &str, k: usize, min_score: f32) -> Vec<ScoredId> {
        if k == 0 {
            return Vec::new();
        }
        let query_terms = term_set(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut overlap: HashMap<FragmentId, usize> = HashMap::new();
        for term in &query_terms {
            if let Some(ids) = self.postings.get(term) {
                for id in ids {
                    *overlap.entry(*id).or_insert(0) += 1;
                }
            }
        }

        let denom = query_terms.len() as f32;
        let hits = overlap.into_iter().filter_map(|(id, shared)| {
            let score = shared as f32 / denom;
            if score <= 0.0 || score < min_score {
                return None;
            }
            let created_at = self.docs.get(&id)?.created_at;
            Some(ScoredId {
                id,
                score,
                created_at,
            })
        });
        super::top_k(hits, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_stems_and_drops_stopwords() {
        let terms = tokenize("The servers were crashing during deployments");
        assert_eq!(terms, vec!["server", "crash", "deploy"]);
    }

    #[test]
    fn test_words_keeps_stopwords() {
        assert_eq!(words("It's 42 degrees!"), vec!["it", "s", "42", "degrees"]);
    }

    #[test]
    fn test_overlap_ratio_scoring() {
        let mut index = LexicalIndex::new();
        let a = FragmentId::new();
        let b = FragmentId::new();
        let now = Utc::now();
        index.insert(a, "rust borrow checker rules", now);
        index.insert(b, "python garbage collector", now);

        let hits = index.search("borrow checker", 5, 0.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a);
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        let partial = index.search("borrow collector", 5, 0.0);
        assert_eq!(partial.len(), 2);
        assert!(partial.iter().all(|h| (h.score - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_remove_clears_postings() {
        let mut index = LexicalIndex::new();
        let id = FragmentId::new();
        index.insert(id, "ephemeral note", Utc::now());
        assert!(index.remove(&id));
        assert!(index.search("ephemeral", 5, 0.0).is_empty());
        assert!(index.postings.is_empty());
        assert!(!index.remove(&id));
    }

    #[test]
    fn test_empty_or_stopword_query() {
        let mut index = LexicalIndex::new();
        index.insert(FragmentId::new(), "something", Utc::now());
        assert!(index.search("", 5, 0.0).is_empty());
        assert!(index.search("the and of", 5, 0.0).is_empty());
        assert!(index.search("something", 0, 0.0).is_empty());
    }
}
