//! Knowledge Responder
//!
//! Answers a natural-language query from stored fragments only:
//!
//! 1. embed the query (lexical search when embeddings are unavailable)
//! 2. top-k search, topped up with lexical hits
//! 3. hydrate from the store, applying the caller's context filter
//! 4. score candidates; the best drives answer confidence
//! 5. below the clarification threshold, broaden once via analogies
//! 6. assemble text citing only retrieved fragments, record access
//!
//! `answer` never fails: store errors degrade to a "no knowledge" result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use super::analogy::{AnalogicalMatcher, Analogy};
use super::confidence::{AnswerQuality, ConfidenceAnalyzer, ConfidenceBreakdown};
use super::storage::FragmentStore;
use super::types::{FragmentFilter, FragmentId, MemoryFragment, TimeFilter, TimeRange};
use crate::embeddings::EmbeddingService;
use crate::errors::Result;
use crate::vector_db::EmbeddingIndex;

/// Over-fetch factor when a context filter will discard some hits
const FILTERED_OVERFETCH: usize = 4;

/// Caller context narrowing what an answer may draw on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryContext {
    /// Tag (any-of), type and time restrictions on supporting fragments
    pub filter: FragmentFilter,
    /// Number of supporting fragments; defaults to the index `default_k`
    pub k: Option<usize>,
    /// Skip analogy broadening for low-confidence answers
    pub disable_analogies: bool,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: FragmentFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    fn is_filtered(&self) -> bool {
        self.filter.tags.as_ref().map(|t| !t.is_empty()).unwrap_or(false)
            || self.filter.fragment_type.is_some()
            || self.filter.time != TimeFilter::All
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub response_text: String,
    /// In [0, 1]
    pub confidence: f32,
    /// Fragments the response cites, strongest first
    pub sources: Vec<FragmentId>,
    pub quality: AnswerQuality,
    pub needs_clarification: bool,
    /// Cross-context fragments consulted when confidence was low
    pub analogies: Vec<Analogy>,
}

impl AnswerResult {
    pub fn no_knowledge(query: &str) -> Self {
        Self {
            response_text: format!("I don't have any stored knowledge about \"{}\".", query.trim()),
            confidence: 0.0,
            sources: Vec::new(),
            quality: AnswerQuality::Insufficient,
            needs_clarification: true,
            analogies: Vec::new(),
        }
    }
}

/// How an answer was produced, for engine statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct AnswerTrace {
    pub used_lexical: bool,
    /// A store failure forced the "no knowledge" result
    pub degraded: bool,
}

struct Candidate {
    fragment: MemoryFragment,
    breakdown: ConfidenceBreakdown,
}

pub struct KnowledgeResponder<'a> {
    pub store: &'a FragmentStore,
    pub index: &'a EmbeddingIndex,
    pub embeddings: &'a EmbeddingService,
    pub analyzer: &'a ConfidenceAnalyzer,
    pub matcher: &'a AnalogicalMatcher,
    pub default_k: usize,
}

impl KnowledgeResponder<'_> {
    pub fn answer(&self, query: &str, context: &QueryContext) -> (AnswerResult, AnswerTrace) {
        let mut trace = AnswerTrace::default();
        if query.trim().is_empty() {
            return (AnswerResult::no_knowledge(query), trace);
        }

        match self.try_answer(query, context, &mut trace) {
            Ok(result) => (result, trace),
            Err(e) => {
                tracing::warn!(error = %e, "Answer degraded to no-knowledge after store failure");
                trace.degraded = true;
                (AnswerResult::no_knowledge(query), trace)
            }
        }
    }

    fn try_answer(&self, query: &str, context: &QueryContext, trace: &mut AnswerTrace) -> Result<AnswerResult> {
        let now = Utc::now();
        let k = context.k.unwrap_or(self.default_k);
        if k == 0 {
            return Ok(AnswerResult::no_knowledge(query));
        }
        let search_k = if context.is_filtered() { k * FILTERED_OVERFETCH } else { k };

        let query_vector = self.embeddings.embed_query(query);
        let outcome = self
            .index
            .search_with_fallback(query_vector.as_deref(), query, search_k);
        trace.used_lexical = outcome.used_lexical;

        let time_range = context.filter.time.resolve(now);
        let mut candidates = Vec::with_capacity(k);
        for hit in outcome.hits {
            // Misses are fragments forgotten after the search snapshot
            let Some(fragment) = self.store.get(&hit.id)? else {
                continue;
            };
            if !context.filter.matches(&fragment) {
                continue;
            }
            if let Some(range) = &time_range {
                if !range.contains(fragment.created_at) {
                    continue;
                }
            }
            let breakdown = self.analyzer.score(hit.score, &fragment, now);
            candidates.push(Candidate { fragment, breakdown });
            if candidates.len() >= k {
                break;
            }
        }

        if candidates.is_empty() {
            tracing::debug!(query, "No supporting fragments");
            return Ok(AnswerResult::no_knowledge(query));
        }
        candidates.sort_by(|a, b| {
            b.breakdown
                .confidence
                .total_cmp(&a.breakdown.confidence)
                .then_with(|| b.fragment.created_at.cmp(&a.fragment.created_at))
        });

        let mut confidence = candidates[0].breakdown.confidence;
        let mut analogies = Vec::new();
        let mut analog_fragments = Vec::new();
        if self.analyzer.needs_clarification(confidence) && !context.disable_analogies {
            let (found, fragments, boosted) =
                self.broaden(&candidates[0].fragment, &candidates, &context.filter, time_range, now)?;
            analogies = found;
            analog_fragments = fragments;
            confidence = confidence.max(boosted);
        }

        let mut sources: Vec<FragmentId> = candidates.iter().map(|c| c.fragment.id).collect();
        sources.extend(analog_fragments.iter().map(|f| f.id));

        let needs_clarification = self.analyzer.needs_clarification(confidence);
        let response_text = compose(&candidates, &analogies, &analog_fragments, needs_clarification);

        self.record_access(&sources);

        tracing::debug!(
            query,
            sources = sources.len(),
            confidence,
            lexical = trace.used_lexical,
            "Answer assembled"
        );

        Ok(AnswerResult {
            response_text,
            confidence: confidence.clamp(0.0, 1.0),
            quality: self.analyzer.quality(confidence, !sources.is_empty()),
            sources,
            needs_clarification,
            analogies,
        })
    }

    /// One round of analogy search from the best candidate. Returns the
    /// analogies, their fragments, and the best confidence they support.
    /// Only fragments the caller's filter admits are considered.
    fn broaden(
        &self,
        best: &MemoryFragment,
        candidates: &[Candidate],
        filter: &FragmentFilter,
        time_range: Option<TimeRange>,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Analogy>, Vec<MemoryFragment>, f32)> {
        let config = self.matcher.config();
        let pool: Vec<MemoryFragment> = self
            .store
            .scan(time_range)?
            .filter(|f| filter.matches(f))
            .filter(|f| time_range.map_or(true, |r| r.contains(f.created_at)))
            .filter(|f| !candidates.iter().any(|c| c.fragment.id == f.id))
            .take(config.max_candidates)
            .collect();

        let mut analogies = self.matcher.find_analogies(best, &pool, config.broadening_limit);
        let mut fragments = Vec::with_capacity(analogies.len());
        let mut boosted = 0.0f32;
        for analogy in &mut analogies {
            analogy.score *= config.discount;
            if let Some(fragment) = pool.iter().find(|f| f.id == analogy.fragment_id) {
                boosted = boosted.max(self.analyzer.score(analogy.score, fragment, now).confidence);
                fragments.push(fragment.clone());
            }
        }
        if !analogies.is_empty() {
            tracing::debug!(found = analogies.len(), "Low-confidence answer broadened by analogy");
        }
        Ok((analogies, fragments, boosted))
    }

    fn record_access(&self, sources: &[FragmentId]) {
        let policy = self.analyzer.reinforcement();
        for id in sources {
            if let Err(e) = self.store.update_access(id, policy) {
                tracing::warn!(fragment_id = %id, "Failed to record access: {}", e);
            }
        }
    }
}

fn compose(
    candidates: &[Candidate],
    analogies: &[Analogy],
    analog_fragments: &[MemoryFragment],
    needs_clarification: bool,
) -> String {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "Based on {} stored fragment{}:",
        candidates.len(),
        if candidates.len() == 1 { "" } else { "s" }
    );
    for c in candidates {
        let _ = writeln!(
            text,
            "- [{}] {} (match {:.2}, confidence {:.2})",
            c.fragment.fragment_type, c.fragment.content, c.breakdown.similarity, c.breakdown.confidence
        );
    }
    if !analog_fragments.is_empty() {
        let _ = writeln!(text, "Related by analogy:");
        for (analogy, fragment) in analogies.iter().zip(analog_fragments) {
            let _ = writeln!(
                text,
                "- ({} {:.2}) {}",
                analogy.pattern_type, analogy.score, fragment.content
            );
        }
    }
    if needs_clarification {
        let _ = writeln!(
            text,
            "Confidence is low; could you clarify or add detail to the question?"
        );
    }
    text.trim_end().to_string()
}
