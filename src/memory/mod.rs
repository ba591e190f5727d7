//! Memory engine for autonomous agents
//!
//! Ties the durable store, the embedding index and the analysis components
//! into one `Send + Sync` facade:
//! - Fragment storage with per-id linearizable writes (RocksDB)
//! - Semantic search with lexical fallback
//! - Confidence-scored answers citing only stored fragments
//! - Temporal reflection (drift, contradictions, blind spots)
//! - Cross-context analogies
//!
//! The engine never calls the store while holding an index lock. The index
//! trails the store by at most one write: `remember` indexes right after the
//! store commit, and readers drop index hits the store no longer holds.

pub mod analogy;
pub mod confidence;
pub mod reflection;
pub mod responder;
pub mod storage;
pub mod types;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::EngineConfig;
use crate::embeddings::{EmbeddingProvider, EmbeddingService};
use crate::errors::{EngineError, Result};
use crate::vector_db::{EmbeddingIndex, IndexMode};

pub use analogy::{AnalogicalMatcher, Analogy, PatternType};
pub use confidence::{AnswerQuality, ConfidenceAnalyzer, ConfidenceBreakdown};
pub use reflection::{CancellationToken, ReflectionEngine, ReflectionScheduler, ReflectionState};
pub use responder::{AnswerResult, KnowledgeResponder, QueryContext};
pub use storage::FragmentStore;
pub use types::*;

/// Everything `remember_with` accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RememberRequest {
    pub content: String,
    pub tags: Vec<String>,
    pub fragment_type: FragmentType,
    pub confidence: Option<f32>,
    pub metadata: BTreeMap<String, String>,
    /// Defaults to now
    pub created_at: Option<DateTime<Utc>>,
    /// Caller-computed vector; otherwise the active provider embeds the content
    pub embedding: Option<Vec<f32>>,
}

impl RememberRequest {
    pub fn new(content: impl Into<String>, fragment_type: FragmentType) -> Self {
        Self {
            content: content.into(),
            tags: Vec::new(),
            fragment_type,
            confidence: None,
            metadata: BTreeMap::new(),
            created_at: None,
            embedding: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Result of one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceSummary {
    /// Fragments removed by the retention policy
    pub purged: usize,
    /// Unindexed fragments that received an embedding
    pub backfilled: usize,
}

#[derive(Debug, Default)]
struct EngineCounters {
    remembered: AtomicU64,
    forgotten: AtomicU64,
    answers: AtomicU64,
    degraded_answers: AtomicU64,
    reflections: AtomicU64,
    lexical_fallbacks: AtomicU64,
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub remembered: u64,
    pub forgotten: u64,
    pub answers: u64,
    /// Answers that fell back to "no knowledge" after a store failure
    pub degraded_answers: u64,
    pub reflections: u64,
    /// Answers served fully or partly by lexical search
    pub lexical_fallbacks: u64,
    pub indexed_vectors: usize,
    pub lexical_documents: usize,
    pub index_generation: u64,
}

/// Main memory engine
pub struct MemoryEngine {
    config: EngineConfig,
    store: FragmentStore,
    index: EmbeddingIndex,
    embeddings: EmbeddingService,
    analyzer: ConfidenceAnalyzer,
    matcher: AnalogicalMatcher,
    reflection: ReflectionEngine,
    counters: EngineCounters,
}

impl MemoryEngine {
    /// Open the store, select the embedding provider and load the index
    pub fn open(config: EngineConfig) -> Result<Self> {
        let store = FragmentStore::open(&config.store)?;
        let embeddings = EmbeddingService::new(EmbeddingProvider::from_config(&config.embedding));
        let analyzer = ConfidenceAnalyzer::new(config.confidence.clone())?;
        let matcher = AnalogicalMatcher::new(config.analogy.clone())?;
        let reflection = ReflectionEngine::new(config.reflection.clone());

        let mode = embeddings.index_mode();
        let dimension = embeddings.dimension();
        let stored = store.index_generation()?;
        let generation = stored.map(|(_, generation)| generation).unwrap_or(0);
        let index = EmbeddingIndex::new(mode, dimension, generation, config.index.clone());

        let engine = Self {
            config,
            store,
            index,
            embeddings,
            analyzer,
            matcher,
            reflection,
            counters: EngineCounters::default(),
        };
        engine.load_index(stored.map(|(dim, _)| dim))?;
        Ok(engine)
    }

    /// Populate the index from the store. A provider dimension different from
    /// the persisted one starts a new index generation.
    fn load_index(&self, stored_dimension: Option<usize>) -> Result<()> {
        let started = std::time::Instant::now();
        let dimension = self.embeddings.dimension();
        let semantic = self.index.mode() == IndexMode::Semantic;

        let mut entries = Vec::new();
        let mut stale = Vec::new();
        let mut documents = 0usize;
        for fragment in self.store.scan(None)? {
            self.index.add_text(fragment.id, &fragment.content, fragment.created_at);
            documents += 1;
            if !semantic {
                continue;
            }
            match fragment.embedding {
                Some(vector) if Some(vector.len()) == dimension => {
                    entries.push((fragment.id, vector, fragment.created_at));
                }
                _ => stale.push(fragment.id),
            }
        }

        let Some(dimension) = dimension else {
            tracing::info!(documents, "Index loaded in lexical mode");
            return Ok(());
        };

        if stored_dimension.is_some_and(|d| d != dimension) {
            tracing::info!(
                previous = ?stored_dimension,
                dimension,
                "Embedding dimension changed, starting a new index generation"
            );
            self.index.rebuild(entries, Some(dimension));
        } else {
            for (id, vector, created_at) in &entries {
                if let Err(e) = self.index.add(*id, vector, *created_at) {
                    tracing::warn!(fragment_id = %id, "Skipping vector on load: {}", e);
                }
            }
        }
        self.store.set_index_generation(dimension, self.index.generation())?;

        for id in &stale {
            if !self.store.is_unindexed(id)? {
                self.store.mark_unindexed(id, "no embedding for active generation")?;
            }
        }

        tracing::info!(
            documents,
            vectors = self.index.len(),
            unindexed = stale.len(),
            generation = self.index.generation(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Index loaded"
        );
        Ok(())
    }

    /// Flush and close the store
    pub fn close(self) -> Result<()> {
        self.store.flush()?;
        tracing::info!(path = ?self.store.path(), "Memory engine closed");
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &FragmentStore {
        &self.store
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    pub fn reflection_state(&self) -> ReflectionState {
        self.reflection.state()
    }

    // ------------------------------------------------------------------------
    // Fragments
    // ------------------------------------------------------------------------

    pub fn remember<I, S>(
        &self,
        content: impl Into<String>,
        tags: I,
        fragment_type: FragmentType,
        confidence: Option<f32>,
    ) -> Result<FragmentId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut request = RememberRequest::new(content, fragment_type).with_tags(tags);
        request.confidence = confidence;
        self.remember_with(request)
    }

    pub fn remember_with(&self, request: RememberRequest) -> Result<FragmentId> {
        let mut fragment =
            MemoryFragment::new(request.content, request.fragment_type).with_tags(request.tags);
        if let Some(confidence) = request.confidence {
            fragment.confidence = confidence;
        }
        if let Some(created_at) = request.created_at {
            fragment = fragment.with_created_at(created_at);
        }
        fragment.metadata = request.metadata;
        fragment.embedding = request.embedding;
        // Validated before the provider is called
        FragmentStore::validate(&mut fragment)?;

        let embedding = fragment
            .embedding
            .take()
            .or_else(|| self.embeddings.embed(&fragment.content));
        let semantic = self.index.mode() == IndexMode::Semantic;
        let indexable = match &embedding {
            Some(v) => semantic && self.index.accepts_dimension(v.len()),
            None => false,
        };
        fragment.embedding = embedding;

        let id = fragment.id;
        let created_at = fragment.created_at;
        let content = fragment.content.clone();
        let vector = if indexable { fragment.embedding.clone() } else { None };

        if semantic && !indexable {
            let reason = if fragment.embedding.is_some() {
                "embedding dimension mismatch"
            } else {
                "embedding unavailable"
            };
            self.store.put_unindexed(fragment, reason)?;
        } else {
            self.store.put(fragment)?;
        }

        self.index.add_text(id, &content, created_at);
        if let Some(vector) = vector {
            if let Err(e) = self.index.add(id, &vector, created_at) {
                tracing::warn!(fragment_id = %id, "Index rejected vector: {}", e);
                self.store.mark_unindexed(&id, "index rejected vector")?;
            }
        }

        self.counters.remembered.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(fragment_id = %id, "Remembered");
        Ok(id)
    }

    /// Fragments matching `filter`, newest first. Returned fragments are
    /// the pre-access snapshot; their access is recorded afterwards.
    pub fn recall(&self, filter: &FragmentFilter) -> Result<Vec<MemoryFragment>> {
        let fragments: Vec<MemoryFragment> = self.store.query(filter)?.collect();
        let policy = self.analyzer.reinforcement();
        for fragment in &fragments {
            if let Err(e) = self.store.update_access(&fragment.id, policy) {
                tracing::warn!(fragment_id = %fragment.id, "Failed to record access: {}", e);
            }
        }
        tracing::debug!(found = fragments.len(), "Recall");
        Ok(fragments)
    }

    pub fn get(&self, id: &FragmentId) -> Result<Option<MemoryFragment>> {
        self.store.get(id)
    }

    /// Remove a fragment from store and index as one critical section for
    /// its id. Returns whether it existed.
    pub fn forget(&self, id: &FragmentId) -> Result<bool> {
        let deleted = self.store.with_id_lock(id, || {
            let deleted = self.store.delete_locked(id)?;
            self.index.remove(id);
            Ok(deleted)
        })?;
        if deleted {
            self.counters.forgotten.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(fragment_id = %id, "Forgotten");
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------------
    // Answers and analogies
    // ------------------------------------------------------------------------

    /// Answer from stored knowledge. Never fails.
    pub fn answer(&self, query: &str, context: &QueryContext) -> AnswerResult {
        let responder = KnowledgeResponder {
            store: &self.store,
            index: &self.index,
            embeddings: &self.embeddings,
            analyzer: &self.analyzer,
            matcher: &self.matcher,
            default_k: self.config.index.default_k,
        };
        let (result, trace) = responder.answer(query, context);

        self.counters.answers.fetch_add(1, Ordering::Relaxed);
        if trace.degraded {
            self.counters.degraded_answers.fetch_add(1, Ordering::Relaxed);
        }
        if trace.used_lexical {
            self.counters.lexical_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Analogies for a stored fragment among the newest fragments
    pub fn find_analogies(&self, id: &FragmentId, limit: usize) -> Result<Vec<Analogy>> {
        let source = self
            .store
            .get(id)?
            .ok_or_else(|| EngineError::NotFound(format!("fragment {id}")))?;
        let pool: Vec<MemoryFragment> = self
            .store
            .scan(None)?
            .take(self.matcher.config().max_candidates)
            .collect();
        Ok(self.matcher.find_analogies(&source, &pool, limit))
    }

    // ------------------------------------------------------------------------
    // Reflection
    // ------------------------------------------------------------------------

    pub fn reflect(&self, range: TimeRange) -> Result<ReflectionReport> {
        self.reflect_with_cancel(range, &CancellationToken::new())
    }

    pub fn reflect_with_cancel(
        &self,
        range: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<ReflectionReport> {
        let report = self.reflection.reflect(&self.store, range, cancel)?;
        self.counters.reflections.fetch_add(1, Ordering::Relaxed);
        Ok(report)
    }

    /// Persisted reports generated within `range`, oldest first
    pub fn reports(&self, range: TimeRange) -> Result<Vec<ReflectionReport>> {
        self.store.reports(range)
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Embed and index fragments stored without a usable vector. Stops early
    /// when the provider is unavailable.
    pub fn backfill_unindexed(&self) -> Result<usize> {
        if self.index.mode() == IndexMode::Lexical {
            return Ok(0);
        }

        let mut backfilled = 0usize;
        for id in self.store.unindexed_ids()? {
            let Some(fragment) = self.store.get(&id)? else {
                continue;
            };
            let vector = match fragment.embedding {
                Some(v) if self.index.accepts_dimension(v.len()) => v,
                _ => match self.embeddings.embed(&fragment.content) {
                    Some(v) => v,
                    None => break,
                },
            };
            if !self.index.accepts_dimension(vector.len()) {
                continue;
            }
            if !self.store.set_embedding(&id, vector.clone())? {
                continue;
            }
            match self.index.add(id, &vector, fragment.created_at) {
                Ok(()) => backfilled += 1,
                Err(e) => {
                    tracing::warn!(fragment_id = %id, "Backfill vector rejected: {}", e);
                    self.store.mark_unindexed(&id, "index rejected vector")?;
                }
            }
        }

        if backfilled > 0 {
            tracing::info!(backfilled, "Unindexed fragments backfilled");
        }
        Ok(backfilled)
    }

    /// Apply the retention policy, then backfill unindexed fragments
    pub fn run_maintenance(&self) -> Result<MaintenanceSummary> {
        let purged = if self.config.retention.is_enabled() {
            let removed = self.store.purge(&self.config.retention)?;
            for id in &removed {
                self.index.remove(id);
            }
            self.counters
                .forgotten
                .fetch_add(removed.len() as u64, Ordering::Relaxed);
            removed.len()
        } else {
            0
        };
        let backfilled = self.backfill_unindexed()?;
        self.store.flush()?;
        Ok(MaintenanceSummary { purged, backfilled })
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            remembered: self.counters.remembered.load(Ordering::Relaxed),
            forgotten: self.counters.forgotten.load(Ordering::Relaxed),
            answers: self.counters.answers.load(Ordering::Relaxed),
            degraded_answers: self.counters.degraded_answers.load(Ordering::Relaxed),
            reflections: self.counters.reflections.load(Ordering::Relaxed),
            lexical_fallbacks: self.counters.lexical_fallbacks.load(Ordering::Relaxed),
            indexed_vectors: self.index.len(),
            lexical_documents: self.index.lexical_len(),
            index_generation: self.index.generation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decay::ReinforcementPolicy;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> MemoryEngine {
        MemoryEngine::open(EngineConfig::with_storage_path(dir.path())).unwrap()
    }

    #[test]
    fn test_remember_indexes_both_segments() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let id = engine
            .remember("Rust ownership rules", ["rust"], FragmentType::Knowledge, Some(0.8))
            .unwrap();

        let stats = engine.stats();
        assert_eq!(stats.remembered, 1);
        assert_eq!(stats.indexed_vectors, 1);
        assert_eq!(stats.lexical_documents, 1);
        assert!(!engine.store().is_unindexed(&id).unwrap());
    }

    #[test]
    fn test_rejected_content_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let err = engine
            .remember("   ", Vec::<String>::new(), FragmentType::Event, None)
            .unwrap_err();
        assert_eq!(err.code(), "REJECTED_INPUT");
        assert_eq!(engine.store().count().unwrap(), 0);
        assert_eq!(engine.stats().lexical_documents, 0);
    }

    #[test]
    fn test_mismatched_embedding_is_backfilled() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let id = engine
            .remember_with(
                RememberRequest::new("vector from another model", FragmentType::Knowledge)
                    .with_embedding(vec![0.1, 0.2, 0.3]),
            )
            .unwrap();
        assert!(engine.store().is_unindexed(&id).unwrap());
        assert_eq!(engine.stats().indexed_vectors, 0);

        assert_eq!(engine.backfill_unindexed().unwrap(), 1);
        assert!(!engine.store().is_unindexed(&id).unwrap());
        assert_eq!(engine.stats().indexed_vectors, 1);
        let stored = engine.get(&id).unwrap().unwrap();
        assert_eq!(stored.embedding.map(|v| v.len()), engine.index().dimension());
    }

    #[test]
    fn test_forget_removes_from_index() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let id = engine
            .remember("temporary note", ["scratch"], FragmentType::Event, None)
            .unwrap();
        assert!(engine.forget(&id).unwrap());
        assert!(!engine.forget(&id).unwrap());
        assert!(engine.get(&id).unwrap().is_none());

        let stats = engine.stats();
        assert_eq!(stats.forgotten, 1);
        assert_eq!(stats.indexed_vectors, 0);
        assert_eq!(stats.lexical_documents, 0);
    }

    #[test]
    fn test_id_locks_released_after_use() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let id = engine
            .remember("short lived", ["scratch"], FragmentType::Event, None)
            .unwrap();
        engine
            .recall(&FragmentFilter::new().with_tags(["scratch"]))
            .unwrap();
        assert!(engine.forget(&id).unwrap());

        let missing = FragmentId::new();
        assert!(!engine.forget(&missing).unwrap());
        assert!(engine
            .store()
            .update_access(&missing, &ReinforcementPolicy::default())
            .unwrap()
            .is_none());

        assert_eq!(engine.store().lock_entries(), 0);
    }

    #[test]
    fn test_find_analogies_missing_source() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let err = engine.find_analogies(&FragmentId::new(), 3).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_maintenance_purges_by_confidence() {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::with_storage_path(dir.path());
        config.retention.min_confidence = Some(0.3);
        let engine = MemoryEngine::open(config).unwrap();

        engine
            .remember("weak hunch", ["misc"], FragmentType::Insight, Some(0.1))
            .unwrap();
        let keep = engine
            .remember("verified fact", ["misc"], FragmentType::Knowledge, Some(0.9))
            .unwrap();

        let summary = engine.run_maintenance().unwrap();
        assert_eq!(summary.purged, 1);
        assert_eq!(engine.store().count().unwrap(), 1);
        assert!(engine.get(&keep).unwrap().is_some());
        assert_eq!(engine.stats().indexed_vectors, 1);
    }
}
