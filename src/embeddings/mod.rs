//! Embedding generation
//!
//! The provider is chosen once at startup:
//! - **LocalModel**: in-process feature hashing, always available
//! - **RemoteApi**: OpenAI-compatible endpoint behind a circuit breaker; if
//!   the startup probe fails the engine runs with `LexicalFallback`
//! - **LexicalFallback**: no vectors; the index answers lexically
//!
//! # Configuration
//! - `LUCID_EMBEDDING_PROVIDER=local|remote|lexical`
//! - `LUCID_EMBEDDING_ENDPOINT`, `LUCID_EMBEDDING_MODEL`, `LUCID_EMBEDDING_API_KEY`

pub mod circuit_breaker;
pub mod local;
pub mod remote;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{EmbeddingConfig, ProviderKind};
use crate::constants::QUERY_CACHE_CAPACITY;
use crate::errors::{EngineError, Result};
use crate::vector_db::IndexMode;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, ResilientEmbedder};
pub use local::LocalEmbedder;
pub use remote::RemoteEmbedder;

/// Trait for embedding generation
pub trait Embedder: Send + Sync {
    /// Generate embedding for text
    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;

    /// Batch encode multiple texts (default: sequential)
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }
}

pub enum EmbeddingProvider {
    LocalModel(LocalEmbedder),
    RemoteApi(ResilientEmbedder<RemoteEmbedder>),
    LexicalFallback,
}

impl EmbeddingProvider {
    /// Select the provider from configuration, probing remote endpoints once
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        match config.provider {
            ProviderKind::LocalModel => match LocalEmbedder::new(config.local_dimension) {
                Ok(embedder) => Self::LocalModel(embedder),
                Err(e) => {
                    tracing::warn!("Local embedder unusable, running lexically: {}", e);
                    Self::LexicalFallback
                }
            },
            ProviderKind::RemoteApi => match RemoteEmbedder::connect(&config.remote) {
                Ok(remote) => {
                    let breaker = CircuitBreakerConfig::from(&config.remote);
                    Self::RemoteApi(ResilientEmbedder::new(remote, breaker))
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %config.remote.endpoint,
                        "Remote embedding probe failed, running lexically: {}",
                        e
                    );
                    Self::LexicalFallback
                }
            },
            ProviderKind::LexicalFallback => Self::LexicalFallback,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::LocalModel(_) => ProviderKind::LocalModel,
            Self::RemoteApi(_) => ProviderKind::RemoteApi,
            Self::LexicalFallback => ProviderKind::LexicalFallback,
        }
    }

    pub fn index_mode(&self) -> IndexMode {
        match self {
            Self::LexicalFallback => IndexMode::Lexical,
            _ => IndexMode::Semantic,
        }
    }

    /// Vector dimension, `None` in lexical mode
    pub fn dimension(&self) -> Option<usize> {
        match self {
            Self::LocalModel(e) => Some(e.dimension()),
            Self::RemoteApi(e) => Some(e.dimension()),
            Self::LexicalFallback => None,
        }
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self {
            Self::LocalModel(e) => e.encode(text),
            Self::RemoteApi(e) => e.encode(text),
            Self::LexicalFallback => Err(EngineError::EmbeddingUnavailable(
                "no embedding provider configured".to_string(),
            )),
        }
    }
}

/// Provider plus a query-embedding cache and once-per-session degradation
/// logging
pub struct EmbeddingService {
    provider: EmbeddingProvider,
    query_cache: DashMap<[u8; 32], Vec<f32>>,
    unavailable_logged: AtomicBool,
}

impl EmbeddingService {
    pub fn new(provider: EmbeddingProvider) -> Self {
        tracing::info!(
            provider = ?provider.kind(),
            dimension = ?provider.dimension(),
            "Embedding provider selected"
        );
        Self {
            provider,
            query_cache: DashMap::new(),
            unavailable_logged: AtomicBool::new(false),
        }
    }

    pub fn provider(&self) -> &EmbeddingProvider {
        &self.provider
    }

    pub fn index_mode(&self) -> IndexMode {
        self.provider.index_mode()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.provider.dimension()
    }

    fn note_unavailable(&self, err: &EngineError) {
        if let EngineError::EmbeddingUnavailable(reason) = err {
            if !self.unavailable_logged.swap(true, Ordering::Relaxed) {
                tracing::warn!(reason = %reason, "Embeddings unavailable, using lexical search");
            }
        }
    }

    /// Embed fragment content. `None` when no vector can be produced.
    pub fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if self.provider.index_mode() == IndexMode::Lexical {
            return None;
        }
        match self.provider.embed(text) {
            Ok(v) => Some(v),
            Err(e) => {
                self.note_unavailable(&e);
                None
            }
        }
    }

    /// Embed a query, reusing the vector for repeated identical queries
    pub fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        if self.provider.index_mode() == IndexMode::Lexical {
            return None;
        }
        let key: [u8; 32] = Sha256::digest(text.as_bytes()).into();
        if let Some(hit) = self.query_cache.get(&key) {
            return Some(hit.clone());
        }
        let embedding = self.embed(text)?;
        if self.query_cache.len() >= QUERY_CACHE_CAPACITY {
            self.query_cache.clear();
        }
        self.query_cache.insert(key, embedding.clone());
        Some(embedding)
    }

    pub fn cached_queries(&self) -> usize {
        self.query_cache.len()
    }
}
