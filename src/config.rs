//! Configuration management for the memory engine
//!
//! All configurable parameters in one place with environment variable overrides.
//! Defaults come from [`crate::constants`]; `LUCID_*` variables override them.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::constants::*;
use crate::decay::ReinforcementPolicy;

/// Write durability mode for storage operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// fsync on every write batch (survives power loss, 2-10ms per write)
    Sync,
    /// WAL without fsync (survives process crashes, <1ms per write)
    Async,
}

impl Default for WriteMode {
    fn default() -> Self {
        WriteMode::Async
    }
}

/// Fragment store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the RocksDB database
    pub storage_path: PathBuf,

    /// Write durability
    pub write_mode: WriteMode,

    /// Content larger than this many bytes is stored LZ4-compressed
    pub compression_threshold_bytes: usize,

    /// Retries for transient storage failures before surfacing them
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries (ms)
    pub retry_base_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./lucid_memory_data"),
            write_mode: WriteMode::default(),
            compression_threshold_bytes: COMPRESSION_THRESHOLD_BYTES,
            max_retries: STORAGE_MAX_RETRIES,
            retry_base_delay_ms: STORAGE_RETRY_BASE_DELAY_MS,
        }
    }
}

/// Embedding index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Semantic hits below this cosine similarity are discarded
    pub min_similarity: f32,

    /// Lexical hits at or below this overlap ratio are discarded
    pub min_lexical_score: f32,

    /// Default number of candidates fetched by the responder
    pub default_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            min_similarity: DEFAULT_MIN_SIMILARITY,
            min_lexical_score: DEFAULT_MIN_LEXICAL_SCORE,
            default_k: DEFAULT_SEARCH_K,
        }
    }
}

/// Which embedding backend to use, selected once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// In-process feature-hashing embedder
    LocalModel,
    /// OpenAI-compatible HTTP embedding endpoint
    RemoteApi,
    /// No embeddings: the index runs lexically
    LexicalFallback,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "local_model" => Ok(Self::LocalModel),
            "remote" | "remote_api" => Ok(Self::RemoteApi),
            "lexical" | "lexical_fallback" | "none" => Ok(Self::LexicalFallback),
            other => Err(format!("unknown embedding provider '{other}'")),
        }
    }
}

/// Remote embedding endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEmbeddingConfig {
    /// Full URL of the embeddings endpoint
    pub endpoint: String,

    /// Model name sent with every request
    pub model: String,

    /// Bearer token, if the endpoint requires one
    pub api_key: Option<String>,

    /// Per-request timeout (ms)
    pub timeout_ms: u64,

    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before probing again
    pub open_duration_secs: u64,
}

impl Default for RemoteEmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434/v1/embeddings".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
            timeout_ms: 5000,
            failure_threshold: 5,
            open_duration_secs: 30,
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,

    /// Dimension of the local embedder
    pub local_dimension: usize,

    pub remote: RemoteEmbeddingConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::LocalModel,
            local_dimension: LOCAL_EMBEDDING_DIMENSION,
            remote: RemoteEmbeddingConfig::default(),
        }
    }
}

/// Confidence analyzer weights and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    pub weight_similarity: f32,
    pub weight_intrinsic: f32,
    pub weight_recency: f32,
    pub weight_hedging_penalty: f32,

    /// Recency decay rate λ per day
    pub lambda_per_day: f64,

    /// Hedging phrase count at which the hedging score saturates
    pub hedge_saturation: usize,

    /// Below this, answers are flagged `needs_clarification`
    pub clarification_threshold: f32,

    pub quality_high_threshold: f32,
    pub quality_medium_threshold: f32,

    /// Reinforcement applied to fragments on access
    pub reinforcement: ReinforcementPolicy,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            weight_similarity: WEIGHT_SIMILARITY,
            weight_intrinsic: WEIGHT_INTRINSIC,
            weight_recency: WEIGHT_RECENCY,
            weight_hedging_penalty: WEIGHT_HEDGING_PENALTY,
            lambda_per_day: RECENCY_LAMBDA_PER_DAY,
            hedge_saturation: HEDGE_SATURATION,
            clarification_threshold: CLARIFICATION_THRESHOLD,
            quality_high_threshold: QUALITY_HIGH_THRESHOLD,
            quality_medium_threshold: QUALITY_MEDIUM_THRESHOLD,
            reinforcement: ReinforcementPolicy::default(),
        }
    }
}

/// Reflection engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Fewer fragments than this in range yields an empty summary report
    pub min_fragments: usize,

    /// Fragments per batch between cancellation checks
    pub batch_size: usize,

    pub drift_threshold: f32,
    pub contradiction_similarity_threshold: f32,
    pub max_pairs: usize,
    pub blind_spot_ratio: f32,

    /// Scheduled cycle interval (seconds)
    pub interval_secs: u64,

    /// Trailing window analyzed by a scheduled cycle (hours)
    pub window_hours: i64,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            min_fragments: REFLECTION_MIN_FRAGMENTS,
            batch_size: REFLECTION_BATCH_SIZE,
            drift_threshold: DRIFT_THRESHOLD,
            contradiction_similarity_threshold: CONTRADICTION_SIMILARITY_THRESHOLD,
            max_pairs: CONTRADICTION_MAX_PAIRS,
            blind_spot_ratio: BLIND_SPOT_RATIO,
            interval_secs: REFLECTION_INTERVAL_SECS,
            window_hours: REFLECTION_WINDOW_HOURS,
        }
    }
}

/// Analogical matcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalogyConfig {
    pub min_score: f32,
    pub max_candidates: usize,
    pub broadening_limit: usize,
    pub discount: f32,
}

impl Default for AnalogyConfig {
    fn default() -> Self {
        Self {
            min_score: ANALOGY_MIN_SCORE,
            max_candidates: ANALOGY_MAX_CANDIDATES,
            broadening_limit: ANALOGY_BROADENING_LIMIT,
            discount: ANALOGY_DISCOUNT,
        }
    }
}

/// Retention policy applied by maintenance. Both limits off by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Fragments older than this many days are removed
    pub max_age_days: Option<u32>,

    /// Fragments whose confidence is below this are removed
    pub min_confidence: Option<f32>,
}

impl RetentionConfig {
    pub fn is_enabled(&self) -> bool {
        self.max_age_days.is_some() || self.min_confidence.is_some()
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
    pub confidence: ConfidenceConfig,
    pub reflection: ReflectionConfig,
    pub analogy: AnalogyConfig,
    pub retention: RetentionConfig,
}

/// Parse an environment variable, ignoring unset or malformed values
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let val = env::var(key).ok()?;
    match val.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring malformed value for {}: '{}'", key, val);
            None
        }
    }
}

impl EngineConfig {
    /// Defaults with the store rooted at `path`
    pub fn with_storage_path(path: impl AsRef<Path>) -> Self {
        let mut config = Self::default();
        config.store.storage_path = path.as_ref().to_path_buf();
        config
    }

    /// Load configuration from environment variables with defaults
    #[allow(clippy::field_reassign_with_default)]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Store
        if let Ok(val) = env::var("LUCID_STORAGE_PATH") {
            config.store.storage_path = PathBuf::from(val);
        }
        if let Ok(val) = env::var("LUCID_WRITE_MODE") {
            if val.to_lowercase() == "sync" {
                config.store.write_mode = WriteMode::Sync;
            }
        }
        if let Some(n) = env_parse("LUCID_COMPRESSION_THRESHOLD") {
            config.store.compression_threshold_bytes = n;
        }
        if let Some(n) = env_parse::<u32>("LUCID_STORAGE_RETRIES") {
            config.store.max_retries = n.min(10);
        }

        // Index
        if let Some(v) = env_parse::<f32>("LUCID_MIN_SIMILARITY") {
            config.index.min_similarity = v.clamp(0.0, 1.0);
        }
        if let Some(k) = env_parse::<usize>("LUCID_SEARCH_K") {
            config.index.default_k = k.max(1);
        }

        // Embeddings
        if let Some(kind) = env_parse::<ProviderKind>("LUCID_EMBEDDING_PROVIDER") {
            config.embedding.provider = kind;
        }
        if let Some(dim) = env_parse::<usize>("LUCID_LOCAL_DIMENSION") {
            config.embedding.local_dimension = dim.clamp(16, 4096);
        }
        if let Ok(val) = env::var("LUCID_EMBEDDING_ENDPOINT") {
            config.embedding.remote.endpoint = val;
        }
        if let Ok(val) = env::var("LUCID_EMBEDDING_MODEL") {
            config.embedding.remote.model = val;
        }
        if let Ok(val) = env::var("LUCID_EMBEDDING_API_KEY") {
            if !val.is_empty() {
                config.embedding.remote.api_key = Some(val);
            }
        }
        if let Some(ms) = env_parse("LUCID_EMBEDDING_TIMEOUT_MS") {
            config.embedding.remote.timeout_ms = ms;
        }

        // Confidence
        if let Some(l) = env_parse::<f64>("LUCID_RECENCY_LAMBDA") {
            config.confidence.lambda_per_day = l.max(0.0);
        }
        if let Some(t) = env_parse::<f32>("LUCID_CLARIFICATION_THRESHOLD") {
            config.confidence.clarification_threshold = t.clamp(0.0, 1.0);
        }
        if let Some(step) = env_parse::<f32>("LUCID_REINFORCEMENT_STEP") {
            config.confidence.reinforcement.step = step.clamp(0.0, 0.5);
        }

        // Reflection
        if let Some(n) = env_parse::<usize>("LUCID_REFLECTION_MIN_FRAGMENTS") {
            config.reflection.min_fragments = n;
        }
        if let Some(t) = env_parse::<f32>("LUCID_DRIFT_THRESHOLD") {
            config.reflection.drift_threshold = t.clamp(0.0, 1.0);
        }
        if let Some(t) = env_parse::<f32>("LUCID_CONTRADICTION_THRESHOLD") {
            config.reflection.contradiction_similarity_threshold = t.clamp(0.0, 1.0);
        }
        if let Some(secs) = env_parse::<u64>("LUCID_REFLECTION_INTERVAL") {
            config.reflection.interval_secs = secs.max(1);
        }
        if let Some(hours) = env_parse::<i64>("LUCID_REFLECTION_WINDOW_HOURS") {
            config.reflection.window_hours = hours.max(1);
        }

        // Retention
        if let Some(days) = env_parse("LUCID_RETENTION_MAX_AGE_DAYS") {
            config.retention.max_age_days = Some(days);
        }
        if let Some(c) = env_parse::<f32>("LUCID_RETENTION_MIN_CONFIDENCE") {
            config.retention.min_confidence = Some(c.clamp(0.0, 1.0));
        }

        config
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("Memory engine configuration:");
        info!("   Storage: {:?} ({:?} writes)", self.store.storage_path, self.store.write_mode);
        info!(
            "   Compression: content > {} bytes stored as LZ4",
            self.store.compression_threshold_bytes
        );
        info!("   Embedding provider: {:?}", self.embedding.provider);
        if self.embedding.provider == ProviderKind::RemoteApi {
            info!(
                "   Remote endpoint: {} (model: {})",
                self.embedding.remote.endpoint, self.embedding.remote.model
            );
        }
        info!(
            "   Search: k={}, min similarity {:.2}",
            self.index.default_k, self.index.min_similarity
        );
        info!(
            "   Confidence weights: sim {:.2}, intrinsic {:.2}, recency {:.2}, hedge -{:.2} (λ={}/day)",
            self.confidence.weight_similarity,
            self.confidence.weight_intrinsic,
            self.confidence.weight_recency,
            self.confidence.weight_hedging_penalty,
            self.confidence.lambda_per_day
        );
        info!(
            "   Reflection: every {}s over {}h, min {} fragments",
            self.reflection.interval_secs,
            self.reflection.window_hours,
            self.reflection.min_fragments
        );
        if self.retention.is_enabled() {
            info!(
                "   Retention: max age {:?} days, min confidence {:?}",
                self.retention.max_age_days, self.retention.min_confidence
            );
        } else {
            info!("   Retention: disabled");
        }
    }
}
