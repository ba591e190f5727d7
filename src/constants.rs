//! Documented constants for the memory engine
//!
//! Every tunable default lives here. Configuration structs in [`crate::config`]
//! start from these values and can override them from the environment.

// =============================================================================
// FRAGMENT DEFAULTS
// =============================================================================

/// Confidence assigned to a fragment when the caller does not provide one
///
/// Neutral starting point: reinforcement moves it up with use, the
/// recency factor discounts it at scoring time.
pub const DEFAULT_FRAGMENT_CONFIDENCE: f32 = 0.5;

/// Additive confidence reinforcement applied on every access
///
/// 25 accesses move a neutral fragment (0.5) to the cap. Small enough that a
/// burst of retrievals cannot make a weak fragment authoritative.
pub const REINFORCEMENT_STEP: f32 = 0.02;

/// Upper bound for reinforced confidence
pub const REINFORCEMENT_CAP: f32 = 1.0;

// =============================================================================
// CONFIDENCE ANALYZER
// Response confidence = w_sim·similarity + w_conf·confidence + w_rec·recency
//                       − w_hedge·hedging, clamped to [0, 1]
// =============================================================================

/// Weight of the best supporting fragment's similarity to the query
pub const WEIGHT_SIMILARITY: f32 = 0.45;

/// Weight of the supporting fragment's stored confidence
pub const WEIGHT_INTRINSIC: f32 = 0.35;

/// Weight of the recency factor `exp(-λ·Δt)`
pub const WEIGHT_RECENCY: f32 = 0.20;

/// Penalty applied at full hedging saturation
pub const WEIGHT_HEDGING_PENALTY: f32 = 0.25;

/// Recency decay rate λ, per day
///
/// 0.01/day gives a half-life of ~69 days: a fragment from last week keeps
/// 93% of its recency weight, one from last year keeps 3%.
pub const RECENCY_LAMBDA_PER_DAY: f64 = 0.01;

/// Number of hedging phrases at which the hedging score saturates at 1.0
pub const HEDGE_SATURATION: usize = 2;

/// Responses below this confidence are flagged `needs_clarification`
pub const CLARIFICATION_THRESHOLD: f32 = 0.4;

/// Confidence at or above which an answer is rated high quality
pub const QUALITY_HIGH_THRESHOLD: f32 = 0.75;

/// Confidence at or above which an answer is rated medium quality
pub const QUALITY_MEDIUM_THRESHOLD: f32 = 0.55;

// =============================================================================
// EMBEDDING INDEX
// =============================================================================

/// Dimension of the local feature-hashing embedder
pub const LOCAL_EMBEDDING_DIMENSION: usize = 384;

/// Default number of results returned by a responder search
pub const DEFAULT_SEARCH_K: usize = 5;

/// Similarity floor for semantic hits
///
/// Hashed embeddings of unrelated texts land near 0 with collision noise
/// below ~0.1; 0.2 keeps that noise out of answers.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.2;

/// Term-overlap floor for lexical hits (any shared term counts)
pub const DEFAULT_MIN_LEXICAL_SCORE: f32 = 0.0;

/// Distinct query embeddings kept before the cache is reset
pub const QUERY_CACHE_CAPACITY: usize = 1024;

// =============================================================================
// REFLECTION
// =============================================================================

/// Minimum fragments in range before any analysis runs
pub const REFLECTION_MIN_FRAGMENTS: usize = 2;

/// Fragments read per batch between cancellation checks
pub const REFLECTION_BATCH_SIZE: usize = 256;

/// Relative change above which drift is reported
///
/// Applied both to the total-variation distance between the tag
/// distributions of the two windows and to the relative change of their
/// mean confidence.
pub const DRIFT_THRESHOLD: f32 = 0.3;

/// Content similarity below which same-tag same-type pairs are contradictions
pub const CONTRADICTION_SIMILARITY_THRESHOLD: f32 = 0.15;

/// Upper bound on candidate pairs examined per cycle (O(n²) guard)
pub const CONTRADICTION_MAX_PAIRS: usize = 50_000;

/// Observed/expected ratio below which a tag is a blind spot
pub const BLIND_SPOT_RATIO: f32 = 0.5;

/// Default scheduled reflection interval (seconds)
pub const REFLECTION_INTERVAL_SECS: u64 = 3600;

/// Default trailing window covered by a scheduled reflection (hours)
pub const REFLECTION_WINDOW_HOURS: i64 = 24;

// =============================================================================
// ANALOGICAL MATCHING
// =============================================================================

/// Minimum analogy score kept
pub const ANALOGY_MIN_SCORE: f32 = 0.2;

/// Newest fragments considered as analogy candidates
pub const ANALOGY_MAX_CANDIDATES: usize = 1000;

/// Analogies returned when the responder broadens a weak answer
pub const ANALOGY_BROADENING_LIMIT: usize = 3;

/// Multiplier applied to analogy scores when they stand in for similarity
pub const ANALOGY_DISCOUNT: f32 = 0.8;

// =============================================================================
// STORAGE
// =============================================================================

/// Content above this size is stored LZ4-compressed
pub const COMPRESSION_THRESHOLD_BYTES: usize = 4096;

/// Ceiling for decompressed content (guards corrupted length headers)
pub const MAX_DECOMPRESSED_SIZE: i32 = 16 * 1024 * 1024;

/// Retries for transient storage failures
pub const STORAGE_MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff between storage retries (ms)
pub const STORAGE_RETRY_BASE_DELAY_MS: u64 = 10;

/// Backoff exponent cap: delay never exceeds base · 2^4
pub const STORAGE_RETRY_MAX_EXPONENT: u32 = 4;
