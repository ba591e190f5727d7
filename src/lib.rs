//! Lucid-Memory Library
//!
//! Semantic memory and reflection engine for autonomous agents.
//!
//! # Key Features
//! - Durable fragment storage (RocksDB, LZ4 for large content)
//! - Semantic search with a lexical fallback that never fails
//! - Confidence-scored answers that cite only stored fragments
//! - Temporal reflection: drift, contradictions, blind spots
//! - Cross-context analogies
//!
//! # Quick start
//! ```no_run
//! use lucid_memory::config::EngineConfig;
//! use lucid_memory::memory::{FragmentType, MemoryEngine, QueryContext};
//!
//! let engine = MemoryEngine::open(EngineConfig::with_storage_path("./lucid_store"))?;
//! engine.remember("The build uses cargo workspaces", ["build"], FragmentType::Knowledge, Some(0.8))?;
//! let answer = engine.answer("how is the build organised?", &QueryContext::default());
//! println!("{} ({:.2})", answer.response_text, answer.confidence);
//! engine.close()?;
//! # Ok::<(), lucid_memory::errors::EngineError>(())
//! ```

pub mod config;
pub mod constants;
pub mod decay;
pub mod embeddings;
pub mod errors;
pub mod memory;
pub mod similarity;
pub mod tracing_setup;
pub mod validation;
pub mod vector_db;

pub use config::EngineConfig;
pub use errors::{EngineError, Result};
pub use memory::{
    AnswerQuality, AnswerResult, EngineStats, FragmentFilter, FragmentId, FragmentType,
    MemoryEngine, MemoryFragment, QueryContext, RememberRequest, TimeFilter, TimeRange,
};

// Re-export dependencies to ensure tests/benchmarks use the same version
pub use chrono;
pub use uuid;
