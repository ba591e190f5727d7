//! Confidence Analyzer
//!
//! Scores how much an answer built on a fragment can be trusted:
//!
//! ```text
//! recency    = exp(-λ · days since last access)
//! hedging    = min(1, hedge_phrases / hedge_saturation)
//! confidence = clamp(w_sim·similarity + w_conf·fragment.confidence
//!                    + w_rec·recency − w_hedge·hedging, 0, 1)
//! ```
//!
//! Pure and deterministic. Stored confidence only changes through
//! [`ReinforcementPolicy`], which the store applies on access.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::MemoryFragment;
use crate::config::ConfidenceConfig;
use crate::decay::{days_between, recency_factor, ReinforcementPolicy};
use crate::errors::{EngineError, Result};

const HEDGE_PATTERN: &str = r"(?i)\b(might|may|possibly|perhaps|maybe|probably|i think|i guess|i believe|not sure|unclear|seems|could be)\b";

/// Answer quality bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerQuality {
    High,
    Medium,
    Low,
    /// No supporting fragments
    Insufficient,
}

impl fmt::Display for AnswerQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Insufficient => "insufficient",
        };
        f.write_str(s)
    }
}

/// Per-factor contributions, kept for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub similarity: f32,
    pub intrinsic: f32,
    pub recency: f32,
    pub hedging: f32,
    pub confidence: f32,
}

pub struct ConfidenceAnalyzer {
    config: ConfidenceConfig,
    hedges: Regex,
}

impl ConfidenceAnalyzer {
    pub fn new(config: ConfidenceConfig) -> Result<Self> {
        let hedges = Regex::new(HEDGE_PATTERN)
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("invalid hedge pattern: {e}")))?;
        Ok(Self { config, hedges })
    }

    pub fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    pub fn reinforcement(&self) -> &ReinforcementPolicy {
        &self.config.reinforcement
    }

    pub fn hedge_count(&self, text: &str) -> usize {
        self.hedges.find_iter(text).count()
    }

    /// Hedging in [0, 1], saturating at `hedge_saturation` phrases
    pub fn hedging_score(&self, text: &str) -> f32 {
        let saturation = self.config.hedge_saturation.max(1) as f32;
        (self.hedge_count(text) as f32 / saturation).min(1.0)
    }

    pub fn recency(&self, fragment: &MemoryFragment, now: DateTime<Utc>) -> f32 {
        recency_factor(
            self.config.lambda_per_day,
            days_between(fragment.last_accessed, now),
        )
    }

    /// Score one supporting fragment retrieved at `similarity`
    pub fn score(&self, similarity: f32, fragment: &MemoryFragment, now: DateTime<Utc>) -> ConfidenceBreakdown {
        let similarity = if similarity.is_finite() {
            similarity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let intrinsic = fragment.confidence.clamp(0.0, 1.0);
        let recency = self.recency(fragment, now);
        let hedging = self.hedging_score(&fragment.content);

        let c = &self.config;
        let raw = c.weight_similarity * similarity
            + c.weight_intrinsic * intrinsic
            + c.weight_recency * recency
            - c.weight_hedging_penalty * hedging;

        ConfidenceBreakdown {
            similarity,
            intrinsic,
            recency,
            hedging,
            confidence: if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 },
        }
    }

    pub fn needs_clarification(&self, confidence: f32) -> bool {
        confidence < self.config.clarification_threshold
    }

    pub fn quality(&self, confidence: f32, has_sources: bool) -> AnswerQuality {
        if !has_sources {
            AnswerQuality::Insufficient
        } else if confidence >= self.config.quality_high_threshold {
            AnswerQuality::High
        } else if confidence >= self.config.quality_medium_threshold {
            AnswerQuality::Medium
        } else {
            AnswerQuality::Low
        }
    }
}
