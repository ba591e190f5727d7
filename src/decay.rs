//! Confidence dynamics: recency decay and access reinforcement
//!
//! Two deterministic rules govern how confidence moves:
//!
//! - **Recency decay** is applied at scoring time and never written back:
//!   `factor = e^(-λ·Δt)` with Δt in days since the fragment was last touched.
//! - **Reinforcement** is the only rule that mutates stored confidence. Each
//!   access adds a fixed step, capped at the configured ceiling:
//!   `c' = min(c + step, cap)`.
//!
//! ```text
//! recency │╲
//!    1.0  │ ╲
//!         │  ╲__
//!    0.5  │     ╲____            λ = 0.01/day → half-life ≈ 69 days
//!         │          ╲_______
//!    0.0  └──────────────────────► days since access
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{REINFORCEMENT_CAP, REINFORCEMENT_STEP};

/// Recency factor `e^(-λ·Δt)` for an elapsed time in days.
///
/// Returns 1.0 for zero or negative elapsed time (clock skew never boosts).
#[inline]
pub fn recency_factor(lambda_per_day: f64, days_elapsed: f64) -> f32 {
    if days_elapsed <= 0.0 || lambda_per_day <= 0.0 {
        return 1.0;
    }
    (-lambda_per_day * days_elapsed).exp() as f32
}

/// Days elapsed between two instants, as a float
#[inline]
pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 86_400_000.0
}

/// Bounded additive reinforcement applied on access
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReinforcementPolicy {
    /// Amount added per access
    pub step: f32,
    /// Ceiling (never above 1.0)
    pub cap: f32,
}

impl Default for ReinforcementPolicy {
    fn default() -> Self {
        Self {
            step: REINFORCEMENT_STEP,
            cap: REINFORCEMENT_CAP,
        }
    }
}

impl ReinforcementPolicy {
    /// Apply one reinforcement step. The result always lies in [0, 1].
    #[inline]
    pub fn reinforce(&self, confidence: f32) -> f32 {
        let cap = self.cap.clamp(0.0, 1.0);
        let step = self.step.max(0.0);
        let current = confidence.clamp(0.0, 1.0);
        // Never pull a fragment above the cap down to it
        if current >= cap {
            return current;
        }
        (current + step).min(cap)
    }
}
