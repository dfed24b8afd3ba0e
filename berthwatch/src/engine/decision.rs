// berthwatch/src/engine/decision.rs
//
// Decision layer applied to scoring output before publication.
//
//   - risk tier from score, for rows the model emitted without a level
//   - recommended action from tier, for rows without one
//   - optional predicted delay minutes (score × max delay), with an opt-in
//     jitter of ±N minutes drawn from a seedable RNG
//
// Tier cut-points default to the production model's: ≥0.99 CRITICAL,
// ≥0.02 WARNING, else NORMAL.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::records::RiskLevel;

pub const ACTION_CRITICAL: &str = "IMMEDIATE: Reassign Docking Slot & Notify Tugboats";
pub const ACTION_WARNING:  &str = "PROACTIVE: Request GPS/ETA update from Vessel";
pub const ACTION_NORMAL:   &str = "ROUTINE: Maintain standard schedule";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierCuts {
    pub critical_at: f64,
    pub warning_at:  f64,
}

impl Default for TierCuts {
    fn default() -> Self { Self { critical_at: 0.99, warning_at: 0.02 } }
}

impl TierCuts {
    pub fn classify(&self, score: f64) -> RiskLevel {
        if score >= self.critical_at      { RiskLevel::Critical }
        else if score >= self.warning_at  { RiskLevel::Warning }
        else                              { RiskLevel::Normal }
    }
}

pub fn default_action(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Critical => ACTION_CRITICAL,
        RiskLevel::Warning  => ACTION_WARNING,
        RiskLevel::Normal   => ACTION_NORMAL,
    }
}

// ── Delay estimation ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayModel {
    pub max_minutes:    i64,
    /// Half-width of the uniform jitter; 0 disables it.
    pub jitter_minutes: i64,
    /// Fixed seed for reproducible jitter. None seeds from entropy.
    pub seed:           Option<u64>,
}

impl Default for DelayModel {
    fn default() -> Self { Self { max_minutes: 120, jitter_minutes: 0, seed: None } }
}

pub struct DelayEstimator {
    model: DelayModel,
    rng:   StdRng,
}

impl DelayEstimator {
    pub fn new(model: DelayModel) -> Self {
        let rng = match model.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None       => StdRng::from_entropy(),
        };
        Self { model, rng }
    }

    pub fn estimate(&mut self, score: f64) -> i64 {
        let base = (score.clamp(0.0, 1.0) * self.model.max_minutes as f64).round() as i64;
        let jitter = if self.model.jitter_minutes > 0 {
            let j = self.model.jitter_minutes;
            self.rng.gen_range(-j..=j)
        } else { 0 };
        (base + jitter).max(0)
    }
}
