//! # Score Normalizer
//!
//! Maps raw log-probabilities onto the bounded scale shown to learners:
//! clamp into `[clamp_min, clamp_max]`, rescale linearly into
//! `[scale_min, scale_max]`, round to one decimal.

use super::types::{NormalizedScore, RawScore};
use crate::config::ScoringConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreScale {
    pub clamp_min: f32,
    pub clamp_max: f32,
    pub scale_min: f32,
    pub scale_max: f32,
}

impl Default for ScoreScale {
    fn default() -> Self {
        Self {
            clamp_min: -10.0,
            clamp_max: 0.0,
            scale_min: 1.0,
            scale_max: 5.0,
        }
    }
}

impl From<&ScoringConfig> for ScoreScale {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            clamp_min: config.clamp_min,
            clamp_max: config.clamp_max,
            scale_min: config.scale_min,
            scale_max: config.scale_max,
        }
    }
}

impl ScoreScale {
    /// Normalize one raw score.
    ///
    /// Out-of-range values saturate: `-inf` (an exhausted alignment) becomes
    /// `scale_min`, anything above `clamp_max` becomes `scale_max`. `NaN` is
    /// treated as the worst score.
    pub fn normalize(&self, raw: RawScore) -> NormalizedScore {
        // f32::max returns the non-NaN operand, so NaN lands on clamp_min.
        let clamped = raw.0.max(self.clamp_min).min(self.clamp_max);
        let fraction = (clamped - self.clamp_min) / (self.clamp_max - self.clamp_min);
        let scaled = self.scale_min + (self.scale_max - self.scale_min) * fraction;
        NormalizedScore(round_to_tenth(scaled))
    }

    pub fn normalize_all(&self, raw: &[RawScore]) -> Vec<NormalizedScore> {
        raw.iter().map(|&score| self.normalize(score)).collect()
    }
}

/// Round to one decimal place.
pub fn round_to_tenth(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}
