//! Emotion similarity scoring.
//!
//! Compares a challenger's expression against the leader's as
//! `1 - mean absolute difference` over the eight emotion labels.

use crate::types::EmotionVector;

/// Strategy for comparing two emotion vectors.
pub trait EmotionScorer: Send + Sync {
    /// Similarity in [0, 1]. Identical vectors score 1.0.
    fn similarity(&self, a: &EmotionVector, b: &EmotionVector) -> f64;
}

/// Unweighted mean-absolute-difference scorer. All labels contribute equally.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanAbsoluteScorer;

impl EmotionScorer for MeanAbsoluteScorer {
    fn similarity(&self, a: &EmotionVector, b: &EmotionVector) -> f64 {
        (1.0 - a.mean_abs_difference(b)).clamp(0.0, 1.0)
    }
}
