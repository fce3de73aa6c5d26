//! One-to-one embedding matching.

use crate::types::Embedding;

/// Default maximum Euclidean distance for a positive match. Lower is stricter.
pub const DEFAULT_TOLERANCE: f32 = 0.5;

/// Result of comparing a probe embedding against the enrolled template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance between template and probe.
    pub distance: f32,
}

/// Strategy for comparing a probe embedding against the single enrolled template.
pub trait Matcher {
    fn compare(&self, template: &Embedding, probe: &Embedding) -> MatchResult;
}

/// Threshold test over Euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EuclideanMatcher {
    pub tolerance: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, template: &Embedding, probe: &Embedding) -> MatchResult {
        let distance = template.euclidean_distance(probe);
        MatchResult {
            matched: distance <= self.tolerance,
            distance,
        }
    }
}

/// True iff the distance between `template` and `candidate` is at most `tolerance`.
///
/// NaN tolerances and mismatched dimensions never match.
pub fn is_match(template: &Embedding, candidate: &Embedding, tolerance: f32) -> bool {
    EuclideanMatcher::new(tolerance)
        .compare(template, candidate)
        .matched
}
