//! Identity matching of a probe embedding against the enrolled roster.

use crate::roster::EnrolledIdentity;
use crate::types::{Embedding, MatchResult, Metric};

/// Default maximum embedding distance accepted as the same person.
pub const DEFAULT_TOLERANCE: f32 = 0.5;

/// Strategy for deciding which enrolled identity, if any, a probe belongs to.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, roster: &[EnrolledIdentity], tolerance: f32) -> MatchResult;
}

/// Nearest-reference matcher.
///
/// An identity is a candidate when any of its reference embeddings lies
/// within `tolerance` of the probe. When at least one candidate exists, the
/// winner is the owner of the single reference embedding nearest to the
/// probe across the whole roster, not the first candidate enumerated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestMatcher {
    pub metric: Metric,
}

impl NearestMatcher {
    pub fn new(metric: Metric) -> Self {
        Self { metric }
    }
}

impl Matcher for NearestMatcher {
    fn compare(&self, probe: &Embedding, roster: &[EnrolledIdentity], tolerance: f32) -> MatchResult {
        let mut any_within = false;
        let mut nearest: Option<(usize, f32)> = None;

        for (idx, identity) in roster.iter().enumerate() {
            for reference in &identity.embeddings {
                if reference.dim() != probe.dim() {
                    tracing::debug!(
                        identity = %identity.key,
                        expected = probe.dim(),
                        actual = reference.dim(),
                        "skipping reference embedding with mismatched dimension"
                    );
                    continue;
                }
                let distance = probe.distance(reference, self.metric);
                if distance.is_nan() {
                    continue;
                }
                if distance <= tolerance {
                    any_within = true;
                }
                if nearest.map_or(true, |(_, best)| distance < best) {
                    nearest = Some((idx, distance));
                }
            }
        }

        match nearest {
            Some((idx, distance)) if any_within => MatchResult::Matched {
                identity: roster[idx].key.clone(),
                distance,
            },
            _ => MatchResult::Unmatched,
        }
    }
}
