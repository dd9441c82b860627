//! Probe-vs-gallery comparison.

use crate::types::{Embedding, MatchResult};

/// Default cosine similarity needed to accept a match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.8;

/// Strategy for comparing a probe embedding against enrolled references.
///
/// `names[i]` labels `embeddings[i]`.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        names: &[String],
        embeddings: &[Embedding],
        threshold: f32,
    ) -> MatchResult;
}

/// Brute-force cosine similarity matcher.
///
/// Scans every reference. When several references share the best score the
/// earliest one wins, so ties resolve in enrollment order.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        names: &[String],
        embeddings: &[Embedding],
        threshold: f32,
    ) -> MatchResult {
        // Unlabelled references are ignored.
        let embeddings = &embeddings[..embeddings.len().min(names.len())];
        if embeddings.is_empty() {
            return MatchResult::NoGallery;
        }

        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, reference) in embeddings.iter().enumerate() {
            let sim = probe.similarity(reference);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult::Matched {
                name: names[idx].clone(),
                score: best_sim,
            },
            Some(_) => MatchResult::Unmatched { best_score: best_sim },
            // Every similarity was NaN.
            None => MatchResult::Unmatched { best_score: 0.0 },
        }
    }
}
