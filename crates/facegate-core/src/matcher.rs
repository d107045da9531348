//! Nearest-template matching.

use crate::store::TemplateSet;
use crate::template::Template;

/// Best match of a probe against the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    /// Index of the identity owning the closest template.
    pub identity_index: u32,
    /// Raw mean absolute difference of the closest template (0–255).
    pub score: f32,
    /// `100 - score`, clamped to `[0, 100]`.
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome {
    /// The store holds no templates; nothing was compared.
    Untrained,
    Best(BestMatch),
}

/// Strategy for comparing a probe template against the enrolled gallery.
///
/// Implementations are threshold-agnostic: they always report the closest
/// identity, however weak, and leave the accept decision to the caller.
pub trait Matcher {
    fn best_match(&self, probe: &Template, gallery: &TemplateSet) -> MatchOutcome;
}

pub fn confidence_from_score(score: f32) -> f32 {
    (100.0 - score).clamp(0.0, 100.0)
}

/// Mean absolute pixel difference nearest-neighbor matcher.
///
/// Scans every template in the gallery's stable order; on equal scores the
/// first template seen wins.
pub struct PixelDiffMatcher;

impl Matcher for PixelDiffMatcher {
    fn best_match(&self, probe: &Template, gallery: &TemplateSet) -> MatchOutcome {
        let mut best: Option<(u32, f32)> = None;

        for (index, template) in gallery.templates() {
            let score = probe.mean_abs_diff(template);
            match best {
                Some((_, best_score)) if score >= best_score => {}
                _ => best = Some((index, score)),
            }
        }

        match best {
            None => MatchOutcome::Untrained,
            Some((identity_index, score)) => MatchOutcome::Best(BestMatch {
                identity_index,
                score,
                confidence: confidence_from_score(score),
            }),
        }
    }
}
