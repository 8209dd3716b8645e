//! Hooks for repairing and validating a reconstruction.
//!
//! Both are placeholders for now: the gap filler adds nothing and the
//! validator reports a constant score. They exist so a real content check
//! can be swapped in without touching the engine.

use resonance_core::ReconstructionContext;

use crate::extractor::ExtractedPatterns;

/// Score reported until a real validator exists.
pub const PLACEHOLDER_COHERENCE: f64 = 0.8;

pub trait GapFiller: Send + Sync {
    /// Describe any segments synthesized to cover missing memory.
    fn fill(&self, patterns: &ExtractedPatterns, ctx: &ReconstructionContext) -> Vec<String>;
}

pub trait CoherenceValidator: Send + Sync {
    /// Coherence of the extracted groups, in [0, 1].
    fn coherence(&self, patterns: &ExtractedPatterns) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoGapFiller;

impl GapFiller for NoGapFiller {
    fn fill(&self, _patterns: &ExtractedPatterns, _ctx: &ReconstructionContext) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderCoherence;

impl CoherenceValidator for PlaceholderCoherence {
    fn coherence(&self, _patterns: &ExtractedPatterns) -> f64 {
        PLACEHOLDER_COHERENCE
    }
}
