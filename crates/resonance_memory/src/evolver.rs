//! Field evolution: a single excitation pass followed by a global ranking.
//!
//! There is no iterative diffusion here. High-resonance fragments get one
//! multiplicative boost and everything is sorted once.

use std::cmp::Ordering;

use resonance_core::config::ScoringConfig;
use resonance_core::Fragment;

#[derive(Debug, Clone)]
pub struct FieldEvolver {
    high_resonance_threshold: f64,
    excitation_factor: f64,
}

impl FieldEvolver {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            high_resonance_threshold: config.high_resonance_threshold,
            excitation_factor: config.excitation_factor,
        }
    }

    /// Return a copy of `fragments` with `activation *= excitation_factor`
    /// applied to every fragment at or above the high-resonance threshold.
    pub fn excite(&self, fragments: &[Fragment]) -> Vec<Fragment> {
        fragments
            .iter()
            .map(|f| {
                let mut excited = f.clone();
                if excited.resonance_score >= self.high_resonance_threshold {
                    excited.activation *= self.excitation_factor;
                }
                excited
            })
            .collect()
    }

    /// Drop fragments with no activation and sort the rest by
    /// `activation * strength`, then `resonance_score`, both descending.
    /// The sort is stable, so remaining ties keep source order.
    pub fn rank(fragments: Vec<Fragment>) -> Vec<Fragment> {
        let mut ranked: Vec<Fragment> = fragments.into_iter().filter(|f| f.activation > 0.0).collect();
        ranked.sort_by(rank_order);
        ranked
    }

    pub fn evolve(&self, fragments: &[Fragment]) -> Vec<Fragment> {
        Self::rank(self.excite(fragments))
    }
}

fn rank_order(a: &Fragment, b: &Fragment) -> Ordering {
    b.rank_key()
        .total_cmp(&a.rank_key())
        .then_with(|| b.resonance_score.total_cmp(&a.resonance_score))
}
