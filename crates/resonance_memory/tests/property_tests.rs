//! Property-based tests for resonance_memory.
//!
//! Basin dynamics and the ranking pipeline must keep their invariants for
//! any input, not just the hand-picked cases in the unit tests.

use proptest::prelude::*;
use resonance_core::basin::{IMPORTANCE_MAX, IMPORTANCE_MIN, STABILITY_MAX, STABILITY_MIN, STRENGTH_MAX, STRENGTH_MIN};
use resonance_core::config::{BasinConfig, ExtractionConfig, RenderConfig, ScoringConfig};
use resonance_core::{Basin, Fragment, FragmentSource, FragmentType, ReconstructionContext};
use resonance_memory::renderer::estimate_tokens;
use resonance_memory::{BasinRegistry, CompactRenderer, FieldEvolver, PatternExtractor, ResonanceScorer};
use std::collections::HashMap;

const NAMES: [&str; 4] = ["alpha", "beta", "gamma", "delta"];
const TYPES: [FragmentType; 5] = [
    FragmentType::Session,
    FragmentType::Task,
    FragmentType::Entity,
    FragmentType::Decision,
    FragmentType::Episodic,
];

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

fn in_range(b: &Basin) -> bool {
    (STRENGTH_MIN..=STRENGTH_MAX).contains(&b.strength)
        && (STABILITY_MIN..=STABILITY_MAX).contains(&b.stability)
        && (IMPORTANCE_MIN..=IMPORTANCE_MAX).contains(&b.importance)
}

// ============================================================================
// Strategies
// ============================================================================

/// A sequence of (basin index, seed strength) activations. Seeds include
/// out-of-range values on purpose.
fn arb_activations() -> impl Strategy<Value = Vec<(usize, f64)>> {
    prop::collection::vec((0..NAMES.len(), -5.0f64..5.0), 1..40)
}

fn arb_fragment() -> impl Strategy<Value = (usize, f64, f64)> {
    (0..TYPES.len(), 0.0f64..=1.0, 0.0f64..=1.0)
}

fn build_fragments(specs: &[(usize, f64, f64)]) -> Vec<Fragment> {
    let scorer = ResonanceScorer::new(ScoringConfig::default());
    specs
        .iter()
        .enumerate()
        .map(|(i, (t, resonance, strength))| {
            let mut f = Fragment::new(
                format!("f{}", i),
                TYPES[*t],
                FragmentSource::Prefetched,
                format!("fragment number {}", i),
            )
            .with_strength(*strength);
            scorer.apply(&mut f, *resonance);
            f
        })
        .collect()
}

// ============================================================================
// Basin dynamics
// ============================================================================

proptest! {
    #[test]
    fn basins_stay_in_range(activations in arb_activations()) {
        block_on(async {
            let registry = BasinRegistry::in_memory(BasinConfig::default());
            let mut counts: HashMap<String, u64> = HashMap::new();
            for (idx, seed) in &activations {
                let view = registry.activate(NAMES[*idx], "d", &[], *seed).await;
                prop_assert!(in_range(&view.basin));
                let previous = counts.insert(view.basin.name.clone(), view.basin.activation_count).unwrap_or(0);
                prop_assert_eq!(view.basin.activation_count, previous + 1);
            }
            for basin in registry.basins().await.unwrap() {
                prop_assert!(in_range(&basin));
            }
            Ok(())
        })?;
    }

    #[test]
    fn activation_never_strengthens_competitors(activations in arb_activations(), target in 0..NAMES.len()) {
        block_on(async {
            let registry = BasinRegistry::in_memory(BasinConfig::default());
            for (idx, seed) in &activations {
                registry.activate(NAMES[*idx], "d", &[], *seed).await;
            }
            let before: HashMap<String, Basin> = registry
                .basins()
                .await
                .unwrap()
                .into_iter()
                .map(|b| (b.name.clone(), b))
                .collect();

            registry.activate(NAMES[target], "d", &[], 0.5).await;

            for basin in registry.basins().await.unwrap() {
                if basin.name == NAMES[target] {
                    continue;
                }
                let old = &before[&basin.name];
                prop_assert!(basin.strength <= old.strength);
                prop_assert!(basin.strength >= STRENGTH_MIN);
                prop_assert!(basin.importance <= old.importance);
                prop_assert_eq!(basin.activation_count, old.activation_count);
            }
            Ok(())
        })?;
    }
}

// ============================================================================
// Ranking pipeline
// ============================================================================

proptest! {
    #[test]
    fn extraction_respects_caps_and_threshold(specs in prop::collection::vec(arb_fragment(), 0..120)) {
        let config = ScoringConfig::default();
        let ranked = FieldEvolver::new(&config).evolve(&build_fragments(&specs));
        let extractor = PatternExtractor::new(ExtractionConfig::default(), config.activation_threshold);
        let patterns = extractor.extract(&ranked);

        for t in TYPES {
            let bucket = patterns.bucket(t);
            prop_assert!(bucket.len() <= extractor.cap(t));
            prop_assert!(bucket.iter().all(|f| f.activation >= config.activation_threshold));
            prop_assert!(bucket.iter().all(|f| f.fragment_type == t));
        }
    }

    #[test]
    fn ranking_is_sorted_by_rank_key(specs in prop::collection::vec(arb_fragment(), 0..80)) {
        let ranked = FieldEvolver::new(&ScoringConfig::default()).evolve(&build_fragments(&specs));
        prop_assert!(ranked.iter().all(|f| f.activation > 0.0));
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].rank_key() >= pair[1].rank_key());
        }
    }

    #[test]
    fn gated_activation_matches_resonance(resonance in -1.0f64..2.0) {
        let scorer = ResonanceScorer::new(ScoringConfig::default());
        let mut f = Fragment::new("f", FragmentType::Episodic, FragmentSource::Episodic, "x");
        scorer.apply(&mut f, resonance);
        prop_assert!((0.0..=1.0).contains(&f.resonance_score));
        if f.resonance_score >= 0.3 {
            prop_assert_eq!(f.activation, f.resonance_score);
        } else {
            prop_assert_eq!(f.activation, 0.0);
        }
    }

    #[test]
    fn digest_stays_within_budget(specs in prop::collection::vec(arb_fragment(), 0..60), budget in 40usize..400) {
        let config = ScoringConfig::default();
        let ranked = FieldEvolver::new(&config).evolve(&build_fragments(&specs));
        let patterns = PatternExtractor::new(ExtractionConfig::default(), config.activation_threshold).extract(&ranked);
        let renderer = CompactRenderer::new(RenderConfig { max_output_tokens: budget, ..RenderConfig::default() });
        let ctx = ReconstructionContext::new("/home/dev/atlas", "ada", vec![]);

        let digest = renderer.render(&ctx, &patterns, specs.len(), 0.8);
        prop_assert!(estimate_tokens(&digest) <= budget);
        prop_assert!(digest.starts_with("# Project: atlas"));
    }
}
