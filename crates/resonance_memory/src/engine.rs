//! Reconstruction pipeline
//!
//! scan -> score -> excite and rank -> extract -> gap fill -> validate ->
//! render. Source failures are folded into `warnings`; a call always
//! produces a response.

use std::sync::Arc;
use std::time::Instant;

use resonance_core::{
    FragmentSummary, ReconstructRequest, ReconstructResponse, ReconstructedMemory, ReconstructionContext,
    ResonanceConfig,
};
use serde_json::Value;

use crate::coherence::{CoherenceValidator, GapFiller, NoGapFiller, PlaceholderCoherence};
use crate::evolver::FieldEvolver;
use crate::extractor::{ExtractedPatterns, PatternExtractor};
use crate::renderer::CompactRenderer;
use crate::scanner::FragmentScanner;
use crate::scorer::ResonanceScorer;
use crate::sqlite::SqliteStore;

pub struct ReconstructionEngine {
    scanner: FragmentScanner,
    scorer: ResonanceScorer,
    evolver: FieldEvolver,
    extractor: PatternExtractor,
    renderer: CompactRenderer,
    gap_filler: Box<dyn GapFiller>,
    validator: Box<dyn CoherenceValidator>,
}

impl ReconstructionEngine {
    pub fn new(scanner: FragmentScanner, config: &ResonanceConfig) -> Self {
        Self {
            scanner,
            scorer: ResonanceScorer::new(config.scoring.clone()),
            evolver: FieldEvolver::new(&config.scoring),
            extractor: PatternExtractor::new(config.extraction.clone(), config.scoring.activation_threshold),
            renderer: CompactRenderer::new(config.render.clone()),
            gap_filler: Box::new(NoGapFiller),
            validator: Box::new(PlaceholderCoherence),
        }
    }

    pub fn from_store(store: Arc<SqliteStore>, config: &ResonanceConfig) -> Self {
        Self::new(FragmentScanner::from_store(store, config.scanner.clone()), config)
    }

    pub fn with_gap_filler(mut self, gap_filler: Box<dyn GapFiller>) -> Self {
        self.gap_filler = gap_filler;
        self
    }

    pub fn with_validator(mut self, validator: Box<dyn CoherenceValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub async fn reconstruct(&self, request: &ReconstructRequest) -> ReconstructResponse {
        let ctx = request.context();
        let memory = self
            .reconstruct_context(&ctx, request.prefetched_tasks.as_deref())
            .await;
        ReconstructResponse { success: true, memory }
    }

    pub async fn reconstruct_context(
        &self,
        ctx: &ReconstructionContext,
        prefetched_tasks: Option<&[Value]>,
    ) -> ReconstructedMemory {
        let started = Instant::now();

        let scan = self.scanner.scan(ctx, prefetched_tasks).await;
        let warnings = scan.warnings();
        let fragment_count = scan.fragments.len();

        let scored = self.scorer.score_all(scan.fragments, ctx);
        let ranked = self.evolver.evolve(&scored);
        let patterns = self.extractor.extract(&ranked);

        let gap_fills = self.gap_filler.fill(&patterns, ctx);
        let coherence_score = self.validator.coherence(&patterns).clamp(0.0, 1.0);
        let digest = self.renderer.render(ctx, &patterns, fragment_count, coherence_score);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Reconstructed {}: {} fragments scanned, {} extracted, {} warnings in {}ms",
            ctx.project_name(),
            fragment_count,
            patterns.total(),
            warnings.len(),
            elapsed_ms
        );

        let ExtractedPatterns {
            sessions,
            tasks,
            entities,
            decisions,
            episodic,
        } = patterns;
        ReconstructedMemory {
            recent_sessions: sessions.iter().map(FragmentSummary::from).collect(),
            active_tasks: tasks.iter().map(FragmentSummary::from).collect(),
            key_entities: entities.iter().map(FragmentSummary::from).collect(),
            recent_decisions: decisions.iter().map(FragmentSummary::from).collect(),
            episodic_memories: episodic.iter().map(FragmentSummary::from).collect(),
            coherence_score,
            fragment_count,
            gap_fills,
            warnings,
            reconstruction_time_ms: elapsed_ms,
            digest,
        }
    }
}
