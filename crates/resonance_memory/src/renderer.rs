//! Compact digest rendering
//!
//! Sections are emitted in a fixed order. A section is either rendered whole
//! or, once it would overflow the token budget, dropped together with every
//! section after it.

use resonance_core::config::RenderConfig;
use resonance_core::{Fragment, ReconstructionContext};

use crate::extractor::ExtractedPatterns;

/// Rough token estimate (~4 characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[derive(Debug, Clone)]
pub struct CompactRenderer {
    config: RenderConfig,
}

impl CompactRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Project summary header; always the first thing in the digest.
    pub fn header(&self, ctx: &ReconstructionContext, fragment_count: usize, coherence: f64) -> String {
        format!(
            "# Project: {}\nidentity: {} | fragments: {} | coherence: {:.2}\n",
            ctx.project_name(),
            ctx.identity_name,
            fragment_count,
            coherence
        )
    }

    pub fn render(
        &self,
        ctx: &ReconstructionContext,
        patterns: &ExtractedPatterns,
        fragment_count: usize,
        coherence: f64,
    ) -> String {
        let budget = self.config.max_output_tokens;
        let mut digest = self.header(ctx, fragment_count, coherence);

        if estimate_tokens(&digest) > budget {
            return digest.chars().take(budget.saturating_mul(4)).collect();
        }

        let sections: [(&str, &[Fragment], usize); 5] = [
            ("Recent Sessions", &patterns.sessions, self.config.sessions_shown),
            ("Active Tasks", &patterns.tasks, self.config.tasks_shown),
            ("Key Entities", &patterns.entities, self.config.entities_shown),
            ("Recent Decisions", &patterns.decisions, self.config.decisions_shown),
            ("Episodic Memories", &patterns.episodic, self.config.episodic_shown),
        ];

        for (index, (title, fragments, shown)) in sections.iter().enumerate() {
            if fragments.is_empty() || *shown == 0 {
                continue;
            }
            let block = render_section(title, &fragments[..fragments.len().min(*shown)]);
            if estimate_tokens(&digest) + estimate_tokens(&block) > budget {
                tracing::debug!(
                    "Digest budget of {} tokens reached, omitting {} and later sections",
                    budget,
                    sections[index].0
                );
                break;
            }
            digest.push_str(&block);
        }

        digest
    }
}

fn render_section(title: &str, fragments: &[Fragment]) -> String {
    let mut block = format!("\n## {}\n", title);
    for f in fragments {
        block.push_str(&format!("- [{:.2}] {}\n", f.resonance_score, f.summary));
    }
    block
}
