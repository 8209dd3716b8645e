//! Resonance scoring
//!
//! `resonance = w_cue * cue + w_ctx * context + w_net * network`, each term in
//! [0, 1]. Scores below the activation threshold are kept for diagnostics but
//! carry zero activation.
//!
//! Network resonance needs the whole batch: a fragment is corroborated by
//! connected peers whose cue + context score alone already clears the
//! activation threshold.

use std::collections::{BTreeSet, HashSet};

use resonance_core::config::ScoringConfig;
use resonance_core::{Fragment, ReconstructionContext};

/// Lowercased alphanumeric words of at least two characters.
///
/// Scripts written without spaces (Han, kana, Hangul) are split into
/// overlapping two-character chunks; a lone ideograph is kept as is.
pub fn terms(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let mut plain = String::new();
        let mut dense: Vec<char> = Vec::new();
        for c in word.chars() {
            if is_unspaced_script(c) {
                push_plain(&mut plain, &mut out);
                dense.push(c);
            } else {
                push_dense(&mut dense, &mut out);
                plain.push(c);
            }
        }
        push_plain(&mut plain, &mut out);
        push_dense(&mut dense, &mut out);
    }
    out
}

fn push_plain(plain: &mut String, out: &mut BTreeSet<String>) {
    if plain.chars().count() >= 2 {
        out.insert(plain.to_lowercase());
    }
    plain.clear();
}

fn push_dense(dense: &mut Vec<char>, out: &mut BTreeSet<String>) {
    match dense.len() {
        0 => {}
        1 => {
            out.insert(dense[0].to_string());
        }
        _ => {
            for pair in dense.windows(2) {
                out.insert(pair.iter().collect());
            }
        }
    }
    dense.clear();
}

fn is_unspaced_script(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x30FF      // hiragana, katakana
            | 0x3400..=0x4DBF // CJK extension A
            | 0x4E00..=0x9FFF // CJK unified
            | 0xAC00..=0xD7AF // hangul syllables
            | 0xF900..=0xFAFF // CJK compatibility
            | 0x20000..=0x2A6DF
    )
}

#[derive(Debug, Clone)]
pub struct ResonanceScorer {
    config: ScoringConfig,
}

impl ResonanceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Fraction of cues whose every term appears in the fragment text.
    pub fn cue_resonance(&self, fragment: &Fragment, ctx: &ReconstructionContext) -> f64 {
        let text_terms = terms(&fragment.searchable_text());
        fraction_matched(ctx.cues.iter().map(String::as_str), &text_terms)
    }

    /// Fraction of context markers (project, identity, device, session)
    /// present in the fragment text or its metadata.
    pub fn context_resonance(&self, fragment: &Fragment, ctx: &ReconstructionContext) -> f64 {
        let mut text = fragment.searchable_text();
        if !fragment.metadata.is_null() {
            text.push(' ');
            text.push_str(&fragment.metadata.to_string().to_lowercase());
        }
        let text_terms = terms(&text);
        let markers = ctx.context_markers();
        fraction_matched(markers.iter().map(String::as_str), &text_terms)
    }

    /// Connectivity to corroborating peers, saturating at
    /// `network_saturation` peers.
    pub fn network_resonance(&self, fragment: &Fragment, peers: &[Fragment], corroborating: &HashSet<&str>) -> f64 {
        let linked = peers
            .iter()
            .filter(|p| p.id != fragment.id && corroborating.contains(p.id.as_str()))
            .filter(|p| fragment.connections.contains(&p.id) || p.connections.contains(&fragment.id))
            .count();
        (linked as f64 / self.config.network_saturation.max(1) as f64).min(1.0)
    }

    /// Cue and context contribution without the network term.
    fn local_score(&self, fragment: &Fragment, ctx: &ReconstructionContext) -> f64 {
        self.config.cue_weight * self.cue_resonance(fragment, ctx)
            + self.config.context_weight * self.context_resonance(fragment, ctx)
    }

    fn corroborating<'a>(&self, fragments: &'a [Fragment], ctx: &ReconstructionContext) -> HashSet<&'a str> {
        fragments
            .iter()
            .filter(|f| self.local_score(f, ctx) >= self.config.activation_threshold)
            .map(|f| f.id.as_str())
            .collect()
    }

    /// Resonance of one fragment within its batch.
    pub fn score(&self, fragment: &Fragment, ctx: &ReconstructionContext, peers: &[Fragment]) -> f64 {
        let corroborating = self.corroborating(peers, ctx);
        let network = self.network_resonance(fragment, peers, &corroborating);
        clamp_unit(self.local_score(fragment, ctx) + self.config.network_weight * network)
    }

    /// Activation for a given resonance: the score itself at or above the
    /// threshold, zero below it.
    pub fn gate(&self, resonance: f64) -> f64 {
        if resonance >= self.config.activation_threshold {
            resonance
        } else {
            0.0
        }
    }

    /// Set `resonance_score` and gated `activation` on a fragment.
    pub fn apply(&self, fragment: &mut Fragment, resonance: f64) {
        fragment.resonance_score = clamp_unit(resonance);
        fragment.activation = self.gate(fragment.resonance_score);
    }

    /// Score a whole batch, returning the scored fragments in input order.
    pub fn score_all(&self, fragments: Vec<Fragment>, ctx: &ReconstructionContext) -> Vec<Fragment> {
        let local: Vec<f64> = fragments.iter().map(|f| self.local_score(f, ctx)).collect();
        let corroborating: HashSet<&str> = fragments
            .iter()
            .zip(&local)
            .filter(|(_, s)| **s >= self.config.activation_threshold)
            .map(|(f, _)| f.id.as_str())
            .collect();

        let scores: Vec<f64> = fragments
            .iter()
            .zip(&local)
            .map(|(f, l)| l + self.config.network_weight * self.network_resonance(f, &fragments, &corroborating))
            .collect();

        let gated = fragments
            .into_iter()
            .zip(scores)
            .map(|(mut f, s)| {
                self.apply(&mut f, s);
                f
            })
            .collect::<Vec<_>>();

        tracing::trace!(
            "Scored {} fragments, {} above activation threshold",
            gated.len(),
            gated.iter().filter(|f| f.activation > 0.0).count()
        );
        gated
    }
}

fn fraction_matched<'a>(needles: impl Iterator<Item = &'a str>, haystack: &BTreeSet<String>) -> f64 {
    let mut considered = 0usize;
    let mut matched = 0usize;
    for needle in needles {
        if !needle.chars().any(char::is_alphanumeric) {
            continue;
        }
        // A needle too short to yield terms still counts, as a miss
        considered += 1;
        let needle_terms = terms(needle);
        if !needle_terms.is_empty() && needle_terms.is_subset(haystack) {
            matched += 1;
        }
    }
    if considered == 0 {
        0.0
    } else {
        matched as f64 / considered as f64
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
