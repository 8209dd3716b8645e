//! Basins - named thematic clusters with Hebbian reinforcement and decay.
//!
//! A basin is created the first time its name is activated, reinforced on
//! every later activation, and weakened whenever a different basin wins.
//! All scalar fields stay inside fixed ranges no matter how long the
//! sequence of activations runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::BasinConfig;

pub const STRENGTH_MIN: f64 = 0.1;
pub const STRENGTH_MAX: f64 = 2.0;
pub const STABILITY_MIN: f64 = 0.1;
pub const STABILITY_MAX: f64 = 1.0;
pub const IMPORTANCE_MIN: f64 = 0.1;
pub const IMPORTANCE_MAX: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basin {
    pub name: String,
    pub description: String,
    pub concepts: BTreeSet<String>,
    /// [0.1, 2.0]
    pub strength: f64,
    /// [0.1, 1.0]
    pub stability: f64,
    /// [0.1, 1.0]
    pub importance: f64,
    pub activation_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activated_at: DateTime<Utc>,
}

/// Values used when a basin is activated for the first time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasinSeed {
    pub name: String,
    pub description: String,
    pub concepts: Vec<String>,
    pub strength: f64,
}

impl BasinSeed {
    pub fn new(name: impl Into<String>, description: impl Into<String>, strength: f64) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            concepts: Vec::new(),
            strength,
        }
    }

    pub fn with_concepts<I, S>(mut self, concepts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.concepts = concepts.into_iter().map(Into::into).collect();
        self
    }
}

impl Basin {
    /// Build a freshly created basin (`activation_count == 1`).
    pub fn from_seed(seed: &BasinSeed, dynamics: &BasinConfig, now: DateTime<Utc>) -> Self {
        let mut basin = Self {
            name: seed.name.clone(),
            description: seed.description.clone(),
            concepts: seed.concepts.iter().cloned().collect(),
            strength: seed.strength,
            stability: dynamics.initial_stability,
            importance: dynamics.initial_importance,
            activation_count: 1,
            created_at: now,
            last_activated_at: now,
        };
        basin.sanitize();
        basin
    }

    /// Apply one reinforcement step (the ON MATCH branch).
    pub fn reinforce(&mut self, dynamics: &BasinConfig, now: DateTime<Utc>) {
        self.strength += dynamics.strength_gain;
        self.stability += dynamics.stability_gain;
        self.importance += dynamics.importance_gain;
        self.activation_count = self.activation_count.saturating_add(1);
        self.last_activated_at = now;
        self.sanitize();
    }

    /// Passive decay applied when another basin is activated.
    pub fn decay(&mut self, dynamics: &BasinConfig) {
        self.strength -= dynamics.strength_decay;
        self.importance -= dynamics.importance_decay;
        self.sanitize();
    }

    /// Clamp every scalar back into range, replacing non-finite values with
    /// the lower bound.
    pub fn sanitize(&mut self) {
        self.strength = clamp_finite(self.strength, STRENGTH_MIN, STRENGTH_MAX);
        self.stability = clamp_finite(self.stability, STABILITY_MIN, STABILITY_MAX);
        self.importance = clamp_finite(self.importance, IMPORTANCE_MIN, IMPORTANCE_MAX);
    }

    /// One-line summary handed back to ingestion callers.
    pub fn context_line(&self) -> String {
        let concepts = if self.concepts.is_empty() {
            String::from("-")
        } else {
            self.concepts.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        format!(
            "{} ({}): strength {:.2}, stability {:.2}, importance {:.2}, activations {}; concepts: {}",
            self.name,
            self.description,
            self.strength,
            self.stability,
            self.importance,
            self.activation_count,
            concepts
        )
    }
}

fn clamp_finite(value: f64, min: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        min
    }
}
