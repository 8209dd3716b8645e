use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::error::ResonanceError;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResonanceConfig {
    pub scoring: ScoringConfig,
    pub scanner: ScannerConfig,
    pub extraction: ExtractionConfig,
    pub render: RenderConfig,
    pub basin: BasinConfig,
    pub store: StoreConfig,
}

impl ResonanceConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied and the result validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: ResonanceConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Try to load from path; if the file is missing or invalid, return
    /// defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({:#}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                if let Err(e) = cfg.validate() {
                    tracing::warn!("Env overrides produced an invalid config ({}), ignoring them", e);
                    return Self::default();
                }
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RESONANCE_DB_PATH") {
            self.store.db_path = v;
        }
        if let Ok(v) = std::env::var("RESONANCE_MAX_OUTPUT_TOKENS") {
            if let Ok(n) = v.parse() {
                self.render.max_output_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("RESONANCE_ENABLE_ENTITIES") {
            if let Ok(b) = v.parse() {
                self.scanner.enable_entities = b;
            }
        }
        if let Ok(v) = std::env::var("RESONANCE_SESSION_LOOKBACK_HOURS") {
            if let Ok(n) = v.parse() {
                self.scanner.session_lookback_hours = n;
            }
        }
        if let Ok(v) = std::env::var("RESONANCE_ACTIVATION_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.scoring.activation_threshold = n;
            }
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ResonanceError> {
        self.scoring.validate()?;
        self.basin.validate()
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub cue_weight: f64,
    pub context_weight: f64,
    pub network_weight: f64,
    /// Inclusive lower bound for a fragment to carry any activation.
    pub activation_threshold: f64,
    /// Inclusive lower bound for the one-shot excitation boost.
    pub high_resonance_threshold: f64,
    pub excitation_factor: f64,
    /// Number of corroborating peers at which network resonance saturates.
    pub network_saturation: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            cue_weight: 0.5,
            context_weight: 0.3,
            network_weight: 0.2,
            activation_threshold: 0.3,
            high_resonance_threshold: 0.5,
            excitation_factor: 1.3,
            network_saturation: 3,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> std::result::Result<(), ResonanceError> {
        let weights = [self.cue_weight, self.context_weight, self.network_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ResonanceError::Config(
                "scoring weights must be finite and non-negative".into(),
            ));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ResonanceError::Config(format!(
                "scoring weights must sum to 1.0, got {:.4}",
                sum
            )));
        }
        for (name, t) in [
            ("activation_threshold", self.activation_threshold),
            ("high_resonance_threshold", self.high_resonance_threshold),
        ] {
            if !(0.0..=1.0).contains(&t) {
                return Err(ResonanceError::Config(format!("{} must be in [0, 1], got {}", name, t)));
            }
        }
        if self.high_resonance_threshold < self.activation_threshold {
            return Err(ResonanceError::Config(
                "high_resonance_threshold must not be below activation_threshold".into(),
            ));
        }
        if !self.excitation_factor.is_finite() || self.excitation_factor < 1.0 {
            return Err(ResonanceError::Config("excitation_factor must be >= 1.0".into()));
        }
        if self.network_saturation == 0 {
            return Err(ResonanceError::Config("network_saturation must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub episodic_timeout_ms: u64,
    pub session_timeout_ms: u64,
    pub task_timeout_ms: u64,
    pub entity_timeout_ms: u64,
    pub episodic_limit: usize,
    pub session_limit: usize,
    pub task_limit: usize,
    pub entity_limit: usize,
    /// Sessions older than this are not scanned.
    pub session_lookback_hours: i64,
    /// Entity scanning is skipped entirely when false.
    pub enable_entities: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            episodic_timeout_ms: 5_000,
            session_timeout_ms: 3_000,
            task_timeout_ms: 3_000,
            entity_timeout_ms: 5_000,
            episodic_limit: 30,
            session_limit: 20,
            task_limit: 50,
            entity_limit: 40,
            session_lookback_hours: 72,
            enable_entities: true,
        }
    }
}

/// Per-type caps applied after ranking.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_sessions: usize,
    pub max_tasks: usize,
    pub max_entities: usize,
    pub max_decisions: usize,
    pub max_episodic: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            max_tasks: 15,
            max_entities: 20,
            max_decisions: 10,
            max_episodic: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Digest budget, estimated at ~4 characters per token.
    pub max_output_tokens: usize,
    pub sessions_shown: usize,
    pub tasks_shown: usize,
    pub entities_shown: usize,
    pub decisions_shown: usize,
    pub episodic_shown: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: 4000,
            sessions_shown: 3,
            tasks_shown: 5,
            entities_shown: 5,
            decisions_shown: 5,
            episodic_shown: 5,
        }
    }
}

/// Reinforcement and decay deltas for basin activation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BasinConfig {
    pub strength_gain: f64,
    pub stability_gain: f64,
    pub importance_gain: f64,
    pub strength_decay: f64,
    pub importance_decay: f64,
    pub initial_stability: f64,
    pub initial_importance: f64,
    /// Seed strength for basins created by content routing.
    pub route_seed_strength: f64,
}

impl BasinConfig {
    pub fn validate(&self) -> std::result::Result<(), ResonanceError> {
        let deltas = [
            ("strength_gain", self.strength_gain),
            ("stability_gain", self.stability_gain),
            ("importance_gain", self.importance_gain),
            ("strength_decay", self.strength_decay),
            ("importance_decay", self.importance_decay),
        ];
        for (name, d) in deltas {
            if !d.is_finite() || d < 0.0 {
                return Err(ResonanceError::Config(format!("basin {} must be non-negative", name)));
            }
        }
        Ok(())
    }
}

impl Default for BasinConfig {
    fn default() -> Self {
        Self {
            strength_gain: 0.05,
            stability_gain: 0.02,
            importance_gain: 0.03,
            strength_decay: 0.01,
            importance_decay: 0.01,
            initial_stability: 0.5,
            initial_importance: 0.5,
            route_seed_strength: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "resonance.db".to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ResonanceConfig::default();
        assert_eq!(cfg.scoring.activation_threshold, 0.3);
        assert_eq!(cfg.scoring.high_resonance_threshold, 0.5);
        assert_eq!(cfg.extraction.max_tasks, 15);
        assert_eq!(cfg.render.max_output_tokens, 4000);
        assert_eq!(cfg.scanner.session_lookback_hours, 72);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[extraction]
max_tasks = 7
"#;
        let cfg: ResonanceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.extraction.max_tasks, 7);
        // Defaults for unspecified fields
        assert_eq!(cfg.extraction.max_entities, 20);
        assert_eq!(cfg.scoring.cue_weight, 0.5);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[scoring]
cue_weight = 0.6
context_weight = 0.2
network_weight = 0.2
activation_threshold = 0.25
high_resonance_threshold = 0.6
excitation_factor = 1.5
network_saturation = 2

[scanner]
episodic_timeout_ms = 100
enable_entities = false
session_lookback_hours = 24

[render]
max_output_tokens = 500

[basin]
strength_gain = 0.1

[store]
db_path = "data/resonance.db"
"#;
        let cfg: ResonanceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.scoring.cue_weight, 0.6);
        assert_eq!(cfg.scoring.network_saturation, 2);
        assert_eq!(cfg.scanner.episodic_timeout_ms, 100);
        assert!(!cfg.scanner.enable_entities);
        assert_eq!(cfg.render.max_output_tokens, 500);
        assert_eq!(cfg.basin.strength_gain, 0.1);
        assert_eq!(cfg.basin.stability_gain, 0.02);
        assert_eq!(cfg.store.db_path, "data/resonance.db");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let mut cfg = ResonanceConfig::default();
        cfg.scoring.cue_weight = 0.9;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut cfg = ResonanceConfig::default();
        cfg.scoring.high_resonance_threshold = 0.2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_decay() {
        let mut cfg = ResonanceConfig::default();
        cfg.basin.strength_decay = -0.01;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("strength_decay"));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("resonance_cfg_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[render]\nmax_output_tokens = 1234\n").unwrap();
        let cfg = ResonanceConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.render.max_output_tokens, 1234);
    }

    #[test]
    fn test_env_overrides_and_defaults() {
        // Part 1: env overrides
        std::env::set_var("RESONANCE_DB_PATH", "/tmp/override.db");
        std::env::set_var("RESONANCE_ENABLE_ENTITIES", "false");

        let mut cfg = ResonanceConfig::default();
        cfg.apply_env_overrides();

        assert_eq!(cfg.store.db_path, "/tmp/override.db");
        assert!(!cfg.scanner.enable_entities);

        // Clean up env vars before testing defaults
        std::env::remove_var("RESONANCE_DB_PATH");
        std::env::remove_var("RESONANCE_ENABLE_ENTITIES");

        // Part 2: nonexistent path returns defaults (no env interference)
        let cfg = ResonanceConfig::load_or_default("/nonexistent/path.toml");
        assert_eq!(cfg.store.db_path, "resonance.db");
        assert!(cfg.scanner.enable_entities);
    }
}
