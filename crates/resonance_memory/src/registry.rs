//! Basin Registry - competitive reinforcement over named thematic clusters
//!
//! Activating a basin reinforces it (or creates it from a seed) and then
//! decays every other basin. Repeated activation of one theme therefore both
//! strengthens it and starves its competitors.
//!
//! The per-basin read-modify-write happens inside the store as one atomic
//! operation. The decay pass is a separate best-effort bulk update.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use resonance_core::config::BasinConfig;
use resonance_core::{Basin, BasinSeed, BasinStore, ResonanceError};

/// What an activation call hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct BasinView {
    pub basin: Basin,
    /// Built from the seed because the store could not be reached.
    pub degraded: bool,
    /// Number of other basins the decay pass touched.
    pub decayed: u64,
    pub warnings: Vec<String>,
}

pub struct BasinRegistry {
    store: Arc<dyn BasinStore>,
    config: BasinConfig,
}

impl BasinRegistry {
    pub fn new(store: Arc<dyn BasinStore>, config: BasinConfig) -> Self {
        Self { store, config }
    }

    /// Registry backed by a process-local store (no persistence).
    pub fn in_memory(config: BasinConfig) -> Self {
        Self::new(Arc::new(InMemoryBasinStore::new()), config)
    }

    pub fn config(&self) -> &BasinConfig {
        &self.config
    }

    pub async fn activate(
        &self,
        name: &str,
        seed_description: &str,
        seed_concepts: &[String],
        seed_strength: f64,
    ) -> BasinView {
        let seed = BasinSeed::new(name, seed_description, seed_strength)
            .with_concepts(seed_concepts.iter().cloned());
        self.activate_seed(&seed).await
    }

    /// Reinforce-or-create `seed.name`, then decay every other basin.
    ///
    /// Never fails: a store outage yields a degraded view built from the
    /// seed, and the decay pass is skipped.
    pub async fn activate_seed(&self, seed: &BasinSeed) -> BasinView {
        let now = Utc::now();

        let basin = match self.store.activate(seed, &self.config, now).await {
            Ok(basin) => basin,
            Err(e) => {
                let err = ResonanceError::RegistryUnavailable(format!("{:#}", e));
                tracing::warn!("Basin '{}' activation degraded: {}", seed.name, err);
                return BasinView {
                    basin: Basin::from_seed(seed, &self.config, now),
                    degraded: true,
                    decayed: 0,
                    warnings: vec![err.to_string()],
                };
            }
        };

        let mut warnings = Vec::new();
        let decayed = match self.store.decay_others(&basin.name, &self.config).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("Decay pass after activating '{}' failed: {:#}", basin.name, e);
                warnings.push(format!("basin decay skipped: {:#}", e));
                0
            }
        };

        tracing::debug!(
            "Basin '{}' activated (count={}, strength={:.2}), {} others decayed",
            basin.name,
            basin.activation_count,
            basin.strength,
            decayed
        );

        BasinView {
            basin,
            degraded: false,
            decayed,
            warnings,
        }
    }

    /// All basins, strongest first.
    pub async fn basins(&self) -> Result<Vec<Basin>> {
        self.store.list_basins().await
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local basin store. Each operation holds the write lock for the
/// whole read-modify-write and never awaits while holding it.
#[derive(Default)]
pub struct InMemoryBasinStore {
    basins: RwLock<HashMap<String, Basin>>,
}

impl InMemoryBasinStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<Basin> {
        self.basins.read().await.get(name).cloned()
    }

    /// Insert a basin as-is (scalars are sanitized on the way in).
    pub async fn insert(&self, mut basin: Basin) {
        basin.sanitize();
        self.basins.write().await.insert(basin.name.clone(), basin);
    }
}

#[async_trait]
impl BasinStore for InMemoryBasinStore {
    async fn activate(
        &self,
        seed: &BasinSeed,
        dynamics: &BasinConfig,
        now: DateTime<Utc>,
    ) -> Result<Basin> {
        let mut basins = self.basins.write().await;
        let basin = basins
            .entry(seed.name.clone())
            .and_modify(|b| b.reinforce(dynamics, now))
            .or_insert_with(|| Basin::from_seed(seed, dynamics, now));
        Ok(basin.clone())
    }

    async fn decay_others(&self, name: &str, dynamics: &BasinConfig) -> Result<u64> {
        let mut basins = self.basins.write().await;
        let mut touched = 0;
        for basin in basins.values_mut().filter(|b| b.name != name) {
            basin.decay(dynamics);
            touched += 1;
        }
        Ok(touched)
    }

    async fn list_basins(&self) -> Result<Vec<Basin>> {
        let mut all: Vec<Basin> = self.basins.read().await.values().cloned().collect();
        all.sort_by(|a, b| {
            b.strength
                .total_cmp(&a.strength)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DownStore;

    #[async_trait]
    impl BasinStore for DownStore {
        async fn activate(&self, _: &BasinSeed, _: &BasinConfig, _: DateTime<Utc>) -> Result<Basin> {
            anyhow::bail!("connection refused")
        }
        async fn decay_others(&self, _: &str, _: &BasinConfig) -> Result<u64> {
            anyhow::bail!("connection refused")
        }
        async fn list_basins(&self) -> Result<Vec<Basin>> {
            anyhow::bail!("connection refused")
        }
    }

    /// Activation succeeds but the bulk decay does not.
    struct NoDecayStore(InMemoryBasinStore);

    #[async_trait]
    impl BasinStore for NoDecayStore {
        async fn activate(&self, s: &BasinSeed, d: &BasinConfig, now: DateTime<Utc>) -> Result<Basin> {
            self.0.activate(s, d, now).await
        }
        async fn decay_others(&self, _: &str, _: &BasinConfig) -> Result<u64> {
            anyhow::bail!("bulk update timed out")
        }
        async fn list_basins(&self) -> Result<Vec<Basin>> {
            self.0.list_basins().await
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[tokio::test]
    async fn test_fresh_activation_uses_seed() {
        let registry = BasinRegistry::in_memory(BasinConfig::default());
        let view = registry.activate("alpha", "first theme", &[], 0.5).await;
        assert!(!view.degraded);
        assert_eq!(view.basin.activation_count, 1);
        assert!(approx(view.basin.strength, 0.5));
        assert_eq!(view.decayed, 0);
    }

    #[tokio::test]
    async fn test_reactivation_reinforces_and_decays_others() {
        let store = Arc::new(InMemoryBasinStore::new());
        let registry = BasinRegistry::new(store.clone(), BasinConfig::default());

        registry.activate("alpha", "a", &[], 0.5).await;
        registry.activate("beta", "b", &[], 0.6).await;
        // beta's creation decayed alpha once: 0.5 -> 0.49
        let alpha_before = store.get("alpha").await.unwrap();
        assert!(approx(alpha_before.strength, 0.49));

        let view = registry.activate("alpha", "a", &[], 0.5).await;
        assert!(approx(view.basin.strength, 0.54));
        assert!(approx(view.basin.stability, alpha_before.stability + 0.02));
        assert!(approx(view.basin.importance, alpha_before.importance + 0.03));
        assert_eq!(view.basin.activation_count, 2);
        assert_eq!(view.decayed, 1);

        let beta = store.get("beta").await.unwrap();
        assert!(approx(beta.strength, 0.59));
    }

    #[tokio::test]
    async fn test_reactivation_against_existing_basins() {
        let config = BasinConfig::default();
        let store = Arc::new(InMemoryBasinStore::new());
        let now = Utc::now();
        store.insert(Basin::from_seed(&BasinSeed::new("alpha", "a", 0.5), &config, now)).await;
        store.insert(Basin::from_seed(&BasinSeed::new("beta", "b", 0.6), &config, now)).await;
        let registry = BasinRegistry::new(store.clone(), config);

        let view = registry.activate("alpha", "a", &[], 0.5).await;
        assert!(approx(view.basin.strength, 0.55));
        assert!(approx(view.basin.stability, 0.52));
        assert_eq!(view.basin.activation_count, 2);

        let beta = store.get("beta").await.unwrap();
        assert!(approx(beta.strength, 0.59));
        assert!(approx(beta.importance, 0.49));
        assert_eq!(beta.activation_count, 1);
    }

    #[tokio::test]
    async fn test_store_outage_returns_degraded_seed_view() {
        let registry = BasinRegistry::new(Arc::new(DownStore), BasinConfig::default());
        let concepts = vec!["rust".to_string()];
        let view = registry.activate("alpha", "desc", &concepts, 0.7).await;
        assert!(view.degraded);
        assert_eq!(view.basin.name, "alpha");
        assert!(approx(view.basin.strength, 0.7));
        assert_eq!(view.basin.activation_count, 1);
        assert!(view.basin.concepts.contains("rust"));
        assert_eq!(view.decayed, 0);
        assert_eq!(view.warnings.len(), 1);
        assert!(view.warnings[0].starts_with("basin registry unavailable"));
    }

    #[tokio::test]
    async fn test_decay_failure_is_a_warning_not_an_error() {
        let registry = BasinRegistry::new(
            Arc::new(NoDecayStore(InMemoryBasinStore::new())),
            BasinConfig::default(),
        );
        let view = registry.activate("alpha", "a", &[], 0.5).await;
        assert!(!view.degraded);
        assert_eq!(view.basin.activation_count, 1);
        assert_eq!(view.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_activations_do_not_lose_updates() {
        let registry = Arc::new(BasinRegistry::in_memory(BasinConfig::default()));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let r = registry.clone();
            handles.push(tokio::spawn(async move {
                r.activate("shared", "hot theme", &[], 0.5).await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let basins = registry.basins().await.unwrap();
        assert_eq!(basins.len(), 1);
        assert_eq!(basins[0].activation_count, 32);
        assert!(approx(basins[0].strength, 2.0));
    }

    #[tokio::test]
    async fn test_list_orders_by_strength() {
        let registry = BasinRegistry::in_memory(BasinConfig::default());
        registry.activate("weak", "w", &[], 0.2).await;
        registry.activate("strong", "s", &[], 1.5).await;
        registry.activate("mid", "m", &[], 0.8).await;
        let names: Vec<String> = registry.basins().await.unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["strong", "mid", "weak"]);
    }
}
