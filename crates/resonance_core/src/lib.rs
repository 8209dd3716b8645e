pub mod basin;
pub mod config;
pub mod error;
pub mod fragment;
pub mod records;
pub mod request;

pub use basin::{Basin, BasinSeed};
pub use config::ResonanceConfig;
pub use error::ResonanceError;
pub use fragment::{Fragment, FragmentSource, FragmentType};
pub use records::{EntityRecord, EpisodicRecord, IngestItem, SessionRecord, SessionScope, TaskRecord};
pub use request::{
    FragmentSummary, IngestionResult, MemoryType, ReconstructRequest, ReconstructResponse,
    ReconstructedMemory, ReconstructionContext, RouteRequest, RouteResult,
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config::BasinConfig;

/// Ranked episodic recall, scoped to one identity.
///
/// Implementations return candidates best-first; the scanner derives each
/// fragment's prior strength from its position in the returned list.
#[async_trait]
pub trait EpisodicSource: Send + Sync {
    async fn search_episodes(
        &self,
        query: &str,
        scope_id: &str,
        limit: usize,
    ) -> Result<Vec<EpisodicRecord>>;
}

/// Time-filtered session lookup.
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn recent_sessions(
        &self,
        scope: &SessionScope,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>>;
}

/// Open tasks for a scope. Only consulted when the caller did not prefetch.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn open_tasks(&self, scope_id: &str, limit: usize) -> Result<Vec<TaskRecord>>;
}

#[async_trait]
pub trait EntitySource: Send + Sync {
    async fn related_entities(
        &self,
        query: &str,
        scope_id: &str,
        limit: usize,
    ) -> Result<Vec<EntityRecord>>;
}

/// Storage boundary for the basin registry.
///
/// `activate` must be a single atomic storage operation: create the basin
/// from the seed, or reinforce the existing row, and return the result.
#[async_trait]
pub trait BasinStore: Send + Sync {
    async fn activate(
        &self,
        seed: &BasinSeed,
        dynamics: &BasinConfig,
        now: DateTime<Utc>,
    ) -> Result<Basin>;

    /// Decay every basin except `name`. Returns the number of rows touched.
    async fn decay_others(&self, name: &str, dynamics: &BasinConfig) -> Result<u64>;

    async fn list_basins(&self) -> Result<Vec<Basin>>;
}

/// Where routed content ends up. Returns an identifier for the stored item.
#[async_trait]
pub trait IngestSink: Send + Sync {
    async fn ingest(&self, item: &IngestItem) -> Result<String>;
}
