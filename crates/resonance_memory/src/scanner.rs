//! Parallel fragment scan
//!
//! Every configured source is queried concurrently under its own timeout.
//! A failing source contributes nothing but a recorded failure; the scan
//! itself never fails.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use resonance_core::config::ScannerConfig;
use resonance_core::{
    EntityRecord, EntitySource, EpisodicRecord, EpisodicSource, Fragment, FragmentSource, FragmentType,
    ReconstructionContext, ResonanceError, SessionRecord, SessionScope, SessionSource, TaskRecord, TaskSource,
};
use serde_json::{json, Value};

use crate::scorer::terms;
use crate::sqlite::SqliteStore;

/// Result of one scan: fragments from every healthy source, plus one entry
/// per source (or prefetched entry) that could not be used.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub fragments: Vec<Fragment>,
    pub failures: Vec<ResonanceError>,
}

impl ScanOutcome {
    pub fn warnings(&self) -> Vec<String> {
        self.failures.iter().map(ToString::to_string).collect()
    }
}

/// Fragments from one source plus any per-entry problems it reported.
#[derive(Debug, Default)]
struct SourceBatch {
    fragments: Vec<Fragment>,
    failures: Vec<ResonanceError>,
}

impl From<Vec<Fragment>> for SourceBatch {
    fn from(fragments: Vec<Fragment>) -> Self {
        Self {
            fragments,
            failures: Vec::new(),
        }
    }
}

pub struct FragmentScanner {
    config: ScannerConfig,
    episodic: Option<Arc<dyn EpisodicSource>>,
    sessions: Option<Arc<dyn SessionSource>>,
    tasks: Option<Arc<dyn TaskSource>>,
    entities: Option<Arc<dyn EntitySource>>,
}

impl FragmentScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            episodic: None,
            sessions: None,
            tasks: None,
            entities: None,
        }
    }

    /// Scanner backed by one SQLite store for every source.
    pub fn from_store(store: Arc<SqliteStore>, config: ScannerConfig) -> Self {
        Self::new(config)
            .with_episodic(store.clone())
            .with_sessions(store.clone())
            .with_tasks(store.clone())
            .with_entities(store)
    }

    pub fn with_episodic(mut self, source: Arc<dyn EpisodicSource>) -> Self {
        self.episodic = Some(source);
        self
    }

    pub fn with_sessions(mut self, source: Arc<dyn SessionSource>) -> Self {
        self.sessions = Some(source);
        self
    }

    pub fn with_tasks(mut self, source: Arc<dyn TaskSource>) -> Self {
        self.tasks = Some(source);
        self
    }

    pub fn with_entities(mut self, source: Arc<dyn EntitySource>) -> Self {
        self.entities = Some(source);
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Query every source concurrently. Fragments come back grouped in
    /// source order (episodic, sessions, tasks, entities), each group in the
    /// order its backend returned it, with cross-source links filled in.
    pub async fn scan(&self, ctx: &ReconstructionContext, prefetched_tasks: Option<&[Value]>) -> ScanOutcome {
        let (episodic, sessions, tasks, entities) = tokio::join!(
            self.scan_episodic(ctx),
            self.scan_sessions(ctx),
            self.scan_tasks(ctx, prefetched_tasks),
            self.scan_entities(ctx),
        );

        let mut outcome = ScanOutcome::default();
        for result in [episodic, sessions, tasks, entities] {
            match result {
                Ok(mut batch) => {
                    outcome.fragments.append(&mut batch.fragments);
                    outcome.failures.append(&mut batch.failures);
                }
                Err(e) => outcome.failures.push(e),
            }
        }

        link(&mut outcome.fragments);
        tracing::debug!(
            "Scanned {} fragments ({} source failures) for {}",
            outcome.fragments.len(),
            outcome.failures.len(),
            ctx.project_name()
        );
        outcome
    }

    async fn scan_episodic(&self, ctx: &ReconstructionContext) -> Result<SourceBatch, ResonanceError> {
        let source = self
            .episodic
            .as_ref()
            .ok_or_else(|| unconfigured(FragmentSource::Episodic))?;
        let query = ctx.episodic_query();
        let records = guarded(
            FragmentSource::Episodic,
            self.config.episodic_timeout_ms,
            source.search_episodes(&query, &ctx.scope_id, self.config.episodic_limit),
        )
        .await?;
        tracing::debug!("Episodic source returned {} records for '{}'", records.len(), query);
        let total = records.len();
        Ok(records
            .into_iter()
            .enumerate()
            .map(|(i, r)| episodic_fragment(r, recency_strength(i, total)))
            .collect::<Vec<_>>()
            .into())
    }

    async fn scan_sessions(&self, ctx: &ReconstructionContext) -> Result<SourceBatch, ResonanceError> {
        let source = self
            .sessions
            .as_ref()
            .ok_or_else(|| unconfigured(FragmentSource::Session))?;
        let scope = SessionScope {
            scope_id: ctx.scope_id.clone(),
            project: ctx.project_name().to_string(),
            device_id: ctx.device_id.clone(),
        };
        let lookback = chrono::Duration::try_hours(self.config.session_lookback_hours.max(0))
            .unwrap_or_else(chrono::Duration::zero);
        let since = Utc::now() - lookback;
        let records = guarded(
            FragmentSource::Session,
            self.config.session_timeout_ms,
            source.recent_sessions(&scope, since, self.config.session_limit),
        )
        .await?;
        tracing::debug!("Session source returned {} sessions since {}", records.len(), since);
        let total = records.len();
        let mut fragments = Vec::new();
        for (i, record) in records.into_iter().enumerate() {
            fragments.extend(session_fragments(record, recency_strength(i, total)));
        }
        Ok(fragments.into())
    }

    async fn scan_tasks(
        &self,
        ctx: &ReconstructionContext,
        prefetched: Option<&[Value]>,
    ) -> Result<SourceBatch, ResonanceError> {
        if let Some(entries) = prefetched {
            return Ok(prefetched_batch(entries));
        }
        let source = self
            .tasks
            .as_ref()
            .ok_or_else(|| unconfigured(FragmentSource::TaskStore))?;
        let records = guarded(
            FragmentSource::TaskStore,
            self.config.task_timeout_ms,
            source.open_tasks(&ctx.scope_id, self.config.task_limit),
        )
        .await?;
        tracing::debug!("Task source returned {} open tasks", records.len());
        Ok(records
            .into_iter()
            .map(|r| task_fragment(r, FragmentSource::TaskStore))
            .collect::<Vec<_>>()
            .into())
    }

    async fn scan_entities(&self, ctx: &ReconstructionContext) -> Result<SourceBatch, ResonanceError> {
        if !self.config.enable_entities {
            return Ok(SourceBatch::default());
        }
        let source = self
            .entities
            .as_ref()
            .ok_or_else(|| unconfigured(FragmentSource::Entity))?;
        let query = ctx.episodic_query();
        let records = guarded(
            FragmentSource::Entity,
            self.config.entity_timeout_ms,
            source.related_entities(&query, &ctx.scope_id, self.config.entity_limit),
        )
        .await?;
        tracing::debug!("Entity source returned {} entities", records.len());
        Ok(records.into_iter().map(entity_fragment).collect::<Vec<_>>().into())
    }
}

/// Run one backend call under a timeout, classifying whatever goes wrong.
async fn guarded<T, F>(source: FragmentSource, timeout_ms: u64, call: F) -> Result<T, ResonanceError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let failure = match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(e)) => ResonanceError::from_source_failure(source, &e),
        Err(_) => ResonanceError::SourceTimeout {
            source_name: source,
            timeout_ms,
        },
    };
    tracing::warn!("Skipping {} fragments: {}", source, failure);
    Err(failure)
}

fn unconfigured(source: FragmentSource) -> ResonanceError {
    let err = ResonanceError::SourceUnavailable {
        source_name: source,
        reason: "no backend configured".to_string(),
    };
    tracing::warn!("Skipping {} fragments: {}", source, err);
    err
}

/// Prior strength from list position: 1.0 for the first entry, falling
/// linearly towards 0.5 for the last.
fn recency_strength(position: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    1.0 - (position as f64 / total as f64) * 0.5
}

fn episodic_fragment(record: EpisodicRecord, strength: f64) -> Fragment {
    let fragment_type = match record.kind.as_deref() {
        Some(kind) if kind.eq_ignore_ascii_case("decision") => FragmentType::Decision,
        _ => FragmentType::Episodic,
    };
    let mut fragment = Fragment::new(
        format!("episode:{}", record.id),
        fragment_type,
        FragmentSource::Episodic,
        record.content,
    )
    .with_strength(strength)
    .with_metadata(record.metadata)
    .with_created_at(record.created_at);
    if let Some(summary) = record.summary.filter(|s| !s.trim().is_empty()) {
        fragment = fragment.with_summary(summary);
    }
    fragment
}

/// A session fragment followed by one decision fragment per recorded
/// decision, each linked back to the session.
fn session_fragments(record: SessionRecord, strength: f64) -> Vec<Fragment> {
    let session_id = format!("session:{}", record.id);
    let mut session = Fragment::new(
        session_id.clone(),
        FragmentType::Session,
        FragmentSource::Session,
        record.summary,
    )
    .with_strength(strength)
    .with_metadata(json!({
        "project": record.project,
        "device_id": record.device_id,
        "started_at": record.started_at.to_rfc3339(),
        "ended_at": record.ended_at.map(|t| t.to_rfc3339()),
    }))
    .with_created_at(record.started_at);

    let mut decisions = Vec::with_capacity(record.decisions.len());
    for (i, text) in record.decisions.into_iter().enumerate() {
        if text.trim().is_empty() {
            continue;
        }
        let mut decision = Fragment::new(
            format!("decision:{}:{}", record.id, i),
            FragmentType::Decision,
            FragmentSource::Session,
            text,
        )
        .with_strength(strength)
        .with_metadata(json!({ "session_id": record.id, "project": record.project }))
        .with_created_at(record.started_at);
        decision.connect(session_id.clone());
        session.connect(decision.id.clone());
        decisions.push(decision);
    }

    let mut fragments = vec![session];
    fragments.extend(decisions);
    fragments
}

fn task_fragment(record: TaskRecord, source: FragmentSource) -> Fragment {
    let content = if record.description.trim().is_empty() {
        record.title.clone()
    } else {
        format!("{}\n{}", record.title, record.description)
    };
    let strength = record
        .priority
        .filter(|p| p.is_finite())
        .map(|p| p.clamp(0.0, 1.0))
        .unwrap_or(resonance_core::fragment::DEFAULT_FRAGMENT_STRENGTH);
    let mut fragment = Fragment::new(format!("task:{}", record.id), FragmentType::Task, source, content)
        .with_summary(record.title)
        .with_strength(strength)
        .with_metadata(json!({
            "status": record.status,
            "session_id": record.session_id,
            "priority": record.priority,
        }))
        .with_created_at(record.created_at);
    if let Some(session_id) = record.session_id {
        fragment.connect(format!("session:{}", session_id));
    }
    fragment
}

/// Decode caller-supplied task payloads. Undecodable entries are dropped,
/// each with its own malformed-data failure.
fn prefetched_batch(entries: &[Value]) -> SourceBatch {
    let mut batch = SourceBatch::default();
    for (i, entry) in entries.iter().enumerate() {
        let reason = match serde_json::from_value::<TaskRecord>(entry.clone()) {
            Ok(record) if record.title.trim().is_empty() => "empty title".to_string(),
            Ok(mut record) => {
                if record.id.trim().is_empty() {
                    record.id = format!("prefetched-{}", i);
                }
                batch.fragments.push(task_fragment(record, FragmentSource::Prefetched));
                continue;
            }
            Err(e) => e.to_string(),
        };
        let failure = ResonanceError::MalformedResponse {
            source_name: FragmentSource::Prefetched,
            reason: format!("entry {}: {}", i, reason),
        };
        tracing::warn!("Dropping prefetched task: {}", failure);
        batch.failures.push(failure);
    }
    batch
}

fn entity_fragment(record: EntityRecord) -> Fragment {
    let content = if record.description.trim().is_empty() {
        format!("{} ({})", record.name, record.entity_type)
    } else {
        format!("{} ({}): {}", record.name, record.entity_type, record.description)
    };
    let strength = 0.5 + 0.5 * (record.mentions as f64 / 10.0).min(1.0);
    Fragment::new(format!("entity:{}", record.id), FragmentType::Entity, FragmentSource::Entity, content)
        .with_strength(strength)
        .with_metadata(json!({
            "name": record.name,
            "entity_type": record.entity_type,
            "mentions": record.mentions,
            "related": record.related,
        }))
}

/// Fill in cross-source links and make every link symmetric.
///
/// Declared links (decision to session, task to session) are kept when the
/// target is in the batch. Entities link to every fragment that mentions
/// their name and to related entities present in the batch.
fn link(fragments: &mut [Fragment]) {
    let index: HashMap<String, usize> = fragments
        .iter()
        .enumerate()
        .map(|(i, f)| (f.id.clone(), i))
        .collect();
    let text_terms: Vec<BTreeSet<String>> = fragments.iter().map(|f| terms(&f.searchable_text())).collect();

    let mut edges: Vec<(usize, usize)> = Vec::new();
    for (i, f) in fragments.iter().enumerate() {
        for target in &f.connections {
            if let Some(&j) = index.get(target) {
                edges.push((i, j));
            }
        }
    }

    let entities: Vec<(usize, String)> = fragments
        .iter()
        .enumerate()
        .filter(|(_, f)| f.fragment_type == FragmentType::Entity)
        .filter_map(|(i, f)| f.metadata["name"].as_str().map(|n| (i, n.to_lowercase())))
        .collect();
    let by_name: HashMap<&str, usize> = entities.iter().map(|(i, n)| (n.as_str(), *i)).collect();

    for (ei, name) in &entities {
        let name_terms = terms(name);
        if !name_terms.is_empty() {
            for (fi, f) in fragments.iter().enumerate() {
                if f.fragment_type != FragmentType::Entity && name_terms.is_subset(&text_terms[fi]) {
                    edges.push((*ei, fi));
                }
            }
        }
        if let Some(related) = fragments[*ei].metadata["related"].as_array() {
            for other in related.iter().filter_map(Value::as_str) {
                if let Some(&j) = by_name.get(other.to_lowercase().as_str()) {
                    edges.push((*ei, j));
                }
            }
        }
    }

    for (a, b) in edges {
        if a == b {
            continue;
        }
        let (id_a, id_b) = (fragments[a].id.clone(), fragments[b].id.clone());
        fragments[a].connect(id_b);
        fragments[b].connect(id_a);
    }
}
