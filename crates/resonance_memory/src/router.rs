//! Memory routing: classify incoming content, activate its basin, ingest it.
//!
//! Routing is the write-side counterpart to reconstruction. It is the only
//! path that mutates the basin registry.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use resonance_core::{IngestItem, IngestSink, IngestionResult, MemoryType, RouteRequest, RouteResult};

use crate::registry::BasinRegistry;
use crate::scorer::terms;

const MAX_CONCEPTS: usize = 8;
const MIN_CONCEPT_LEN: usize = 4;

const PROCEDURAL_WORDS: &[&str] = &[
    "how", "step", "steps", "install", "run", "command", "configure", "build", "deploy", "procedure",
    "workflow", "script", "setup",
];
const STRATEGIC_WORDS: &[&str] = &[
    "goal", "goals", "plan", "strategy", "roadmap", "priority", "milestone", "vision", "objective",
    "quarter", "direction",
];
const EPISODIC_WORDS: &[&str] = &[
    "today", "yesterday", "meeting", "session", "happened", "met", "discussed", "fixed", "debugged",
    "during", "tonight", "morning",
];

fn stopwords() -> &'static HashSet<&'static str> {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "this", "that", "with", "from", "have", "will", "were", "been", "they", "them", "then", "than",
            "there", "their", "what", "when", "where", "which", "while", "about", "into", "onto", "over",
            "under", "also", "just", "only", "some", "such", "very", "more", "most", "should", "would",
            "could", "each", "other", "does", "done", "make", "made", "after", "before", "because",
        ]
        .into_iter()
        .collect()
    })
}

pub struct MemoryRouter {
    registry: Arc<BasinRegistry>,
    sink: Option<Arc<dyn IngestSink>>,
}

impl MemoryRouter {
    pub fn new(registry: Arc<BasinRegistry>) -> Self {
        Self { registry, sink: None }
    }

    pub fn with_sink(mut self, sink: Arc<dyn IngestSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &BasinRegistry {
        &self.registry
    }

    /// Route one piece of content. Never fails: registry and sink problems
    /// are reported in `ingestion_result`.
    pub async fn route(&self, request: &RouteRequest) -> RouteResult {
        let memory_type = request.memory_type.unwrap_or_else(|| classify(&request.content));
        let basin_name = basin_for(memory_type);

        if request.content.trim().is_empty() {
            tracing::debug!("Skipping empty content for {}", basin_name);
            return RouteResult {
                memory_type,
                basin_name: basin_name.to_string(),
                basin_context: String::new(),
                ingestion_result: IngestionResult {
                    warnings: vec!["empty content not stored".to_string()],
                    ..IngestionResult::default()
                },
            };
        }

        let concepts = extract_concepts(&request.content);
        let view = self
            .registry
            .activate(
                basin_name,
                basin_description(memory_type),
                &concepts,
                self.registry.config().route_seed_strength,
            )
            .await;

        let mut ingestion = IngestionResult {
            basin_degraded: view.degraded,
            warnings: view.warnings.clone(),
            ..IngestionResult::default()
        };
        self.ingest(request, memory_type, basin_name, &mut ingestion).await;

        tracing::info!(
            "Routed {} content to {} (stored: {}, degraded: {})",
            memory_type,
            basin_name,
            ingestion.stored,
            ingestion.basin_degraded
        );

        RouteResult {
            memory_type,
            basin_name: basin_name.to_string(),
            basin_context: view.basin.context_line(),
            ingestion_result: ingestion,
        }
    }

    async fn ingest(
        &self,
        request: &RouteRequest,
        memory_type: MemoryType,
        basin_name: &str,
        result: &mut IngestionResult,
    ) {
        let Some(sink) = self.sink.as_ref() else {
            result.warnings.push("no ingest sink configured".to_string());
            return;
        };
        let item = IngestItem {
            content: request.content.clone(),
            memory_type,
            basin_name: basin_name.to_string(),
            source_id: request.source_id.clone(),
            created_at: Utc::now(),
        };
        match sink.ingest(&item).await {
            Ok(id) => {
                result.stored = true;
                result.item_id = Some(id);
            }
            Err(e) => {
                tracing::warn!("Ingest into {} failed: {:#}", basin_name, e);
                result.warnings.push(format!("ingest failed: {:#}", e));
            }
        }
    }
}

/// Keyword classification. Ties go to procedural, then strategic, then
/// episodic; content with no signal is semantic.
pub fn classify(content: &str) -> MemoryType {
    let words = terms(content);
    let hits = |list: &[&str]| list.iter().filter(|w| words.contains(**w)).count();

    let candidates = [
        (MemoryType::Procedural, hits(PROCEDURAL_WORDS)),
        (MemoryType::Strategic, hits(STRATEGIC_WORDS)),
        (MemoryType::Episodic, hits(EPISODIC_WORDS)),
    ];
    let mut best = (MemoryType::Semantic, 0);
    for (memory_type, count) in candidates {
        if count > best.1 {
            best = (memory_type, count);
        }
    }
    best.0
}

pub fn basin_for(memory_type: MemoryType) -> &'static str {
    match memory_type {
        MemoryType::Episodic => "experiential-basin",
        MemoryType::Semantic => "conceptual-basin",
        MemoryType::Procedural => "procedural-basin",
        MemoryType::Strategic => "strategic-basin",
    }
}

fn basin_description(memory_type: MemoryType) -> &'static str {
    match memory_type {
        MemoryType::Episodic => "events, sessions and things that happened",
        MemoryType::Semantic => "facts and concepts",
        MemoryType::Procedural => "how things are done",
        MemoryType::Strategic => "goals, plans and priorities",
    }
}

/// Most frequent content words, ties broken alphabetically.
pub fn extract_concepts(content: &str) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for word in content.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.chars().count() < MIN_CONCEPT_LEN
            || stopwords().contains(word.as_str())
            || word.chars().all(|c| c.is_ascii_digit())
        {
            continue;
        }
        *counts.entry(word).or_insert(0) += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.into_iter().take(MAX_CONCEPTS).map(|(w, _)| w).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use resonance_core::config::BasinConfig;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<IngestItem>>);

    #[async_trait]
    impl IngestSink for Recorder {
        async fn ingest(&self, item: &IngestItem) -> Result<String> {
            let mut items = self.0.lock().unwrap();
            items.push(item.clone());
            Ok(format!("item-{}", items.len()))
        }
    }

    struct Refusing;

    #[async_trait]
    impl IngestSink for Refusing {
        async fn ingest(&self, _item: &IngestItem) -> Result<String> {
            anyhow::bail!("disk full")
        }
    }

    fn router() -> (MemoryRouter, Arc<Recorder>) {
        let sink = Arc::new(Recorder::default());
        let registry = Arc::new(BasinRegistry::in_memory(BasinConfig::default()));
        (MemoryRouter::new(registry).with_sink(sink.clone()), sink)
    }

    fn route_request(content: &str, memory_type: Option<MemoryType>) -> RouteRequest {
        RouteRequest {
            content: content.into(),
            memory_type,
            source_id: Some("/home/dev/atlas".into()),
        }
    }

    #[test]
    fn test_classify_keywords() {
        assert_eq!(classify("Steps to install and configure the build"), MemoryType::Procedural);
        assert_eq!(classify("Our goal this quarter: ship the roadmap"), MemoryType::Strategic);
        assert_eq!(classify("Yesterday we debugged the flaky test during the meeting"), MemoryType::Episodic);
        assert_eq!(classify("Rust ownership prevents data races"), MemoryType::Semantic);
    }

    #[test]
    fn test_classify_tie_prefers_procedural() {
        // one procedural word, one strategic word, one episodic word
        assert_eq!(classify("today's plan: deploy"), MemoryType::Procedural);
        assert_eq!(classify("plan for today"), MemoryType::Strategic);
    }

    #[test]
    fn test_extract_concepts_by_frequency() {
        let concepts = extract_concepts("Parser parser PARSER lexer lexer tokens with the AST and 2024");
        assert_eq!(concepts, vec!["parser", "lexer", "tokens"]);
    }

    #[test]
    fn test_extract_concepts_is_capped() {
        let text = "alpha bravo charlie delta echo foxtrot golf hotel india juliet";
        assert_eq!(extract_concepts(text).len(), MAX_CONCEPTS);
    }

    #[tokio::test]
    async fn test_route_activates_and_ingests() {
        let (router, sink) = router();
        let result = router
            .route(&route_request("Yesterday we fixed the parser during the session", None))
            .await;

        assert_eq!(result.memory_type, MemoryType::Episodic);
        assert_eq!(result.basin_name, "experiential-basin");
        assert!(result.basin_context.starts_with("experiential-basin"));
        assert!(result.basin_context.contains("activations 1"));
        assert!(result.ingestion_result.stored);
        assert_eq!(result.ingestion_result.item_id.as_deref(), Some("item-1"));
        assert!(!result.ingestion_result.basin_degraded);

        let items = sink.0.lock().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].basin_name, "experiential-basin");
        assert_eq!(items[0].source_id.as_deref(), Some("/home/dev/atlas"));
    }

    #[tokio::test]
    async fn test_explicit_type_wins_and_reinforces() {
        let (router, _sink) = router();
        router.route(&route_request("anything", Some(MemoryType::Strategic))).await;
        let second = router.route(&route_request("more", Some(MemoryType::Strategic))).await;
        assert_eq!(second.basin_name, "strategic-basin");
        assert!(second.basin_context.contains("activations 2"));

        let basins = router.registry().basins().await.unwrap();
        assert_eq!(basins.len(), 1);
        assert!((basins[0].strength - 0.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ingest_failure_is_reported_not_raised() {
        let registry = Arc::new(BasinRegistry::in_memory(BasinConfig::default()));
        let router = MemoryRouter::new(registry).with_sink(Arc::new(Refusing));
        let result = router.route(&route_request("how to run the script", None)).await;
        assert_eq!(result.basin_name, "procedural-basin");
        assert!(!result.ingestion_result.stored);
        assert!(result.ingestion_result.warnings.iter().any(|w| w.contains("disk full")));
    }

    #[tokio::test]
    async fn test_blank_content_leaves_registry_untouched() {
        let (router, sink) = router();
        router.route(&route_request("plan the roadmap", None)).await;
        let before = router.registry().basins().await.unwrap();

        let result = router.route(&route_request("   ", None)).await;
        assert_eq!(result.basin_name, "conceptual-basin");
        assert!(result.basin_context.is_empty());
        assert!(!result.ingestion_result.stored);
        assert_eq!(result.ingestion_result.warnings, vec!["empty content not stored".to_string()]);

        let after = router.registry().basins().await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].name, "strategic-basin");
        assert_eq!(after[0].strength, before[0].strength);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_route_without_sink() {
        let registry = Arc::new(BasinRegistry::in_memory(BasinConfig::default()));
        let result = MemoryRouter::new(registry)
            .route(&route_request("facts about lifetimes", None))
            .await;
        assert_eq!(result.basin_name, "conceptual-basin");
        assert!(!result.ingestion_result.stored);
        assert_eq!(result.ingestion_result.warnings, vec!["no ingest sink configured".to_string()]);
    }
}
