//! Request and response types for the two entry points: reconstruct (read)
//! and route (ingest + basin activation).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use crate::fragment::{Fragment, FragmentSource, FragmentType};

// ============================================================================
// Reconstruct
// ============================================================================

/// Everything a reconstruction call knows about "who" and "what now".
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructionContext {
    pub identity_path: String,
    pub identity_name: String,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    pub cues: Vec<String>,
    /// Stable hash of `identity_path`.
    pub scope_id: String,
}

impl ReconstructionContext {
    pub fn new(
        identity_path: impl Into<String>,
        identity_name: impl Into<String>,
        cues: Vec<String>,
    ) -> Self {
        let identity_path = identity_path.into();
        Self {
            scope_id: scope_id_for(&identity_path),
            identity_path,
            identity_name: identity_name.into(),
            device_id: None,
            session_id: None,
            cues,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Last path component of `identity_path`, used as the project name.
    pub fn project_name(&self) -> &str {
        let trimmed = self.identity_path.trim_end_matches(['/', '\\']);
        Path::new(trimmed)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(trimmed)
    }

    /// Episodic query string: identity name followed by the cues.
    pub fn episodic_query(&self) -> String {
        std::iter::once(self.identity_name.as_str())
            .chain(self.cues.iter().map(String::as_str))
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Markers the context scorer looks for in fragment text.
    pub fn context_markers(&self) -> Vec<String> {
        let mut markers = vec![self.project_name().to_lowercase(), self.identity_name.to_lowercase()];
        if let Some(ref d) = self.device_id {
            markers.push(d.to_lowercase());
        }
        if let Some(ref s) = self.session_id {
            markers.push(s.to_lowercase());
        }
        let mut seen = HashSet::new();
        markers.retain(|m| !m.trim().is_empty() && seen.insert(m.clone()));
        markers
    }
}

/// Deterministic scope id derived from an identity path (UUIDv5, URL namespace).
pub fn scope_id_for(identity_path: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, identity_path.as_bytes()).to_string()
}

/// Wire input for a reconstruction call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructRequest {
    pub identity_path: String,
    pub identity_name: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cues: Vec<String>,
    /// Opaque task payloads already fetched by the caller.
    #[serde(default)]
    pub prefetched_tasks: Option<Vec<serde_json::Value>>,
}

impl ReconstructRequest {
    pub fn context(&self) -> ReconstructionContext {
        ReconstructionContext {
            scope_id: scope_id_for(&self.identity_path),
            identity_path: self.identity_path.clone(),
            identity_name: self.identity_name.clone(),
            device_id: self.device_id.clone(),
            session_id: self.session_id.clone(),
            cues: self.cues.clone(),
        }
    }
}

/// One entry in a grouped output list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub fragment_type: FragmentType,
    pub summary: String,
    pub source: FragmentSource,
    pub resonance_score: f64,
    pub activation: f64,
}

impl From<&Fragment> for FragmentSummary {
    fn from(f: &Fragment) -> Self {
        Self {
            id: f.id.clone(),
            fragment_type: f.fragment_type,
            summary: f.summary.clone(),
            source: f.source,
            resonance_score: f.resonance_score,
            activation: f.activation,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconstructedMemory {
    pub recent_sessions: Vec<FragmentSummary>,
    pub active_tasks: Vec<FragmentSummary>,
    pub key_entities: Vec<FragmentSummary>,
    pub recent_decisions: Vec<FragmentSummary>,
    pub episodic_memories: Vec<FragmentSummary>,
    pub coherence_score: f64,
    /// Fragments returned by all sources before gating.
    pub fragment_count: usize,
    pub gap_fills: Vec<String>,
    pub warnings: Vec<String>,
    pub reconstruction_time_ms: u64,
    pub digest: String,
}

/// Wire output for a reconstruction call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructResponse {
    pub success: bool,
    #[serde(flatten)]
    pub memory: ReconstructedMemory,
}

// ============================================================================
// Route / Activate
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Episodic,
    Semantic,
    Procedural,
    Strategic,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Procedural => "procedural",
            MemoryType::Strategic => "strategic",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "episodic" => Some(MemoryType::Episodic),
            "semantic" => Some(MemoryType::Semantic),
            "procedural" => Some(MemoryType::Procedural),
            "strategic" => Some(MemoryType::Strategic),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub content: String,
    #[serde(default, rename = "type")]
    pub memory_type: Option<MemoryType>,
    #[serde(default)]
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionResult {
    pub stored: bool,
    #[serde(default)]
    pub item_id: Option<String>,
    /// True when the basin view came from seed values because the registry
    /// store was unreachable.
    pub basin_degraded: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub basin_name: String,
    pub basin_context: String,
    pub ingestion_result: IngestionResult,
}
