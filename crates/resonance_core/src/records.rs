//! Backend record shapes.
//!
//! These are what the storage collaborators hand back before the scanner
//! turns them into fragments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicRecord {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
    /// Free-form tag from the writer; `"decision"` marks decision episodes.
    #[serde(default)]
    pub kind: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub project: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub summary: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decisions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "content", alias = "name")]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_task_status")]
    pub status: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub priority: Option<f64>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_task_status() -> String {
    "open".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mentions: u32,
    #[serde(default)]
    pub related: Vec<String>,
}

/// Session lookup scope: the identity's hashed scope plus its project name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionScope {
    pub scope_id: String,
    pub project: String,
    /// Sessions from this device sort ahead of the rest.
    pub device_id: Option<String>,
}

/// Content handed to an [`crate::IngestSink`] after routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestItem {
    pub content: String,
    pub memory_type: crate::MemoryType,
    pub basin_name: String,
    #[serde(default)]
    pub source_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
