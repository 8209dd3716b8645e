use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Prior strength for fragments whose source does not supply one.
pub const DEFAULT_FRAGMENT_STRENGTH: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentType {
    Session,
    Task,
    Entity,
    Decision,
    Episodic,
}

impl FragmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentType::Session => "session",
            FragmentType::Task => "task",
            FragmentType::Entity => "entity",
            FragmentType::Decision => "decision",
            FragmentType::Episodic => "episodic",
        }
    }
}

/// Which backend produced a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentSource {
    Episodic,
    Session,
    Prefetched,
    TaskStore,
    Entity,
}

impl FragmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentSource::Episodic => "episodic",
            FragmentSource::Session => "session",
            FragmentSource::Prefetched => "prefetched",
            FragmentSource::TaskStore => "tasks",
            FragmentSource::Entity => "entity",
        }
    }
}

impl fmt::Display for FragmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transient, typed piece of retrieved memory.
///
/// Fragments live for exactly one reconstruction call. `activation` and
/// `resonance_score` start at zero and are filled in by the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub fragment_type: FragmentType,
    pub content: String,
    pub summary: String,
    pub strength: f64,
    pub activation: f64,
    pub resonance_score: f64,
    pub source: FragmentSource,
    /// Backend-specific payload, never interpreted by the ranking pipeline.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: u32,
    pub connections: BTreeSet<String>,
}

impl Fragment {
    pub fn new(
        id: impl Into<String>,
        fragment_type: FragmentType,
        source: FragmentSource,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            fragment_type,
            summary: summarize(&content, 160),
            content,
            strength: DEFAULT_FRAGMENT_STRENGTH,
            activation: 0.0,
            resonance_score: 0.0,
            source,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            last_accessed_at: None,
            access_count: 0,
            connections: BTreeSet::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        let summary = summary.into();
        if !summary.trim().is_empty() {
            self.summary = summary;
        }
        self
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = if strength.is_finite() {
            strength.max(0.0)
        } else {
            DEFAULT_FRAGMENT_STRENGTH
        };
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn connect(&mut self, other: impl Into<String>) {
        let other = other.into();
        if other != self.id {
            self.connections.insert(other);
        }
    }

    /// The product used for global ranking.
    pub fn rank_key(&self) -> f64 {
        self.activation * self.strength
    }

    /// Lowercased content and summary, the text the lexical scorers match on.
    pub fn searchable_text(&self) -> String {
        let mut text = String::with_capacity(self.content.len() + self.summary.len() + 1);
        text.push_str(&self.content.to_lowercase());
        text.push(' ');
        text.push_str(&self.summary.to_lowercase());
        text
    }
}

/// First line of `text`, cut to at most `max_chars` characters.
pub fn summarize(text: &str, max_chars: usize) -> String {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let cut: String = line.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}
