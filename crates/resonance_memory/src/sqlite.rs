use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resonance_core::config::BasinConfig;
use resonance_core::request::scope_id_for;
use resonance_core::{
    Basin, BasinSeed, BasinStore, EntityRecord, EntitySource, EpisodicRecord, EpisodicSource,
    IngestItem, IngestSink, SessionRecord, SessionScope, SessionSource, TaskRecord, TaskSource,
};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeSet;
use std::path::Path;
use uuid::Uuid;

use crate::scorer::terms;

/// How many scoped rows a lexical search considers before ranking.
const SEARCH_WINDOW: i64 = 500;

/// Scope used for routed content that carries no source id.
pub const UNSCOPED: &str = "unscoped";

/// SQLite-backed implementation of every backend the engine talks to.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref().display().to_string();
        let in_memory = path == ":memory:";

        let db_url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", path)
        };

        // An in-memory database lives and dies with its connection, so pin
        // the pool to exactly one that never expires.
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };

        let pool = options
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id TEXT PRIMARY KEY,
                scope_id TEXT NOT NULL,
                content TEXT NOT NULL,
                summary TEXT,
                kind TEXT,
                metadata_json TEXT NOT NULL DEFAULT 'null',
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create episodes table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_episodes_scope ON episodes(scope_id, created_at)")
            .execute(&self.pool)
            .await
            .context("Failed to create episodes scope index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                scope_id TEXT NOT NULL,
                project TEXT NOT NULL,
                device_id TEXT,
                summary TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                decisions_json TEXT NOT NULL DEFAULT '[]'
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create sessions table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at)")
            .execute(&self.pool)
            .await
            .context("Failed to create sessions index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                scope_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'open',
                session_id TEXT,
                priority REAL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create tasks table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                scope_id TEXT NOT NULL,
                name TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                mentions INTEGER NOT NULL DEFAULT 0,
                related_json TEXT NOT NULL DEFAULT '[]'
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create entities table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS basins (
                name TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                concepts_json TEXT NOT NULL DEFAULT '[]',
                strength REAL NOT NULL,
                stability REAL NOT NULL,
                importance REAL NOT NULL,
                activation_count INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                last_activated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create basins table")?;

        Ok(())
    }

    // =========================================================================
    // Writers (seeding and ingestion)
    // =========================================================================

    /// Store an episode and return its id.
    pub async fn record_episode(
        &self,
        scope_id: &str,
        content: &str,
        kind: Option<&str>,
        metadata: &serde_json::Value,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let metadata_json = serde_json::to_string(metadata).context("Failed to encode episode metadata")?;

        sqlx::query(
            "INSERT INTO episodes (id, scope_id, content, summary, kind, metadata_json, created_at)
             VALUES (?, ?, ?, NULL, ?, ?, ?)",
        )
        .bind(&id)
        .bind(scope_id)
        .bind(content)
        .bind(kind)
        .bind(&metadata_json)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert episode")?;

        Ok(id)
    }

    pub async fn upsert_session(&self, scope_id: &str, session: &SessionRecord) -> Result<()> {
        let decisions_json = serde_json::to_string(&session.decisions)?;
        sqlx::query(
            "INSERT INTO sessions (id, scope_id, project, device_id, summary, started_at, ended_at, decisions_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
              summary = excluded.summary, ended_at = excluded.ended_at,
              decisions_json = excluded.decisions_json",
        )
        .bind(&session.id)
        .bind(scope_id)
        .bind(&session.project)
        .bind(&session.device_id)
        .bind(&session.summary)
        .bind(session.started_at.timestamp_millis())
        .bind(session.ended_at.map(|t| t.timestamp_millis()))
        .bind(&decisions_json)
        .execute(&self.pool)
        .await
        .context("Failed to save session")?;
        Ok(())
    }

    pub async fn upsert_task(&self, scope_id: &str, task: &TaskRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO tasks (id, scope_id, title, description, status, session_id, priority, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
              title = excluded.title, description = excluded.description,
              status = excluded.status, priority = excluded.priority",
        )
        .bind(&task.id)
        .bind(scope_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.status)
        .bind(&task.session_id)
        .bind(task.priority)
        .bind(task.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to save task")?;
        Ok(())
    }

    pub async fn upsert_entity(&self, scope_id: &str, entity: &EntityRecord) -> Result<()> {
        let related_json = serde_json::to_string(&entity.related)?;
        sqlx::query(
            "INSERT INTO entities (id, scope_id, name, entity_type, description, mentions, related_json)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
              description = excluded.description, mentions = excluded.mentions,
              related_json = excluded.related_json",
        )
        .bind(&entity.id)
        .bind(scope_id)
        .bind(&entity.name)
        .bind(&entity.entity_type)
        .bind(&entity.description)
        .bind(entity.mentions as i64)
        .bind(&related_json)
        .execute(&self.pool)
        .await
        .context("Failed to save entity")?;
        Ok(())
    }

    pub async fn basin(&self, name: &str) -> Result<Option<Basin>> {
        let row = sqlx::query(
            "SELECT name, description, concepts_json, strength, stability, importance,
                    activation_count, created_at, last_activated_at
             FROM basins WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query basin")?;

        row.map(|r| basin_from_row(&r)).transpose()
    }
}

// =============================================================================
// Read backends
// =============================================================================

#[async_trait]
impl EpisodicSource for SqliteStore {
    async fn search_episodes(
        &self,
        query: &str,
        scope_id: &str,
        limit: usize,
    ) -> Result<Vec<EpisodicRecord>> {
        let rows = sqlx::query(
            "SELECT id, content, summary, kind, metadata_json, created_at
             FROM episodes WHERE scope_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(scope_id)
        .bind(SEARCH_WINDOW)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch episodes")?;

        let query_terms = terms(query);
        let mut scored: Vec<(usize, EpisodicRecord)> = Vec::with_capacity(rows.len());

        for row in rows {
            let content: String = row.get("content");
            let overlap = overlap_count(&query_terms, &content);
            if overlap == 0 && !query_terms.is_empty() {
                continue;
            }
            let metadata_json: String = row.get("metadata_json");
            let metadata = serde_json::from_str(&metadata_json)
                .context("Failed to decode episode metadata")?;
            scored.push((
                overlap,
                EpisodicRecord {
                    id: row.get("id"),
                    content,
                    summary: row.get("summary"),
                    kind: row.get("kind"),
                    created_at: from_millis(row.get("created_at")),
                    metadata,
                },
            ));
        }

        // Stable: equal overlap keeps newest-first order
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, r)| r).collect())
    }
}

#[async_trait]
impl SessionSource for SqliteStore {
    async fn recent_sessions(
        &self,
        scope: &SessionScope,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query(
            "SELECT id, project, device_id, summary, started_at, ended_at, decisions_json
             FROM sessions
             WHERE (scope_id = ? OR project = ?)
               AND COALESCE(ended_at, started_at) >= ?
             ORDER BY CASE WHEN device_id = ? THEN 0 ELSE 1 END, started_at DESC
             LIMIT ?",
        )
        .bind(&scope.scope_id)
        .bind(&scope.project)
        .bind(since.timestamp_millis())
        .bind(scope.device_id.as_deref())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query sessions")?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let decisions_json: String = row.get("decisions_json");
            let decisions: Vec<String> = serde_json::from_str(&decisions_json)
                .context("Failed to decode session decisions")?;
            sessions.push(SessionRecord {
                id: row.get("id"),
                project: row.get("project"),
                device_id: row.get("device_id"),
                summary: row.get("summary"),
                started_at: from_millis(row.get("started_at")),
                ended_at: row.get::<Option<i64>, _>("ended_at").map(from_millis),
                decisions,
            });
        }
        Ok(sessions)
    }
}

#[async_trait]
impl TaskSource for SqliteStore {
    async fn open_tasks(&self, scope_id: &str, limit: usize) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            "SELECT id, title, description, status, session_id, priority, created_at
             FROM tasks
             WHERE scope_id = ? AND status NOT IN ('done', 'cancelled')
             ORDER BY COALESCE(priority, 0) DESC, created_at DESC LIMIT ?",
        )
        .bind(scope_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query tasks")?;

        Ok(rows
            .into_iter()
            .map(|row| TaskRecord {
                id: row.get("id"),
                title: row.get("title"),
                description: row.get("description"),
                status: row.get("status"),
                session_id: row.get("session_id"),
                priority: row.get("priority"),
                created_at: from_millis(row.get("created_at")),
            })
            .collect())
    }
}

#[async_trait]
impl EntitySource for SqliteStore {
    async fn related_entities(
        &self,
        query: &str,
        scope_id: &str,
        limit: usize,
    ) -> Result<Vec<EntityRecord>> {
        let rows = sqlx::query(
            "SELECT id, name, entity_type, description, mentions, related_json
             FROM entities WHERE scope_id = ? ORDER BY mentions DESC, name ASC LIMIT ?",
        )
        .bind(scope_id)
        .bind(SEARCH_WINDOW)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query entities")?;

        let query_terms = terms(query);
        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let related_json: String = row.get("related_json");
            let related: Vec<String> = serde_json::from_str(&related_json)
                .context("Failed to decode related entities")?;
            let entity = EntityRecord {
                id: row.get("id"),
                name: row.get("name"),
                entity_type: row.get("entity_type"),
                description: row.get("description"),
                mentions: row.get::<i64, _>("mentions").max(0) as u32,
                related,
            };
            let text = format!("{} {}", entity.name, entity.description);
            scored.push((overlap_count(&query_terms, &text), entity));
        }

        // Stable: equal overlap keeps the most-mentioned first
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, e)| e).collect())
    }
}

// =============================================================================
// Basin store
// =============================================================================

#[async_trait]
impl BasinStore for SqliteStore {
    async fn activate(
        &self,
        seed: &BasinSeed,
        dynamics: &BasinConfig,
        now: DateTime<Utc>,
    ) -> Result<Basin> {
        let fresh = Basin::from_seed(seed, dynamics, now);
        let concepts_json = serde_json::to_string(&fresh.concepts)?;

        // Single statement: create from the seed or reinforce in place.
        let row = sqlx::query(
            "INSERT INTO basins
               (name, description, concepts_json, strength, stability, importance,
                activation_count, created_at, last_activated_at)
             VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
               strength = MIN(MAX(basins.strength + ?, 0.1), 2.0),
               stability = MIN(MAX(basins.stability + ?, 0.1), 1.0),
               importance = MIN(MAX(basins.importance + ?, 0.1), 1.0),
               activation_count = basins.activation_count + 1,
               last_activated_at = excluded.last_activated_at
             RETURNING name, description, concepts_json, strength, stability, importance,
                       activation_count, created_at, last_activated_at",
        )
        .bind(&fresh.name)
        .bind(&fresh.description)
        .bind(&concepts_json)
        .bind(fresh.strength)
        .bind(fresh.stability)
        .bind(fresh.importance)
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(dynamics.strength_gain)
        .bind(dynamics.stability_gain)
        .bind(dynamics.importance_gain)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert basin")?;

        basin_from_row(&row)
    }

    async fn decay_others(&self, name: &str, dynamics: &BasinConfig) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE basins SET
               strength = MAX(strength - ?, 0.1),
               importance = MAX(importance - ?, 0.1)
             WHERE name != ?",
        )
        .bind(dynamics.strength_decay)
        .bind(dynamics.importance_decay)
        .bind(name)
        .execute(&self.pool)
        .await
        .context("Failed to decay basins")?;

        Ok(result.rows_affected())
    }

    async fn list_basins(&self) -> Result<Vec<Basin>> {
        let rows = sqlx::query(
            "SELECT name, description, concepts_json, strength, stability, importance,
                    activation_count, created_at, last_activated_at
             FROM basins ORDER BY strength DESC, name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list basins")?;

        rows.iter().map(basin_from_row).collect()
    }
}

#[async_trait]
impl IngestSink for SqliteStore {
    /// Routed content becomes an episode. `source_id` is treated as the
    /// identity path it belongs to, so it shows up in that identity's
    /// reconstructions.
    async fn ingest(&self, item: &IngestItem) -> Result<String> {
        let scope_id = item
            .source_id
            .as_deref()
            .map(scope_id_for)
            .unwrap_or_else(|| UNSCOPED.to_string());
        let metadata = serde_json::json!({
            "basin": item.basin_name,
            "memory_type": item.memory_type,
            "source_id": item.source_id,
        });
        self.record_episode(&scope_id, &item.content, Some(item.memory_type.as_str()), &metadata)
            .await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn basin_from_row(row: &SqliteRow) -> Result<Basin> {
    let concepts_json: String = row.get("concepts_json");
    let concepts: BTreeSet<String> =
        serde_json::from_str(&concepts_json).context("Failed to decode basin concepts")?;
    let mut basin = Basin {
        name: row.get("name"),
        description: row.get("description"),
        concepts,
        strength: row.get("strength"),
        stability: row.get("stability"),
        importance: row.get("importance"),
        activation_count: row.get::<i64, _>("activation_count").max(0) as u64,
        created_at: from_millis(row.get("created_at")),
        last_activated_at: from_millis(row.get("last_activated_at")),
    };
    basin.sanitize();
    Ok(basin)
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn overlap_count(query_terms: &BTreeSet<String>, text: &str) -> usize {
    let text_terms = terms(text);
    query_terms.intersection(&text_terms).count()
}
