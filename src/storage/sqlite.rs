use rusqlite::types::Type;
use rusqlite::{Connection, Result as SqliteResult, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::{InteractionRecord, PipelineTrace, ResultEnvelope, SynthesisPath};

/// SQLite interaction log.
/// Uses tokio::Mutex for async-friendly locking
pub struct InteractionStore {
    conn: Arc<Mutex<Connection>>,
}

impl InteractionStore {
    /// Open (or create) the log at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        // Handle SQLite URL format (sqlite:./path or sqlite://path)
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            path_str.trim_start_matches("sqlite:").trim_start_matches("//")
        } else {
            path_str.as_ref()
        };

        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open(clean_path)?)),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory log, used when no file is wanted
    pub async fn in_memory() -> SqliteResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        // Artifacts are kept as JSON so the log never constrains their shape
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS interactions (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                dataset_version TEXT NOT NULL,
                status TEXT NOT NULL,
                error_kind TEXT,
                synthesis_path TEXT,
                stage_count INTEGER NOT NULL,
                intent_json TEXT,
                routine_json TEXT,
                execution_json TEXT,
                envelope_json TEXT NOT NULL,
                elapsed_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_interactions_created ON interactions(created_at DESC)",
            [],
        )?;

        Ok(())
    }

    /// Record every artifact of one pipeline run
    pub async fn log_interaction(&self, trace: &PipelineTrace) -> SqliteResult<()> {
        let intent_json = trace.intent.as_ref().map(to_json).transpose()?;
        let routine_json = trace.routine.as_ref().map(to_json).transpose()?;
        let execution_json = trace.execution.as_ref().map(to_json).transpose()?;
        let envelope_json = to_json(&trace.envelope)?;
        let stage_count = trace.routine.as_ref().map(|r| r.stages.len()).unwrap_or(0);

        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO interactions
            (id, question, dataset_version, status, error_kind, synthesis_path, stage_count,
             intent_json, routine_json, execution_json, envelope_json, elapsed_ms, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            rusqlite::params![
                trace.id,
                trace.question,
                trace.dataset_version,
                if trace.envelope.is_ok() { "ok" } else { "error" },
                trace.envelope.error_kind().map(|k| k.as_str()),
                trace.synthesis_path.map(|p| p.as_str()),
                stage_count as i64,
                intent_json,
                routine_json,
                execution_json,
                envelope_json,
                trace.elapsed_ms as i64,
                trace.created_at.to_rfc3339(),
            ],
        )?;
        debug!("Logged interaction {}", trace.id);
        Ok(())
    }

    /// Most recent interactions first
    pub async fn recent_interactions(&self, limit: usize) -> SqliteResult<Vec<InteractionRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, question, dataset_version, synthesis_path, stage_count, envelope_json, elapsed_ms, created_at
            FROM interactions
            ORDER BY created_at DESC, id
            LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map(rusqlite::params![limit as i64], record_from_row)?;
        let records = rows.collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }

    pub async fn get_interaction(&self, id: &str) -> SqliteResult<Option<InteractionRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, question, dataset_version, synthesis_path, stage_count, envelope_json, elapsed_ms, created_at
            FROM interactions
            WHERE id = ?1
            "#,
        )?;

        let result = stmt.query_row(rusqlite::params![id], record_from_row);
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> SqliteResult<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> SqliteResult<InteractionRecord> {
    let synthesis_path = match row.get::<_, Option<String>>(3)?.as_deref() {
        Some("template") => Some(SynthesisPath::Template),
        Some("generative") => Some(SynthesisPath::Generative),
        _ => None,
    };
    let envelope: ResultEnvelope = serde_json::from_str(&row.get::<_, String>(5)?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    let created_at = chrono::DateTime::parse_from_rfc3339(&row.get::<_, String>(7)?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?
        .with_timezone(&chrono::Utc);

    Ok(InteractionRecord {
        id: row.get(0)?,
        question: row.get(1)?,
        dataset_version: row.get(2)?,
        synthesis_path,
        stage_count: row.get::<_, i64>(4)? as usize,
        envelope,
        elapsed_ms: row.get::<_, i64>(6)? as u64,
        created_at,
    })
}
