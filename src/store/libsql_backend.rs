//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. One connection is shared by
//! all tasks; writes are serialized through `write_lock` so multi-statement
//! writes (and the `save_run` transaction) never interleave.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::{Analysis, Platform, RewriteOutput};
use crate::store::migrations;
use crate::store::traits::{
    Database, LlmCallRecord, NewThought, Output, StoredMessage, Tag, Thought, UsageSummary,
};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn get_tag(&self, user_id: i64, tag_id: i64) -> Result<Option<Tag>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TAG_COLUMNS} FROM tags WHERE id = ?1 AND user_id = ?2"),
                params![tag_id, user_id],
            )
            .await
            .map_err(query_err("get_tag"))?;
        match rows.next().await.map_err(query_err("get_tag"))? {
            Some(row) => Ok(Some(row_to_tag(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_messages(
        &self,
        op: &'static str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<StoredMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(query_err(op))?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err(op))? {
            messages.push(row_to_message(&row)?);
        }
        Ok(messages)
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn query_err(op: &'static str) -> impl Fn(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

fn now() -> (DateTime<Utc>, String) {
    let now = Utc::now();
    (now, now.to_rfc3339())
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

fn parse_column<T: FromStr<Err = String>>(column: &str, raw: &str) -> Result<T, DatabaseError> {
    raw.parse()
        .map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const THOUGHT_COLUMNS: &str = "id, user_id, source, source_text, idea_type, novelty_score, clarity_score, risk_level, summary, key_points, publishable, platform_assessments, recommended_platforms, failed_platforms, created_at";

const OUTPUT_COLUMNS: &str = "id, thought_id, platform, content, tokens_used, created_at";

const MESSAGE_COLUMNS: &str = "id, user_id, content, created_at";

const TAG_COLUMNS: &str = "id, user_id, label, after_message_id, created_at";

fn row_to_thought(row: &libsql::Row) -> Result<Thought, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("read thought row: {e}"));

    let idea_type: String = row.get(4).map_err(get_err)?;
    let novelty: i64 = row.get(5).map_err(get_err)?;
    let clarity: i64 = row.get(6).map_err(get_err)?;
    let risk_level: String = row.get(7).map_err(get_err)?;
    let key_points: String = row.get(9).map_err(get_err)?;
    let publishable: i64 = row.get(10).map_err(get_err)?;
    let assessments: String = row.get(11).map_err(get_err)?;
    let recommended: String = row.get(12).map_err(get_err)?;
    let failed: String = row.get(13).map_err(get_err)?;
    let created_at: String = row.get(14).map_err(get_err)?;

    let analysis = Analysis {
        idea_type: parse_column("idea_type", &idea_type)?,
        novelty_score: novelty.clamp(0, 10) as u8,
        clarity_score: clarity.clamp(0, 10) as u8,
        publishable: publishable != 0,
        risk_level: parse_column("risk_level", &risk_level)?,
        summary: row.get(8).map_err(get_err)?,
        key_points: from_json("key_points", &key_points)?,
        platform_assessments: from_json("platform_assessments", &assessments)?,
    };

    Ok(Thought {
        id: row.get(0).map_err(get_err)?,
        user_id: row.get(1).map_err(get_err)?,
        source: row.get(2).map_err(get_err)?,
        source_text: row.get(3).map_err(get_err)?,
        analysis,
        recommended_platforms: from_json("recommended_platforms", &recommended)?,
        failed_platforms: from_json("failed_platforms", &failed)?,
        created_at: parse_datetime(&created_at),
    })
}

fn row_to_output(row: &libsql::Row) -> Result<Output, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("read output row: {e}"));
    let platform: String = row.get(2).map_err(get_err)?;
    let tokens: i64 = row.get(4).map_err(get_err)?;
    let created_at: String = row.get(5).map_err(get_err)?;
    Ok(Output {
        id: row.get(0).map_err(get_err)?,
        thought_id: row.get(1).map_err(get_err)?,
        platform: parse_column("platform", &platform)?,
        content: row.get(3).map_err(get_err)?,
        tokens_used: u32::try_from(tokens).unwrap_or(0),
        created_at: parse_datetime(&created_at),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<StoredMessage, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("read message row: {e}"));
    let created_at: String = row.get(3).map_err(get_err)?;
    Ok(StoredMessage {
        id: row.get(0).map_err(get_err)?,
        user_id: row.get(1).map_err(get_err)?,
        content: row.get(2).map_err(get_err)?,
        created_at: parse_datetime(&created_at),
    })
}

fn row_to_tag(row: &libsql::Row) -> Result<Tag, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("read tag row: {e}"));
    let created_at: String = row.get(4).map_err(get_err)?;
    Ok(Tag {
        id: row.get(0).map_err(get_err)?,
        user_id: row.get(1).map_err(get_err)?,
        label: row.get::<Option<String>>(2).map_err(get_err)?,
        after_message_id: row.get(3).map_err(get_err)?,
        created_at: parse_datetime(&created_at),
    })
}

/// Insert one thought row. Caller holds the write lock.
async fn insert_thought(
    conn: &Connection,
    thought: &NewThought,
    created_at: DateTime<Utc>,
) -> Result<Thought, DatabaseError> {
    let a = &thought.analysis;
    conn.execute(
        "INSERT INTO thoughts (user_id, source, source_text, idea_type, novelty_score, clarity_score, risk_level, summary, key_points, publishable, platform_assessments, recommended_platforms, failed_platforms, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            thought.user_id,
            thought.source.as_str(),
            thought.source_text.as_str(),
            a.idea_type.as_str(),
            i64::from(a.novelty_score),
            i64::from(a.clarity_score),
            a.risk_level.as_str(),
            a.summary.as_str(),
            to_json(&a.key_points)?,
            i64::from(a.publishable),
            to_json(&a.platform_assessments)?,
            to_json(&thought.recommended_platforms)?,
            to_json(&thought.failed_platforms)?,
            created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(query_err("insert thought"))?;

    Ok(Thought {
        id: conn.last_insert_rowid(),
        user_id: thought.user_id,
        source: thought.source.clone(),
        source_text: thought.source_text.clone(),
        analysis: thought.analysis.clone(),
        recommended_platforms: thought.recommended_platforms.clone(),
        failed_platforms: thought.failed_platforms.clone(),
        created_at,
    })
}

/// Insert output rows. Caller holds the write lock.
async fn insert_outputs(
    conn: &Connection,
    thought_id: i64,
    outputs: &[RewriteOutput],
    created_at: DateTime<Utc>,
) -> Result<Vec<Output>, DatabaseError> {
    let mut saved = Vec::with_capacity(outputs.len());
    for output in outputs {
        conn.execute(
            "INSERT INTO outputs (thought_id, platform, content, tokens_used, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                thought_id,
                output.platform.as_str(),
                output.content.as_str(),
                i64::from(output.tokens_used),
                created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(query_err("insert output"))?;

        saved.push(Output {
            id: conn.last_insert_rowid(),
            thought_id,
            platform: output.platform,
            content: output.content.clone(),
            tokens_used: output.tokens_used,
            created_at,
        });
    }
    Ok(saved)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        migrations::run_migrations(self.conn()).await
    }

    // ── Thoughts ────────────────────────────────────────────────────

    async fn save_thought(&self, thought: &NewThought) -> Result<Thought, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        insert_thought(self.conn(), thought, Utc::now()).await
    }

    async fn save_outputs(
        &self,
        thought_id: i64,
        outputs: &[RewriteOutput],
    ) -> Result<Vec<Output>, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        insert_outputs(self.conn(), thought_id, outputs, Utc::now()).await
    }

    async fn save_run(
        &self,
        thought: &NewThought,
        outputs: &[RewriteOutput],
    ) -> Result<(Thought, Vec<Output>), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let (created_at, _) = now();

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(query_err("begin save_run"))?;

        let written = async {
            let saved = insert_thought(&tx, thought, created_at).await?;
            let outputs = insert_outputs(&tx, saved.id, outputs, created_at).await?;
            Ok::<_, DatabaseError>((saved, outputs))
        }
        .await;

        match written {
            Ok((saved, outputs)) => {
                tx.commit().await.map_err(query_err("commit save_run"))?;
                debug!(
                    thought_id = saved.id,
                    outputs = outputs.len(),
                    "Pipeline run persisted"
                );
                Ok((saved, outputs))
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "save_run rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn list_recent(&self, user_id: i64, limit: usize) -> Result<Vec<Thought>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {THOUGHT_COLUMNS} FROM thoughts WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(query_err("list_recent"))?;

        let mut thoughts = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_recent"))? {
            thoughts.push(row_to_thought(&row)?);
        }
        Ok(thoughts)
    }

    async fn get_by_id(
        &self,
        user_id: i64,
        id: i64,
    ) -> Result<(Thought, Vec<Output>), DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {THOUGHT_COLUMNS} FROM thoughts WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
            )
            .await
            .map_err(query_err("get_by_id"))?;

        let thought = match rows.next().await.map_err(query_err("get_by_id"))? {
            Some(row) => row_to_thought(&row)?,
            None => {
                return Err(DatabaseError::NotFound {
                    entity: "thought".to_string(),
                    id: id.to_string(),
                });
            }
        };

        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {OUTPUT_COLUMNS} FROM outputs WHERE thought_id = ?1 ORDER BY id"),
                params![id],
            )
            .await
            .map_err(query_err("get_by_id outputs"))?;

        let mut outputs = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("get_by_id outputs"))? {
            outputs.push(row_to_output(&row)?);
        }
        Ok((thought, outputs))
    }

    async fn count_thoughts(&self, user_id: i64) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM thoughts WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(query_err("count_thoughts"))?;
        match rows.next().await.map_err(query_err("count_thoughts"))? {
            Some(row) => Ok(row.get::<i64>(0).map_err(query_err("count_thoughts"))? as u64),
            None => Ok(0),
        }
    }

    async fn clear_all(&self, user_id: i64) -> Result<u64, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(query_err("begin clear_all"))?;

        let deleted = async {
            tx.execute(
                "DELETE FROM outputs WHERE thought_id IN (SELECT id FROM thoughts WHERE user_id = ?1)",
                params![user_id],
            )
            .await?;
            let thoughts = tx
                .execute("DELETE FROM thoughts WHERE user_id = ?1", params![user_id])
                .await?;
            tx.execute("DELETE FROM messages WHERE user_id = ?1", params![user_id])
                .await?;
            tx.execute("DELETE FROM tags WHERE user_id = ?1", params![user_id])
                .await?;
            tx.execute("DELETE FROM llm_calls WHERE user_id = ?1", params![user_id])
                .await?;
            Ok::<_, libsql::Error>(thoughts)
        }
        .await;

        match deleted {
            Ok(thoughts) => {
                tx.commit().await.map_err(query_err("commit clear_all"))?;
                info!(user_id, thoughts, "Cleared user records");
                Ok(thoughts)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(query_err("clear_all")(e))
            }
        }
    }

    // ── Messages and tags ───────────────────────────────────────────

    async fn save_message(
        &self,
        user_id: i64,
        content: &str,
    ) -> Result<StoredMessage, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let (created_at, created_str) = now();
        self.conn()
            .execute(
                "INSERT INTO messages (user_id, content, created_at) VALUES (?1, ?2, ?3)",
                params![user_id, content, created_str],
            )
            .await
            .map_err(query_err("save_message"))?;

        Ok(StoredMessage {
            id: self.conn().last_insert_rowid(),
            user_id,
            content: content.to_string(),
            created_at,
        })
    }

    async fn messages_since(
        &self,
        user_id: i64,
        tag_id: i64,
    ) -> Result<Vec<StoredMessage>, DatabaseError> {
        let tag = self
            .get_tag(user_id, tag_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "tag".to_string(),
                id: tag_id.to_string(),
            })?;

        self.list_messages(
            "messages_since",
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE user_id = ?1 AND id > ?2 ORDER BY id"
            ),
            params![user_id, tag.after_message_id],
        )
        .await
    }

    async fn messages_today(&self, user_id: i64) -> Result<Vec<StoredMessage>, DatabaseError> {
        // RFC 3339 timestamps sort lexically; any time today is >= the bare date.
        let today = Utc::now().format("%Y-%m-%d").to_string();
        self.list_messages(
            "messages_today",
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE user_id = ?1 AND created_at >= ?2 ORDER BY id"
            ),
            params![user_id, today],
        )
        .await
    }

    async fn consume_messages(&self, user_id: i64, up_to_id: i64) -> Result<u64, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.conn()
            .execute(
                "DELETE FROM messages WHERE user_id = ?1 AND id <= ?2",
                params![user_id, up_to_id],
            )
            .await
            .map_err(query_err("consume_messages"))
    }

    async fn save_tag(&self, user_id: i64, label: Option<&str>) -> Result<Tag, DatabaseError> {
        let _guard = self.write_lock.lock().await;

        let mut rows = self
            .conn()
            .query(
                "SELECT COALESCE(MAX(id), 0) FROM messages WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(query_err("save_tag"))?;
        let after_message_id = match rows.next().await.map_err(query_err("save_tag"))? {
            Some(row) => row.get::<i64>(0).map_err(query_err("save_tag"))?,
            None => 0,
        };

        let (created_at, created_str) = now();
        self.conn()
            .execute(
                "INSERT INTO tags (user_id, label, after_message_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![user_id, opt_text(label), after_message_id, created_str],
            )
            .await
            .map_err(query_err("save_tag"))?;

        Ok(Tag {
            id: self.conn().last_insert_rowid(),
            user_id,
            label: label.map(str::to_string),
            after_message_id,
            created_at,
        })
    }

    async fn latest_tag(&self, user_id: i64) -> Result<Option<Tag>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TAG_COLUMNS} FROM tags WHERE user_id = ?1 ORDER BY id DESC LIMIT 1"
                ),
                params![user_id],
            )
            .await
            .map_err(query_err("latest_tag"))?;
        match rows.next().await.map_err(query_err("latest_tag"))? {
            Some(row) => Ok(Some(row_to_tag(&row)?)),
            None => Ok(None),
        }
    }

    async fn delete_tag(&self, user_id: i64, tag_id: i64) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.conn()
            .execute(
                "DELETE FROM tags WHERE id = ?1 AND user_id = ?2",
                params![tag_id, user_id],
            )
            .await
            .map_err(query_err("delete_tag"))?;
        Ok(())
    }

    // ── LLM usage ───────────────────────────────────────────────────

    async fn record_llm_call(&self, record: &LlmCallRecord<'_>) -> Result<i64, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let (_, created_str) = now();
        self.conn()
            .execute(
                "INSERT INTO llm_calls (user_id, provider, model, input_tokens, output_tokens, cost, purpose, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.user_id,
                    record.provider,
                    record.model,
                    i64::from(record.input_tokens),
                    i64::from(record.output_tokens),
                    record.cost.to_string(),
                    record.purpose,
                    created_str,
                ],
            )
            .await
            .map_err(query_err("record_llm_call"))?;
        Ok(self.conn().last_insert_rowid())
    }

    async fn usage_summary(&self, user_id: i64) -> Result<UsageSummary, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT TOTAL(CAST(cost AS REAL)), TOTAL(input_tokens), TOTAL(output_tokens), COUNT(*) FROM llm_calls WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(query_err("usage_summary"))?;

        match rows.next().await.map_err(query_err("usage_summary"))? {
            Some(row) => {
                // TOTAL() always returns f64 in SQLite/libsql
                let cost_f64: f64 = row.get(0).unwrap_or(0.0);
                let total_cost = Decimal::from_str(&format!("{cost_f64:.10}"))
                    .unwrap_or(Decimal::ZERO)
                    .normalize();
                let input_tokens: f64 = row.get(1).unwrap_or(0.0);
                let output_tokens: f64 = row.get(2).unwrap_or(0.0);
                let call_count = row.get::<i64>(3).unwrap_or(0);

                Ok(UsageSummary {
                    total_cost,
                    total_input_tokens: input_tokens as u64,
                    total_output_tokens: output_tokens as u64,
                    call_count: call_count as u64,
                })
            }
            None => Ok(UsageSummary::default()),
        }
    }
}
