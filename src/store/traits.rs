//! `Database` trait: the single async persistence gateway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::DatabaseError;
use crate::pipeline::types::{Analysis, Platform, RewriteOutput};
use crate::session::{Message, MessageRole};

/// A finalized pipeline run. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thought {
    pub id: i64,
    pub user_id: i64,
    /// Batch source label (`chat`, `process`, `tag`, `today`).
    pub source: String,
    pub source_text: String,
    pub analysis: Analysis,
    /// Platforms selected by Route and Filter.
    pub recommended_platforms: Vec<Platform>,
    /// Platforms whose rewrite failed.
    pub failed_platforms: Vec<Platform>,
    pub created_at: DateTime<Utc>,
}

/// Thought fields supplied by the pipeline before it has an id.
#[derive(Debug, Clone)]
pub struct NewThought {
    pub user_id: i64,
    pub source: String,
    pub source_text: String,
    pub analysis: Analysis,
    pub recommended_platforms: Vec<Platform>,
    pub failed_platforms: Vec<Platform>,
}

/// Platform content belonging to one Thought.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub id: i64,
    pub thought_id: i64,
    pub platform: Platform,
    pub content: String,
    pub tokens_used: u32,
    pub created_at: DateTime<Utc>,
}

/// A plain message received outside a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn to_message(&self) -> Message {
        Message {
            role: MessageRole::User,
            text: self.content.clone(),
            timestamp: self.created_at,
        }
    }
}

/// Batch boundary placed by `/tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub user_id: i64,
    pub label: Option<String>,
    /// Highest stored message id when the tag was placed.
    pub after_message_id: i64,
    pub created_at: DateTime<Utc>,
}

/// One LLM call for usage accounting.
#[derive(Debug, Clone)]
pub struct LlmCallRecord<'a> {
    pub user_id: i64,
    pub provider: &'a str,
    pub model: &'a str,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: Decimal,
    /// `analyze`, `rewrite:<platform>` or `chat`.
    pub purpose: &'a str,
}

/// Aggregated LLM usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageSummary {
    pub total_cost: Decimal,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub call_count: u64,
}

/// Backend-agnostic persistence for thoughts, outputs, messages, tags and usage.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Thoughts ────────────────────────────────────────────────────

    /// Insert a thought on its own.
    async fn save_thought(&self, thought: &NewThought) -> Result<Thought, DatabaseError>;

    /// Insert outputs for an existing thought.
    async fn save_outputs(
        &self,
        thought_id: i64,
        outputs: &[RewriteOutput],
    ) -> Result<Vec<Output>, DatabaseError>;

    /// Insert a thought and its outputs in one transaction.
    async fn save_run(
        &self,
        thought: &NewThought,
        outputs: &[RewriteOutput],
    ) -> Result<(Thought, Vec<Output>), DatabaseError>;

    /// Most recent first.
    async fn list_recent(&self, user_id: i64, limit: usize) -> Result<Vec<Thought>, DatabaseError>;

    /// A user's thought with its outputs, or `NotFound`.
    async fn get_by_id(
        &self,
        user_id: i64,
        id: i64,
    ) -> Result<(Thought, Vec<Output>), DatabaseError>;

    async fn count_thoughts(&self, user_id: i64) -> Result<u64, DatabaseError>;

    /// Delete every record owned by the user. Returns the number of thoughts removed.
    async fn clear_all(&self, user_id: i64) -> Result<u64, DatabaseError>;

    // ── Messages and tags ───────────────────────────────────────────

    async fn save_message(
        &self,
        user_id: i64,
        content: &str,
    ) -> Result<StoredMessage, DatabaseError>;

    /// Messages stored after the tag was placed, in insertion order.
    async fn messages_since(
        &self,
        user_id: i64,
        tag_id: i64,
    ) -> Result<Vec<StoredMessage>, DatabaseError>;

    /// Messages stored since midnight UTC, in insertion order.
    async fn messages_today(&self, user_id: i64) -> Result<Vec<StoredMessage>, DatabaseError>;

    /// Delete stored messages with `id <= up_to_id`. Returns the number deleted.
    async fn consume_messages(&self, user_id: i64, up_to_id: i64) -> Result<u64, DatabaseError>;

    async fn save_tag(&self, user_id: i64, label: Option<&str>) -> Result<Tag, DatabaseError>;

    async fn latest_tag(&self, user_id: i64) -> Result<Option<Tag>, DatabaseError>;

    async fn delete_tag(&self, user_id: i64, tag_id: i64) -> Result<(), DatabaseError>;

    // ── LLM usage ───────────────────────────────────────────────────

    async fn record_llm_call(&self, record: &LlmCallRecord<'_>) -> Result<i64, DatabaseError>;

    async fn usage_summary(&self, user_id: i64) -> Result<UsageSummary, DatabaseError>;
}
