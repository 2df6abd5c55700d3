//! Error types for Media Leverage.

use std::time::Duration;

use crate::ratelimit::ActionClass;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Access error: {0}")]
    Access(#[from] AccessError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestFailed { .. } | Self::RateLimited { .. })
    }
}

/// Pipeline stage errors. A run that ends in one of these produced no Thought.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Nothing to analyze ({source_label})")]
    EmptyBatch { source_label: String },

    #[error("Analyze failed: {0}")]
    Analyze(String),

    #[error("{stage} did not finish within {after:?}")]
    Timeout { stage: String, after: Duration },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Persist failed: {0}")]
    Persist(#[from] DatabaseError),
}

/// Request gating errors: reported to the user, never mutate session state.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("User {user_id} is not authorized")]
    Unauthorized { user_id: i64 },

    #[error("Rate limit exceeded for {class}, retry after {retry_after:?}")]
    RateLimited {
        class: ActionClass,
        retry_after: Duration,
    },
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
