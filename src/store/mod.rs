//! Persistence layer: libSQL-backed storage for thoughts, outputs, messages,
//! tags and LLM usage.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    Database, LlmCallRecord, NewThought, Output, StoredMessage, Tag, Thought, UsageSummary,
};
