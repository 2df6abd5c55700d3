//! Channel trait and the message types that cross the transport boundary.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use uuid::Uuid;

use crate::error::ChannelError;

/// A file attached to an inbound message. Content is fetched on demand
/// through [`Channel::fetch_file`] so the size can be checked first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Transport-specific handle (Telegram `file_id`).
    pub file_id: String,
    pub name: String,
    /// Size reported by the transport, in bytes.
    pub size: u64,
    pub mime: Option<String>,
}

/// What the user sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// `/name args...`, with any `@botname` suffix removed from `name`.
    Command { name: String, args: Vec<String> },
    Text(String),
    File(FileRef),
}

impl InboundEvent {
    /// Classify a line of text as a command or plain text.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Self::Text(trimmed.to_string());
        };

        let mut parts = rest.split_whitespace();
        let head = parts.next().unwrap_or_default();
        let name = head.split('@').next().unwrap_or_default().to_lowercase();
        if name.is_empty() {
            return Self::Text(trimmed.to_string());
        }

        Self::Command {
            name,
            args: parts.map(String::from).collect(),
        }
    }
}

/// A message received from a channel.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: Uuid,
    /// Name of the channel that produced it.
    pub channel: String,
    pub user_id: i64,
    pub user_name: Option<String>,
    pub event: InboundEvent,
    pub received_at: DateTime<Utc>,
    /// Routing data for replies (e.g. `chat_id`).
    pub metadata: serde_json::Value,
}

impl IncomingMessage {
    pub fn new(channel: impl Into<String>, user_id: i64, event: InboundEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            user_id,
            user_name: None,
            event,
            received_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A reply to send back on the originating channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingResponse {
    pub content: String,
}

impl OutgoingResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Transient progress signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// The bot is working on a reply.
    Typing,
}

pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// A message transport.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin receiving messages.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;

    async fn send_status(
        &self,
        status: StatusUpdate,
        metadata: &serde_json::Value,
    ) -> Result<(), ChannelError>;

    /// Download an attached file.
    async fn fetch_file(&self, file: &FileRef) -> Result<Vec<u8>, ChannelError> {
        Err(ChannelError::InvalidMessage(format!(
            "channel {} does not support file uploads ({})",
            self.name(),
            file.name
        )))
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
