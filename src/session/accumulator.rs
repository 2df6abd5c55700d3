//! Mode-specific rules for adding messages to a session buffer.

use serde::{Deserialize, Serialize};

use crate::session::state::{Message, MessageRole, Mode};

/// Why a message was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    EmptyMessage,
    /// Assistant turns only exist in Chat mode.
    AssistantOutsideChat,
    BufferFull { limit: usize },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "message is empty"),
            Self::AssistantOutsideChat => write!(f, "assistant replies only belong to chat mode"),
            Self::BufferFull { limit } => write!(f, "session already holds {limit} messages"),
        }
    }
}

/// Stateless buffer rules.
pub struct Accumulator;

impl Accumulator {
    /// Upper bound on buffered messages per session.
    pub const MAX_BUFFERED: usize = 200;

    /// Check whether `message` may be added to `buffer` in `mode`.
    pub fn accept(mode: Mode, buffer: &[Message], message: &Message) -> Result<(), Rejection> {
        if message.text.trim().is_empty() {
            return Err(Rejection::EmptyMessage);
        }
        if message.role == MessageRole::Assistant && mode != Mode::Chat {
            return Err(Rejection::AssistantOutsideChat);
        }
        if mode.is_active() && buffer.len() >= Self::MAX_BUFFERED {
            return Err(Rejection::BufferFull {
                limit: Self::MAX_BUFFERED,
            });
        }
        Ok(())
    }

    /// Trim surrounding whitespace.
    pub fn normalize(mut message: Message) -> Message {
        let trimmed = message.text.trim();
        if trimmed.len() != message.text.len() {
            message.text = trimmed.to_string();
        }
        message
    }

    pub fn append(buffer: &mut Vec<Message>, message: Message) {
        buffer.push(Self::normalize(message));
    }

    /// Flatten a batch into one text. Conversations keep speaker labels;
    /// user-only batches are joined as paragraphs.
    pub fn render(batch: &[Message]) -> String {
        let conversational = batch.iter().any(|m| m.role == MessageRole::Assistant);
        batch
            .iter()
            .map(|m| {
                if !conversational {
                    return m.text.clone();
                }
                match m.role {
                    MessageRole::User => format!("User: {}", m.text),
                    MessageRole::Assistant => format!("Assistant: {}", m.text),
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
