//! Telegram channel: long-polls the Bot API for updates.
//!
//! Authorization is not decided here; every text or document message is
//! forwarded with the sender's numeric id and the bot gates it.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::channels::{
    Channel, FileRef, InboundEvent, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate,
};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
pub const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

const API_BASE: &str = "https://api.telegram.org";

/// Telegram channel: connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(self.bot_token.expose_secret(), method)
    }

    /// Send a text message, trying Markdown first with plain text fallback.
    /// Splits long messages that exceed Telegram's 4096 char limit.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    async fn send_message_chunk(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let markdown = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&markdown)
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        if resp.status().is_success() {
            return Ok(());
        }

        // Unbalanced Markdown entities are rejected; resend as plain text.
        tracing::debug!(status = %resp.status(), "Markdown send rejected, retrying as plain text");
        let plain = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain)
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(send_failed(format!("sendMessage returned {status}: {body}")))
        }
    }
}

fn api_url(token: &str, method: &str) -> String {
    format!("{API_BASE}/bot{token}/{method}")
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: "telegram".into(),
        reason,
    }
}

/// Resolve a `file_id` to its download path and fetch the bytes.
async fn download_file(
    client: &reqwest::Client,
    token: &str,
    file_id: &str,
) -> anyhow::Result<Vec<u8>> {
    let data: Value = client
        .post(api_url(token, "getFile"))
        .json(&serde_json::json!({ "file_id": file_id }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let path = data
        .get("result")
        .and_then(|r| r.get("file_path"))
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("getFile response has no file_path"))?;

    let bytes = client
        .get(format!("{API_BASE}/file/bot{token}/{path}"))
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    Ok(bytes.to_vec())
}

/// Turn one getUpdates entry into an inbound message. Updates that carry
/// neither text nor a document are skipped.
fn parse_update(update: &Value) -> Option<IncomingMessage> {
    let message = update.get("message")?;
    let from = message.get("from")?;
    let user_id = from.get("id").and_then(Value::as_i64)?;

    let event = if let Some(text) = message.get("text").and_then(Value::as_str) {
        InboundEvent::from_text(text)
    } else if let Some(doc) = message.get("document") {
        InboundEvent::File(FileRef {
            file_id: doc.get("file_id").and_then(Value::as_str)?.to_string(),
            name: doc
                .get("file_name")
                .and_then(Value::as_str)
                .unwrap_or("upload.txt")
                .to_string(),
            size: doc.get("file_size").and_then(Value::as_u64).unwrap_or(0),
            mime: doc
                .get("mime_type")
                .and_then(Value::as_str)
                .map(String::from),
        })
    } else {
        return None;
    };

    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)
        .unwrap_or(user_id)
        .to_string();

    let username = from.get("username").and_then(Value::as_str);
    let display = from
        .get("first_name")
        .and_then(Value::as_str)
        .or(username);

    let mut incoming = IncomingMessage::new("telegram", user_id, event).with_metadata(
        serde_json::json!({
            "chat_id": chat_id,
            "username": username,
        }),
    );
    if let Some(name) = display {
        incoming = incoming.with_user_name(name);
    }
    Some(incoming)
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        self.health_check().await?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let token = self.bot_token.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            let url = api_url(token.expose_secret(), "getUpdates");

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    continue;
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(incoming) = parse_update(update) else {
                        continue;
                    };

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let chat_id = msg
            .metadata
            .get("chat_id")
            .and_then(Value::as_str)
            .ok_or_else(|| send_failed("No chat_id in message metadata".into()))?;

        self.send_message(chat_id, &response.content).await
    }

    async fn send_status(&self, status: StatusUpdate, metadata: &Value) -> Result<(), ChannelError> {
        let Some(chat_id) = metadata.get("chat_id").and_then(Value::as_str) else {
            return Ok(());
        };
        match status {
            StatusUpdate::Typing => {
                let _ = self
                    .client
                    .post(self.api_url("sendChatAction"))
                    .json(&serde_json::json!({
                        "chat_id": chat_id,
                        "action": "typing"
                    }))
                    .send()
                    .await;
            }
        }
        Ok(())
    }

    async fn fetch_file(&self, file: &FileRef) -> Result<Vec<u8>, ChannelError> {
        download_file(&self.client, self.bot_token.expose_secret(), &file.file_id)
            .await
            .map_err(|e| ChannelError::Http(format!("download of {} failed: {e:#}", file.name)))
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

/// Split a message into chunks of at most `max_chars` characters.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.chars().count() > max_chars {
        let limit = remaining
            .char_indices()
            .nth(max_chars)
            .map_or(remaining.len(), |(i, _)| i);
        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    if !remaining.is_empty() || chunks.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}
