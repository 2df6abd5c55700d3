//! Fan-in of every channel's message stream and routing of replies.

use async_trait::async_trait;
use futures::stream;

use crate::channels::{
    Channel, FileRef, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate,
};
use crate::error::ChannelError;

/// Owns the configured channels.
#[derive(Default)]
pub struct ChannelManager {
    channels: Vec<Box<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, channel: Box<dyn Channel>) {
        self.channels.push(channel);
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    fn get(&self, name: &str) -> Result<&dyn Channel, ChannelError> {
        self.channels
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
            .ok_or_else(|| ChannelError::SendFailed {
                name: name.to_string(),
                reason: "unknown channel".to_string(),
            })
    }

    /// Start every channel and merge their streams. A channel that fails to
    /// start is logged and skipped; it is an error only if none start.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let mut streams = Vec::new();
        for channel in &self.channels {
            match channel.start().await {
                Ok(s) => {
                    tracing::info!(channel = channel.name(), "Channel started");
                    streams.push(s);
                }
                Err(e) => tracing::error!(channel = channel.name(), "Channel failed to start: {e}"),
            }
        }

        if streams.is_empty() {
            return Err(ChannelError::StartupFailed {
                name: "all".to_string(),
                reason: "no channel could be started".to_string(),
            });
        }
        Ok(Box::pin(stream::select_all(streams)))
    }

    /// Reply on the channel the message came from.
    pub async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        self.get(&msg.channel)?.respond(msg, response).await
    }

    pub async fn send_status(
        &self,
        msg: &IncomingMessage,
        status: StatusUpdate,
    ) -> Result<(), ChannelError> {
        self.get(&msg.channel)?
            .send_status(status, &msg.metadata)
            .await
    }

    pub async fn fetch_file(
        &self,
        msg: &IncomingMessage,
        file: &FileRef,
    ) -> Result<Vec<u8>, ChannelError> {
        self.get(&msg.channel)?.fetch_file(file).await
    }

    pub async fn shutdown_all(&self) -> Result<(), ChannelError> {
        for channel in &self.channels {
            if let Err(e) = channel.shutdown().await {
                tracing::warn!(channel = channel.name(), "Channel shutdown failed: {e}");
            }
        }
        Ok(())
    }
}

/// Where handlers send replies. Implemented by [`ChannelManager`] in
/// production and by recorders in tests.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Send `text` to the sender of `to`. Delivery failures are logged.
    async fn send(&self, to: &IncomingMessage, text: String);

    async fn status(&self, to: &IncomingMessage, status: StatusUpdate);

    async fn fetch_file(
        &self,
        from: &IncomingMessage,
        file: &FileRef,
    ) -> Result<Vec<u8>, ChannelError>;
}

#[async_trait]
impl Outbox for ChannelManager {
    async fn send(&self, to: &IncomingMessage, text: String) {
        if text.is_empty() {
            return;
        }
        if let Err(e) = self.respond(to, OutgoingResponse::text(text)).await {
            tracing::warn!(channel = %to.channel, user_id = to.user_id, "Reply failed: {e}");
        }
    }

    async fn status(&self, to: &IncomingMessage, status: StatusUpdate) {
        if let Err(e) = self.send_status(to, status).await {
            tracing::debug!(channel = %to.channel, "Status update failed: {e}");
        }
    }

    async fn fetch_file(
        &self,
        from: &IncomingMessage,
        file: &FileRef,
    ) -> Result<Vec<u8>, ChannelError> {
        ChannelManager::fetch_file(self, from, file).await
    }
}
