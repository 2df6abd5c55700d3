//! The bot: command parsing, reply formatting, and the main loop that feeds
//! channel messages into per-user session slots.

pub mod command;
pub mod formatter;
pub mod handler;
pub mod typing;

pub use command::Command;
pub use handler::{BotDeps, BotHandler};

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use crate::channels::ChannelManager;
use crate::error::Error;
use crate::ratelimit::RateLimiter;
use crate::session::SessionStore;

/// How often drained rate-limit windows are dropped.
const PRUNE_INTERVAL: Duration = Duration::from_secs(600);

/// Main loop: routes each inbound message to its user's session slot.
pub struct Bot {
    channels: Arc<ChannelManager>,
    sessions: SessionStore<BotHandler>,
    limiter: Arc<RateLimiter>,
}

impl Bot {
    /// `deps.outbox` should deliver through `channels`.
    pub fn new(channels: Arc<ChannelManager>, deps: BotDeps, idle_timeout: Duration) -> Self {
        let limiter = Arc::clone(&deps.limiter);
        let sessions = SessionStore::new(Arc::new(BotHandler::new(deps)), idle_timeout);
        Self {
            channels,
            sessions,
            limiter,
        }
    }

    /// Run until Ctrl+C or until every channel stream ends.
    pub async fn run(self) -> Result<(), Error> {
        let mut messages = self.channels.start_all().await?;

        let limiter = Arc::clone(&self.limiter);
        let pruning_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                limiter.prune();
            }
        });

        tracing::info!(channels = ?self.channels.names(), "Bot ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    break;
                }
                msg = messages.next() => match msg {
                    Some(m) => m,
                    None => {
                        tracing::info!("All channel streams ended, shutting down...");
                        break;
                    }
                },
            };

            self.sessions.submit(message.user_id, message);
        }

        pruning_handle.abort();
        tracing::info!(active_sessions = self.sessions.active_sessions(), "Bot shutting down");
        self.channels.shutdown_all().await?;
        Ok(())
    }
}
