//! Typing indicator: re-sent every 4 seconds while an LLM stage runs.
//!
//! Telegram's typing status expires after about 5 seconds.

use std::sync::Arc;
use std::time::Duration;

use crate::channels::{IncomingMessage, Outbox, StatusUpdate};

const REFRESH: Duration = Duration::from_secs(4);

/// Background typing loop. Dropping the handle stops it.
pub struct TypingHandle(tokio::task::JoinHandle<()>);

impl TypingHandle {
    /// Send `Typing` to the sender of `msg` now and every 4 seconds.
    pub fn start(outbox: Arc<dyn Outbox>, msg: IncomingMessage) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                outbox.status(&msg, StatusUpdate::Typing).await;
                tokio::time::sleep(REFRESH).await;
            }
        });
        TypingHandle(handle)
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for TypingHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::channels::{FileRef, InboundEvent};
    use crate::error::ChannelError;

    #[derive(Default)]
    struct CountingOutbox {
        typing: AtomicUsize,
    }

    #[async_trait]
    impl Outbox for CountingOutbox {
        async fn send(&self, _to: &IncomingMessage, _text: String) {}

        async fn status(&self, _to: &IncomingMessage, status: StatusUpdate) {
            if status == StatusUpdate::Typing {
                self.typing.fetch_add(1, Ordering::SeqCst);
            }
        }

        async fn fetch_file(
            &self,
            _from: &IncomingMessage,
            _file: &FileRef,
        ) -> Result<Vec<u8>, ChannelError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_until_stopped() {
        let outbox = Arc::new(CountingOutbox::default());
        let msg = IncomingMessage::new("cli", 1, InboundEvent::Text("x".into()));

        let handle = TypingHandle::start(outbox.clone(), msg);
        tokio::time::sleep(Duration::from_secs(9)).await;
        handle.stop();
        let seen = outbox.typing.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(outbox.typing.load(Ordering::SeqCst), seen);
    }
}
