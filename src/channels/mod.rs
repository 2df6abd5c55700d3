//! Channel abstraction for message I/O.

pub mod channel;
pub mod cli;
pub mod manager;
pub mod telegram;

pub use channel::*;
pub use cli::CliChannel;
pub use manager::{ChannelManager, Outbox};
pub use telegram::TelegramChannel;
