//! Media Leverage: turns raw ideas into platform-tailored posts.

pub mod auth;
pub mod bot;
pub mod channels;
pub mod config;
pub mod error;
pub mod files;
pub mod llm;
pub mod pipeline;
pub mod ratelimit;
pub mod session;
pub mod store;
