//! Per-user session handling.
//!
//! - `state`: the mode state machine and its pure `transition` function
//! - `accumulator`: rules for what may enter a session buffer
//! - `store`: per-user serialized execution slots owning each session

pub mod accumulator;
pub mod state;
pub mod store;

pub use accumulator::{Accumulator, Rejection};
pub use state::{Effect, Message, MessageRole, Mode, Session, SessionEvent, Transition, transition};
pub use store::{SessionHandler, SessionStore};
