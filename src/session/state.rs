//! Session state machine.
//!
//! A session is a mode plus the messages accumulated while in it. Every
//! mutation goes through [`transition`], a pure function from the current
//! session and an event to the next session and the side effect the caller
//! must carry out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::accumulator::{Accumulator, Rejection};

/// Interaction mode of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// No live session; plain messages are stored for later tag-bounded analysis.
    #[default]
    None,
    /// Conversational idea exploration with the model.
    Chat,
    /// Collecting pasted text and files for analysis.
    Process,
}

impl Mode {
    /// Whether a live session (and therefore a buffer) exists.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Chat => "chat",
            Self::Process => "process",
        };
        write!(f, "{s}")
    }
}

/// Author of a buffered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One accumulated message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Live per-user session. The buffer is non-empty only while `mode` is active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    mode: Mode,
    buffer: Vec<Message>,
    last_tag_label: Option<String>,
}

impl Session {
    /// Idle session remembering a tag placed by an earlier worker.
    pub fn resumed(last_tag_label: Option<String>) -> Self {
        Self {
            last_tag_label,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn buffer(&self) -> &[Message] {
        &self.buffer
    }

    pub fn last_tag_label(&self) -> Option<&str> {
        self.last_tag_label.as_deref()
    }

    /// No mode and nothing buffered; safe to drop.
    pub fn is_idle(&self) -> bool {
        !self.mode.is_active() && self.buffer.is_empty()
    }

    pub fn invariant_holds(&self) -> bool {
        self.buffer.is_empty() || self.mode.is_active()
    }

    /// Back to `Mode::None` with an empty buffer, keeping the tag label.
    fn reset(&self) -> Session {
        Session {
            mode: Mode::None,
            buffer: Vec::new(),
            last_tag_label: self.last_tag_label.clone(),
        }
    }

    fn enter(&self, mode: Mode) -> Session {
        Session {
            mode,
            buffer: Vec::new(),
            last_tag_label: self.last_tag_label.clone(),
        }
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    EnterChat,
    EnterProcess,
    /// Plain text or extracted file content from the user.
    UserMessage(Message),
    /// Model reply produced during Chat.
    AssistantReply(Message),
    Analyze,
    Cancel,
    Tag { label: Option<String> },
    Clear,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A mode was entered; `discarded` buffered messages were dropped.
    ModeEntered { mode: Mode, discarded: usize },
    /// Message appended in Process mode.
    Accumulated { buffered: usize },
    /// Message appended in Chat mode; ask the model for a reply over `history`.
    RequestChatReply { history: Vec<Message> },
    /// Assistant turn appended.
    ReplyRecorded,
    /// No live session: persist the message for tag-bounded analysis.
    StoreExternal(Message),
    /// Run the pipeline over the live buffer taken from `from`.
    RunPipeline { batch: Vec<Message>, from: Mode },
    /// Run the pipeline over stored messages after the latest tag.
    RunTaggedPipeline,
    /// Persist a tag; the live buffer (if any) was discarded.
    PlaceTag {
        label: Option<String>,
        discarded: usize,
    },
    Cancelled { from: Mode, discarded: usize },
    /// Delete every persisted record of the user.
    ClearAll { discarded: usize },
    /// Event refused; the session is unchanged.
    Ignored(Rejection),
}

/// Result of applying an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Session,
    pub effect: Effect,
}

impl Transition {
    fn new(next: Session, effect: Effect) -> Self {
        Self { next, effect }
    }

    fn unchanged(session: &Session, rejection: Rejection) -> Self {
        Self::new(session.clone(), Effect::Ignored(rejection))
    }
}

/// Apply `event` to `session`.
pub fn transition(session: &Session, event: SessionEvent) -> Transition {
    use SessionEvent as E;

    match event {
        E::EnterChat => enter_mode(session, Mode::Chat),
        E::EnterProcess => enter_mode(session, Mode::Process),

        E::UserMessage(message) => {
            if let Err(rejection) = Accumulator::accept(session.mode, &session.buffer, &message) {
                return Transition::unchanged(session, rejection);
            }
            match session.mode {
                Mode::None => Transition::new(
                    session.clone(),
                    Effect::StoreExternal(Accumulator::normalize(message)),
                ),
                Mode::Chat => {
                    let mut next = session.clone();
                    Accumulator::append(&mut next.buffer, message);
                    let history = next.buffer.clone();
                    Transition::new(next, Effect::RequestChatReply { history })
                }
                Mode::Process => {
                    let mut next = session.clone();
                    Accumulator::append(&mut next.buffer, message);
                    let buffered = next.buffer.len();
                    Transition::new(next, Effect::Accumulated { buffered })
                }
            }
        }

        E::AssistantReply(message) => {
            if let Err(rejection) = Accumulator::accept(session.mode, &session.buffer, &message) {
                return Transition::unchanged(session, rejection);
            }
            let mut next = session.clone();
            Accumulator::append(&mut next.buffer, message);
            Transition::new(next, Effect::ReplyRecorded)
        }

        E::Analyze => match session.mode {
            Mode::None => Transition::new(session.clone(), Effect::RunTaggedPipeline),
            from => Transition::new(
                session.reset(),
                Effect::RunPipeline {
                    batch: session.buffer.clone(),
                    from,
                },
            ),
        },

        E::Cancel => Transition::new(
            session.reset(),
            Effect::Cancelled {
                from: session.mode,
                discarded: session.buffer.len(),
            },
        ),

        E::Tag { label } => {
            let mut next = session.reset();
            next.last_tag_label = label.clone();
            Transition::new(
                next,
                Effect::PlaceTag {
                    label,
                    discarded: session.buffer.len(),
                },
            )
        }

        E::Clear => Transition::new(
            Session::default(),
            Effect::ClearAll {
                discarded: session.buffer.len(),
            },
        ),
    }
}

fn enter_mode(session: &Session, mode: Mode) -> Transition {
    Transition::new(
        session.enter(mode),
        Effect::ModeEntered {
            mode,
            discarded: session.buffer.len(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(session: &Session, events: impl IntoIterator<Item = SessionEvent>) -> Session {
        events
            .into_iter()
            .fold(session.clone(), |s, e| transition(&s, e).next)
    }

    fn all_events() -> Vec<SessionEvent> {
        vec![
            SessionEvent::EnterChat,
            SessionEvent::EnterProcess,
            SessionEvent::UserMessage(Message::user("idea")),
            SessionEvent::UserMessage(Message::user("   ")),
            SessionEvent::AssistantReply(Message::assistant("reply")),
            SessionEvent::Analyze,
            SessionEvent::Cancel,
            SessionEvent::Tag {
                label: Some("foo".into()),
            },
            SessionEvent::Clear,
        ]
    }

    #[test]
    fn buffer_empty_whenever_mode_is_none() {
        // Every sequence of up to four events from every reachable start.
        let events = all_events();
        let mut frontier = vec![Session::default()];
        for _ in 0..4 {
            let mut next_frontier = Vec::new();
            for s in &frontier {
                for e in &events {
                    let t = transition(s, e.clone());
                    assert!(t.next.invariant_holds(), "{s:?} + {e:?} -> {:?}", t.next);
                    next_frontier.push(t.next);
                }
            }
            next_frontier.dedup();
            frontier = next_frontier;
        }
    }

    #[test]
    fn enter_modes_from_none() {
        let t = transition(&Session::default(), SessionEvent::EnterChat);
        assert_eq!(t.next.mode(), Mode::Chat);
        assert_eq!(
            t.effect,
            Effect::ModeEntered {
                mode: Mode::Chat,
                discarded: 0
            }
        );

        let t = transition(&Session::default(), SessionEvent::EnterProcess);
        assert_eq!(t.next.mode(), Mode::Process);
    }

    #[test]
    fn chat_message_requests_reply_with_full_history() {
        let s = apply(
            &Session::default(),
            [
                SessionEvent::EnterChat,
                SessionEvent::UserMessage(Message::user("one")),
                SessionEvent::AssistantReply(Message::assistant("r1")),
            ],
        );
        let t = transition(&s, SessionEvent::UserMessage(Message::user("two")));
        match t.effect {
            Effect::RequestChatReply { history } => {
                let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
                assert_eq!(texts, vec!["one", "r1", "two"]);
                assert_eq!(history[1].role, MessageRole::Assistant);
            }
            other => panic!("unexpected effect {other:?}"),
        }
        assert_eq!(t.next.buffer().len(), 3);
    }

    #[test]
    fn process_accumulates_user_messages() {
        let s = apply(&Session::default(), [SessionEvent::EnterProcess]);
        let t = transition(&s, SessionEvent::UserMessage(Message::user("  pasted  ")));
        assert_eq!(t.effect, Effect::Accumulated { buffered: 1 });
        assert_eq!(t.next.buffer()[0].text, "pasted");
    }

    #[test]
    fn assistant_reply_outside_chat_is_ignored() {
        let s = apply(&Session::default(), [SessionEvent::EnterProcess]);
        let t = transition(&s, SessionEvent::AssistantReply(Message::assistant("x")));
        assert_eq!(t.effect, Effect::Ignored(Rejection::AssistantOutsideChat));
        assert_eq!(t.next, s);
    }

    #[test]
    fn analyze_in_mode_hands_over_buffer_and_resets() {
        let s = apply(
            &Session::default(),
            [
                SessionEvent::EnterProcess,
                SessionEvent::UserMessage(Message::user("a")),
                SessionEvent::UserMessage(Message::user("b")),
            ],
        );
        let t = transition(&s, SessionEvent::Analyze);
        assert_eq!(t.next.mode(), Mode::None);
        assert!(t.next.buffer().is_empty());
        match t.effect {
            Effect::RunPipeline { batch, from } => {
                assert_eq!(from, Mode::Process);
                assert_eq!(batch.len(), 2);
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn analyze_without_session_uses_tag_path() {
        let t = transition(&Session::default(), SessionEvent::Analyze);
        assert_eq!(t.effect, Effect::RunTaggedPipeline);
        assert_eq!(t.next, Session::default());
    }

    #[test]
    fn plain_message_without_session_is_stored_externally() {
        let t = transition(&Session::default(), SessionEvent::UserMessage(Message::user("x ")));
        match t.effect {
            Effect::StoreExternal(m) => assert_eq!(m.text, "x"),
            other => panic!("unexpected effect {other:?}"),
        }
        assert!(t.next.buffer().is_empty());
    }

    #[test]
    fn switching_modes_discards_buffer() {
        let s = apply(
            &Session::default(),
            [
                SessionEvent::EnterChat,
                SessionEvent::UserMessage(Message::user("a")),
            ],
        );
        let t = transition(&s, SessionEvent::EnterProcess);
        assert_eq!(t.next.mode(), Mode::Process);
        assert!(t.next.buffer().is_empty());
        assert_eq!(
            t.effect,
            Effect::ModeEntered {
                mode: Mode::Process,
                discarded: 1
            }
        );
    }

    #[test]
    fn resumed_session_is_idle_with_label() {
        let s = Session::resumed(Some("launch".into()));
        assert!(s.is_idle());
        assert_eq!(s.last_tag_label(), Some("launch"));
        let t = transition(&s, SessionEvent::EnterChat);
        assert_eq!(t.next.last_tag_label(), Some("launch"));
    }

    #[test]
    fn tag_ends_session_and_remembers_label() {
        let s = apply(
            &Session::default(),
            [
                SessionEvent::EnterProcess,
                SessionEvent::UserMessage(Message::user("a")),
            ],
        );
        let t = transition(
            &s,
            SessionEvent::Tag {
                label: Some("foo".into()),
            },
        );
        assert_eq!(t.next.mode(), Mode::None);
        assert_eq!(t.next.last_tag_label(), Some("foo"));
        assert_eq!(
            t.effect,
            Effect::PlaceTag {
                label: Some("foo".into()),
                discarded: 1
            }
        );
    }

    #[test]
    fn cancel_and_clear() {
        let s = apply(
            &Session::default(),
            [
                SessionEvent::Tag {
                    label: Some("t".into()),
                },
                SessionEvent::EnterChat,
                SessionEvent::UserMessage(Message::user("a")),
            ],
        );
        let cancelled = transition(&s, SessionEvent::Cancel);
        assert_eq!(
            cancelled.effect,
            Effect::Cancelled {
                from: Mode::Chat,
                discarded: 1
            }
        );
        assert_eq!(cancelled.next.last_tag_label(), Some("t"));

        let cleared = transition(&s, SessionEvent::Clear);
        assert_eq!(cleared.effect, Effect::ClearAll { discarded: 1 });
        assert_eq!(cleared.next, Session::default());
    }

    #[test]
    fn mode_display() {
        assert_eq!(Mode::None.to_string(), "none");
        assert_eq!(Mode::Process.to_string(), "process");
        assert!(Mode::Chat.is_active());
    }
}
