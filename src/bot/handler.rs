//! Per-user event handling.
//!
//! [`BotHandler`] runs inside a user's [`SessionStore`](crate::session::SessionStore)
//! slot, so everything here sees that user's events strictly in order.
//! Each event is gated (allowlist, then rate limit), turned into a
//! [`SessionEvent`], applied with [`transition`], and the resulting
//! [`Effect`] is carried out. Gate rejections never touch the session.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::auth::{Allowlist, AuthorizedUser};
use crate::bot::command::Command;
use crate::bot::formatter::{self, StatusView};
use crate::bot::typing::TypingHandle;
use crate::channels::{FileRef, InboundEvent, IncomingMessage, Outbox};
use crate::error::{AccessError, DatabaseError, PipelineError};
use crate::files;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, with_retry};
use crate::pipeline::{Batch, BatchSource, PipelineOrchestrator, PipelineRun, prompts, record_usage};
use crate::ratelimit::{ActionClass, RateLimiter};
use crate::session::{
    Effect, Message, MessageRole, Mode, Session, SessionEvent, SessionHandler, transition,
};
use crate::store::{Database, StoredMessage};

const CHAT_MAX_TOKENS: u32 = 1024;
const CHAT_TEMPERATURE: f32 = 0.7;

const GENERIC_PIPELINE_ERR: &str = "❌ Processing failed. Please try again shortly.";
const GENERIC_FILE_ERR: &str = "❌ File download failed. Please try again later.";
const GENERIC_CHAT_ERR: &str = "❌ Chat failed temporarily. Please try again later.";
const STORAGE_ERR: &str = "❌ Storage is unavailable right now. Please try again later.";

/// Shared services a handler needs.
#[derive(Clone)]
pub struct BotDeps {
    pub store: Arc<dyn Database>,
    pub llm: Arc<dyn LlmProvider>,
    pub pipeline: Arc<PipelineOrchestrator>,
    pub allowlist: Arc<Allowlist>,
    pub limiter: Arc<RateLimiter>,
    pub outbox: Arc<dyn Outbox>,
}

/// Handles one user's inbound messages against that user's session.
pub struct BotHandler {
    deps: BotDeps,
}

#[async_trait]
impl SessionHandler for BotHandler {
    type Job = IncomingMessage;

    async fn handle(&self, user_id: i64, session: &mut Session, job: IncomingMessage) {
        debug!(user_id, channel = %job.channel, mode = %session.mode(), "Handling message");
        self.handle_message(session, &job).await;
        debug_assert!(session.invariant_holds());
    }

    async fn restore(&self, user_id: i64) -> Session {
        match self.deps.store.latest_tag(user_id).await {
            Ok(tag) => Session::resumed(tag.and_then(|t| t.label)),
            Err(e) => {
                warn!(user_id, "Failed to load last tag: {e}");
                Session::default()
            }
        }
    }
}

impl BotHandler {
    pub fn new(deps: BotDeps) -> Self {
        Self { deps }
    }

    async fn reply(&self, msg: &IncomingMessage, text: impl Into<String>) {
        self.deps.outbox.send(msg, text.into()).await;
    }

    fn typing(&self, msg: &IncomingMessage) -> TypingHandle {
        TypingHandle::start(Arc::clone(&self.deps.outbox), msg.clone())
    }

    pub async fn handle_message(&self, session: &mut Session, msg: &IncomingMessage) {
        match &msg.event {
            InboundEvent::Command { name, args } => {
                self.handle_command(session, msg, Command::parse(name, args))
                    .await
            }
            InboundEvent::Text(text) => {
                // Only chat turns call the model; stored and buffered text is free.
                let class = (session.mode() == Mode::Chat).then_some(ActionClass::Chat);
                let event = SessionEvent::UserMessage(Message::user(text.as_str()));
                self.gated_event(session, msg, event, class).await
            }
            InboundEvent::File(file) => self.handle_file(session, msg, file).await,
        }
    }

    async fn handle_command(&self, session: &mut Session, msg: &IncomingMessage, cmd: Command) {
        if !cmd.is_gated() {
            return self.open_command(session, msg, cmd).await;
        }
        let Some(user) = self.authorize(msg).await else {
            return;
        };

        let event = match cmd {
            Command::Show(id) => return self.show(msg, &user, id).await,
            Command::History => return self.history(msg, &user).await,
            Command::Analyze => {
                if !self.within_rate(msg, ActionClass::Pipeline).await {
                    return;
                }
                SessionEvent::Analyze
            }
            Command::Chat => SessionEvent::EnterChat,
            Command::Process => SessionEvent::EnterProcess,
            Command::Tag { label } => SessionEvent::Tag { label },
            Command::Cancel => SessionEvent::Cancel,
            Command::Clear => SessionEvent::Clear,
            open => return self.open_command(session, msg, open).await,
        };
        self.apply(session, msg, &user, event).await;
    }

    /// Commands anyone may send.
    async fn open_command(&self, session: &Session, msg: &IncomingMessage, cmd: Command) {
        match cmd {
            Command::Start => self.reply(msg, formatter::welcome_text()).await,
            Command::Help => self.reply(msg, formatter::help_text()).await,
            Command::Whoami => {
                let authorized = self.deps.allowlist.is_authorized(msg.user_id).await;
                self.reply(msg, formatter::whoami_text(msg.user_id, authorized))
                    .await;
            }
            Command::Status => self.status(session, msg).await,
            Command::Unknown(name) => {
                self.reply(
                    msg,
                    format!("Unknown command /{name}. Send /help to see available commands."),
                )
                .await;
            }
            gated => debug!(user_id = msg.user_id, ?gated, "Gated command reached the open path"),
        }
    }

    // ── Gating ──────────────────────────────────────────────────────

    async fn authorize(&self, msg: &IncomingMessage) -> Option<AuthorizedUser> {
        match self.deps.allowlist.authorize(msg.user_id).await {
            Ok(user) => Some(user),
            Err(e) => {
                info!(user_id = msg.user_id, "Rejected: {e}");
                self.reply(msg, formatter::unauthorized_text(msg.user_id))
                    .await;
                None
            }
        }
    }

    async fn within_rate(&self, msg: &IncomingMessage, class: ActionClass) -> bool {
        match self.deps.limiter.check(msg.user_id, class) {
            Ok(()) => true,
            Err(AccessError::RateLimited { retry_after, .. }) => {
                let secs = retry_after.as_secs().max(1);
                self.reply(
                    msg,
                    format!("⏳ Too many requests. Please retry in about {secs}s."),
                )
                .await;
                false
            }
            Err(e) => {
                self.reply(msg, format!("❌ {e}")).await;
                false
            }
        }
    }

    async fn gated_event(
        &self,
        session: &mut Session,
        msg: &IncomingMessage,
        event: SessionEvent,
        class: Option<ActionClass>,
    ) {
        let Some(user) = self.authorize(msg).await else {
            return;
        };
        if let Some(class) = class {
            if !self.within_rate(msg, class).await {
                return;
            }
        }
        self.apply(session, msg, &user, event).await;
    }

    async fn handle_file(&self, session: &mut Session, msg: &IncomingMessage, file: &FileRef) {
        let Some(user) = self.authorize(msg).await else {
            return;
        };
        if session.mode() != Mode::Process {
            return self
                .reply(
                    msg,
                    "📎 Files are only accepted in process mode. Send /process first.",
                )
                .await;
        }
        if let Err(e) = files::check_size(file.size) {
            return self.reply(msg, format!("❌ {e}")).await;
        }

        let bytes = match self.deps.outbox.fetch_file(msg, file).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(user_id = user.id, file = %file.name, "File download failed: {e}");
                return self.reply(msg, GENERIC_FILE_ERR).await;
            }
        };

        let text = match files::check_size(bytes.len() as u64)
            .and_then(|()| files::extract_text(&bytes, &file.name))
        {
            Ok(text) => text,
            Err(e) => return self.reply(msg, format!("❌ {e}")).await,
        };
        info!(user_id = user.id, file = %file.name, chars = text.len(), "File extracted");

        self.apply(session, msg, &user, SessionEvent::UserMessage(Message::user(text)))
            .await;
    }

    // ── State machine ───────────────────────────────────────────────

    async fn apply(
        &self,
        session: &mut Session,
        msg: &IncomingMessage,
        user: &AuthorizedUser,
        event: SessionEvent,
    ) {
        let t = transition(session, event);
        *session = t.next;
        self.execute(session, msg, user, t.effect).await;
    }

    async fn execute(
        &self,
        session: &mut Session,
        msg: &IncomingMessage,
        user: &AuthorizedUser,
        effect: Effect,
    ) {
        match effect {
            Effect::ModeEntered { mode, discarded } => {
                let intro = match mode {
                    Mode::Chat => {
                        "💬 Chat mode active. Explore your ideas freely.\n\n\
                         Use /analyze when done: it processes the conversation and exits.\n\
                         Use /tag to mark and exit. Use /cancel to discard and exit."
                    }
                    Mode::Process => {
                        "📥 Process mode. Send the content you want to analyze:\n\n\
                         • Paste plain text\n\
                         • Upload a file (.txt / .md / .json / .csv, max 20 MB)\n\n\
                         Send /analyze when ready, or /cancel to exit."
                    }
                    Mode::None => return,
                };
                self.reply(msg, format!("{intro}{}", discarded_note(discarded)))
                    .await;
            }
            Effect::Accumulated { buffered } => {
                self.reply(
                    msg,
                    format!("📥 Added ({buffered} buffered). Send more, or /analyze when ready."),
                )
                .await;
            }
            Effect::RequestChatReply { history } => {
                self.chat_reply(session, msg, user, &history).await;
            }
            Effect::ReplyRecorded => {}
            Effect::StoreExternal(message) => {
                if let Err(e) = self.deps.store.save_message(user.id, &message.text).await {
                    error!(user_id = user.id, "Failed to store message: {e}");
                    self.reply(msg, STORAGE_ERR).await;
                }
            }
            Effect::RunPipeline { batch, from } => {
                let source = match from {
                    Mode::Chat => BatchSource::Chat,
                    Mode::Process | Mode::None => BatchSource::Process,
                };
                self.run_pipeline(msg, user, Batch::new(source, batch)).await;
            }
            Effect::RunTaggedPipeline => self.run_tagged(msg, user).await,
            Effect::PlaceTag { label, discarded } => {
                match self.deps.store.save_tag(user.id, label.as_deref()).await {
                    Ok(tag) => {
                        info!(user_id = user.id, tag_id = tag.id, "Tag placed");
                        let shown = label.map_or("(no label)".to_string(), |l| format!("\"{l}\""));
                        self.reply(
                            msg,
                            format!(
                                "🏷 Marker placed {shown}\n\
                                 Use /analyze to process all messages after this marker.{}",
                                discarded_note(discarded)
                            ),
                        )
                        .await;
                    }
                    Err(e) => {
                        error!(user_id = user.id, "Failed to save tag: {e}");
                        self.reply(msg, STORAGE_ERR).await;
                    }
                }
            }
            Effect::Cancelled { from, discarded } => {
                let text = if from.is_active() {
                    format!("Cancelled.{}", discarded_note(discarded))
                } else {
                    "Nothing to cancel.".to_string()
                };
                self.reply(msg, text).await;
            }
            Effect::ClearAll { .. } => match self.deps.store.clear_all(user.id).await {
                Ok(removed) => {
                    info!(user_id = user.id, removed, "Cleared user data");
                    self.reply(msg, format!("🗑 Cleared. {removed} record(s) deleted."))
                        .await;
                }
                Err(e) => {
                    error!(user_id = user.id, "Clear failed: {e}");
                    self.reply(msg, STORAGE_ERR).await;
                }
            },
            Effect::Ignored(rejection) => {
                self.reply(msg, format!("⚠️ Not added: {rejection}.")).await;
            }
        }
    }

    // ── Chat ────────────────────────────────────────────────────────

    async fn chat_reply(
        &self,
        session: &mut Session,
        msg: &IncomingMessage,
        user: &AuthorizedUser,
        history: &[Message],
    ) {
        let request = chat_request(history);
        let config = self.deps.pipeline.config();
        let llm = &self.deps.llm;

        let typing = self.typing(msg);
        let result = tokio::time::timeout(
            config.llm_deadline,
            with_retry(config.retry, || llm.complete(request.clone())),
        )
        .await;
        typing.stop();

        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(user_id = user.id, "Chat LLM error: {e}");
                return self.reply(msg, GENERIC_CHAT_ERR).await;
            }
            Err(_) => {
                warn!(user_id = user.id, deadline = ?config.llm_deadline, "Chat LLM timed out");
                return self.reply(msg, GENERIC_CHAT_ERR).await;
            }
        };
        record_usage(
            self.deps.store.as_ref(),
            llm.as_ref(),
            user.id,
            "chat",
            &response,
        )
        .await;

        let reply = response.content.trim().to_string();
        let t = transition(session, SessionEvent::AssistantReply(Message::assistant(reply.as_str())));
        if let Effect::Ignored(rejection) = t.effect {
            warn!(user_id = user.id, %rejection, "Chat reply not recorded");
            return self.reply(msg, GENERIC_CHAT_ERR).await;
        }
        *session = t.next;
        self.reply(msg, reply).await;
    }

    // ── Pipeline ────────────────────────────────────────────────────

    /// Run the pipeline and report the outcome. Returns whether a thought was saved.
    async fn run_pipeline(&self, msg: &IncomingMessage, user: &AuthorizedUser, batch: Batch) -> bool {
        if batch.is_empty() {
            self.reply(
                msg,
                format!(
                    "⚠️ Nothing to analyze in {}.\n\
                     Send some plain messages first, or use /process to paste content directly.",
                    batch.source.describe()
                ),
            )
            .await;
            return false;
        }

        self.reply(
            msg,
            format!(
                "🔍 Analyzing {} message(s) from {}…",
                batch.messages.len(),
                batch.source.describe()
            ),
        )
        .await;

        let typing = self.typing(msg);
        let result = self
            .deps
            .pipeline
            .run(user.id, &batch, user.style.as_deref())
            .await;
        typing.stop();

        match result {
            Ok(run) => {
                self.send_run(msg, &run).await;
                true
            }
            Err(PipelineError::Persist(e)) => {
                error!(user_id = user.id, "Pipeline result not saved: {e}");
                self.reply(
                    msg,
                    "❌ Analysis finished but could not be saved, so nothing was recorded. Please retry /analyze.",
                )
                .await;
                false
            }
            Err(e) => {
                warn!(user_id = user.id, "Pipeline failed: {e}");
                self.reply(msg, GENERIC_PIPELINE_ERR).await;
                false
            }
        }
    }

    async fn send_run(&self, msg: &IncomingMessage, run: &PipelineRun) {
        let thought_id = run.thought.id;
        self.reply(msg, formatter::format_analysis(&run.thought)).await;
        for output in &run.outputs {
            let (text, _) = formatter::format_platform_output(output.platform, &output.content, thought_id);
            self.reply(msg, text).await;
        }
        if run.is_partial() {
            self.reply(msg, formatter::format_failures(&run.failures, thought_id))
                .await;
        }
    }

    /// `/analyze` with no live session: messages after the latest tag, or
    /// today's messages when no tag exists. Consumed only on success.
    async fn run_tagged(&self, msg: &IncomingMessage, user: &AuthorizedUser) {
        let store = &self.deps.store;
        let tag = match store.latest_tag(user.id).await {
            Ok(tag) => tag,
            Err(e) => {
                error!(user_id = user.id, "Failed to load tag: {e}");
                return self.reply(msg, STORAGE_ERR).await;
            }
        };

        let (source, stored) = match &tag {
            Some(tag) => (
                BatchSource::Tag {
                    label: tag.label.clone(),
                },
                store.messages_since(user.id, tag.id).await,
            ),
            None => (BatchSource::Today, store.messages_today(user.id).await),
        };
        let stored = match stored {
            Ok(stored) => stored,
            Err(e) => {
                error!(user_id = user.id, "Failed to load messages: {e}");
                return self.reply(msg, STORAGE_ERR).await;
            }
        };

        let last_id = stored.last().map(|m| m.id);
        let batch = Batch::new(source, stored.iter().map(StoredMessage::to_message).collect());

        if !self.run_pipeline(msg, user, batch).await {
            if last_id.is_some() {
                self.reply(msg, "⚠️ Messages were kept so you can retry /analyze.")
                    .await;
            }
            return;
        }

        if let Some(up_to) = last_id {
            if let Err(e) = store.consume_messages(user.id, up_to).await {
                warn!(user_id = user.id, "Failed to consume analyzed messages: {e}");
            }
        }
        if let Some(tag) = tag {
            if let Err(e) = store.delete_tag(user.id, tag.id).await {
                warn!(user_id = user.id, tag_id = tag.id, "Failed to delete tag: {e}");
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    async fn show(&self, msg: &IncomingMessage, user: &AuthorizedUser, id: Option<i64>) {
        let Some(id) = id else {
            return self.reply(msg, "Usage: /show <id>").await;
        };
        match self.deps.store.get_by_id(user.id, id).await {
            Ok((thought, outputs)) => {
                for text in formatter::format_full_record(&thought, &outputs) {
                    self.reply(msg, text).await;
                }
            }
            Err(DatabaseError::NotFound { .. }) => {
                self.reply(msg, format!("❌ Record #{id} not found (or no permission)."))
                    .await;
            }
            Err(e) => {
                error!(user_id = user.id, thought_id = id, "Lookup failed: {e}");
                self.reply(msg, STORAGE_ERR).await;
            }
        }
    }

    async fn history(&self, msg: &IncomingMessage, user: &AuthorizedUser) {
        match self
            .deps
            .store
            .list_recent(user.id, formatter::HISTORY_LIMIT)
            .await
        {
            Ok(thoughts) => self.reply(msg, formatter::format_history(&thoughts)).await,
            Err(e) => {
                error!(user_id = user.id, "History failed: {e}");
                self.reply(msg, STORAGE_ERR).await;
            }
        }
    }

    async fn status(&self, session: &Session, msg: &IncomingMessage) {
        let authorized = self.deps.allowlist.is_authorized(msg.user_id).await;
        let (count, usage) = if authorized {
            (
                self.deps.store.count_thoughts(msg.user_id).await.ok(),
                self.deps.store.usage_summary(msg.user_id).await.ok(),
            )
        } else {
            (None, None)
        };

        let view = StatusView {
            provider: self.deps.llm.provider_name(),
            model: self.deps.llm.model_name(),
            authorized,
            mode: session.mode(),
            buffered: session.buffer().len(),
            last_tag: session.last_tag_label(),
            thought_count: count,
            usage: usage.as_ref(),
        };
        self.reply(msg, formatter::format_status(&view)).await;
    }
}

fn discarded_note(discarded: usize) -> String {
    if discarded == 0 {
        String::new()
    } else {
        format!("\n({discarded} buffered message(s) discarded)")
    }
}

fn chat_request(history: &[Message]) -> CompletionRequest {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(prompts::chat_system_prompt()));
    messages.extend(history.iter().map(|m| match m.role {
        MessageRole::User => ChatMessage::user(m.text.as_str()),
        MessageRole::Assistant => ChatMessage::assistant(m.text.as_str()),
    }));
    CompletionRequest::new(messages)
        .with_max_tokens(CHAT_MAX_TOKENS)
        .with_temperature(CHAT_TEMPERATURE)
}
