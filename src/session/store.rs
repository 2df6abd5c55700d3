//! Per-user execution slots.
//!
//! Each user gets a lazily spawned worker task that owns that user's
//! [`Session`] and drains an unbounded job queue in order. Jobs for one user
//! never interleave; different users run independently. A worker whose
//! session is idle and whose queue stays empty for `idle_timeout` removes
//! its slot and exits.
//!
//! All sends happen under the slot-map lock, and a worker only retires after
//! confirming its queue is empty while holding that lock, so no job is lost
//! between the check and the removal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::session::state::Session;

/// Work executed against a user's session, one job at a time.
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    type Job: Send + 'static;

    async fn handle(&self, user_id: i64, session: &mut Session, job: Self::Job);

    /// Session a fresh worker starts from.
    async fn restore(&self, _user_id: i64) -> Session {
        Session::default()
    }
}

type Slots<J> = Arc<Mutex<HashMap<i64, mpsc::UnboundedSender<J>>>>;

/// Arena of per-user queues.
pub struct SessionStore<H: SessionHandler> {
    handler: Arc<H>,
    slots: Slots<H::Job>,
    idle_timeout: Duration,
}

impl<H: SessionHandler> SessionStore<H> {
    pub fn new(handler: Arc<H>, idle_timeout: Duration) -> Self {
        Self {
            handler,
            slots: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout,
        }
    }

    /// Queue `job` behind everything already queued for `user_id`.
    pub fn submit(&self, user_id: i64, job: H::Job) {
        let mut slots = lock(&self.slots);

        let job = match slots.get(&user_id) {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                // Worker died (handler panic); start a fresh one.
                Err(mpsc::error::SendError(job)) => {
                    warn!(user_id, "Session worker gone, restarting");
                    job
                }
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(job).is_err() {
            return;
        }
        slots.insert(user_id, tx);
        debug!(user_id, "Session worker started");

        tokio::spawn(run_worker(
            user_id,
            rx,
            Arc::clone(&self.handler),
            Arc::clone(&self.slots),
            self.idle_timeout,
        ));
    }

    /// Number of users with a live worker.
    pub fn active_sessions(&self) -> usize {
        lock(&self.slots).len()
    }
}

async fn run_worker<H: SessionHandler>(
    user_id: i64,
    mut rx: mpsc::UnboundedReceiver<H::Job>,
    handler: Arc<H>,
    slots: Slots<H::Job>,
    idle_timeout: Duration,
) {
    let mut session = handler.restore(user_id).await;

    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(job)) => handler.handle(user_id, &mut session, job).await,
            Ok(None) => break,
            Err(_) => {
                // A live mode keeps the worker (and its buffer) around.
                if session.is_idle() && try_retire(user_id, &rx, &slots) {
                    debug!(user_id, "Session worker retired after idle timeout");
                    break;
                }
            }
        }
    }
}

fn try_retire<J>(user_id: i64, rx: &mpsc::UnboundedReceiver<J>, slots: &Slots<J>) -> bool {
    let mut slots = lock(slots);
    if !rx.is_empty() {
        return false;
    }
    slots.remove(&user_id);
    true
}

fn lock<J>(
    slots: &Slots<J>,
) -> std::sync::MutexGuard<'_, HashMap<i64, mpsc::UnboundedSender<J>>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
