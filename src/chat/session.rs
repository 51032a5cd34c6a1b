//! Per-chat session state: the single-active-request rule, cancellation,
//! and clarification bookkeeping.

use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

/// Cancellation handle passed into a running request. Cheap to clone.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation fires. Also resolves if the session
    /// entry disappears, which only happens after the request ended.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

struct ActiveRequest {
    request_id: Uuid,
    cancel_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct ClarificationState {
    used: usize,
    pending_call_id: Option<String>,
}

pub struct SessionRegistry {
    active: DashMap<String, ActiveRequest>,
    clarifications: DashMap<String, ClarificationState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
            clarifications: DashMap::new(),
        }
    }

    /// Begin a request for this chat. At most one request per chatId may
    /// be live; a previous one is cancelled before the new token is
    /// handed out.
    pub fn begin(&self, chat_id: &str) -> (Uuid, CancelToken) {
        let request_id = Uuid::new_v4();
        let (cancel_tx, rx) = watch::channel(false);

        if let Some(previous) = self.active.insert(
            chat_id.to_string(),
            ActiveRequest {
                request_id,
                cancel_tx,
            },
        ) {
            log::info!("chat {}: new request supersedes the live one", chat_id);
            let _ = previous.cancel_tx.send(true);
        }

        (request_id, CancelToken { rx })
    }

    /// Mark a request finished. Only the owning request may clear the
    /// entry; a superseded request finishing late is a no-op.
    pub fn finish(&self, chat_id: &str, request_id: Uuid) {
        self.active
            .remove_if(chat_id, |_, active| active.request_id == request_id);
    }

    /// Cancel the live request, if any. Idempotent.
    pub fn cancel(&self, chat_id: &str) -> bool {
        match self.active.get(chat_id) {
            Some(active) => {
                let _ = active.cancel_tx.send(true);
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self, chat_id: &str) -> bool {
        self.active.contains_key(chat_id)
    }

    // ------------------------------------------------------------------
    // Clarifications
    // ------------------------------------------------------------------

    pub fn clarifications_used(&self, chat_id: &str) -> usize {
        self.clarifications
            .get(chat_id)
            .map(|s| s.used)
            .unwrap_or(0)
    }

    /// Record an accepted clarification and remember which tool call the
    /// next user message answers.
    pub fn note_clarification(&self, chat_id: &str, tool_call_id: &str) {
        let mut state = self.clarifications.entry(chat_id.to_string()).or_default();
        state.used += 1;
        state.pending_call_id = Some(tool_call_id.to_string());
    }

    /// Take the pending clarification call id, if the conversation is
    /// resuming from one.
    pub fn take_pending_clarification(&self, chat_id: &str) -> Option<String> {
        self.clarifications
            .get_mut(chat_id)
            .and_then(|mut s| s.pending_call_id.take())
    }

    /// Drop all chat state, e.g. when the conversation ends.
    pub fn forget(&self, chat_id: &str) {
        self.active.remove(chat_id);
        self.clarifications.remove(chat_id);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
