//! Transcript aggregation: partial updates in, stable text and one commit
//! per turn out.
//!
//! Upstream transcript semantics are ambiguous: some messages carry deltas,
//! some carry the full text so far, and fragments can arrive out of order.
//! The aggregator tolerates all three without assuming which one the remote
//! protocol uses in a given message.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Speaker role for transcript buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human speaker.
    User,
    /// The generative model.
    Assistant,
}

/// A committed final transcript for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptCommit {
    /// Whose turn finished.
    pub role: Role,
    /// Trimmed final text.
    pub text: String,
}

#[derive(Default)]
struct RoleBuffer {
    text: String,
    last_commit: Option<String>,
    last_publish: Option<Instant>,
}

impl RoleBuffer {
    /// Finalize the buffer: returns a commit for new, non-empty text.
    fn finish(&mut self, role: Role) -> Option<TranscriptCommit> {
        let final_text = self.text.trim().to_string();
        self.text.clear();
        self.last_publish = None;
        if final_text.is_empty() || self.last_commit.as_deref() == Some(final_text.as_str()) {
            return None;
        }
        self.last_commit = Some(final_text.clone());
        Some(TranscriptCommit { role, text: final_text })
    }
}

/// Accumulates partial transcripts per role and commits finished turns.
pub struct TranscriptAggregator {
    throttle: Duration,
    user: Mutex<RoleBuffer>,
    assistant: Mutex<RoleBuffer>,
    user_tx: Arc<watch::Sender<String>>,
    assistant_tx: Arc<watch::Sender<String>>,
}

impl TranscriptAggregator {
    /// Create an aggregator publishing live text through the given senders.
    pub fn new(
        throttle: Duration,
        user_tx: Arc<watch::Sender<String>>,
        assistant_tx: Arc<watch::Sender<String>>,
    ) -> Self {
        Self { throttle, user: Mutex::default(), assistant: Mutex::default(), user_tx, assistant_tx }
    }

    fn buffer(&self, role: Role) -> &Mutex<RoleBuffer> {
        match role {
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
        }
    }

    fn sender(&self, role: Role) -> &watch::Sender<String> {
        match role {
            Role::User => &self.user_tx,
            Role::Assistant => &self.assistant_tx,
        }
    }

    /// Apply one partial update. Returns a commit when this update finishes
    /// a turn with new final text.
    pub fn apply(&self, role: Role, partial: &str, finished: bool) -> Option<TranscriptCommit> {
        let mut buffer = self.buffer(role).lock();

        if finished || partial.len() >= buffer.text.len() {
            buffer.text = partial.to_string();
        } else if !buffer.text.contains(partial) {
            // Out-of-order fragment: keep it rather than discarding.
            buffer.text.push(' ');
            buffer.text.push_str(partial);
        }

        // Finishing updates bypass the throttle.
        let now = Instant::now();
        let due = finished
            || buffer
                .last_publish
                .map(|at| now.duration_since(at) >= self.throttle)
                .unwrap_or(true);
        if due {
            self.sender(role).send_replace(buffer.text.clone());
            buffer.last_publish = Some(now);
        }

        if finished { buffer.finish(role) } else { None }
    }

    /// Commit whatever is pending for `role` (used after the push-to-talk
    /// grace window). Idempotent per distinct final text.
    pub fn commit_pending(&self, role: Role) -> Option<TranscriptCommit> {
        let mut buffer = self.buffer(role).lock();
        let commit = buffer.finish(role);
        if commit.is_some() {
            self.sender(role).send_replace(String::new());
        }
        commit
    }

    /// Most recent committed-or-pending user utterance, for tool-call
    /// context.
    pub fn latest_user_utterance(&self) -> Option<String> {
        let buffer = self.user.lock();
        let pending = buffer.text.trim();
        if !pending.is_empty() {
            return Some(pending.to_string());
        }
        buffer.last_commit.clone()
    }

    /// Clear all buffers and live text (disconnect).
    pub fn reset(&self) {
        *self.user.lock() = RoleBuffer::default();
        *self.assistant.lock() = RoleBuffer::default();
        self.user_tx.send_replace(String::new());
        self.assistant_tx.send_replace(String::new());
    }
}

impl std::fmt::Debug for TranscriptAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptAggregator").field("throttle", &self.throttle).finish()
    }
}
