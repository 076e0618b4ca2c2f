//! Optimistic local echo and its reconciliation with the server copy.
//!
//! DESIGN
//! ======
//! `send_local` builds a provisional message (`local:` id, `is_local_echo`)
//! that the caller appends to the buffer straight away, and records it in a
//! pending index keyed by sender identity and whitespace-normalized body.
//! When an authoritative message from our own user arrives, the oldest
//! pending echo with an equal body is claimed and its buffer position is
//! reused for the server copy.
//!
//! TRADE-OFFS
//! ==========
//! Matching is by body text. Two identical messages sent in quick succession
//! reconcile in send order, which is right as long as the server preserves
//! that order. Pending entries expire after a TTL so an echo whose server copy
//! never arrives stops capturing later identical messages.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::message::{ChatMessage, SelfProfile, local_id};

#[derive(Clone, Debug)]
struct PendingEcho {
    local_id: String,
    sender_key: String,
    normalized_body: String,
    created_at: Instant,
}

#[derive(Debug)]
pub struct EchoReconciler {
    pending: VecDeque<PendingEcho>,
    ttl: Duration,
}

/// Collapse runs of whitespace and trim, so server-side normalization of the
/// body does not defeat matching.
#[must_use]
pub fn normalize_body(body: &str) -> String {
    body.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl EchoReconciler {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { pending: VecDeque::new(), ttl }
    }

    /// Build the provisional message for `body` and start tracking it.
    pub fn send_local(
        &mut self,
        body: &str,
        sender: &SelfProfile,
        reply_parent: Option<String>,
        now: Instant,
        now_ms: i64,
    ) -> ChatMessage {
        let id = local_id();
        self.pending.push_back(PendingEcho {
            local_id: id.clone(),
            sender_key: sender.sender_key().to_owned(),
            normalized_body: normalize_body(body),
            created_at: now,
        });
        ChatMessage {
            id,
            sender_id: sender.user_id.clone().unwrap_or_else(|| sender.login.clone()),
            sender_login: sender.login.clone(),
            sender_name: sender.name().to_owned(),
            display_color: sender.color.clone(),
            badge_refs: sender.badges.clone(),
            body: body.to_owned(),
            send_time: now_ms,
            reply_parent_id: reply_parent,
            is_local_echo: true,
            is_action: false,
            historical: false,
        }
    }

    /// Claim the oldest pending echo that `authoritative` confirms.
    ///
    /// The caller has already established that the message is from our own
    /// user; the sender key check guards against identity changes mid-session.
    pub fn take_match(&mut self, authoritative: &ChatMessage, now: Instant) -> Option<String> {
        self.expire(now);
        let body = normalize_body(&authoritative.body);
        let index = self.pending.iter().position(|pending| {
            pending.normalized_body == body
                && (pending.sender_key == authoritative.sender_id
                    || pending.sender_key.eq_ignore_ascii_case(&authoritative.sender_login))
        })?;
        self.pending.remove(index).map(|pending| pending.local_id)
    }

    /// Forget a pending echo (send failed, or the entry left the buffer).
    pub fn discard(&mut self, local_id: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|pending| pending.local_id != local_id);
        before != self.pending.len()
    }

    /// Drop pending echoes older than the TTL. Returns how many expired.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        let ttl = self.ttl;
        self.pending
            .retain(|pending| now.saturating_duration_since(pending.created_at) < ttl);
        before - self.pending.len()
    }

    #[must_use]
    pub fn is_pending(&self, local_id: &str) -> bool {
        self.pending.iter().any(|pending| pending.local_id == local_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
#[path = "echo_test.rs"]
mod tests;
