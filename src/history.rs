//! Bounded, ordered buffer of admitted chat messages.
//!
//! DESIGN
//! ======
//! A `VecDeque` of entries in admission order. Two capacity regimes:
//! - `Live`: `live_limit`, used while the consumer follows the tail
//! - `Paused`: `live_limit + slack`, used while the consumer reads history
//!
//! Overflow evicts from the head. The buffer never reorders; the only
//! in-place mutation of order-bearing data is `replace_at`, which swaps one
//! entry for another at the same position. Evicted entries are returned to
//! the caller so dependent indexes (pending echoes, heights) can follow.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, Moderation};

/// Active capacity regime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferMode {
    #[default]
    Live,
    Paused,
}

/// A buffered message plus the moderation marks applied to it since admission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub message: ChatMessage,
    /// Removed by a moderator. Kept so the consumer can render a placeholder.
    pub deleted: bool,
    pub moderation: Option<Moderation>,
}

impl Entry {
    #[must_use]
    pub fn new(message: ChatMessage) -> Self {
        Self { message, deleted: false, moderation: None }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.message.id
    }
}

const MAX_PREALLOCATED: usize = 1024;

#[derive(Debug)]
pub struct HistoryBuffer {
    entries: VecDeque<Entry>,
    live_limit: usize,
    slack: usize,
    mode: BufferMode,
}

impl HistoryBuffer {
    #[must_use]
    pub fn new(live_limit: usize, slack: usize) -> Self {
        let live_limit = live_limit.max(1);
        Self {
            entries: VecDeque::with_capacity(live_limit.saturating_add(slack).min(MAX_PREALLOCATED)),
            live_limit,
            slack,
            mode: BufferMode::Live,
        }
    }

    #[must_use]
    pub fn capacity(&self, mode: BufferMode) -> usize {
        match mode {
            BufferMode::Live => self.live_limit,
            BufferMode::Paused => self.live_limit.saturating_add(self.slack),
        }
    }

    #[must_use]
    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    /// Switch capacity regime. Shrinking does not trim; call [`Self::trim`].
    pub fn set_mode(&mut self, mode: BufferMode) {
        self.mode = mode;
    }

    /// Push to the tail, evicting from the head past the active capacity.
    pub fn append(&mut self, message: ChatMessage) -> Vec<Entry> {
        self.entries.push_back(Entry::new(message));
        self.evict_to(self.capacity(self.mode))
    }

    /// Insert a replayed batch ahead of everything already buffered.
    ///
    /// History is older than any live arrival, so it goes to the head in
    /// batch order; overflow still evicts from the head (oldest history first).
    /// Entries keep whatever marks the replay staged on them.
    pub fn prepend_batch(&mut self, batch: Vec<Entry>) -> Vec<Entry> {
        for entry in batch.into_iter().rev() {
            self.entries.push_front(entry);
        }
        self.evict_to(self.capacity(self.mode))
    }

    /// Replace the first entry matching `predicate`, keeping its position.
    pub fn replace_at(&mut self, predicate: impl Fn(&Entry) -> bool, message: ChatMessage) -> bool {
        match self.entries.iter_mut().find(|entry| predicate(entry)) {
            Some(entry) => {
                *entry = Entry::new(message);
                true
            }
            None => false,
        }
    }

    /// Cut down to the live capacity, discarding the oldest excess.
    pub fn trim(&mut self) -> Vec<Entry> {
        self.evict_to(self.live_limit)
    }

    fn evict_to(&mut self, limit: usize) -> Vec<Entry> {
        let excess = self.entries.len().saturating_sub(limit);
        self.entries.drain(..excess).collect()
    }

    /// Remove the entry with `id`, if present.
    pub fn remove(&mut self, id: &str) -> Option<Entry> {
        let index = self.position(id)?;
        self.entries.remove(index)
    }

    /// Flag a message as deleted without removing it.
    pub fn mark_deleted(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|entry| entry.id() == id) {
            Some(entry) => {
                entry.deleted = true;
                true
            }
            None => false,
        }
    }

    /// Apply a timeout/ban mark to every entry from `user_id`.
    pub fn apply_user_clear(&mut self, user_id: &str, moderation: Moderation) -> usize {
        let mut marked = 0;
        for entry in self.entries.iter_mut().filter(|entry| entry.message.sender_id == user_id) {
            entry.moderation = Some(moderation);
            marked += 1;
        }
        marked
    }

    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id() == id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(Entry::id)
    }

    /// Owned copy of the current sequence, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Entry> {
        self.entries.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.mode = BufferMode::Live;
    }
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
