//! Identifier-based duplicate suppression.
//!
//! DESIGN
//! ======
//! A plain `HashSet` of admitted server ids. Once the set grows past its
//! threshold it is pruned by set difference against the ids still held in
//! the history buffer, so an id is only forgotten after its message has left
//! the buffer. There is no secondary LRU.

use std::collections::HashSet;

use crate::message::is_server_id;

#[derive(Debug)]
pub struct Deduplicator {
    seen: HashSet<String>,
    prune_threshold: usize,
}

impl Deduplicator {
    #[must_use]
    pub fn new(prune_threshold: usize) -> Self {
        Self { seen: HashSet::new(), prune_threshold }
    }

    /// Record `id` and return `true` the first time it is seen.
    ///
    /// Local and synthesized ids are never recorded and always admitted.
    pub fn admit(&mut self, id: &str) -> bool {
        if !is_server_id(id) {
            return true;
        }
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_owned());
        true
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    #[must_use]
    pub fn needs_prune(&self) -> bool {
        self.seen.len() > self.prune_threshold
    }

    /// Drop every recorded id not present in `held`. Returns how many were dropped.
    pub fn prune<'a>(&mut self, held: impl IntoIterator<Item = &'a str>) -> usize {
        let held = held.into_iter().collect::<HashSet<_>>();
        let before = self.seen.len();
        self.seen.retain(|id| held.contains(id.as_str()));
        before - self.seen.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
#[path = "dedup_test.rs"]
mod tests;
