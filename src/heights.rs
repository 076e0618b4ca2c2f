//! Last measured render extent per message id.
//!
//! The consumer reports heights; the core only keeps them for buffer-size
//! bookkeeping and for freezing alongside a pause snapshot. Entries for
//! evicted messages are dropped once the cache grows well past the buffer.

use std::collections::HashMap;

/// Prune once the cache holds this many times the buffer length.
const PRUNE_FACTOR: usize = 2;

#[derive(Debug, Default)]
pub struct HeightCache {
    heights: HashMap<String, f64>,
}

impl HeightCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a measurement. Non-positive and non-finite values are rejected.
    pub fn record(&mut self, id: &str, extent: f64) -> bool {
        if !extent.is_finite() || extent <= 0.0 {
            return false;
        }
        self.heights.insert(id.to_owned(), extent);
        true
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<f64> {
        self.heights.get(id).copied()
    }

    /// Move a measurement to a new id (local echo replaced by its server copy).
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(extent) = self.heights.remove(from) {
            self.heights.insert(to.to_owned(), extent);
        }
    }

    pub fn remove(&mut self, id: &str) {
        self.heights.remove(id);
    }

    /// Fold in several measurements at once.
    pub fn extend(&mut self, measurements: HashMap<String, f64>) {
        for (id, extent) in measurements {
            self.record(&id, extent);
        }
    }

    /// Drop ids not in `held` when the cache significantly exceeds `buffer_len`.
    pub fn prune<'a>(&mut self, held: impl IntoIterator<Item = &'a str>, buffer_len: usize) -> usize {
        if self.heights.len() <= buffer_len.max(1).saturating_mul(PRUNE_FACTOR) {
            return 0;
        }
        let held = held.into_iter().collect::<std::collections::HashSet<_>>();
        let before = self.heights.len();
        self.heights.retain(|id, _| held.contains(id.as_str()));
        before - self.heights.len()
    }

    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.heights.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heights.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }

    pub fn clear(&mut self) {
        self.heights.clear();
    }
}
