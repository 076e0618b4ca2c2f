//! Pause controller: scroll-derived backpressure over the history buffer.
//!
//! DESIGN
//! ======
//! The consumer reports its distance from the tail of the rendered sequence.
//! A deliberate scroll away from the tail pauses the view: the controller
//! freezes a [`PauseSnapshot`] of the buffer and the height cache, and the
//! consumer sees only that snapshot until it returns near the tail or
//! resumes explicitly. Arrivals keep flowing into the live buffer underneath.
//!
//! Heights reported for messages inside the snapshot go to a separate
//! correction map and are folded into the live cache on resume, so the
//! frozen layout never shifts under the reader.
//!
//! After a resume the core scrolls the consumer to the tail. The scroll
//! events that follow while the layout settles must not pause again, so a
//! short grace window suppresses pausing until the core's grace timer ends it.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::history::Entry;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportConfig {
    /// Distance from the tail past which a user scroll pauses.
    pub pause_distance: f64,
    /// Distance from the tail under which a paused view resumes.
    pub resume_distance: f64,
    pub resume_grace: Duration,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            pause_distance: 100.0,
            resume_distance: 30.0,
            resume_grace: Duration::from_millis(500),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Live,
    Paused,
}

/// Frozen copy of the buffer and heights taken at pause time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PauseSnapshot {
    pub entries: Vec<Entry>,
    pub heights: HashMap<String, f64>,
}

/// What a scroll report asks the core to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PauseTransition {
    Pause,
    Resume,
}

#[derive(Debug)]
pub struct PauseController {
    mode: ViewMode,
    snapshot: Option<PauseSnapshot>,
    pending_corrections: HashMap<String, f64>,
    /// History prepended to the live buffer since the pause; older than the
    /// snapshot, so never "new".
    replayed: usize,
    grace_active: bool,
    config: ViewportConfig,
}

impl PauseController {
    #[must_use]
    pub fn new(config: ViewportConfig) -> Self {
        Self {
            mode: ViewMode::Live,
            snapshot: None,
            pending_corrections: HashMap::new(),
            replayed: 0,
            grace_active: false,
            config,
        }
    }

    #[must_use]
    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.mode == ViewMode::Paused
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<&PauseSnapshot> {
        self.snapshot.as_ref()
    }

    #[must_use]
    pub fn grace_active(&self) -> bool {
        self.grace_active
    }

    #[must_use]
    pub fn resume_grace(&self) -> Duration {
        self.config.resume_grace
    }

    /// Decide whether a scroll report changes the mode.
    ///
    /// Programmatic scrolls and scrolls inside the resume grace window never
    /// pause. Returning near the tail always resumes.
    #[must_use]
    pub fn on_scroll(&self, distance_from_tail: f64, programmatic: bool) -> Option<PauseTransition> {
        match self.mode {
            ViewMode::Live => {
                if programmatic || self.grace_active {
                    return None;
                }
                (distance_from_tail > self.config.pause_distance).then_some(PauseTransition::Pause)
            }
            ViewMode::Paused => {
                (distance_from_tail < self.config.resume_distance).then_some(PauseTransition::Resume)
            }
        }
    }

    /// Freeze `entries` and `heights`. No-op when already paused.
    pub fn pause(&mut self, entries: Vec<Entry>, heights: HashMap<String, f64>) -> bool {
        if self.is_paused() {
            return false;
        }
        debug!(frozen = entries.len(), "viewport: paused");
        self.mode = ViewMode::Paused;
        self.snapshot = Some(PauseSnapshot { entries, heights });
        self.pending_corrections.clear();
        self.replayed = 0;
        true
    }

    /// Drop the snapshot and open the grace window.
    ///
    /// Returns the height corrections absorbed while paused; `None` when the
    /// view was not paused.
    pub fn resume(&mut self) -> Option<HashMap<String, f64>> {
        if !self.is_paused() {
            return None;
        }
        self.mode = ViewMode::Live;
        self.snapshot = None;
        self.replayed = 0;
        self.grace_active = true;
        let corrections = std::mem::take(&mut self.pending_corrections);
        debug!(corrections = corrections.len(), "viewport: resumed");
        Some(corrections)
    }

    pub fn end_grace(&mut self) {
        self.grace_active = false;
    }

    /// Hold back a height report that would move the frozen layout.
    ///
    /// Returns `true` when the measurement was absorbed; `false` means the
    /// caller should record it in the live cache.
    pub fn absorb_height(&mut self, id: &str, index: usize, extent: f64) -> bool {
        let Some(snapshot) = &self.snapshot else {
            return false;
        };
        let frozen = snapshot
            .entries
            .get(index)
            .is_some_and(|entry| entry.id() == id)
            || snapshot.entries.iter().any(|entry| entry.id() == id);
        if !frozen {
            return false;
        }
        if extent.is_finite() && extent > 0.0 {
            self.pending_corrections.insert(id.to_owned(), extent);
        }
        true
    }

    /// Record `count` history entries that landed in the live buffer.
    pub fn note_replayed(&mut self, count: usize) {
        if self.is_paused() {
            self.replayed = self.replayed.saturating_add(count);
        }
    }

    /// "N new messages" while paused.
    #[must_use]
    pub fn pending_new(&self, live_len: usize) -> usize {
        self.snapshot.as_ref().map_or(0, |snapshot| {
            live_len.saturating_sub(snapshot.entries.len().saturating_add(self.replayed))
        })
    }

    #[must_use]
    pub fn pending_corrections(&self) -> usize {
        self.pending_corrections.len()
    }

    /// Back to live without a grace window (channel teardown).
    pub fn reset(&mut self) {
        self.mode = ViewMode::Live;
        self.snapshot = None;
        self.pending_corrections.clear();
        self.replayed = 0;
        self.grace_active = false;
    }
}

#[cfg(test)]
#[path = "viewport_test.rs"]
mod tests;
