//! Deadline table for every delayed action the core schedules.
//!
//! DESIGN
//! ======
//! One slot per [`TimerKind`]; rescheduling a kind replaces its deadline.
//! Each deadline is stamped with the session epoch it was scheduled under.
//! `fire_due` only yields timers whose epoch matches the current one, so a
//! reconnect scheduled for a previous channel can never fire after a switch
//! or an explicit disconnect. The async driver sleeps until
//! [`Timers::next_deadline`] and then feeds a tick back into the core.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Next transport open attempt.
    Reconnect,
    /// Periodic silence check on the live connection.
    HealthCheck,
    /// End of the post-resume window that suppresses re-pausing.
    ResumeGrace,
}

#[derive(Clone, Copy, Debug)]
struct Deadline {
    at: Instant,
    epoch: u64,
}

#[derive(Debug, Default)]
pub struct Timers {
    slots: HashMap<TimerKind, Deadline>,
}

impl Timers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, kind: TimerKind, at: Instant, epoch: u64) {
        self.slots.insert(kind, Deadline { at, epoch });
    }

    /// Schedule `kind` to fire `after` from `now`.
    ///
    /// A delay past the representable range of `Instant` means the timer
    /// never fires: nothing is scheduled and `false` is returned.
    pub fn schedule_in(&mut self, kind: TimerKind, now: Instant, after: Duration, epoch: u64) -> bool {
        match now.checked_add(after) {
            Some(at) => {
                self.schedule(kind, at, epoch);
                true
            }
            None => {
                self.slots.remove(&kind);
                false
            }
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.slots.remove(&kind);
    }

    pub fn cancel_all(&mut self) {
        self.slots.clear();
    }

    #[must_use]
    pub fn is_scheduled(&self, kind: TimerKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().map(|deadline| deadline.at).min()
    }

    /// Remove and return every timer due at `now`, in deadline order.
    /// Timers from a stale epoch are discarded silently.
    pub fn fire_due(&mut self, now: Instant, epoch: u64) -> Vec<TimerKind> {
        let mut due = self
            .slots
            .iter()
            .filter(|(_, deadline)| deadline.at <= now)
            .map(|(kind, deadline)| (*kind, *deadline))
            .collect::<Vec<_>>();
        due.sort_by_key(|(_, deadline)| deadline.at);

        for (kind, _) in &due {
            self.slots.remove(kind);
        }
        due.into_iter()
            .filter(|(_, deadline)| deadline.epoch == epoch)
            .map(|(kind, _)| kind)
            .collect()
    }
}
