//! The event wire format and the counter that numbers broadcast events.
//!
//! Events are immutable once created. A fresh id is acquired from the
//! counter while the coordinator's write lock is held, so event order
//! always matches the order of the state transitions that produced them,
//! even though the lock is released before the event is actually
//! broadcast.

mod emitter;

pub use emitter::{EventEmitter, NoopEventEmitter};

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::constants;
use crate::track::Track;

/// One server-initiated state change, numbered and broadcast to every live
/// connection. See §6 of the design: wire shape is `{cmd, id, songs}`.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "cmd")]
    pub kind: String,
    pub id: u64,
    #[serde(rename = "songs", default, skip_serializing_if = "Vec::is_empty")]
    pub tracks: Vec<Track>,
}

impl Event {
    pub fn new(kind: impl Into<String>, id: u64, tracks: Vec<Track>) -> Self {
        Self {
            kind: kind.into(),
            id,
            tracks,
        }
    }

    /// A notification event with no attached tracks (`pause`, `stop`, …).
    pub fn notification(kind: impl Into<String>, id: u64) -> Self {
        Self::new(kind, id, Vec::new())
    }

    pub fn time_bonus(id: u64, bonus: f64) -> TimeBonusEvent {
        TimeBonusEvent {
            cmd: constants::EVENT_TIME_BONUS,
            id,
            time_bonus: bonus,
        }
    }
}

/// The `timeBonus` catch-up event carries a float payload instead of a
/// `songs` array, so it is modeled as its own small wire type rather than
/// forcing it through [`Event`].
#[derive(Debug, Clone, Serialize)]
pub struct TimeBonusEvent {
    cmd: &'static str,
    id: u64,
    #[serde(rename = "timeBonus")]
    time_bonus: f64,
}

/// Monotonically increasing 64-bit event id counter (component G).
///
/// Every broadcast event acquires a fresh id from this counter before it
/// leaves the coordinator's write lock. Catch-up/private events reuse the
/// current counter value without incrementing it.
#[derive(Debug, Default)]
pub struct EventCounter {
    value: AtomicU64,
}

impl EventCounter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Returns the current value without incrementing it. Used to stamp
    /// catch-up events and to compute a new connection's `next_expected`.
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Atomically increments and returns the new value.
    pub fn increment(&self) -> u64 {
        let id = self.value.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!("event id incremented to {id}");
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_starts_at_zero_and_increments() {
        let counter = EventCounter::new();
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn event_without_tracks_omits_songs_field() {
        let ev = Event::notification("pause", 3);
        let json = serde_json::to_string(&ev).unwrap();
        assert!(!json.contains("songs"));
    }
}
