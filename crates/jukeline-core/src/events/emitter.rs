//! Event emitter abstraction for decoupling the coordinator from transport.
//!
//! The coordinator depends on the [`EventEmitter`] trait rather than a
//! concrete connection registry, so its unit tests can swap in a counting
//! stub instead of standing up real connections.

use async_trait::async_trait;

use super::Event;

/// Broadcasts a numbered [`Event`] to every live subscriber.
///
/// The concrete implementation used in production is the connection
/// manager (see `api::connection`), which ranges over its registered
/// connections and calls `send` on each; that fan-out awaits a bounded
/// channel per subscriber, so this trait must be async.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn broadcast(&self, event: Event);
}

/// Discards every event. Used by the coordinator's own unit tests, which
/// only care about the resulting queue state, not what gets broadcast.
pub struct NoopEventEmitter;

#[async_trait]
impl EventEmitter for NoopEventEmitter {
    async fn broadcast(&self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingEventEmitter {
        count: AtomicUsize,
    }

    #[async_trait]
    impl EventEmitter for CountingEventEmitter {
        async fn broadcast(&self, _event: Event) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter {
            count: AtomicUsize::new(0),
        });
        emitter.broadcast(Event::notification("pause", 1)).await;
        emitter.broadcast(Event::notification("stop", 2)).await;
        assert_eq!(emitter.count.load(Ordering::SeqCst), 2);
    }
}
