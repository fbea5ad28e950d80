//! Per-subscriber connection registry and delivery loop (component 4.C).
//!
//! A [`Connection`] is the producer-facing half: `send` enqueues an event
//! onto a small bounded channel under the send discipline from the design
//! (closing check, sender-count bump, enqueue, sender-count decrement).
//! [`serve`] is the consumer-facing half: it owns the receiver, reorders
//! events by id, and writes them to an [`EventSink`].
//!
//! The registry itself ([`ConnectionManager`]) is a sharded concurrent map
//! (`DashMap`) so point reads and replacements never contend on a single
//! lock, matching the concurrency model's requirement that the connection
//! map support lock-free point reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::constants::CONNECTION_EVENT_BUFFER_SIZE;
use crate::events::{Event, EventEmitter};

/// Where a connection's delivery loop writes framed JSON.
///
/// Implemented separately for SSE response bodies and websocket senders;
/// the connection/event-bus layer is generic over it and has no idea
/// which transport it is driving (see the open design question this
/// resolves).
#[async_trait]
pub trait EventSink: Send {
    async fn send_json(&mut self, payload: &str) -> Result<(), SinkError>;
}

#[derive(Debug, thiserror::Error)]
#[error("failed to write to connection sink: {0}")]
pub struct SinkError(pub String);

/// The producer-facing handle to a single subscriber's connection.
pub struct Connection {
    pub id: Uuid,
    seq: u64,
    tx: mpsc::Sender<Event>,
    closing: AtomicBool,
    senders: AtomicI64,
    cancel: CancellationToken,
}

impl Connection {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Enqueues `event` for delivery, following the send discipline:
    /// silently drop if closing, otherwise track outstanding senders
    /// around the (possibly blocking) enqueue so `close` knows when it is
    /// safe to tear the channel down.
    pub async fn send(&self, event: Event) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        self.senders.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(event).await.is_err() {
            tracing::trace!(subscriber = %self.id, "dropped event: connection already closed");
        }
        self.senders.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Registry of live connections, keyed by subscriber id.
pub struct ConnectionManager {
    connections: DashMap<Uuid, Arc<Connection>>,
    next_seq: AtomicU64,
    root_cancel: CancellationToken,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_seq: AtomicU64::new(0),
            root_cancel: CancellationToken::new(),
        }
    }

    /// Registers a new connection for `id`, replacing any existing one.
    /// The old entry is simply overwritten here; its own eventual `close`
    /// call will no-op against the map because its `seq` will no longer
    /// match (see the stale-connection-on-reconnect design note).
    pub fn register(&self, id: Uuid) -> (Arc<Connection>, mpsc::Receiver<Event>) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(CONNECTION_EVENT_BUFFER_SIZE);
        let conn = Arc::new(Connection {
            id,
            seq,
            tx,
            closing: AtomicBool::new(false),
            senders: AtomicI64::new(0),
            cancel: self.root_cancel.child_token(),
        });
        self.connections.insert(id, Arc::clone(&conn));
        (conn, rx)
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close discipline (4.C): evict only if still current, mark closing,
    /// cancel the connection's transport, and wait for in-flight senders
    /// to finish enqueueing before returning. Cancelling first causes the
    /// delivery loop to drop its receiver promptly, which unblocks any
    /// sender parked on a full channel instead of leaving it stuck.
    pub async fn close(&self, conn: &Connection) {
        let evicted = self
            .connections
            .remove_if(&conn.id, |_, current| current.seq == conn.seq);
        if evicted.is_none() {
            tracing::trace!(subscriber = %conn.id, seq = conn.seq, "replaced before close; not evicting");
        }
        conn.closing.store(true, Ordering::SeqCst);
        conn.cancel.cancel();
        while conn.senders.load(Ordering::SeqCst) > 0 {
            tokio::task::yield_now().await;
        }
    }

    /// Cancels every live connection. Used on process shutdown.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        self.root_cancel.cancel();
        self.connections.clear();
        count
    }
}

#[async_trait]
impl EventEmitter for ConnectionManager {
    /// Mirrors the coordinator's sequential broadcast: each connection's
    /// `send` may block briefly on its own full buffer, backpressuring
    /// only that subscriber, never the coordinator's lock (already
    /// released by the time broadcast runs).
    async fn broadcast(&self, event: Event) {
        tracing::debug!(kind = %event.kind, id = event.id, "broadcasting event");
        let targets: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for conn in targets {
            conn.send(event.clone()).await;
        }
    }
}

/// Drives a single connection's delivery loop: reorders events by id and
/// writes each to `sink` in order, honoring a private catch-up batch sent
/// ahead of the live stream.
///
/// `next_expected` is the id of the first *live* (non catch-up) event this
/// connection should advance its counter on; it is `current_event_id + 1`
/// at subscribe time (see the coordinator's `catch_up` snapshot).
pub async fn serve(
    mut rx: mpsc::Receiver<Event>,
    cancel: CancellationToken,
    mut next_expected: u64,
    mut sink: impl EventSink,
) -> Result<(), SinkError> {
    let mut pending: HashMap<u64, Event> = HashMap::new();

    loop {
        let event = if let Some(event) = pending.remove(&next_expected) {
            event
        } else {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                received = rx.recv() => match received {
                    Some(event) => {
                        if event.id > next_expected {
                            pending.insert(event.id, event);
                            continue;
                        }
                        event
                    }
                    None => return Ok(()),
                },
            }
        };

        if event.id == next_expected {
            next_expected += 1;
        }
        let payload = serde_json::to_string(&event)
            .map_err(|e| SinkError(format!("failed to serialize event: {e}")))?;
        sink.send_json(&payload).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        received: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send_json(&mut self, payload: &str) -> Result<(), SinkError> {
            self.received.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn register_then_send_then_serve_delivers_in_order() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        let (conn, rx) = manager.register(id);

        conn.send(Event::notification("add", 1)).await;
        conn.send(Event::notification("update", 2)).await;
        drop(conn);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            received: Arc::clone(&received),
        };
        let cancel = CancellationToken::new();
        serve(rx, cancel, 1, sink).await.unwrap();

        let got = received.lock().unwrap();
        assert_eq!(got.len(), 2);
        assert!(got[0].contains("\"id\":1"));
        assert!(got[1].contains("\"id\":2"));
    }

    #[tokio::test]
    async fn out_of_order_delivery_is_reordered_by_id() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(Event::notification("b", 2)).await.unwrap();
        tx.send(Event::notification("a", 1)).await.unwrap();
        drop(tx);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            received: Arc::clone(&received),
        };
        serve(rx, CancellationToken::new(), 1, sink).await.unwrap();

        let got = received.lock().unwrap();
        assert!(got[0].contains("\"cmd\":\"a\""));
        assert!(got[1].contains("\"cmd\":\"b\""));
    }

    #[tokio::test]
    async fn catch_up_event_below_next_expected_does_not_advance_counter() {
        let (tx, rx) = mpsc::channel(8);
        // A private catch-up event stamped with the current counter (0),
        // while next_expected is already 1.
        tx.send(Event::notification("add", 0)).await.unwrap();
        tx.send(Event::notification("play", 1)).await.unwrap();
        drop(tx);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            received: Arc::clone(&received),
        };
        serve(rx, CancellationToken::new(), 1, sink).await.unwrap();

        let got = received.lock().unwrap();
        assert_eq!(got.len(), 2);
        assert!(got[0].contains("\"id\":0"));
        assert!(got[1].contains("\"id\":1"));
    }

    #[tokio::test]
    async fn replacement_connection_is_not_evicted_by_stale_close() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        let (stale, _rx1) = manager.register(id);
        let (_fresh, _rx2) = manager.register(id);

        manager.close(&stale).await;

        assert!(manager.get(&id).is_some());
    }

    #[tokio::test]
    async fn closing_a_connection_removes_it_from_the_map() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        let (conn, _rx) = manager.register(id);
        manager.close(&conn).await;
        assert!(manager.get(&id).is_none());
    }
}
