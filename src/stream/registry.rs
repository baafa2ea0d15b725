//! Connection registry: at most one live connection per target.

use std::sync::Weak;

use tokio::task::JoinHandle;

use super::{MetricsManager, Shared, TargetEntry};
use crate::history;
use crate::sample::{decode_sample, TargetId};
use crate::transport::{EventStream, TransportEvent};

/// Identifies one physical connection; a reconnect gets a new id.
pub type ConnectionId = u64;

/// Lifecycle of a target's connection. A target without a connection has no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opened but not yet confirmed by the server.
    Connecting,
    /// Confirmed by the server.
    Open,
    /// Closed by the transport; a reconnect may be pending.
    Closed,
}

pub(crate) struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) state: ConnectionState,
    pub(crate) pump: JoinHandle<()>,
}

impl MetricsManager {
    /// Return the target's connection, opening one if there is none.
    ///
    /// A connection that is still connecting or open is reused; a closed one
    /// is torn down and replaced.
    pub fn ensure_connection(&self, target_id: TargetId) -> ConnectionId {
        let mut state = self.lock();
        let entry = state
            .targets
            .entry(target_id)
            .or_insert_with(TargetEntry::new);
        self.ensure_locked(target_id, entry)
    }

    /// Close and forget the target's connection and pending timers.
    ///
    /// Subscriptions and the last sample are kept. No-op without a connection.
    pub fn disconnect(&self, target_id: TargetId) {
        let mut state = self.lock();
        if let Some(entry) = state.targets.get_mut(&target_id) {
            entry.cancel_reconnect();
            entry.cancel_teardown();
            if entry.close_connection() {
                tracing::info!("Registry: disconnected target {}", target_id);
            }
        }
    }

    /// Whether the server has confirmed the target's current connection.
    pub fn is_connected(&self, target_id: TargetId) -> bool {
        self.connection_state(target_id) == Some(ConnectionState::Open)
    }

    pub fn connection_state(&self, target_id: TargetId) -> Option<ConnectionState> {
        let state = self.lock();
        state
            .targets
            .get(&target_id)
            .and_then(|e| e.connection.as_ref())
            .map(|c| c.state)
    }

    pub(super) fn ensure_locked(&self, target_id: TargetId, entry: &mut TargetEntry) -> ConnectionId {
        if let Some(conn) = &entry.connection {
            if conn.state != ConnectionState::Closed {
                return conn.id;
            }
            tracing::debug!("Registry: recycling closed connection {} of target {}", conn.id, target_id);
            entry.close_connection();
            entry.cancel_reconnect();
        }

        let id = self.next_id();
        // The pump owns the stream from here on, so no event can be missed.
        let events = self.shared.transport.open(target_id);
        let pump = tokio::spawn(pump_events(self.downgrade(), target_id, id, events));

        entry.connection = Some(Connection {
            id,
            state: ConnectionState::Connecting,
            pump,
        });
        tracing::info!("Registry: opened connection {} for target {}", id, target_id);

        id
    }

    fn on_open(&self, target_id: TargetId, conn_id: ConnectionId) {
        let mut state = self.lock();
        let Some(entry) = state.targets.get_mut(&target_id) else {
            return;
        };
        let Some(conn) = entry.connection.as_mut().filter(|c| c.id == conn_id) else {
            return;
        };
        conn.state = ConnectionState::Open;
        entry.cancel_reconnect();
        tracing::info!("Registry: connection {} for target {} confirmed", conn_id, target_id);
    }

    fn on_error(&self, target_id: TargetId, conn_id: ConnectionId, message: &str) {
        tracing::warn!("Registry: transport error on target {}: {}", target_id, message);

        let mut state = self.lock();
        if let Some(conn) = state
            .targets
            .get_mut(&target_id)
            .and_then(|e| e.connection.as_mut())
            .filter(|c| c.id == conn_id)
        {
            if conn.state == ConnectionState::Open {
                conn.state = ConnectionState::Connecting;
            }
        }
    }

    fn on_closed(&self, target_id: TargetId, conn_id: ConnectionId) {
        let mut state = self.lock();
        let Some(entry) = state.targets.get_mut(&target_id) else {
            return;
        };
        match entry.connection.as_mut() {
            Some(conn) if conn.id == conn_id => conn.state = ConnectionState::Closed,
            _ => return,
        }
        tracing::info!("Registry: connection {} for target {} closed", conn_id, target_id);
        self.schedule_reconnect(target_id, entry);
    }

    fn on_data(&self, target_id: TargetId, conn_id: ConnectionId, payload: &str) {
        let sample = match decode_sample(payload, target_id) {
            Ok(s) => std::sync::Arc::new(s),
            Err(e) => {
                tracing::warn!("Registry: dropping malformed sample for target {}: {}", target_id, e);
                return;
            }
        };

        let (seq, subscribers) = {
            let mut state = self.lock();
            let Some(entry) = state.targets.get_mut(&target_id) else {
                return;
            };
            if entry.connection.as_ref().map(|c| c.id) != Some(conn_id) {
                return;
            }
            let seq = self.next_id();
            entry.last_sample = Some((seq, sample.clone()));
            entry.touch();
            (seq, entry.subscribers.values().cloned().collect::<Vec<_>>())
        };

        let written = history::record_sample(
            self.shared.history.as_ref(),
            target_id,
            &sample,
            self.shared.config.history_capacity,
        );
        tracing::trace!("Registry: target {} sample wrote {} history points", target_id, written);

        self.dispatch(target_id, seq, &sample, &subscribers);
    }
}

/// Drive one connection's events into the manager until it is aborted.
async fn pump_events(
    shared: Weak<Shared>,
    target_id: TargetId,
    conn_id: ConnectionId,
    mut events: EventStream,
) {
    let mut closed = false;

    while let Some(event) = events.next().await {
        let Some(manager) = MetricsManager::upgrade(&shared) else {
            return;
        };
        match event {
            TransportEvent::Open => manager.on_open(target_id, conn_id),
            TransportEvent::Data(payload) => manager.on_data(target_id, conn_id, &payload),
            TransportEvent::Error(message) => manager.on_error(target_id, conn_id, &message),
            TransportEvent::Closed => {
                closed = true;
                manager.on_closed(target_id, conn_id);
            }
        }
    }

    // Producer went away without saying so.
    if !closed {
        if let Some(manager) = MetricsManager::upgrade(&shared) {
            manager.on_closed(target_id, conn_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::test_support::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ensure_opens_one_connection() {
        let h = harness();
        let barrier = Arc::new(Barrier::new(16));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = h.manager.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    manager.ensure_connection(1)
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }

        assert_eq!(h.transport.opens(1), 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_drives_is_connected() {
        let h = harness();
        h.manager.ensure_connection(1);
        assert_eq!(h.manager.connection_state(1), Some(ConnectionState::Connecting));
        assert!(!h.manager.is_connected(1));

        h.transport.emit(1, TransportEvent::Open).await;
        settle().await;
        assert!(h.manager.is_connected(1));

        h.transport
            .emit(1, TransportEvent::Error("reset".to_string()))
            .await;
        settle().await;
        assert!(!h.manager.is_connected(1));
        assert_eq!(h.manager.connection_state(1), Some(ConnectionState::Connecting));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_alone_does_not_reconnect() {
        let h = harness();
        let _sub = h.manager.subscribe(1, |_| {});
        h.transport
            .emit(1, TransportEvent::Error("timeout".to_string()))
            .await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.transport.opens(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_connection_is_recycled() {
        let h = harness();
        let first = h.manager.ensure_connection(1);
        assert_eq!(h.manager.ensure_connection(1), first);

        h.transport.emit(1, TransportEvent::Closed).await;
        settle().await;
        assert_eq!(h.manager.connection_state(1), Some(ConnectionState::Closed));

        let second = h.manager.ensure_connection(1);
        assert_ne!(first, second);
        assert_eq!(h.transport.opens(1), 2);
        settle().await;

        // The old connection's stream was dropped with it.
        assert!(!h.transport.emit_on(1, 0, TransportEvent::Open).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect() {
        let h = harness();
        h.manager.disconnect(5);

        h.manager.ensure_connection(5);
        h.manager.disconnect(5);
        assert_eq!(h.manager.connection_state(5), None);
        h.manager.disconnect(5);

        settle().await;
        assert!(!h.transport.emit(5, TransportEvent::Open).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_is_dropped() {
        let h = harness();
        let received = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = received.clone();
        let _sub = h.manager.subscribe(1, move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        h.transport.emit(1, TransportEvent::Open).await;
        h.transport
            .emit(1, TransportEvent::Data("{not json".to_string()))
            .await;
        settle().await;

        assert_eq!(received.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(h.manager.last_sample(1).is_none());
        assert!(h.cache.is_empty());
        assert!(h.manager.is_connected(1));
    }
}
