//! Streaming manager that multiplexes subscribers over per-target connections.
//!
//! One [`MetricsManager`] is built at startup and shared (it is a cheap
//! clone) with everything that needs live samples. For each target it keeps
//! at most one connection, the set of subscribers, the last sample seen and
//! the pending reconnect/teardown timers. All of it sits behind one mutex,
//! which is what serializes `ensure_connection` per target.

mod fanout;
mod reaper;
mod registry;
mod supervisor;

pub use fanout::*;
pub use registry::*;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::StreamConfig;
use crate::history::{self, HistoryCache, HistoryKey, HistoryPoint, Series};
use crate::sample::{MetricSample, TargetId};
use crate::transport::Transport;

/// Coordinator for every live metric stream of the process.
#[derive(Clone)]
pub struct MetricsManager {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    config: StreamConfig,
    transport: Arc<dyn Transport>,
    history: Arc<dyn HistoryCache>,
    state: Mutex<State>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct State {
    targets: HashMap<TargetId, TargetEntry>,
    reaper: Option<JoinHandle<()>>,
}

/// Sequence number of a received sample; increases across the whole manager.
pub(crate) type SampleSeq = u64;

/// A pending delayed action. The task only acts while its entry still holds
/// this id, so a timer that already woke up is cancelled by dropping it.
struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

impl Timer {
    fn cancel(self) {
        self.handle.abort();
    }
}

/// Everything tracked for one target.
struct TargetEntry {
    connection: Option<Connection>,
    subscribers: HashMap<SubscriptionId, Arc<Subscriber>>,
    last_sample: Option<(SampleSeq, Arc<MetricSample>)>,
    reconnect_timer: Option<Timer>,
    teardown_timer: Option<Timer>,
    last_activity: Instant,
}

impl TargetEntry {
    fn new() -> Self {
        Self {
            connection: None,
            subscribers: HashMap::new(),
            last_sample: None,
            reconnect_timer: None,
            teardown_timer: None,
            last_activity: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Close the connection, if any. Returns whether there was one.
    fn close_connection(&mut self) -> bool {
        match self.connection.take() {
            Some(conn) => {
                conn.pump.abort();
                true
            }
            None => false,
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
    }

    fn cancel_teardown(&mut self) {
        if let Some(timer) = self.teardown_timer.take() {
            timer.cancel();
        }
    }

    /// Release everything held for the target.
    fn shutdown(&mut self) {
        self.close_connection();
        self.cancel_reconnect();
        self.cancel_teardown();
        self.last_sample = None;
        for subscriber in self.subscribers.values() {
            subscriber.deactivate();
        }
        self.subscribers.clear();
    }
}

impl MetricsManager {
    /// Create a manager. The idle reaper runs once [`MetricsManager::start`] is called.
    pub fn new(
        config: StreamConfig,
        transport: Arc<dyn Transport>,
        history: Arc<dyn HistoryCache>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                history,
                state: Mutex::new(State::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    /// Stop the reaper, cancel every timer and close every connection.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        if let Some(reaper) = state.reaper.take() {
            reaper.abort();
        }
        let count = state.targets.len();
        for (_, mut entry) in state.targets.drain() {
            entry.shutdown();
        }
        tracing::info!("MetricsManager: shut down, released {} targets", count);
    }

    /// Current history of `series` for `target_id`, oldest first.
    pub fn history(&self, series: Series, target_id: TargetId) -> Vec<HistoryPoint> {
        self.shared
            .history
            .get(&HistoryKey::new(series, target_id))
            .unwrap_or_default()
    }

    /// Drop every history series of `target_id`.
    pub fn clear_history(&self, target_id: TargetId) {
        history::clear_target(self.shared.history.as_ref(), target_id);
    }

    /// Last sample received for `target_id`.
    pub fn last_sample(&self, target_id: TargetId) -> Option<MetricSample> {
        let state = self.lock();
        state
            .targets
            .get(&target_id)
            .and_then(|e| e.last_sample.as_ref())
            .map(|(_, sample)| MetricSample::clone(sample))
    }

    /// Number of live subscriptions on `target_id`.
    pub fn subscriber_count(&self, target_id: TargetId) -> usize {
        let state = self.lock();
        state
            .targets
            .get(&target_id)
            .map_or(0, |e| e.subscribers.len())
    }

    /// Targets the manager currently holds state for, in ascending order.
    pub fn tracked_targets(&self) -> Vec<TargetId> {
        let state = self.lock();
        let mut ids: Vec<TargetId> = state.targets.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.shared)
    }

    fn upgrade(shared: &Weak<Shared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    fn next_id(&self) -> u64 {
        self.shared
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::history::MemoryCache;
    use crate::transport::testing::MockTransport;
    use std::time::Duration;

    pub(crate) struct Harness {
        pub manager: MetricsManager,
        pub transport: Arc<MockTransport>,
        pub cache: MemoryCache,
    }

    pub(crate) fn harness() -> Harness {
        harness_with(StreamConfig::default())
    }

    pub(crate) fn harness_with(config: StreamConfig) -> Harness {
        let transport = Arc::new(MockTransport::new());
        let cache = MemoryCache::new();
        let manager = MetricsManager::new(
            config,
            transport.clone(),
            Arc::new(cache.clone()),
        );
        Harness {
            manager,
            transport,
            cache,
        }
    }

    /// Let every spawned task run until idle. Only meaningful on a paused clock.
    pub(crate) async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    pub(crate) fn payload(cpu: f64) -> String {
        format!(r#"{{"cpu": {}, "collectedAt": "2024-03-01T10:00:00Z"}}"#, cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use crate::transport::TransportEvent;

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_everything() {
        let h = harness();
        h.manager.start();
        let _sub = h.manager.subscribe(1, |_| {});
        h.manager.ensure_connection(2);
        settle().await;

        h.manager.shutdown();
        settle().await;

        assert!(h.manager.tracked_targets().is_empty());
        assert!(!h.transport.emit(1, TransportEvent::Open).await);
        assert!(!h.transport.emit(2, TransportEvent::Open).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_accessors() {
        let h = harness();
        let _sub = h.manager.subscribe(4, |_| {});
        h.transport.emit(4, TransportEvent::Data(payload(10.0))).await;
        h.transport.emit(4, TransportEvent::Data(payload(20.0))).await;
        settle().await;

        let cpu = h.manager.history(crate::history::Series::Cpu, 4);
        let values: Vec<f64> = cpu.iter().filter_map(|p| p.value()).collect();
        assert_eq!(values, vec![10.0, 20.0]);
        assert!(h.manager.history(crate::history::Series::Memory, 4).is_empty());

        h.manager.clear_history(4);
        assert!(h.cache.is_empty());
    }
}
