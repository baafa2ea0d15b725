//! Delayed actions per target: reconnect after a close, and teardown after
//! the last subscriber leaves.
//!
//! Each target holds at most one pending timer of each kind. Scheduling a
//! new one aborts the old one, as does anything that makes it moot.

use super::{MetricsManager, TargetEntry, Timer};
use crate::sample::TargetId;

impl MetricsManager {
    /// Retry the target's connection after the reconnect delay.
    ///
    /// Retries repeat with a fixed delay for as long as the target has
    /// subscribers when the timer fires.
    pub(super) fn schedule_reconnect(&self, target_id: TargetId, entry: &mut TargetEntry) {
        let delay = self.shared.config.reconnect_delay;
        if entry.reconnect_timer.is_some() {
            tracing::debug!("Supervisor: rescheduling reconnect for target {}", target_id);
        }
        entry.cancel_reconnect();
        entry.reconnect_timer = Some(self.spawn_timer(delay, move |manager, timer_id| {
            manager.on_reconnect_timer(target_id, timer_id)
        }));
        tracing::info!("Supervisor: reconnecting target {} in {:?}", target_id, delay);
    }

    /// Close the target's connection after the teardown delay unless someone subscribes.
    pub(super) fn schedule_teardown(&self, target_id: TargetId, entry: &mut TargetEntry) {
        let delay = self.shared.config.teardown_delay;
        entry.cancel_teardown();
        entry.teardown_timer = Some(self.spawn_timer(delay, move |manager, timer_id| {
            manager.on_teardown_timer(target_id, timer_id)
        }));
        tracing::debug!("Supervisor: target {} idle, teardown in {:?}", target_id, delay);
    }

    fn spawn_timer<F>(&self, delay: std::time::Duration, fire: F) -> Timer
    where
        F: FnOnce(MetricsManager, u64) + Send + 'static,
    {
        let id = self.next_id();
        let shared = self.downgrade();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = MetricsManager::upgrade(&shared) {
                fire(manager, id);
            }
        });
        Timer { id, handle }
    }

    fn on_reconnect_timer(&self, target_id: TargetId, timer_id: u64) {
        let mut state = self.lock();
        let Some(entry) = state.targets.get_mut(&target_id) else {
            return;
        };
        if entry.reconnect_timer.as_ref().map(|t| t.id) != Some(timer_id) {
            tracing::trace!("Supervisor: stale reconnect timer for target {}", target_id);
            return;
        }
        // This task is the timer; forget the handle without aborting it.
        entry.reconnect_timer = None;

        if entry.subscribers.is_empty() {
            tracing::debug!("Supervisor: target {} has no subscribers, not reconnecting", target_id);
            return;
        }

        entry.close_connection();
        tracing::info!("Supervisor: reconnecting target {}", target_id);
        self.ensure_locked(target_id, entry);
    }

    fn on_teardown_timer(&self, target_id: TargetId, timer_id: u64) {
        let mut state = self.lock();
        let Some(entry) = state.targets.get_mut(&target_id) else {
            return;
        };
        if entry.teardown_timer.as_ref().map(|t| t.id) != Some(timer_id) {
            return;
        }
        entry.teardown_timer = None;

        if !entry.subscribers.is_empty() {
            return;
        }

        entry.cancel_reconnect();
        if entry.close_connection() {
            tracing::info!("Supervisor: closed unused connection for target {}", target_id);
        }
    }
}
