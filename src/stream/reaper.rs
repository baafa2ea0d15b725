//! Idle reaper: periodically drops targets nobody has used for a while.
//!
//! This is a backstop for the debounced teardown; it also reclaims the
//! last sample and bookkeeping that the teardown leaves behind.

use tokio::time::{Instant, MissedTickBehavior};

use super::MetricsManager;
use crate::sample::TargetId;

impl MetricsManager {
    /// Start the idle reaper background task. Calling it again is a no-op.
    pub fn start(&self) {
        let mut state = self.lock();
        if state.reaper.is_some() {
            return;
        }

        let period = self.shared.config.reap_interval;
        let shared = self.downgrade();

        state.reaper = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let Some(manager) = MetricsManager::upgrade(&shared) else {
                    break;
                };
                manager.reap_idle();
            }
        }));

        tracing::info!("Reaper: started, sweeping every {:?}", period);
    }

    /// Tear down every target with no subscribers and no activity within the
    /// idle threshold. Returns the reaped target ids.
    pub fn reap_idle(&self) -> Vec<TargetId> {
        let threshold = self.shared.config.idle_threshold;
        let now = Instant::now();
        let mut state = self.lock();

        let idle: Vec<TargetId> = state
            .targets
            .iter()
            .filter(|(_, e)| {
                e.subscribers.is_empty() && now.duration_since(e.last_activity) > threshold
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &idle {
            if let Some(mut entry) = state.targets.remove(id) {
                entry.shutdown();
                tracing::info!("Reaper: reclaimed idle target {}", id);
            }
        }

        idle
    }
}
