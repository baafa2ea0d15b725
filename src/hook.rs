//! Per-consumer binding to the streaming manager.
//!
//! A view holds one [`LiveMetrics`], points it at a target, and re-renders
//! whenever [`LiveMetrics::changed`] resolves.

use std::sync::Arc;

use tokio::sync::watch;

use crate::history::{HistoryPoint, Series};
use crate::sample::{MetricSample, TargetId};
use crate::stream::{MetricsManager, Subscription};

type Latest = Option<Arc<MetricSample>>;

/// Live view of one selected target.
pub struct LiveMetrics {
    manager: MetricsManager,
    target: Option<TargetId>,
    subscription: Option<Subscription>,
    latest: Arc<watch::Sender<Latest>>,
    rx: watch::Receiver<Latest>,
}

impl LiveMetrics {
    pub fn new(manager: MetricsManager) -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            manager,
            target: None,
            subscription: None,
            latest: Arc::new(tx),
            rx,
        }
    }

    /// Switch to `target`, or detach with `None`.
    ///
    /// Selecting a new target resets its history so charts start empty,
    /// then subscribes; a sample already known for the target shows up
    /// immediately.
    pub fn select_target(&mut self, target: Option<TargetId>) {
        if self.target == target {
            return;
        }

        if let Some(old) = self.subscription.take() {
            old.unsubscribe();
        }
        self.latest.send_replace(None);
        // Clearing is not an update the view has to react to.
        self.rx.borrow_and_update();
        self.target = target;

        let Some(target_id) = target else {
            return;
        };

        self.manager.clear_history(target_id);
        let latest = self.latest.clone();
        self.subscription = Some(self.manager.subscribe(target_id, move |sample| {
            latest.send_replace(Some(Arc::new(sample.clone())));
        }));
    }

    pub fn target(&self) -> Option<TargetId> {
        self.target
    }

    /// Most recent sample of the selected target.
    pub fn latest(&self) -> Option<Arc<MetricSample>> {
        self.rx.borrow().clone()
    }

    /// Wait for the next update and return it.
    pub async fn changed(&mut self) -> Option<Arc<MetricSample>> {
        // The sender lives in `self`, so this cannot fail.
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.target
            .is_some_and(|id| self.manager.is_connected(id))
    }

    /// History of `series` for the selected target.
    pub fn history(&self, series: Series) -> Vec<HistoryPoint> {
        match self.target {
            Some(id) => self.manager.history(series, id),
            None => Vec::new(),
        }
    }
}
