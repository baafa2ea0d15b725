//! Subscriber fan-out: delivers each sample to every subscriber of its target.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::{MetricsManager, SampleSeq, Shared, TargetEntry};
use crate::sample::{MetricSample, TargetId};

/// Identifies one subscription; unique for the lifetime of the manager.
pub type SubscriptionId = u64;

type Callback = Box<dyn Fn(&MetricSample) + Send + Sync>;

thread_local! {
    // Subscribers whose callback is running on this thread.
    static DELIVERING: RefCell<Vec<SubscriptionId>> = const { RefCell::new(Vec::new()) };
}

pub(crate) struct Subscriber {
    id: SubscriptionId,
    callback: Callback,
    active: AtomicBool,
    /// Last sample handed to the callback. Held for the whole call.
    delivered: Mutex<SampleSeq>,
}

impl Subscriber {
    fn new(id: SubscriptionId, callback: Callback) -> Self {
        Self {
            id,
            callback,
            active: AtomicBool::new(true),
            delivered: Mutex::new(0),
        }
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Block until a callback running on another thread has returned.
    fn wait_idle(&self) {
        let reentrant = DELIVERING.with(|d| d.borrow().contains(&self.id));
        if !reentrant {
            drop(self.delivered.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }

    /// Invoke the callback with sample `seq`, containing a panic.
    ///
    /// Samples not newer than the last one delivered are skipped. Returns
    /// whether the callback ran to completion.
    fn deliver(&self, target_id: TargetId, seq: SampleSeq, sample: &MetricSample) -> bool {
        let mut delivered = self
            .delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !self.active.load(Ordering::Acquire) || seq <= *delivered {
            return false;
        }
        *delivered = seq;

        DELIVERING.with(|d| d.borrow_mut().push(self.id));
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.callback)(sample)));
        DELIVERING.with(|d| d.borrow_mut().pop());

        match outcome {
            Ok(()) => true,
            Err(panic) => {
                tracing::error!(
                    "FanOut: subscriber {} of target {} panicked: {}",
                    self.id,
                    target_id,
                    panic_message(panic.as_ref())
                );
                false
            }
        }
    }
}

/// Handle of one subscription. Unsubscribes when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    manager: Weak<Shared>,
    target_id: TargetId,
    id: SubscriptionId,
    subscriber: Arc<Subscriber>,
    done: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn target_id(&self) -> TargetId {
        self.target_id
    }

    /// Stop receiving samples. Idempotent.
    ///
    /// Once this returns the callback is not running and is not invoked
    /// again, unless this is called from inside that same callback. The
    /// connection itself outlives the last subscription by the teardown delay.
    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.subscriber.deactivate();
        self.subscriber.wait_idle();
        if let Some(manager) = MetricsManager::upgrade(&self.manager) {
            manager.remove_subscriber(self.target_id, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl MetricsManager {
    /// Register `callback` for samples of `target_id`, connecting if needed.
    ///
    /// If a sample was already received for the target, `callback` gets it
    /// before this returns.
    pub fn subscribe<F>(&self, target_id: TargetId, callback: F) -> Subscription
    where
        F: Fn(&MetricSample) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let subscriber = Arc::new(Subscriber::new(id, Box::new(callback)));

        let replay = {
            let mut state = self.lock();
            let entry = state
                .targets
                .entry(target_id)
                .or_insert_with(TargetEntry::new);
            entry.subscribers.insert(id, subscriber.clone());
            entry.cancel_teardown();
            entry.touch();
            self.ensure_locked(target_id, entry);
            entry.last_sample.clone()
        };

        tracing::debug!("FanOut: subscriber {} joined target {}", id, target_id);

        // A frame dispatched since the lock was released wins over this.
        if let Some((seq, sample)) = replay {
            subscriber.deliver(target_id, seq, &sample);
        }

        Subscription {
            manager: self.downgrade(),
            target_id,
            id,
            subscriber,
            done: AtomicBool::new(false),
        }
    }

    fn remove_subscriber(&self, target_id: TargetId, id: SubscriptionId) {
        let mut state = self.lock();
        let Some(entry) = state.targets.get_mut(&target_id) else {
            return;
        };
        if entry.subscribers.remove(&id).is_none() {
            return;
        }
        entry.touch();
        tracing::debug!("FanOut: subscriber {} left target {}", id, target_id);

        if entry.subscribers.is_empty() {
            self.schedule_teardown(target_id, entry);
        }
    }

    /// Deliver sample `seq` to `subscribers`, isolating failures.
    /// Returns the number of callbacks that completed.
    pub(super) fn dispatch(
        &self,
        target_id: TargetId,
        seq: SampleSeq,
        sample: &MetricSample,
        subscribers: &[Arc<Subscriber>],
    ) -> usize {
        subscribers
            .iter()
            .filter(|s| s.deliver(target_id, seq, sample))
            .count()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
