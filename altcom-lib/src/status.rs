//! Modem power status and change notification.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use strum_macros::Display;
use tracing::{debug, info};

/// Power/lifecycle state of the modem, ordered from least to most operational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ModemStatus {
    #[strum(to_string = "uninitialized")]
    Uninitialized = 0,
    #[strum(to_string = "initialized")]
    Initialized = 1,
    #[strum(to_string = "power-on")]
    PowerOn = 2,
}

impl ModemStatus {
    /// Minimum state required to issue new requests
    pub const OPERATIONAL: ModemStatus = ModemStatus::PowerOn;

    pub fn is_operational(self) -> bool {
        self >= Self::OPERATIONAL
    }
}

/// What an observer wants done with its own registration after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDirective {
    Keep,
    Clear,
}

/// Called with `(new, old)` on every status transition.
pub type StatusObserver = Arc<dyn Fn(ModemStatus, ModemStatus) -> StatusDirective + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

/// Publisher of modem status transitions.
pub trait StatusNotifier: Send + Sync {
    fn status(&self) -> ModemStatus;

    fn observe(&self, observer: StatusObserver) -> ObserverId;

    /// Stop delivering to `id`. Unknown ids are ignored.
    fn stop_observing(&self, id: ObserverId);
}

/// RAII registration against a [`StatusNotifier`]; dropping it stops observing.
pub struct Subscription {
    id: ObserverId,
    notifier: Arc<dyn StatusNotifier>,
}

impl Subscription {
    pub fn new(notifier: Arc<dyn StatusNotifier>, observer: StatusObserver) -> Self {
        let id = notifier.observe(observer);
        Self { id, notifier }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.notifier.stop_observing(self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Subscription").field(&self.id.0).finish()
    }
}

struct BroadcasterState {
    status: ModemStatus,
    observers: BTreeMap<ObserverId, StatusObserver>,
}

/// In-process [`StatusNotifier`] driven by [`StatusBroadcaster::set_status`].
///
/// Observers run without the internal lock held, so they may subscribe,
/// unsubscribe or drop [`Subscription`]s freely.
pub struct StatusBroadcaster {
    state: Mutex<BroadcasterState>,
    next_id: AtomicU64,
}

impl StatusBroadcaster {
    pub fn new(initial: ModemStatus) -> Self {
        Self {
            state: Mutex::new(BroadcasterState {
                status: initial,
                observers: BTreeMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BroadcasterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new status and notify every observer of the transition.
    pub fn set_status(&self, new: ModemStatus) {
        let (old, observers) = {
            let mut state = self.lock();
            let old = state.status;
            if old == new {
                return;
            }
            state.status = new;
            let observers: Vec<_> = state
                .observers
                .iter()
                .map(|(id, observer)| (*id, Arc::clone(observer)))
                .collect();
            (old, observers)
        };
        info!("Modem status changed: {} -> {}", old, new);

        let cleared: Vec<ObserverId> = observers
            .into_iter()
            .filter(|(_, observer)| observer(new, old) == StatusDirective::Clear)
            .map(|(id, _)| id)
            .collect();

        if !cleared.is_empty() {
            debug!(count = cleared.len(), "Removing cleared status observers");
            let mut state = self.lock();
            for id in cleared {
                state.observers.remove(&id);
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(ModemStatus::PowerOn)
    }
}

impl StatusNotifier for StatusBroadcaster {
    fn status(&self) -> ModemStatus {
        self.lock().status
    }

    fn observe(&self, observer: StatusObserver) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().observers.insert(id, observer);
        id
    }

    fn stop_observing(&self, id: ObserverId) {
        self.lock().observers.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_status_ordering() {
        assert!(ModemStatus::Uninitialized < ModemStatus::Initialized);
        assert!(ModemStatus::PowerOn.is_operational());
        assert!(!ModemStatus::Initialized.is_operational());
    }

    #[test]
    fn test_clear_directive_removes_observer() {
        let broadcaster = StatusBroadcaster::new(ModemStatus::PowerOn);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        broadcaster.observe(Arc::new(move |new, _old| {
            seen.fetch_add(1, Ordering::SeqCst);
            if new.is_operational() {
                StatusDirective::Keep
            } else {
                StatusDirective::Clear
            }
        }));

        broadcaster.set_status(ModemStatus::PowerOn);
        assert_eq!(calls.load(Ordering::SeqCst), 0, "no transition, no call");

        broadcaster.set_status(ModemStatus::Initialized);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(broadcaster.observer_count(), 0);

        broadcaster.set_status(ModemStatus::PowerOn);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_drop_stops_observing() {
        let broadcaster = Arc::new(StatusBroadcaster::default());
        let notifier: Arc<dyn StatusNotifier> = broadcaster.clone();
        let subscription = Subscription::new(notifier, Arc::new(|_, _| StatusDirective::Keep));
        assert_eq!(broadcaster.observer_count(), 1);
        drop(subscription);
        assert_eq!(broadcaster.observer_count(), 0);
    }
}
