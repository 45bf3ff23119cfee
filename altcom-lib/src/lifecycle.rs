use crate::command::CommandId;
use crate::error::AltcomError;
use crate::registry::{CallbackRegistry, Completion, Ticket};
use crate::status::{ModemStatus, StatusDirective, StatusNotifier, Subscription};
use std::sync::Arc;
use tracing::{debug, info};

/// Owns the pairing of a pending completion with its status observer.
///
/// Both are created by [`setup`](Self::setup) and leave together: through the
/// response job, through [`teardown`](Self::teardown), or when the modem drops
/// below the operational state while the call is in flight. In the last case
/// the caller is never notified.
#[derive(Clone)]
pub struct CallbackLifecycle {
    registry: CallbackRegistry,
    notifier: Arc<dyn StatusNotifier>,
}

impl CallbackLifecycle {
    pub fn new(registry: CallbackRegistry, notifier: Arc<dyn StatusNotifier>) -> Self {
        Self { registry, notifier }
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    pub fn setup(&self, id: CommandId, completion: Completion) -> Result<Ticket, AltcomError> {
        let ticket = self.registry.issue_ticket();
        // The entry owns the subscription that owns this observer, so the
        // observer must not own the registry.
        let registry = self.registry.downgrade();
        let subscription = Subscription::new(
            Arc::clone(&self.notifier),
            Arc::new(move |new: ModemStatus, old: ModemStatus| {
                if new.is_operational() {
                    return StatusDirective::Keep;
                }
                info!(%id, "Status change {} -> {} abandons pending request", old, new);
                // Dropping the entry outside the registry lock stops observing.
                if let Some(registry) = registry.upgrade() {
                    drop(registry.take_if(id, ticket));
                }
                StatusDirective::Clear
            }),
        );
        self.registry.register(id, ticket, completion, Some(subscription))?;

        // The modem may have gone down between the caller's status check and
        // the observer becoming visible.
        let status = self.notifier.status();
        if !status.is_operational() {
            self.teardown(id, ticket);
            return Err(AltcomError::NotOperational(status));
        }
        debug!(%id, "Registered pending callback");
        Ok(ticket)
    }

    /// Remove the registration made by [`setup`](Self::setup), if it is still pending.
    pub fn teardown(&self, id: CommandId, ticket: Ticket) {
        if self.registry.take_if(id, ticket).is_some() {
            debug!(%id, "Tore down pending callback");
        }
    }

    /// Guard that tears the registration down when dropped, unless disarmed.
    ///
    /// Held across the send so that a caller abandoning the call mid-send
    /// does not leave the registration behind.
    pub fn guard(&self, id: CommandId, ticket: Ticket) -> SetupGuard<'_> {
        SetupGuard {
            lifecycle: self,
            id,
            ticket: Some(ticket),
        }
    }

    /// Remove whatever is pending under `id`. Idempotent.
    pub fn unregister(&self, id: CommandId) {
        if self.registry.take(id).is_some() {
            debug!(%id, "Unregistered pending callback");
        }
    }
}

/// See [`CallbackLifecycle::guard`].
pub struct SetupGuard<'a> {
    lifecycle: &'a CallbackLifecycle,
    id: CommandId,
    ticket: Option<Ticket>,
}

impl SetupGuard<'_> {
    /// The request is on the wire; the registration now belongs to the response job.
    pub fn disarm(mut self) {
        self.ticket = None;
    }
}

impl Drop for SetupGuard<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.lifecycle.teardown(self.id, ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusBroadcaster;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_power_loss_clears_entry_and_observer() {
        let broadcaster = Arc::new(StatusBroadcaster::new(ModemStatus::PowerOn));
        let lifecycle = CallbackLifecycle::new(CallbackRegistry::new(), broadcaster.clone());
        let id = CommandId::new(0x35);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        lifecycle
            .setup(id, Box::new(move |_| flag.store(true, Ordering::SeqCst)))
            .unwrap();
        assert!(lifecycle.registry().contains(id));
        assert_eq!(broadcaster.observer_count(), 1);

        broadcaster.set_status(ModemStatus::Initialized);
        assert!(!lifecycle.registry().contains(id));
        assert_eq!(broadcaster.observer_count(), 0);
        assert!(!fired.load(Ordering::SeqCst), "abandoned callback is never invoked");
    }

    #[test]
    fn test_setup_rejected_when_modem_down() {
        let broadcaster = Arc::new(StatusBroadcaster::new(ModemStatus::Initialized));
        let lifecycle = CallbackLifecycle::new(CallbackRegistry::new(), broadcaster.clone());
        let err = lifecycle.setup(CommandId::new(1), Box::new(|_| {})).unwrap_err();
        assert!(matches!(err, AltcomError::NotOperational(ModemStatus::Initialized)));
        assert!(lifecycle.registry().is_empty());
        assert_eq!(broadcaster.observer_count(), 0);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let broadcaster = Arc::new(StatusBroadcaster::default());
        let lifecycle = CallbackLifecycle::new(CallbackRegistry::new(), broadcaster.clone());
        let id = CommandId::new(9);
        lifecycle.unregister(id);
        lifecycle.setup(id, Box::new(|_| {})).unwrap();
        lifecycle.unregister(id);
        lifecycle.unregister(id);
        assert!(lifecycle.registry().is_empty());
        assert_eq!(broadcaster.observer_count(), 0);
    }

    #[test]
    fn test_stale_teardown_keeps_newer_entry() {
        let lifecycle = CallbackLifecycle::new(CallbackRegistry::new(), Arc::new(StatusBroadcaster::default()));
        let id = CommandId::new(9);
        let first = lifecycle.setup(id, Box::new(|_| {})).unwrap();
        lifecycle.teardown(id, first);
        let _second = lifecycle.setup(id, Box::new(|_| {})).unwrap();
        lifecycle.teardown(id, first);
        assert!(lifecycle.registry().contains(id));
    }

    #[test]
    fn test_guard_tears_down_unless_disarmed() {
        let broadcaster = Arc::new(StatusBroadcaster::default());
        let lifecycle = CallbackLifecycle::new(CallbackRegistry::new(), broadcaster.clone());
        let id = CommandId::new(9);

        let ticket = lifecycle.setup(id, Box::new(|_| {})).unwrap();
        drop(lifecycle.guard(id, ticket));
        assert!(lifecycle.registry().is_empty());
        assert_eq!(broadcaster.observer_count(), 0);

        let ticket = lifecycle.setup(id, Box::new(|_| {})).unwrap();
        lifecycle.guard(id, ticket).disarm();
        assert!(lifecycle.registry().contains(id));
        assert_eq!(broadcaster.observer_count(), 1);
    }

    #[test]
    fn test_dropping_lifecycle_releases_observers() {
        let broadcaster = Arc::new(StatusBroadcaster::default());
        let lifecycle = CallbackLifecycle::new(CallbackRegistry::new(), broadcaster.clone());
        lifecycle.setup(CommandId::new(9), Box::new(|_| {})).unwrap();
        assert_eq!(broadcaster.observer_count(), 1);

        drop(lifecycle);
        assert_eq!(broadcaster.observer_count(), 0);
    }
}
