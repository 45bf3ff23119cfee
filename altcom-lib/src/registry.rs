use crate::command::CommandId;
use crate::error::AltcomError;
use crate::status::Subscription;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Type-erased completion stored for a pending asynchronous call.
///
/// Receives the raw response payload (or the reason there is none) and is
/// responsible for decoding it and notifying the caller.
pub type Completion = Box<dyn for<'a> FnOnce(Result<&'a [u8], AltcomError>) + Send + 'static>;

/// Identifies one registration so that a stale canceller cannot remove a
/// newer entry registered under the same command id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

pub struct PendingEntry {
    ticket: Ticket,
    completion: Completion,
    subscription: Option<Subscription>,
}

impl PendingEntry {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Split into the completion and the status subscription.
    pub fn into_parts(self) -> (Completion, Option<Subscription>) {
        (self.completion, self.subscription)
    }
}

impl fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEntry")
            .field("ticket", &self.ticket)
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<CommandId, PendingEntry>,
}

/// Map from command id to at most one pending completion.
///
/// Cloning yields another handle to the same table. Every mutation happens
/// under one mutex, and entries leave the table by value, so whichever of
/// the response job or a status-driven cancellation removes an entry first
/// is its only owner.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    state: Arc<Mutex<RegistryState>>,
    next_ticket: Arc<AtomicU64>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle that does not keep the table alive.
    pub fn downgrade(&self) -> WeakCallbackRegistry {
        WeakCallbackRegistry {
            state: Arc::downgrade(&self.state),
            next_ticket: Arc::clone(&self.next_ticket),
        }
    }

    pub fn issue_ticket(&self) -> Ticket {
        Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed))
    }

    /// Register `completion` under `id`.
    ///
    /// A second registration while one is pending is rejected; the entry
    /// already in the table stays untouched.
    pub fn register(
        &self,
        id: CommandId,
        ticket: Ticket,
        completion: Completion,
        subscription: Option<Subscription>,
    ) -> Result<(), AltcomError> {
        let rejected = {
            let mut state = self.lock();
            if state.entries.contains_key(&id) {
                Some(subscription)
            } else {
                state.entries.insert(
                    id,
                    PendingEntry {
                        ticket,
                        completion,
                        subscription,
                    },
                );
                None
            }
        };
        match rejected {
            // Subscription drops here, outside the lock.
            Some(_) => Err(AltcomError::AlreadyPending(id)),
            None => Ok(()),
        }
    }

    /// Remove and return the entry for `id`, whoever registered it.
    pub fn take(&self, id: CommandId) -> Option<PendingEntry> {
        self.lock().entries.remove(&id)
    }

    /// Remove the entry for `id` only if it is still the registration `ticket`.
    pub fn take_if(&self, id: CommandId, ticket: Ticket) -> Option<PendingEntry> {
        let mut state = self.lock();
        match state.entries.get(&id) {
            Some(entry) if entry.ticket == ticket => state.entries.remove(&id),
            _ => None,
        }
    }

    pub fn contains(&self, id: CommandId) -> bool {
        self.lock().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Non-owning [`CallbackRegistry`] handle, for observers owned by the
/// entries they guard.
#[derive(Clone)]
pub struct WeakCallbackRegistry {
    state: Weak<Mutex<RegistryState>>,
    next_ticket: Arc<AtomicU64>,
}

impl WeakCallbackRegistry {
    pub fn upgrade(&self) -> Option<CallbackRegistry> {
        self.state.upgrade().map(|state| CallbackRegistry {
            state,
            next_ticket: Arc::clone(&self.next_ticket),
        })
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("CallbackRegistry")
            .field("pending", &state.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn noop() -> Completion {
        Box::new(|_| {})
    }

    #[test]
    fn test_second_registration_rejected() {
        let registry = CallbackRegistry::new();
        let id = CommandId::new(0x35);
        let first = registry.issue_ticket();
        registry.register(id, first, noop(), None).unwrap();

        let second = registry.issue_ticket();
        let err = registry.register(id, second, noop(), None).unwrap_err();
        assert!(matches!(err, AltcomError::AlreadyPending(rejected) if rejected == id));
        assert_eq!(registry.take(id).map(|e| e.ticket()), Some(first));
    }

    #[test]
    fn test_take_if_ignores_stale_ticket() {
        let registry = CallbackRegistry::new();
        let id = CommandId::new(0x35);
        let stale = registry.issue_ticket();
        let current = registry.issue_ticket();
        registry.register(id, current, noop(), None).unwrap();

        assert!(registry.take_if(id, stale).is_none());
        assert!(registry.contains(id));
        assert!(registry.take_if(id, current).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_taken_completion_runs_once() {
        let registry = CallbackRegistry::new();
        let id = CommandId::new(0x35);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let ticket = registry.issue_ticket();
        registry
            .register(id, ticket, Box::new(move |_| flag.store(true, Ordering::SeqCst)), None)
            .unwrap();

        let (completion, _) = registry.take(id).unwrap().into_parts();
        assert!(registry.take(id).is_none());
        completion(Ok(&[]));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_weak_handle_does_not_keep_table_alive() {
        let registry = CallbackRegistry::new();
        let weak = registry.downgrade();
        let id = CommandId::new(0x35);
        let ticket = weak.upgrade().unwrap().issue_ticket();
        registry.register(id, ticket, noop(), None).unwrap();
        assert!(weak.upgrade().unwrap().contains(id));

        drop(registry);
        assert!(weak.upgrade().is_none());
    }
}
