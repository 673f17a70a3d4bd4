use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Account and chain of the connected wallet as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub account: String,
    pub chain_id: u64,
    pub provider_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(Option<&AccountState>) + Send + Sync>;

#[derive(Default)]
struct Observers {
    entries: Vec<(ObserverId, Observer)>,
}

/// Last-value cell for the connected account.
///
/// Only the session manager writes; writes and notifications are split so the
/// manager can publish under its own lock and notify after releasing it.
#[derive(Clone, Default)]
pub struct AccountStore {
    value: Arc<RwLock<Option<AccountState>>>,
    observers: Arc<Mutex<Observers>>,
    next_observer: Arc<AtomicU64>,
}

impl std::fmt::Debug for AccountStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountStore")
            .field("value", &*self.value.read())
            .field("observers", &self.observers.lock().entries.len())
            .finish()
    }
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<AccountState> {
        self.value.read().clone()
    }

    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(Option<&AccountState>) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().entries.push((id, Arc::new(observer)));
        id
    }

    /// Returns false when the id was not subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.entries.len();
        observers.entries.retain(|(entry, _)| *entry != id);
        observers.entries.len() != before
    }

    /// Replace the stored value; returns whether it changed.
    pub(crate) fn replace(&self, next: Option<AccountState>) -> bool {
        let mut value = self.value.write();
        if *value == next {
            return false;
        }
        *value = next;
        true
    }

    /// Notify observers with the current value.
    pub(crate) fn notify(&self) {
        // Snapshot so observers may (un)subscribe from inside the callback.
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .entries
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        let current = self.current();
        for observer in observers {
            observer(current.as_ref());
        }
    }
}
