//! Coalescing of concurrent requests for the same key.
//!
//! A [`SingleFlight`] lets many tasks ask for the same resource at the same
//! time while only one of them does the work. The others wait for the shared
//! outcome. Once the owning call finishes, the slot is discarded so the next
//! request for that key runs the operation again; this is not a cache.

use crate::Result;
use core::fmt::{Debug, Formatter};
use ohno::{AppError, app_err};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

type Slot<T> = watch::Receiver<Option<Result<T, Arc<AppError>>>>;

/// In-flight request de-duplicator keyed by string.
pub struct SingleFlight<T> {
    slots: Mutex<HashMap<String, Slot<T>>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Run `operation` for `key`, or join a run that is already in flight.
    ///
    /// Exactly one concurrent caller per key executes `operation`; everybody
    /// else receives a clone of its outcome, including failures. Errors are
    /// never retried here.
    pub async fn run<F, Fut>(&self, key: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let claimed = {
            let mut slots = self.slots.lock().expect("lock poisoned");
            match slots.entry(key.to_owned()) {
                Entry::Occupied(entry) => Err(entry.get().clone()),
                Entry::Vacant(entry) => {
                    let (sender, receiver) = watch::channel(None);
                    let _ = entry.insert(receiver);
                    Ok(sender)
                }
            }
        };

        let sender = match claimed {
            Ok(sender) => sender,
            Err(receiver) => return Self::wait(receiver, key).await,
        };

        let _slot = SlotGuard { slots: &self.slots, key };
        let outcome = operation().await.map_err(Arc::new);
        let _ = sender.send_replace(Some(outcome.clone()));
        outcome.map_err(|e| Arc::try_unwrap(e).unwrap_or_else(|shared| app_err!("{shared}")))
    }

    async fn wait(mut receiver: Slot<T>, key: &str) -> Result<T> {
        match receiver.wait_for(Option::is_some).await {
            Ok(value) => match value.as_ref() {
                Some(Ok(value)) => Ok(value.clone()),
                Some(Err(e)) => Err(app_err!("{e}")),
                None => Err(app_err!("in-flight operation for '{key}' produced no outcome")),
            },
            Err(_) => Err(app_err!("in-flight operation for '{key}' was abandoned")),
        }
    }

    /// Number of keys currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.slots.lock().expect("lock poisoned").len()
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let in_flight = self.slots.lock().map_or(0, |slots| slots.len());
        f.debug_struct("SingleFlight").field("in_flight", &in_flight).finish()
    }
}

/// Removes the slot when the owning call completes, fails, or is cancelled.
struct SlotGuard<'a, T> {
    slots: &'a Mutex<HashMap<String, Slot<T>>>,
    key: &'a str,
}

impl<T> Drop for SlotGuard<'_, T> {
    fn drop(&mut self) {
        if let Ok(mut slots) = self.slots.lock() {
            let _ = slots.remove(self.key);
        }
    }
}
