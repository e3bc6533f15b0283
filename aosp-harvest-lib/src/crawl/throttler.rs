use core::time::Duration;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Caps in-flight requests against one remote host and lets any task pause dispatch.
///
/// Call [`Throttler::acquire`] before each request and hold the permit until
/// the response has been consumed. When the remote pushes back, a task calls
/// [`Throttler::pause_for`]; new acquisitions wait until the pause expires
/// while requests already in flight carry on. Overlapping pauses keep the
/// latest deadline.
#[derive(Debug)]
pub struct Throttler {
    semaphore: Arc<Semaphore>,
    resume_at: Mutex<Option<Instant>>,
}

impl Throttler {
    /// Create a new throttler that allows at most `max_concurrent` requests at a time.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            resume_at: Mutex::new(None),
        })
    }

    /// Wait out any active pause, then take a concurrency slot.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        while let Some(deadline) = self.pause_deadline() {
            tokio::time::sleep_until(deadline).await;
        }

        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("semaphore is never closed")
    }

    /// Returns whether dispatch is currently paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pause_deadline().is_some()
    }

    /// Number of free concurrency slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Pause dispatch for `duration`.
    ///
    /// Returns `false` without changing anything when an equal or later pause is already active.
    pub fn pause_for(&self, duration: Duration) -> bool {
        let new_deadline = Instant::now() + duration;
        let mut guard = self.resume_at.lock().expect("lock not poisoned");
        if guard.is_some_and(|existing| existing >= new_deadline) {
            return false;
        }
        *guard = Some(new_deadline);
        true
    }

    fn pause_deadline(&self) -> Option<Instant> {
        let mut guard = self.resume_at.lock().expect("lock not poisoned");
        match *guard {
            Some(deadline) if deadline > Instant::now() => Some(deadline),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }
}
