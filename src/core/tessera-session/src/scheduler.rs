//! Proactive refresh timer.
//!
//! One timer at most. It fires `skew` before the access token expires (or
//! immediately if that moment has passed) and hands control to a callback.
//! The scheduler has no retry policy of its own.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::Clock;

struct ArmedTimer {
    generation: u64,
    fire_at_epoch_ms: i64,
    handle: JoinHandle<()>,
}

type Slot = Arc<Mutex<Option<ArmedTimer>>>;

fn lock(slot: &Mutex<Option<ArmedTimer>>) -> MutexGuard<'_, Option<ArmedTimer>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the timer from `slot` if it is still the one identified by
/// `generation`. Returns false if it was disarmed or replaced meanwhile.
fn detach_if_current(slot: &Mutex<Option<ArmedTimer>>, generation: u64) -> bool {
    let mut guard = lock(slot);
    match guard.as_ref() {
        Some(timer) if timer.generation == generation => {
            // Dropping our own handle detaches instead of aborting.
            guard.take();
            true
        },
        _ => false,
    }
}

/// Single-slot, cancellable refresh timer.
pub struct RefreshScheduler {
    skew: Duration,
    clock: Arc<dyn Clock>,
    slot: Slot,
    generation: AtomicU64,
}

impl RefreshScheduler {
    /// Creates a scheduler that fires `skew` ahead of expiry.
    pub fn new(skew: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            skew,
            clock,
            slot: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    /// Arms the timer for a token expiring at `expires_at_epoch_ms`.
    ///
    /// Any previously armed timer is cancelled first. Returns the delay until
    /// the fire, which is zero when the fire time is already past.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm<F, Fut>(&self, expires_at_epoch_ms: i64, on_fire: F) -> Duration
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fire_at_epoch_ms = expires_at_epoch_ms.saturating_sub(self.skew.as_millis() as i64);
        let delay_ms = fire_at_epoch_ms.saturating_sub(self.clock.now_epoch_ms()).max(0);
        let delay = Duration::from_millis(delay_ms as u64);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Holding the lock across spawn keeps a zero-delay task from looking
        // at the slot before it has been filled.
        let mut guard = lock(&self.slot);
        if let Some(previous) = guard.take() {
            previous.handle.abort();
            debug!(generation = previous.generation, "Replaced pending refresh timer");
        }

        let slot = Arc::clone(&self.slot);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if detach_if_current(&slot, generation) {
                debug!(generation, "Refresh timer fired");
                on_fire().await;
            }
        });

        *guard = Some(ArmedTimer {
            generation,
            fire_at_epoch_ms,
            handle,
        });

        debug!(generation, fire_at_epoch_ms, delay_ms, "Refresh timer armed");

        delay
    }

    /// Cancels the pending timer, if any. Returns whether one was pending.
    ///
    /// A callback that is already running is left alone.
    pub fn disarm(&self) -> bool {
        match lock(&self.slot).take() {
            Some(timer) => {
                timer.handle.abort();
                debug!(generation = timer.generation, "Refresh timer disarmed");
                true
            },
            None => false,
        }
    }

    /// Checks if a timer is pending.
    pub fn is_armed(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// When the pending timer will fire, in Unix milliseconds.
    pub fn fire_at(&self) -> Option<i64> {
        lock(&self.slot).as_ref().map(|t| t.fire_at_epoch_ms)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
