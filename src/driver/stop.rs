use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Cloneable stop request shared between the parked driver thread and
/// whoever decides playback is over.
///
/// Requests are sticky: a stop requested before [`wait`](Self::wait) makes
/// the wait return immediately.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every waiter. Idempotent.
    pub fn request_stop(&self) {
        let (_, condvar) = &*self.inner;
        *self.flag() = true;
        condvar.notify_all();
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.flag()
    }

    /// Clear a previous request so the signal can be reused
    pub fn reset(&self) {
        *self.flag() = false;
    }

    /// Park the calling thread until a stop is requested
    pub fn wait(&self) {
        let (_, condvar) = &*self.inner;
        let mut stopped = self.flag();
        while !*stopped {
            stopped = condvar
                .wait(stopped)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait) with a deadline; true if a stop was requested
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (_, condvar) = &*self.inner;
        let guard = self.flag();
        let (stopped, _) = condvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }

    // The flag is a plain bool, so a poisoned lock still holds a valid value
    fn flag(&self) -> MutexGuard<'_, bool> {
        let (lock, _) = &*self.inner;
        lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
