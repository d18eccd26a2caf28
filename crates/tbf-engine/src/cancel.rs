//! One-shot latches shared between the orchestrator, the generator thread,
//! the timer thread and the validator.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Monotonic flag: once raised it stays raised. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct Latch {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        let (lock, cvar) = &*self.inner;
        let mut raised = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *raised = true;
        cvar.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until raised or `timeout` elapses. Returns whether it is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// The two latches of a run.
#[derive(Debug, Clone, Default)]
pub struct RunSignals {
    /// Raised on success or when the global time limit expires.
    pub cancel: Latch,
    /// Raised by the generator side when it stops producing test cases.
    pub generation_finished: Latch,
}

impl RunSignals {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn latch_is_monotonic_and_shared() {
        let latch = Latch::new();
        let other = latch.clone();
        assert!(!latch.is_raised());
        other.raise();
        other.raise();
        assert!(latch.is_raised());
    }

    #[test]
    fn wait_returns_early_when_raised_from_another_thread() {
        let latch = Latch::new();
        let remote = latch.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.raise();
        });
        assert!(latch.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }

    #[test]
    fn wait_times_out_when_never_raised() {
        let latch = Latch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(5)));
    }
}
