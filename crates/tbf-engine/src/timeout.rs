//! Deadline helpers for bounded tool runs and the global time limit.

use std::time::{Duration, Instant};

pub(crate) fn deadline_exceeded(deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => Instant::now() >= deadline,
        None => false,
    }
}

pub(crate) fn deadline_after(limit: Option<Duration>) -> Option<Instant> {
    limit.and_then(|t| Instant::now().checked_add(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_deadline_is_never_exceeded() {
        assert!(!deadline_exceeded(None));
    }

    #[test]
    fn past_deadline_is_exceeded() {
        let past = Instant::now() - Duration::from_secs(1);
        assert!(deadline_exceeded(Some(past)));
    }

    #[test]
    fn future_deadline_is_not_exceeded() {
        assert!(deadline_after(None).is_none());
        let deadline = deadline_after(Some(Duration::from_secs(60)));
        assert!(!deadline_exceeded(deadline));
    }
}
