//! Cooperative cancellation for scan jobs.
//!
//! Each job owns a [`CancelToken`]. The scheduler flips it when the job is
//! cancelled, its root is removed or the engine shuts down; the walker polls
//! it before every listing and between every entry. A token may also carry a
//! deadline, after which it reports itself cancelled without anyone calling
//! [`CancelToken::cancel`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag with an optional deadline.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that is not cancelled and has no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// A token sharing this one's flag that also expires `timeout` from now.
    #[must_use]
    pub fn expiring_after(&self, timeout: Duration) -> Self {
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested or the deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.timed_out()
    }

    /// Whether the deadline (if any) has passed.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Whether `cancel` was called explicitly.
    #[must_use]
    pub fn was_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_is_live() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(!token.timed_out());
    }

    #[test]
    fn test_clone_shares_flag() {
        let token = CancelToken::new();
        let worker = token.clone();
        token.cancel();
        assert!(worker.is_cancelled());
        assert!(worker.was_requested());
    }

    #[test]
    fn test_deadline_expires() {
        let token = CancelToken::with_timeout(Duration::ZERO);
        assert!(token.is_cancelled());
        assert!(token.timed_out());
        assert!(!token.was_requested());
    }

    #[test]
    fn test_far_deadline_is_live() {
        let token = CancelToken::with_timeout(Duration::from_secs(3600));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_expiring_copy_shares_flag() {
        let token = CancelToken::new();
        let bounded = token.expiring_after(Duration::from_secs(3600));
        assert!(!bounded.is_cancelled());
        token.cancel();
        assert!(bounded.is_cancelled());

        let expired = CancelToken::new().expiring_after(Duration::ZERO);
        assert!(expired.timed_out());
    }

    #[test]
    fn test_token_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CancelToken>();
    }
}
