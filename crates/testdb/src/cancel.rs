//! Stopping a [`crate::retry`] loop from another task or thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag a [`crate::RetryPolicy`] checks between connect attempts.
///
/// All clones observe the same flag, so a test can hand one clone to the
/// policy and keep another to abort a slow container start.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    stop: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Ask every retry loop holding a clone to give up after its current
    /// attempt.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
