//! Cooperative cancellation for the sampler pipeline.
//!
//! A [`CancelToken`] is a cloneable flag shared by every pipeline thread.
//! Threads never block indefinitely: every channel operation is a timeout
//! poll that re-checks the token, so a raised token is observed within one
//! polling interval on all tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag.
///
/// Raised by the caller (e.g. a Ctrl-C handler) or internally by the
/// aggregator when a fatal shard error halts the pipeline. Once raised it
/// never resets.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
