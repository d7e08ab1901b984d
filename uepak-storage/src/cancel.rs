//! Cancellation of in-flight extractions.
//!
//! One signal threads through the whole pipeline and is polled at
//! block boundaries; there is no built-in timeout — callers impose one
//! by cancelling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation signal polled by the extraction pipeline between
/// compression blocks.
pub trait CancelSignal: Send + Sync {
    /// Whether the current operation should be abandoned.
    fn is_cancelled(&self) -> bool;
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the flag. Every holder of a clone observes it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

impl CancelSignal for CancelToken {
    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Signal used by the plain `get` path.
pub(crate) struct NeverCancelled;

impl CancelSignal for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}
