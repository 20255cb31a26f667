//! Cooperative cancellation for long-running tasks (decode, semantic
//! call, plan, render), per §5.
//!
//! The need here is a single flag check per loop iteration, so this is a
//! minimal newtype over `Arc<AtomicBool>` rather than pulling in
//! `tokio-util` for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheaply-cloned flag that callers poll at loop boundaries (between
/// beats, between analysis tasks, between A* expansion rounds, between
/// rendered blocks). Cancelling discards partial results and releases
/// any held PCM buffers; it never interrupts mid-computation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled_and_latches_once_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
