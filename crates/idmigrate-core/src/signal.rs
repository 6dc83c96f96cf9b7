//! Cooperative stop signal shared by the batch phases.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flag that batch loops check before starting the next unit of work.
///
/// Stopping never interrupts a unit in flight: the current user transaction,
/// row update, or file move finishes first.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that batches stop after their current unit.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
