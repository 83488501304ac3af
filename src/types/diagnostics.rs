use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared switch for verbose per-packet and per-report logging.
///
/// Cloning shares the same flag, so toggling it on the manager is seen by
/// every running loop.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    verbose: Arc<AtomicBool>,
}

impl Diagnostics {
    /// Create a flag with the given initial value
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose: Arc::new(AtomicBool::new(verbose)),
        }
    }

    /// Turn verbose diagnostics on or off
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Whether verbose diagnostics are on
    #[must_use]
    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }
}
