use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation flag shared between a UI thread and the
/// registration drivers.
///
/// The flag is set from a cancel handler and polled by the subprocess
/// log-streaming loop; relaxed ordering is enough since observation within
/// one poll interval is all that is required.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the in-flight registration.
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn set(&self, requested: bool) {
        self.0.store(requested, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear the flag at the start of a new run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}
