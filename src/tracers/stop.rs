use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::vm_error::TracerError;

#[derive(Debug, Default)]
struct StopSignal {
    stopped: AtomicBool,
    reason: OnceLock<String>,
}

/// Cooperative cancellation shared between a tracer and whoever may abort it.
///
/// Cloning is cheap and every clone observes the same signal.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    signal: Arc<StopSignal>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal. Only the first reason is kept, later calls are no-ops.
    pub fn stop(&self, reason: String) {
        // The reason is published before the flag so that any thread seeing the
        // flag also sees the reason.
        if self.signal.reason.set(reason).is_ok() {
            self.signal.stopped.store(true, Ordering::Release);
            debug!(reason = self.reason().unwrap_or_default(), "tracer stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.signal.stopped.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<&str> {
        if self.is_stopped() {
            self.signal.reason.get().map(String::as_str)
        } else {
            None
        }
    }

    /// The stop error, carrying `partial` as the state accumulated so far.
    pub fn error(&self, partial: Option<serde_json::Value>) -> Option<TracerError> {
        self.reason().map(|reason| TracerError::Stopped {
            reason: reason.to_string(),
            partial,
        })
    }
}
