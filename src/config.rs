//! Fence driver configuration.

use std::time::Duration;

use crate::error::{FenceError, FenceResult};

/// Default time without completion progress before a wait reports a lockup.
pub const DEFAULT_LOCKUP_WINDOW: Duration = Duration::from_millis(500);

/// Default re-check interval once the lockup window has already elapsed.
pub const DEFAULT_MIN_WAIT: Duration = Duration::from_millis(1);

/// Timing parameters for fence waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceConfig {
    /// How long the device may go without reporting progress before a
    /// blocked waiter declares a lockup.
    pub lockup_window: Duration,
    /// Shortest blocking interval. Used when the window has already
    /// elapsed, so the waiter re-checks quickly instead of sleeping blind.
    pub min_wait: Duration,
}

impl Default for FenceConfig {
    fn default() -> Self {
        Self {
            lockup_window: DEFAULT_LOCKUP_WINDOW,
            min_wait: DEFAULT_MIN_WAIT,
        }
    }
}

impl FenceConfig {
    /// Set the lockup window.
    pub fn with_lockup_window(mut self, window: Duration) -> Self {
        self.lockup_window = window;
        self
    }

    /// Set the minimum re-check interval.
    pub fn with_min_wait(mut self, min_wait: Duration) -> Self {
        self.min_wait = min_wait;
        self
    }

    /// Check that both intervals are usable.
    pub fn validate(&self) -> FenceResult<()> {
        if self.lockup_window.is_zero() {
            return Err(FenceError::InvalidArgument(
                "lockup window must be non-zero".to_string(),
            ));
        }
        if self.min_wait.is_zero() {
            return Err(FenceError::InvalidArgument(
                "minimum wait must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
