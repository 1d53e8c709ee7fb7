//! Fence error types.

use thiserror::Error;

/// Errors returned by fence operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FenceError {
    /// Allocating a fence or a pending event failed.
    #[error("out of memory")]
    OutOfMemory,
    /// The operation was called with an argument it cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An interruptible wait was cancelled before the fence signaled.
    #[error("wait interrupted")]
    Interrupted,
    /// No completion progress was observed for a full lockup window.
    #[error("device timeout waiting for sequence {sequence} (last completed {last_completed})")]
    DeviceTimeout {
        /// Sequence the caller was waiting for.
        sequence: u64,
        /// Last completed sequence observed when the lockup was declared.
        last_completed: u64,
    },
}

impl FenceError {
    /// Whether the caller may simply retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Whether this error reports a stalled device.
    pub fn is_lockup(&self) -> bool {
        matches!(self, Self::DeviceTimeout { .. })
    }
}

pub type FenceResult<T> = Result<T, FenceError>;
