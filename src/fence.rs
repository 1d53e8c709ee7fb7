//! Reference-counted completion fences.
//!
//! A [`Fence`] is created when a command is emitted and carries that
//! command's sequence number. Handles are shared between the submitter, any
//! number of waiters, and at most one pending event; the underlying object is
//! freed when the last handle is released.
//!
//! Once a fence is observed complete its sequence is replaced by
//! [`SIGNALED_SEQ`], so later checks never consult the counter again.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use virtgpu_fence::{Fence, SequenceCounter};
//!
//! let counter = Arc::new(SequenceCounter::new());
//! let fence = Fence::create(&counter);
//! assert!(!fence.is_signaled());
//!
//! counter.advance_to(fence.sequence());
//! assert!(fence.is_signaled());
//! fence.release();
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::counter::SequenceCounter;
use crate::error::{FenceError, FenceResult};
use crate::wait::wait_for_sequence;

/// Sequence value of a fence that has been observed complete.
///
/// Never handed out by [`SequenceCounter::next_sequence`], which starts at 1.
pub const SIGNALED_SEQ: u64 = 0;

struct FenceInner {
    /// Assigned sequence, or [`SIGNALED_SEQ`] once observed complete.
    seq: AtomicU64,
    counter: Arc<SequenceCounter>,
}

impl Drop for FenceInner {
    fn drop(&mut self) {
        self.counter.fence_destroyed();
    }
}

/// Owning handle to a shared fence.
///
/// Cloning is the same as [`acquire`](Self::acquire); dropping is the same
/// as [`release`](Self::release).
pub struct Fence {
    inner: Arc<FenceInner>,
}

impl Fence {
    /// Create a fence for the next sequence on `counter`.
    ///
    /// The fence keeps `counter` alive for as long as any handle exists.
    pub fn create(counter: &Arc<SequenceCounter>) -> Self {
        let seq = counter.next_sequence();
        counter.fence_created();
        log::trace!("Emitted fence {}", seq);
        Self {
            inner: Arc::new(FenceInner {
                seq: AtomicU64::new(seq),
                counter: Arc::clone(counter),
            }),
        }
    }

    /// Take an additional reference to this fence.
    pub fn acquire(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Drop this reference. The fence is freed with its last reference.
    pub fn release(self) {
        drop(self);
    }

    /// Current sequence value.
    ///
    /// Returns [`SIGNALED_SEQ`] once the fence has been observed complete.
    pub fn sequence(&self) -> u64 {
        self.inner.seq.load(Ordering::Acquire)
    }

    /// Check whether the fence has completed (non-blocking).
    ///
    /// The first positive answer is memoized. Concurrent callers may both
    /// query the counter before either stores the sentinel; the store is
    /// idempotent.
    pub fn is_signaled(&self) -> bool {
        let seq = self.sequence();
        if seq == SIGNALED_SEQ {
            return true;
        }
        if self.inner.counter.is_signaled(seq) {
            self.mark_signaled();
            return true;
        }
        false
    }

    /// Block until the fence completes.
    ///
    /// See [`wait_for_sequence`] for the lockup and interruption rules. On
    /// failure the sequence is left as-is, so the wait can be retried.
    pub fn wait(&self, interruptible: bool) -> FenceResult<()> {
        let seq = self.sequence();
        if seq == SIGNALED_SEQ {
            return Ok(());
        }
        wait_for_sequence(&self.inner.counter, seq, interruptible)?;
        self.mark_signaled();
        Ok(())
    }

    /// Number of live handles to this fence.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles refer to the same fence.
    pub fn ptr_eq(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Counter this fence was created from.
    pub fn counter(&self) -> &Arc<SequenceCounter> {
        &self.inner.counter
    }

    fn mark_signaled(&self) {
        self.inner.seq.store(SIGNALED_SEQ, Ordering::Release);
    }
}

impl Clone for Fence {
    fn clone(&self) -> Self {
        self.acquire()
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("seq", &self.sequence())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Signaled check that treats an absent fence as complete.
pub fn signaled(fence: Option<&Fence>) -> bool {
    fence.map_or(true, Fence::is_signaled)
}

/// Wait on an optional fence.
///
/// An absent fence must be special-cased by the caller; passing `None`
/// returns [`FenceError::InvalidArgument`].
pub fn wait(fence: Option<&Fence>, interruptible: bool) -> FenceResult<()> {
    match fence {
        Some(fence) => fence.wait(interruptible),
        None => Err(FenceError::InvalidArgument(
            "cannot wait on an absent fence".to_string(),
        )),
    }
}
