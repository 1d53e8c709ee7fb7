//! Per-device fence context.
//!
//! [`FenceDriver`] ties a [`SequenceCounter`] to an [`EventQueue`] and
//! exposes the two points where the rest of the driver calls in:
//!
//! | Caller | Entry point |
//! |--------|-------------|
//! | Command submission | [`FenceDriver::emit`] |
//! | Completion notification | [`FenceDriver::process_completion`] |
//!
//! # Example
//!
//! ```
//! use virtgpu_fence::{CommandHeader, FenceDriver};
//!
//! let driver = FenceDriver::new();
//! let mut header = CommandHeader::new(0x0105);
//! let fence = driver.emit(&mut header);
//! assert_eq!(header.fence_id, fence.sequence());
//!
//! driver.register_event(&fence, || println!("done"), || {}).unwrap();
//!
//! // Device echoed the fence id back.
//! driver.process_completion(header.fence_id);
//! assert!(fence.is_signaled());
//! ```

use std::sync::Arc;

use crate::command::CommandHeader;
use crate::config::FenceConfig;
use crate::counter::SequenceCounter;
use crate::error::FenceResult;
use crate::event::EventQueue;
use crate::fence::Fence;

/// Fence state for one device context.
#[derive(Debug, Default)]
pub struct FenceDriver {
    counter: Arc<SequenceCounter>,
    events: EventQueue,
}

impl FenceDriver {
    /// Create a driver with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a driver with a custom configuration.
    pub fn with_config(config: FenceConfig) -> FenceResult<Self> {
        Ok(Self {
            counter: Arc::new(SequenceCounter::with_config(config)?),
            events: EventQueue::new(),
        })
    }

    /// Sequence counter shared by all fences of this device.
    pub fn counter(&self) -> &Arc<SequenceCounter> {
        &self.counter
    }

    /// Pending completion events.
    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    /// Create a fence without stamping a command.
    pub fn create_fence(&self) -> Fence {
        Fence::create(&self.counter)
    }

    /// Create a fence for an outgoing command and stamp its header.
    pub fn emit(&self, header: &mut CommandHeader) -> Fence {
        let fence = self.create_fence();
        header.set_fence(fence.sequence());
        fence
    }

    /// Register callbacks to run once `fence` signals.
    ///
    /// Fires on the next [`process_completion`](Self::process_completion)
    /// that covers the fence, even if it has already signaled.
    pub fn register_event<S, C>(
        &self,
        fence: &Fence,
        on_signaled: S,
        on_cleanup: C,
    ) -> FenceResult<()>
    where
        S: FnOnce() + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.events.register(fence, on_signaled, on_cleanup)
    }

    /// Handle a completion report from the device.
    ///
    /// Advances the counter (waking blocked waiters), then fires every event
    /// whose fence is now signaled. Returns the number of events fired.
    pub fn process_completion(&self, last_seq: u64) -> usize {
        self.counter.advance_to(last_seq);
        self.events.drain()
    }

    /// Cancel all interruptible waits on this device.
    pub fn interrupt_waiters(&self) {
        self.counter.interrupt_waiters();
    }
}
