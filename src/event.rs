//! Completion callbacks bound to fences.
//!
//! An [`EventQueue`] holds [`PendingEvent`]s in insertion order. Each drain
//! pass fires every entry whose fence has signaled and leaves the rest in
//! place for a later pass.
//!
//! Callbacks run while the queue lock is held. They must be short and must
//! not call back into the same queue; hand heavier work off to another
//! thread instead.

use std::fmt;

use parking_lot::Mutex;

use crate::error::{FenceError, FenceResult};
use crate::fence::Fence;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A callback pair waiting for its fence to signal.
pub struct PendingEvent {
    fence: Fence,
    on_signaled: Callback,
    on_cleanup: Callback,
}

impl PendingEvent {
    /// Bind callbacks to `fence`. Takes an additional reference to the fence.
    pub fn new<S, C>(fence: &Fence, on_signaled: S, on_cleanup: C) -> Self
    where
        S: FnOnce() + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        Self {
            fence: fence.acquire(),
            on_signaled: Box::new(on_signaled),
            on_cleanup: Box::new(on_cleanup),
        }
    }

    /// Fence this event is waiting on.
    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// Run both callbacks, then release the fence reference.
    fn fire(self) {
        let Self {
            fence,
            on_signaled,
            on_cleanup,
        } = self;
        on_signaled();
        on_cleanup();
        fence.release();
    }
}

impl fmt::Debug for PendingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEvent")
            .field("fence", &self.fence)
            .finish_non_exhaustive()
    }
}

/// Ordered list of pending completion events.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<Vec<PendingEvent>>,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event for `fence`.
    ///
    /// Returns [`FenceError::OutOfMemory`] if the list cannot grow.
    pub fn register<S, C>(
        &self,
        fence: &Fence,
        on_signaled: S,
        on_cleanup: C,
    ) -> FenceResult<()>
    where
        S: FnOnce() + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.push(PendingEvent::new(fence, on_signaled, on_cleanup))
    }

    /// Append an already constructed event.
    pub fn push(&self, event: PendingEvent) -> FenceResult<()> {
        let mut events = self.events.lock();
        events
            .try_reserve(1)
            .map_err(|_| FenceError::OutOfMemory)?;
        log::trace!("Registered event for fence {}", event.fence.sequence());
        events.push(event);
        Ok(())
    }

    /// Fire every event whose fence has signaled.
    ///
    /// Scans once in insertion order, in place. Each signaled entry is
    /// removed from the list, then `on_signaled`, `on_cleanup` and the fence
    /// release run in that order. Returns the number of events fired.
    ///
    /// If a callback panics, entries not yet visited stay queued.
    pub fn drain(&self) -> usize {
        let mut events = self.events.lock();
        let mut fired = 0;
        let mut idx = 0;

        while idx < events.len() {
            if events[idx].fence.is_signaled() {
                events.remove(idx).fire();
                fired += 1;
            } else {
                idx += 1;
            }
        }

        if fired > 0 {
            log::debug!("Fired {} fence events, {} pending", fired, events.len());
        }
        fired
    }

    /// Number of events still waiting.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no events are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
