//! # virtgpu-fence
//!
//! Completion fences for a GPU command submission path.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`SequenceCounter`] - Monotonic sequence assignment and completion tracking
//! - [`Fence`] - Reference-counted handle for one emitted command
//! - [`wait_for_sequence`] - Blocking wait with lockup detection
//! - [`EventQueue`] - Callbacks fired once their fence signals
//! - [`FenceDriver`] - Per-device context with the submission and completion entry points
//!
//! ## Synchronization Model
//!
//! | Operation | Blocks | Protected by |
//! |-----------|--------|--------------|
//! | Sequence assignment | No | Atomic |
//! | Signaled check | No | Atomic |
//! | Event register / drain | No | Queue mutex |
//! | Wait | Yes | Wait queue mutex + condvar |
//!
//! Ordering is expressed purely through sequence comparison: a fence with a
//! smaller sequence never signals after one with a larger sequence.
//!
//! ## Example
//!
//! ```
//! use virtgpu_fence::{CommandHeader, FenceDriver};
//!
//! let driver = FenceDriver::new();
//! let mut header = CommandHeader::new(0x0101);
//! let fence = driver.emit(&mut header);
//!
//! let completion = {
//!     let counter = driver.counter().clone();
//!     let seq = header.fence_id;
//!     std::thread::spawn(move || counter.advance_to(seq))
//! };
//!
//! fence.wait(false).unwrap();
//! completion.join().unwrap();
//! ```

pub mod command;
pub mod config;
pub mod counter;
pub mod driver;
pub mod error;
pub mod event;
pub mod fence;
pub mod wait;

pub use command::{CommandFlags, CommandHeader};
pub use config::FenceConfig;
pub use counter::{CounterStats, SequenceCounter};
pub use driver::FenceDriver;
pub use error::{FenceError, FenceResult};
pub use event::{EventQueue, PendingEvent};
pub use fence::{Fence, SIGNALED_SEQ};
pub use wait::wait_for_sequence;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the crate version. Call once at startup after installing a logger.
pub fn init() {
    log::info!("virtgpu-fence v{} initialized", VERSION);
}
