//! Outgoing command header fields touched by fence emission.

use bitflags::bitflags;

bitflags! {
    /// Flags carried in a command header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommandFlags: u32 {
        /// The device must echo `fence_id` back once the command completes.
        const FENCE = 1 << 0;
    }
}

impl Default for CommandFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Header of a command about to be submitted to the device.
///
/// Only `flags` and `fence_id` are written by this crate; the submission
/// layer owns the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandHeader {
    /// Command opcode.
    pub command_type: u32,
    /// Header flags.
    pub flags: CommandFlags,
    /// Sequence number the device reports on completion.
    pub fence_id: u64,
    /// Rendering context the command belongs to.
    pub ctx_id: u32,
}

impl CommandHeader {
    /// Create a header for `command_type` with no flags set.
    pub fn new(command_type: u32) -> Self {
        Self {
            command_type,
            ..Default::default()
        }
    }

    /// Mark the command as fenced with `seq`.
    pub fn set_fence(&mut self, seq: u64) {
        self.flags |= CommandFlags::FENCE;
        self.fence_id = seq;
    }

    /// Whether the command carries a fence.
    pub fn is_fenced(&self) -> bool {
        self.flags.contains(CommandFlags::FENCE)
    }
}
