// SPDX-License-Identifier: AGPL-3.0-only

//! Launch message written to each worker's mailbox.
//!
//! ```text
//! byte 0  enable_dm0      (data-movement engine 0)
//! byte 1  enable_dm1      (data-movement engine 1)
//! byte 2  enable_compute  (compute engine)
//! byte 3  run             (run_msg::GO / run_msg::DONE)
//! ```

use crate::memory_map::run_msg;

/// Per-role enable flags plus the run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchMessage {
    /// Data-movement engine 0 has a kernel.
    pub enable_dm0: bool,
    /// Data-movement engine 1 has a kernel.
    pub enable_dm1: bool,
    /// Compute engine has a kernel.
    pub enable_compute: bool,
    /// Run state sentinel.
    pub run: u8,
}

impl LaunchMessage {
    /// Encoded size in bytes.
    pub const SIZE: usize = 4;

    /// Every role enabled, `run == GO`. Dispatchers multicast this.
    #[must_use]
    pub const fn all_enabled() -> Self {
        Self {
            enable_dm0: true,
            enable_dm1: true,
            enable_compute: true,
            run: run_msg::GO,
        }
    }

    /// Wire bytes.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; Self::SIZE] {
        [
            self.enable_dm0 as u8,
            self.enable_dm1 as u8,
            self.enable_compute as u8,
            self.run,
        ]
    }

    /// Parse wire bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            enable_dm0: bytes[0] != 0,
            enable_dm1: bytes[1] != 0,
            enable_compute: bytes[2] != 0,
            run: bytes[3],
        }
    }
}

impl Default for LaunchMessage {
    /// No role enabled yet, `run == GO`.
    fn default() -> Self {
        Self {
            enable_dm0: false,
            enable_dm1: false,
            enable_compute: false,
            run: run_msg::GO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_go_with_no_roles() {
        let msg = LaunchMessage::default();
        assert_eq!(msg.run, run_msg::GO);
        assert_eq!(msg.to_bytes(), [0, 0, 0, run_msg::GO]);
    }

    #[test]
    fn dispatcher_message_enables_all_roles() {
        let bytes = LaunchMessage::all_enabled().to_bytes();
        assert_eq!(LaunchMessage::from_bytes(bytes), LaunchMessage::all_enabled());
    }
}
