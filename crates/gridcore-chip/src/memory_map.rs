// SPDX-License-Identifier: AGPL-3.0-only

//! Per-core L1 memory map.
//!
//! ```text
//! 0x000000 ┌──────────────────────────────┐
//!          │ firmware, mailboxes          │  LAUNCH_MAILBOX_ADDR
//! 0x008000 ├──────────────────────────────┤
//!          │ semaphores (4 × 16 B)        │  SEMAPHORE_BASE
//! 0x009000 ├──────────────────────────────┤
//!          │ dispatch counters / flags    │  DISPATCH_MESSAGE_ADDR, CQ_FINISH_PTR
//! 0x01E000 ├──────────────────────────────┤  L1_UNRESERVED_BASE
//!          │ circular buffers  ↓ grow up  │
//!          │                              │
//!          │ L1 buffers        ↑ grow down│
//! 0x100000 └──────────────────────────────┘  L1_SIZE
//! ```
//!
//! Circular buffers are placed from the bottom of the unreserved region and
//! statically placed L1 buffers from the top; the two must never cross.

// ── Capacity ─────────────────────────────────────────────────────────────────

/// Default L1 capacity of one worker core in bytes.
pub const L1_SIZE: u64 = 1024 * 1024;

/// First L1 byte available to circular buffers.
pub const L1_UNRESERVED_BASE: u64 = 120 * 1024;

/// Number of circular-buffer index slots per core.
pub const NUM_CIRCULAR_BUFFERS: usize = 32;

// ── Worker mailboxes ─────────────────────────────────────────────────────────

/// Mailbox the dispatcher multicasts the launch message into.
pub const LAUNCH_MAILBOX_ADDR: u32 = 0x0060;

// ── Semaphores ───────────────────────────────────────────────────────────────

/// First semaphore slot.
pub const SEMAPHORE_BASE: u32 = 0x8000;
/// Stride between semaphore slots.
pub const SEMAPHORE_ALIGNMENT: u32 = 16;
/// Semaphore slots per core.
pub const NUM_SEMAPHORES: u32 = 4;

/// L1 address of semaphore slot `index`, if it exists.
#[must_use]
pub const fn semaphore_address(index: u32) -> Option<u32> {
    if index < NUM_SEMAPHORES {
        Some(SEMAPHORE_BASE + index * SEMAPHORE_ALIGNMENT)
    } else {
        None
    }
}

// ── Dispatch core ────────────────────────────────────────────────────────────

/// Worker completion counter, polled by the dispatcher during launch.
pub const DISPATCH_MESSAGE_ADDR: u32 = 0x9000;

/// Local copy of the finish flag before it is pushed to the host.
pub const CQ_FINISH_PTR: u32 = 0x9010;

/// Local copy of the launch message used as the multicast source.
pub const LAUNCH_MSG_STAGING_ADDR: u32 = 0x9020;

/// Staging region for bursts and program sections.
#[allow(clippy::cast_possible_truncation)]
pub const DEVICE_COMMAND_DATA_ADDR: u32 = L1_UNRESERVED_BASE as u32;

/// Capacity of the staging region in bytes.
pub const DEVICE_COMMAND_DATA_SIZE: u32 = 256 * 1024;

// ── Host ─────────────────────────────────────────────────────────────────────

/// Host-visible finish pointer inside the PCIe window.
pub const HOST_CQ_FINISH_PTR: u32 = 0x0020;

/// NoC column of the PCIe endpoint.
pub const PCIE_NOC_X: u32 = 0;
/// NoC row of the PCIe endpoint.
pub const PCIE_NOC_Y: u32 = 3;

/// Launch message `run` sentinels.
pub mod run_msg {
    /// Workers may start.
    pub const GO: u8 = 0x80;
    /// Worker has finished and reported back.
    pub const DONE: u8 = 0x00;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_regions_sit_below_unreserved_base() {
        assert!(u64::from(SEMAPHORE_BASE + NUM_SEMAPHORES * SEMAPHORE_ALIGNMENT) <= L1_UNRESERVED_BASE);
        assert!(u64::from(LAUNCH_MSG_STAGING_ADDR) < L1_UNRESERVED_BASE);
        assert!(u64::from(DEVICE_COMMAND_DATA_ADDR + DEVICE_COMMAND_DATA_SIZE) <= L1_SIZE);
    }

    #[test]
    fn semaphore_slots() {
        assert_eq!(semaphore_address(0), Some(SEMAPHORE_BASE));
        assert_eq!(semaphore_address(3), Some(SEMAPHORE_BASE + 48));
        assert_eq!(semaphore_address(4), None);
    }
}
