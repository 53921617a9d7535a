// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for program compilation and dispatch

use gridcore_chip::{CoreCoord, CoreRangeSet};
use std::path::PathBuf;
use thiserror::Error;

use crate::kernel::{KernelId, Processor};

/// Result type alias for gridcore operations
pub type Result<T> = std::result::Result<T, GridError>;

/// Errors that can occur while building or dispatching a program
///
/// Configuration errors are caller mistakes and are never retried. Every
/// variant carries the ids, cores and byte ranges needed to diagnose the
/// placement bug from the message alone.
#[derive(Debug, Error)]
pub enum GridError {
    /// Circular-buffer index outside the per-core slot range
    #[error("Invalid circular buffer index: {index} should be between 0 and {max}")]
    InvalidBufferIndex {
        /// Requested slot
        index: usize,
        /// Highest valid slot
        max: usize,
    },

    /// Circular-buffer slot already taken on a core
    #[error("Cannot add circular buffer at index {index} on core {core}, another circular buffer already exists")]
    BufferIndexInUse {
        /// Core that already holds the slot
        core: CoreCoord,
        /// Slot
        index: usize,
    },

    /// Second kernel for the same role on one core
    #[error("Core {core} already runs kernel {existing} on {processor}, cannot add kernel {kernel}")]
    DuplicateRole {
        /// Core
        core: CoreCoord,
        /// Role both kernels target
        processor: Processor,
        /// Kernel already assigned
        existing: KernelId,
        /// Kernel being added
        kernel: KernelId,
    },

    /// Requested circular-buffer address below the computed minimum
    #[error("Specified address {requested} for circular buffer {buffer} should be at max local buffer region for core range set, try {minimum} instead")]
    RequestedAddressTooLow {
        /// Circular buffer id
        buffer: usize,
        /// Caller-requested address
        requested: u64,
        /// Lowest safe address across all cores the buffer spans
        minimum: u64,
    },

    /// Allocation that would insert below the last occupied L1 region
    #[error("Local buffer address {address} has to append to last L1 region [{region_start}, {region_end}) or be at a higher address")]
    AddressRegression {
        /// Address being marked
        address: u64,
        /// Start of the last occupied region
        region_start: u64,
        /// End of the last occupied region
        region_end: u64,
    },

    /// Circular buffers grow beyond L1
    #[error("Local buffers on core {core} grow to {end} B which is beyond max L1 size of {l1_size} B")]
    L1Overflow {
        /// Core
        core: CoreCoord,
        /// End of the highest circular-buffer region
        end: u64,
        /// Device L1 capacity
        l1_size: u64,
    },

    /// Core does not map to exactly one bank
    #[error("Expected one bank on core that holds local and L1 buffers but logical core {core} has {banks} banks")]
    BankMapping {
        /// Core
        core: CoreCoord,
        /// Banks found
        banks: usize,
    },

    /// Circular buffers overlap a statically placed L1 buffer
    #[error("Circular buffers in program {program} clash with L1 buffers on core {core}. L1 buffer allocated at {l1_buffer_addr} and local buffers end at {cb_end}")]
    L1BufferClash {
        /// Program id
        program: u64,
        /// Core
        core: CoreCoord,
        /// Lowest statically placed L1 buffer
        l1_buffer_addr: u64,
        /// End of the highest circular-buffer region
        cb_end: u64,
    },

    /// Compile requested on a device that was never initialized
    #[error("Device {device} needs to be initialized before program {program} compilation")]
    DeviceNotInitialized {
        /// Device id
        device: u32,
        /// Program id
        program: u64,
    },

    /// Profiler and debug print server both active
    #[error("Debug print server is running, profiling is not allowed")]
    ProfilerConflict,

    /// Kernel id not owned by the program
    #[error("Expected kernel with id {kernel} to be in program {program}")]
    UnknownKernel {
        /// Kernel id
        kernel: KernelId,
        /// Program id
        program: u64,
    },

    /// Circular-buffer id not owned by the program
    #[error("No circular buffer with id {buffer} exists in program {program}")]
    UnknownCircularBuffer {
        /// Circular buffer id
        buffer: usize,
        /// Program id
        program: u64,
    },

    /// Semaphore index out of range
    #[error("Program {program} has {count} semaphores, index {index} out of range")]
    UnknownSemaphore {
        /// Requested index
        index: usize,
        /// Semaphores in the program
        count: usize,
        /// Program id
        program: u64,
    },

    /// Every semaphore slot is taken on some core of the range set
    #[error("No free semaphore slot on all cores of {cores}")]
    NoSemaphoreSlot {
        /// Requested cores
        cores: CoreRangeSet,
    },

    /// Toolchain failed to produce binaries
    #[error("Failed to generate binaries for {kernel}: {reason}")]
    BinaryGeneration {
        /// Kernel name
        kernel: String,
        /// Toolchain message
        reason: String,
    },

    /// Compiled binary missing from the cache directory
    #[error("Kernel binary not found: {path}")]
    BinaryNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// Command stream could not be decoded
    #[error("Malformed command at word {offset}: {reason}")]
    MalformedCommand {
        /// Word offset of the offending field
        offset: usize,
        /// What was wrong
        reason: String,
    },

    /// NoC access outside mapped memory
    #[error("NoC transfer failed: {reason}")]
    TransferFailed {
        /// Reason for failure
        reason: String,
    },

    /// I/O error in the binary cache
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl GridError {
    /// Create a binary generation error
    pub fn binary_generation(kernel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BinaryGeneration {
            kernel: kernel.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed command error
    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedCommand {
            offset,
            reason: reason.into(),
        }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// True for caller configuration mistakes (never transient)
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidBufferIndex { .. }
                | Self::BufferIndexInUse { .. }
                | Self::DuplicateRole { .. }
                | Self::RequestedAddressTooLow { .. }
                | Self::AddressRegression { .. }
                | Self::BankMapping { .. }
                | Self::DeviceNotInitialized { .. }
                | Self::ProfilerConflict
                | Self::NoSemaphoreSlot { .. }
        )
    }
}
