// SPDX-License-Identifier: AGPL-3.0-only

//! Circular buffers and the per-core L1 allocator
//!
//! A circular buffer is a caller-sized region of L1 addressed by one or more
//! of the core's fixed index slots. Each core keeps a
//! [`CircularBufferAllocator`] tracking which slots are taken and which L1
//! byte ranges are occupied. Regions only grow upward: the end of the last
//! region is always the next free address.

use gridcore_chip::memory_map::{L1_UNRESERVED_BASE, NUM_CIRCULAR_BUFFERS};
use gridcore_chip::{CoreCoord, CoreRange, CoreRangeSet};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{GridError, Result};

/// Tile data format of one circular-buffer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    /// IEEE fp32
    Float32,
    /// IEEE fp16
    Float16,
    /// bfloat16
    Float16B,
    /// Block float, 8-bit mantissa, 5-bit shared exponent
    Bfp8,
    /// Block float, 8-bit mantissa, 8-bit shared exponent
    Bfp8B,
    /// Block float, 4-bit mantissa, 8-bit shared exponent
    Bfp4B,
    /// Unsigned 16-bit
    UInt16,
    /// Unsigned 32-bit
    UInt32,
    /// Signed 32-bit
    Int32,
}

impl DataFormat {
    /// Bytes in one 32×32 tile, including shared exponents
    pub const fn tile_size(self) -> u64 {
        match self {
            Self::Float32 | Self::UInt32 | Self::Int32 => 4096,
            Self::Float16 | Self::Float16B | Self::UInt16 => 2048,
            Self::Bfp8 | Self::Bfp8B => 1024 + 64,
            Self::Bfp4B => 512 + 64,
        }
    }
}

/// Size, slot formats and optional fixed address of a circular buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircularBufferConfig {
    total_size: u64,
    formats: BTreeMap<usize, DataFormat>,
    page_sizes: BTreeMap<usize, u64>,
    requested_address: Option<u64>,
}

impl CircularBufferConfig {
    /// Buffer of `total_size` bytes addressed by the given slots
    pub fn new(total_size: u64, formats: impl IntoIterator<Item = (usize, DataFormat)>) -> Self {
        Self {
            total_size,
            formats: formats.into_iter().collect(),
            page_sizes: BTreeMap::new(),
            requested_address: None,
        }
    }

    /// Page size of one slot
    #[must_use]
    pub fn set_page_size(mut self, index: usize, page_size: u64) -> Self {
        self.page_sizes.insert(index, page_size);
        self
    }

    /// Place at a fixed address instead of the computed one
    #[must_use]
    pub fn with_address(mut self, address: u64) -> Self {
        self.requested_address = Some(address);
        self
    }

    /// Bytes
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Caller-requested address
    pub const fn requested_address(&self) -> Option<u64> {
        self.requested_address
    }

    /// Slots in ascending order
    pub fn buffer_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.formats.keys().copied()
    }

    /// Data format of a slot
    pub fn data_format(&self, index: usize) -> Option<DataFormat> {
        self.formats.get(&index).copied()
    }

    /// Page size of a slot; defaults to one tile of its format
    pub fn page_size(&self, index: usize) -> Option<u64> {
        self.page_sizes
            .get(&index)
            .copied()
            .or_else(|| self.data_format(index).map(DataFormat::tile_size))
    }
}

/// Circular-buffer id, unique per process
pub type CircularBufferId = usize;

static NEXT_CB_ID: AtomicUsize = AtomicUsize::new(0);

/// A config bound to a core range set, with its resolved address
#[derive(Debug, Clone)]
pub struct CircularBuffer {
    id: CircularBufferId,
    core_ranges: CoreRangeSet,
    config: CircularBufferConfig,
    address: Option<u64>,
}

impl CircularBuffer {
    /// Bind `config` to `core_ranges` under a fresh id
    pub fn new(core_ranges: CoreRangeSet, config: CircularBufferConfig) -> Self {
        Self {
            id: NEXT_CB_ID.fetch_add(1, Ordering::Relaxed),
            core_ranges,
            config,
            address: None,
        }
    }

    /// Id
    pub const fn id(&self) -> CircularBufferId {
        self.id
    }

    /// Cores the buffer lives on
    pub const fn core_ranges(&self) -> &CoreRangeSet {
        &self.core_ranges
    }

    /// Configuration
    pub const fn config(&self) -> &CircularBufferConfig {
        &self.config
    }

    /// Bytes
    pub const fn size(&self) -> u64 {
        self.config.total_size
    }

    /// Slots
    pub fn buffer_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.config.buffer_indices()
    }

    /// Data format of a slot
    pub fn data_format(&self, index: usize) -> Option<DataFormat> {
        self.config.data_format(index)
    }

    /// Page size of a slot
    pub fn page_size(&self, index: usize) -> Option<u64> {
        self.config.page_size(index)
    }

    /// Resolved L1 address; `None` until allocated
    pub const fn address(&self) -> Option<u64> {
        self.address
    }

    pub(crate) fn set_address(&mut self, address: u64) {
        self.address = Some(address);
    }

    pub(crate) fn clear_address(&mut self) {
        self.address = None;
    }

    /// Lives on `core`
    pub fn is_on_logical_core(&self, core: CoreCoord) -> bool {
        self.core_ranges.contains(core)
    }

    /// Shares at least one core with `range`
    pub fn is_on_logical_corerange(&self, range: &CoreRange) -> bool {
        self.core_ranges.intersects(range)
    }
}

/// Occupied slots and L1 regions of one core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircularBufferAllocator {
    indices: u64,
    l1_regions: Vec<(u64, u64)>,
}

impl CircularBufferAllocator {
    /// No slots taken, one empty region at the unreserved base
    pub fn new() -> Self {
        Self {
            indices: 0,
            l1_regions: vec![(L1_UNRESERVED_BASE, L1_UNRESERVED_BASE)],
        }
    }

    /// Take slot `index` on `core`
    ///
    /// # Errors
    ///
    /// Returns error if the slot is out of range or already taken.
    pub fn add_index(&mut self, core: CoreCoord, index: usize) -> Result<()> {
        if index >= NUM_CIRCULAR_BUFFERS {
            tracing::error!(
                "Invalid circular buffer index {index} on core {core}: should be between 0 and {}",
                NUM_CIRCULAR_BUFFERS - 1
            );
            return Err(GridError::InvalidBufferIndex {
                index,
                max: NUM_CIRCULAR_BUFFERS - 1,
            });
        }
        if self.indices & (1 << index) != 0 {
            tracing::error!("Circular buffer index {index} already in use on core {core}");
            return Err(GridError::BufferIndexInUse { core, index });
        }
        self.indices |= 1 << index;
        Ok(())
    }

    /// Slot is taken
    pub const fn has_index(&self, index: usize) -> bool {
        index < NUM_CIRCULAR_BUFFERS && self.indices & (1 << index) != 0
    }

    /// Next free byte: the end of the last region
    pub fn get_address_candidate(&self) -> u64 {
        self.last_region().1
    }

    /// Occupy `[address, address + size)`
    ///
    /// Extends the last region when `address` is its end, otherwise opens a
    /// new region above it.
    ///
    /// # Errors
    ///
    /// Returns `AddressRegression` if `address` lies below the last region's end.
    pub fn mark_address(&mut self, address: u64, size: u64) -> Result<()> {
        let (start, end) = self.last_region();
        if address < end {
            tracing::error!(
                "Local buffer address {address} has to append to last L1 region [{start}, {end}) or be at a higher address"
            );
            return Err(GridError::AddressRegression {
                address,
                region_start: start,
                region_end: end,
            });
        }
        if address == end {
            if let Some(last) = self.l1_regions.last_mut() {
                last.1 += size;
            }
        } else {
            self.l1_regions.push((address, address + size));
        }
        Ok(())
    }

    /// Forget every placed region, keeping taken slots
    pub fn reset_available_addresses(&mut self) {
        self.l1_regions.clear();
        self.l1_regions.push((L1_UNRESERVED_BASE, L1_UNRESERVED_BASE));
    }

    /// Occupied regions in address order
    pub fn l1_regions(&self) -> &[(u64, u64)] {
        &self.l1_regions
    }

    /// Highest occupied region
    pub fn last_region(&self) -> (u64, u64) {
        self.l1_regions
            .last()
            .copied()
            .unwrap_or((L1_UNRESERVED_BASE, L1_UNRESERVED_BASE))
    }
}

impl Default for CircularBufferAllocator {
    fn default() -> Self {
        Self::new()
    }
}
