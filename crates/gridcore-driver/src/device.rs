// SPDX-License-Identifier: AGPL-3.0-only

//! Device collaborator used by the compile pipeline

use gridcore_chip::memory_map::L1_SIZE;
use gridcore_chip::CoreCoord;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::error::{GridError, Result};

/// What a [`Program`](crate::Program) needs from a device
pub trait Device: Debug + Send + Sync {
    /// Device id
    fn id(&self) -> u32;

    /// L1 capacity per worker core, bytes
    fn l1_size(&self) -> u64;

    /// Banking and firmware headers are ready
    fn is_initialized(&self) -> bool;

    /// Memory banks backed by a logical core's L1
    fn bank_ids_from_logical_core(&self, core: CoreCoord) -> Vec<u32>;

    /// Lowest address held by a statically placed buffer on `bank_id`
    fn lowest_occupied_l1_address(&self, bank_id: u32) -> Option<u64>;

    /// Physical NoC coordinate of a logical worker core
    fn worker_core_from_logical_core(&self, core: CoreCoord) -> CoreCoord;

    /// Write words into a worker core's L1
    ///
    /// # Errors
    ///
    /// Returns error if the core or address range is not mapped.
    fn write_l1(&self, core: CoreCoord, address: u32, words: &[u32]) -> Result<()>;
}

/// In-memory device with one L1 bank per worker core
#[derive(Debug)]
pub struct SoftwareDevice {
    id: u32,
    grid: CoreCoord,
    l1_size: u64,
    initialized: AtomicBool,
    banks: BTreeMap<CoreCoord, Vec<u32>>,
    l1_buffers: Mutex<BTreeMap<u32, Vec<u64>>>,
    l1: Mutex<HashMap<CoreCoord, Vec<u8>>>,
}

impl SoftwareDevice {
    /// Uninitialized device with a `width` × `height` worker grid
    pub fn new(id: u32, width: usize, height: usize) -> Self {
        let mut banks = BTreeMap::new();
        for x in 0..width {
            for y in 0..height {
                banks.insert(CoreCoord::new(x, y), vec![bank_id(x, y, height)]);
            }
        }
        Self {
            id,
            grid: CoreCoord::new(width, height),
            l1_size: L1_SIZE,
            initialized: AtomicBool::new(false),
            banks,
            l1_buffers: Mutex::new(BTreeMap::new()),
            l1: Mutex::new(HashMap::new()),
        }
    }

    /// Override L1 capacity
    #[must_use]
    pub fn with_l1_size(mut self, l1_size: u64) -> Self {
        self.l1_size = l1_size;
        self
    }

    /// Override the banks of one core
    #[must_use]
    pub fn with_bank_map(mut self, core: CoreCoord, banks: Vec<u32>) -> Self {
        self.banks.insert(core, banks);
        self
    }

    /// Bring up banking; compile is refused before this
    pub fn initialize(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        info!("Software device {} initialized: {}x{} workers", self.id, self.grid.x, self.grid.y);
    }

    /// Grid dimensions as (width, height)
    pub const fn grid_size(&self) -> CoreCoord {
        self.grid
    }

    /// Place a static L1 buffer on `bank_id` at `address`
    pub fn allocate_l1_buffer(&self, bank_id: u32, address: u64) {
        debug!("Device {}: static L1 buffer on bank {bank_id} at {address}", self.id);
        self.l1_buffers.lock().entry(bank_id).or_default().push(address);
    }

    /// Read words from a worker core's L1; unwritten memory reads as zero
    ///
    /// # Errors
    ///
    /// Returns error if the core or address range is not mapped.
    pub fn read_l1(&self, core: CoreCoord, address: u32, num_words: usize) -> Result<Vec<u32>> {
        let range = self.l1_range(core, address, num_words * 4)?;
        let l1 = self.l1.lock();
        let Some(mem) = l1.get(&core) else {
            return Ok(vec![0; num_words]);
        };
        Ok(mem[range]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn l1_range(&self, core: CoreCoord, address: u32, len: usize) -> Result<std::ops::Range<usize>> {
        if core.x >= self.grid.x || core.y >= self.grid.y {
            tracing::error!("Device {}: logical core {core} is outside the {}x{} grid", self.id, self.grid.x, self.grid.y);
            return Err(GridError::transfer_failed(format!("core {core} not on device {}", self.id)));
        }
        let start = address as usize;
        let end = start + len;
        if end as u64 > self.l1_size {
            tracing::error!("Device {}: L1 access [{start}, {end}) on core {core} exceeds {} B", self.id, self.l1_size);
            return Err(GridError::transfer_failed(format!(
                "L1 access [{start}, {end}) on core {core} beyond {} B",
                self.l1_size
            )));
        }
        Ok(start..end)
    }
}

const fn bank_id(x: usize, y: usize, height: usize) -> u32 {
    (x * height + y) as u32
}

impl Device for SoftwareDevice {
    fn id(&self) -> u32 {
        self.id
    }

    fn l1_size(&self) -> u64 {
        self.l1_size
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn bank_ids_from_logical_core(&self, core: CoreCoord) -> Vec<u32> {
        self.banks.get(&core).cloned().unwrap_or_default()
    }

    fn lowest_occupied_l1_address(&self, bank_id: u32) -> Option<u64> {
        self.l1_buffers
            .lock()
            .get(&bank_id)
            .and_then(|addrs| addrs.iter().min().copied())
    }

    fn worker_core_from_logical_core(&self, core: CoreCoord) -> CoreCoord {
        CoreCoord::new(core.x + 1, core.y + 1)
    }

    fn write_l1(&self, core: CoreCoord, address: u32, words: &[u32]) -> Result<()> {
        let range = self.l1_range(core, address, words.len() * 4)?;
        let l1_size = usize::try_from(self.l1_size).map_err(|_| GridError::transfer_failed("L1 size exceeds address space"))?;
        let mut l1 = self.l1.lock();
        let mem = l1.entry(core).or_insert_with(|| vec![0; l1_size]);
        for (dst, word) in mem[range].chunks_exact_mut(4).zip(words) {
            dst.copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }
}
