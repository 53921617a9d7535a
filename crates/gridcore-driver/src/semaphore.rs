// SPDX-License-Identifier: AGPL-3.0-only

//! Semaphores placed at fixed L1 addresses

use gridcore_chip::{CoreCoord, CoreRangeSet};

/// An L1 word initialised on every core of a range set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Semaphore {
    core_range_set: CoreRangeSet,
    address: u32,
    initial_value: u32,
}

impl Semaphore {
    /// Semaphore at `address` holding `initial_value` at launch
    pub const fn new(core_range_set: CoreRangeSet, address: u32, initial_value: u32) -> Self {
        Self {
            core_range_set,
            address,
            initial_value,
        }
    }

    /// Cores
    pub const fn core_range_set(&self) -> &CoreRangeSet {
        &self.core_range_set
    }

    /// L1 address
    pub const fn address(&self) -> u32 {
        self.address
    }

    /// Value written before launch
    pub const fn initial_value(&self) -> u32 {
        self.initial_value
    }

    /// Lives on `core`
    pub fn initialized_on_logical_core(&self, core: CoreCoord) -> bool {
        self.core_range_set.contains(core)
    }
}
