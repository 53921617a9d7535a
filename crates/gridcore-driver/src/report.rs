// SPDX-License-Identifier: AGPL-3.0-only

//! Compile and memory reporting sinks
//!
//! The compile pipeline calls a reporter only when it reports itself
//! enabled.

use gridcore_chip::memory_map::L1_UNRESERVED_BASE;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use crate::device::Device;
use crate::kernel::Kernel;
use crate::program::Program;

/// Receives per-kernel compile outcomes
pub trait CompilationReporter: Send + Sync + Debug {
    /// Reporter wants calls
    fn enabled(&self) -> bool;

    /// One kernel resolved, from cache or by generation
    fn add_kernel_compile_stats(&self, program_id: u64, kernel: &Kernel, cache_hit: bool, hash: u64);

    /// Every kernel of the program resolved
    fn flush_program_entry(&self, program_id: u64, num_kernels: usize);
}

/// Receives per-program L1 usage after compile
pub trait MemoryReporter: Send + Sync + Debug {
    /// Reporter wants calls
    fn enabled(&self) -> bool;

    /// Report circular-buffer usage of `program` on `device`
    fn flush_program_memory_usage(&self, program: &Program, device: &dyn Device);
}

/// Compile outcomes of one program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramCompileStats {
    /// Kernels served from the ledger or disk
    pub cache_hits: usize,
    /// Kernels that ran the toolchain
    pub cache_misses: usize,
    /// Distinct compile hashes
    pub hashes: BTreeSet<u64>,
    /// Kernel count at flush; `None` until flushed
    pub flushed_kernels: Option<usize>,
}

/// In-memory [`CompilationReporter`]
#[derive(Debug, Default)]
pub struct CompileStatsReporter {
    programs: Mutex<BTreeMap<u64, ProgramCompileStats>>,
}

impl CompileStatsReporter {
    /// Empty reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats recorded for `program_id`
    pub fn stats(&self, program_id: u64) -> Option<ProgramCompileStats> {
        self.programs.lock().get(&program_id).cloned()
    }

    /// Hits and misses across every program
    pub fn totals(&self) -> (usize, usize) {
        self.programs
            .lock()
            .values()
            .fold((0, 0), |(h, m), s| (h + s.cache_hits, m + s.cache_misses))
    }
}

impl CompilationReporter for CompileStatsReporter {
    fn enabled(&self) -> bool {
        true
    }

    fn add_kernel_compile_stats(&self, program_id: u64, kernel: &Kernel, cache_hit: bool, hash: u64) {
        let mut programs = self.programs.lock();
        let stats = programs.entry(program_id).or_default();
        if cache_hit {
            stats.cache_hits += 1;
        } else {
            stats.cache_misses += 1;
        }
        stats.hashes.insert(hash);
        tracing::trace!("Program {program_id}: kernel {} hash {hash:#018x} hit={cache_hit}", kernel.name());
    }

    fn flush_program_entry(&self, program_id: u64, num_kernels: usize) {
        self.programs.lock().entry(program_id).or_default().flushed_kernels = Some(num_kernels);
    }
}

/// [`MemoryReporter`] that logs per-core circular-buffer usage
#[derive(Debug, Default)]
pub struct TracingMemoryReporter {
    flushes: AtomicUsize,
}

impl TracingMemoryReporter {
    /// New reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Programs reported so far
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl MemoryReporter for TracingMemoryReporter {
    fn enabled(&self) -> bool {
        true
    }

    fn flush_program_memory_usage(&self, program: &Program, device: &dyn Device) {
        for core in program.logical_cores() {
            let Some(regions) = program.circular_buffer_regions(core) else {
                continue;
            };
            let end = regions.last().map_or(L1_UNRESERVED_BASE, |r| r.1);
            let used: u64 = regions.iter().map(|(s, e)| e - s).sum();
            info!(
                "Program {} device {} core {core}: {used} B of circular buffers in {} region(s), top at {end} of {} B",
                program.id(),
                device.id(),
                regions.iter().filter(|(s, e)| e > s).count(),
                device.l1_size()
            );
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}
