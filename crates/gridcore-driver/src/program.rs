// SPDX-License-Identifier: AGPL-3.0-only

//! Programs: kernels, circular buffers and semaphores bound for one launch
//!
//! A [`Program`] exclusively owns its kernels. Two derived views are kept
//! as caches behind dirty state:
//!
//! - per-core [`KernelGroup`]s, rebuilt by [`group_kernels`] after any
//!   kernel is added
//! - per-core circular-buffer placement, rebuilt by
//!   [`Program::allocate_circular_buffers`] after any buffer is added or
//!   allocation is invalidated
//!
//! Compilation resolves every kernel to a binary through the
//! [`BuildEnvironment`]: circular buffers are placed first, unassigned roles
//! on active cores get blank kernels, then kernels compile in parallel and
//! load in parallel, each phase joining before the next starts.

use gridcore_chip::command::{DeviceCommand, LaunchGroup};
use gridcore_chip::memory_map::{semaphore_address, NUM_SEMAPHORES};
use gridcore_chip::noc::range_multicast;
use gridcore_chip::{CoreCoord, CoreRange, CoreRangeSet};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::build::{kernel_compile_hash, BinaryCache, BuildEnvironment, BuildOptions};
use crate::circular_buffer::{CircularBuffer, CircularBufferAllocator, CircularBufferConfig, CircularBufferId};
use crate::device::Device;
use crate::error::{GridError, Result};
use crate::kernel::{ComputeConfig, DataMovementConfig, Kernel, KernelConfig, KernelId, Processor};
use crate::kernel_group::KernelGroup;
use crate::semaphore::Semaphore;

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(0);

/// Kernels, circular buffers and semaphores compiled and launched together
#[derive(Debug)]
pub struct Program {
    id: u64,
    kernel_ids: Vec<KernelId>,
    kernels: BTreeMap<KernelId, Kernel>,
    core_to_kernel_group: Option<BTreeMap<CoreCoord, KernelGroup>>,
    circular_buffers: Vec<CircularBuffer>,
    circular_buffer_by_id: HashMap<CircularBufferId, usize>,
    per_core_cb_allocator: BTreeMap<CoreCoord, CircularBufferAllocator>,
    semaphores: Vec<Semaphore>,
    worker_crs: CoreRangeSet,
    compile_needed: bool,
    circular_buffer_allocation_needed: bool,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// Empty program with a fresh id
    pub fn new() -> Self {
        Self {
            id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
            kernel_ids: Vec::new(),
            kernels: BTreeMap::new(),
            core_to_kernel_group: None,
            circular_buffers: Vec::new(),
            circular_buffer_by_id: HashMap::new(),
            per_core_cb_allocator: BTreeMap::new(),
            semaphores: Vec::new(),
            worker_crs: CoreRangeSet::empty(),
            compile_needed: false,
            circular_buffer_allocation_needed: false,
        }
    }

    /// Program id
    pub const fn id(&self) -> u64 {
        self.id
    }

    // ---- kernels ----

    /// Take ownership of `kernel`
    pub fn add_kernel(&mut self, kernel: Kernel) -> KernelId {
        self.invalidate_compile();
        let id = kernel.id();
        debug!(
            "Program {}: kernel {id} ({}) on {} as {}",
            self.id,
            kernel.name(),
            kernel.core_range_set(),
            kernel.processor()
        );
        self.kernel_ids.push(id);
        self.core_to_kernel_group = None;
        self.kernels.insert(id, kernel);
        id
    }

    /// Create and add a data-movement kernel
    pub fn create_data_movement_kernel(
        &mut self,
        source: impl Into<PathBuf>,
        cores: impl Into<CoreRangeSet>,
        config: DataMovementConfig,
    ) -> KernelId {
        self.add_kernel(Kernel::new(source, cores, KernelConfig::DataMovement(config)))
    }

    /// Create and add a compute kernel
    pub fn create_compute_kernel(
        &mut self,
        source: impl Into<PathBuf>,
        cores: impl Into<CoreRangeSet>,
        config: ComputeConfig,
    ) -> KernelId {
        self.add_kernel(Kernel::new(source, cores, KernelConfig::Compute(config)))
    }

    /// Kernel by id
    ///
    /// # Errors
    ///
    /// Returns `UnknownKernel` if this program does not own `id`.
    pub fn get_kernel(&self, id: KernelId) -> Result<&Kernel> {
        self.kernels.get(&id).ok_or_else(|| {
            tracing::error!("Expected kernel with id {id} to be in program {}", self.id);
            GridError::UnknownKernel {
                kernel: id,
                program: self.id,
            }
        })
    }

    /// Kernel ids in registration order
    pub fn kernel_ids(&self) -> &[KernelId] {
        &self.kernel_ids
    }

    /// Kernels in registration order
    pub fn kernels(&self) -> impl Iterator<Item = &Kernel> + '_ {
        self.kernel_ids.iter().filter_map(|id| self.kernels.get(id))
    }

    /// Per-core kernel groups, rebuilt if a kernel was added since last call
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRole` if two kernels share a role on a core.
    pub fn core_to_kernel_group(&mut self) -> Result<&BTreeMap<CoreCoord, KernelGroup>> {
        let groups = match self.core_to_kernel_group.take() {
            Some(groups) => groups,
            None => group_kernels(self.kernel_ids.iter().filter_map(|id| self.kernels.get(id)))?,
        };
        Ok(&*self.core_to_kernel_group.insert(groups))
    }

    /// Kernel group on `core`, if any kernel runs there
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRole` if two kernels share a role on a core.
    pub fn kernels_on_core(&mut self, core: CoreCoord) -> Result<Option<&KernelGroup>> {
        Ok(self.core_to_kernel_group()?.get(&core))
    }

    /// Every core with at least one kernel, first-seen order
    pub fn logical_cores(&self) -> Vec<CoreCoord> {
        let mut seen = BTreeSet::new();
        self.kernels()
            .flat_map(Kernel::logical_cores)
            .filter(|core| seen.insert(*core))
            .collect()
    }

    /// Kernel names per core, cores in [`logical_cores`](Self::logical_cores) order
    pub fn cores_to_ops(&self) -> Vec<String> {
        self.logical_cores()
            .into_iter()
            .flat_map(|core| {
                self.kernels()
                    .filter(move |k| k.core_range_set().contains(core))
                    .map(|k| k.name().to_owned())
            })
            .collect()
    }

    // ---- circular buffers ----

    /// Register a circular buffer on `cores`
    ///
    /// Invalidates compilation and placement. Slots are checked on every core
    /// before any is taken, so a rejected buffer leaves no slot behind.
    ///
    /// # Errors
    ///
    /// Returns error if a slot is out of range or already taken on some core.
    pub fn add_circular_buffer(
        &mut self,
        cores: impl Into<CoreRangeSet>,
        config: CircularBufferConfig,
    ) -> Result<CircularBufferId> {
        self.invalidate_compile();
        self.invalidate_circular_buffer_allocation();

        let cores = cores.into();
        let buffer = CircularBuffer::new(cores, config);

        let mut staged = Vec::new();
        for core in buffer.core_ranges().cores() {
            let mut allocator = self.per_core_cb_allocator.get(&core).cloned().unwrap_or_default();
            for index in buffer.buffer_indices() {
                allocator.add_index(core, index)?;
            }
            staged.push((core, allocator));
        }
        self.per_core_cb_allocator.extend(staged);

        let id = buffer.id();
        debug!(
            "Program {}: circular buffer {id} of {} B on {}",
            self.id,
            buffer.size(),
            buffer.core_ranges()
        );
        self.circular_buffer_by_id.insert(id, self.circular_buffers.len());
        self.circular_buffers.push(buffer);
        Ok(id)
    }

    /// Circular buffer by id
    ///
    /// # Errors
    ///
    /// Returns `UnknownCircularBuffer` if this program does not own `id`.
    pub fn get_circular_buffer(&self, id: CircularBufferId) -> Result<&CircularBuffer> {
        self.circular_buffer_by_id
            .get(&id)
            .and_then(|&i| self.circular_buffers.get(i))
            .ok_or_else(|| {
                tracing::error!("No circular buffer with id {id} exists in program {}", self.id);
                GridError::UnknownCircularBuffer {
                    buffer: id,
                    program: self.id,
                }
            })
    }

    /// Circular buffers in registration order
    pub fn circular_buffers(&self) -> &[CircularBuffer] {
        &self.circular_buffers
    }

    /// Circular buffers living on `core`
    pub fn circular_buffers_on_core(&self, core: CoreCoord) -> Vec<&CircularBuffer> {
        self.circular_buffers.iter().filter(|cb| cb.is_on_logical_core(core)).collect()
    }

    /// Circular buffers sharing a core with `range`
    pub fn circular_buffers_on_corerange(&self, range: &CoreRange) -> Vec<&CircularBuffer> {
        self.circular_buffers
            .iter()
            .filter(|cb| cb.is_on_logical_corerange(range))
            .collect()
    }

    /// Occupied L1 regions on `core`; `None` if no buffer was ever placed there
    pub fn circular_buffer_regions(&self, core: CoreCoord) -> Option<&[(u64, u64)]> {
        self.per_core_cb_allocator.get(&core).map(CircularBufferAllocator::l1_regions)
    }

    /// Placement must be recomputed before the next compile
    pub const fn circular_buffer_allocation_needed(&self) -> bool {
        self.circular_buffer_allocation_needed
    }

    /// Forget every placement; no-op if already pending
    pub fn invalidate_circular_buffer_allocation(&mut self) {
        if self.circular_buffer_allocation_needed {
            return;
        }
        self.reset_placement();
        self.circular_buffer_allocation_needed = true;
    }

    fn reset_placement(&mut self) {
        for allocator in self.per_core_cb_allocator.values_mut() {
            allocator.reset_available_addresses();
        }
        for buffer in &mut self.circular_buffers {
            buffer.clear_address();
        }
    }

    /// Place every circular buffer, in registration order
    ///
    /// A buffer lands at the highest next-free address across all cores it
    /// spans, or at its requested address if that is not lower. No-op unless
    /// placement is pending.
    ///
    /// # Errors
    ///
    /// Returns `RequestedAddressTooLow` if a requested address would overlap
    /// an earlier buffer on some core.
    pub fn allocate_circular_buffers(&mut self) -> Result<()> {
        if !self.circular_buffer_allocation_needed {
            return Ok(());
        }

        if let Err(e) = self.place_circular_buffers() {
            self.reset_placement();
            return Err(e);
        }

        self.circular_buffer_allocation_needed = false;
        Ok(())
    }

    fn place_circular_buffers(&mut self) -> Result<()> {
        for buffer in &mut self.circular_buffers {
            let cores: Vec<CoreCoord> = buffer.core_ranges().cores().collect();

            let computed = cores
                .iter()
                .filter_map(|core| self.per_core_cb_allocator.get(core))
                .map(CircularBufferAllocator::get_address_candidate)
                .max()
                .unwrap_or(gridcore_chip::memory_map::L1_UNRESERVED_BASE);

            let address = match buffer.config().requested_address() {
                Some(requested) if requested < computed => {
                    tracing::error!(
                        "Specified address {requested} for circular buffer {} should be at max local buffer region for core range set, try {computed} instead",
                        buffer.id()
                    );
                    return Err(GridError::RequestedAddressTooLow {
                        buffer: buffer.id(),
                        requested,
                        minimum: computed,
                    });
                }
                Some(requested) => requested,
                None => computed,
            };

            for core in &cores {
                self.per_core_cb_allocator
                    .entry(*core)
                    .or_default()
                    .mark_address(address, buffer.size())?;
            }
            buffer.set_address(address);
            debug!("Circular buffer {} placed at {address} on {}", buffer.id(), buffer.core_ranges());
        }

        Ok(())
    }

    /// Check circular buffers against L1 capacity and static L1 buffers
    ///
    /// Checks `core` only, or every core holding a circular buffer.
    ///
    /// # Errors
    ///
    /// Returns `L1Overflow`, `BankMapping` or `L1BufferClash` naming the core
    /// and byte addresses involved.
    pub fn validate_circular_buffer_region(&self, device: &dyn Device, core: Option<CoreCoord>) -> Result<()> {
        match core {
            Some(core) => self.validate_core(device, core),
            None => self
                .per_core_cb_allocator
                .keys()
                .try_for_each(|core| self.validate_core(device, *core)),
        }
    }

    fn validate_core(&self, device: &dyn Device, core: CoreCoord) -> Result<()> {
        let cb_end = self
            .per_core_cb_allocator
            .get(&core)
            .map_or(gridcore_chip::memory_map::L1_UNRESERVED_BASE, |a| a.last_region().1);

        if cb_end > device.l1_size() {
            tracing::error!(
                "Local buffers on core {core} grow to {cb_end} B which is beyond max L1 size of {} B",
                device.l1_size()
            );
            return Err(GridError::L1Overflow {
                core,
                end: cb_end,
                l1_size: device.l1_size(),
            });
        }

        let banks = device.bank_ids_from_logical_core(core);
        let &[bank] = banks.as_slice() else {
            tracing::error!(
                "Expected one bank on core that holds local and L1 buffers but logical core {core} has {} banks",
                banks.len()
            );
            return Err(GridError::BankMapping {
                core,
                banks: banks.len(),
            });
        };

        if let Some(lowest) = device.lowest_occupied_l1_address(bank) {
            if lowest < cb_end {
                tracing::error!(
                    "Circular buffers in program {} clash with L1 buffers on core {core}. L1 buffer allocated at {lowest} and local buffers end at {cb_end}",
                    self.id
                );
                return Err(GridError::L1BufferClash {
                    program: self.id,
                    core,
                    l1_buffer_addr: lowest,
                    cb_end,
                });
            }
        }
        Ok(())
    }

    // ---- semaphores ----

    /// Add a semaphore at a caller-chosen address
    pub fn add_semaphore(&mut self, cores: impl Into<CoreRangeSet>, address: u32, initial_value: u32) {
        self.invalidate_compile();
        self.semaphores.push(Semaphore::new(cores.into(), address, initial_value));
    }

    /// Add a semaphore in the first slot free on every core of `cores`
    ///
    /// # Errors
    ///
    /// Returns `NoSemaphoreSlot` if every slot is taken on some core.
    pub fn create_semaphore(&mut self, cores: impl Into<CoreRangeSet>, initial_value: u32) -> Result<u32> {
        let cores = cores.into();
        let free = (0..NUM_SEMAPHORES).filter_map(semaphore_address).find(|&address| {
            cores.cores().all(|core| {
                !self
                    .semaphores_on_core(core)
                    .iter()
                    .any(|s| s.address() == address)
            })
        });

        let Some(address) = free else {
            tracing::error!("No free semaphore slot on all cores of {cores}");
            return Err(GridError::NoSemaphoreSlot { cores });
        };
        self.add_semaphore(cores, address, initial_value);
        Ok(address)
    }

    /// Semaphores initialised on `core`
    pub fn semaphores_on_core(&self, core: CoreCoord) -> Vec<&Semaphore> {
        self.semaphores
            .iter()
            .filter(|s| s.initialized_on_logical_core(core))
            .collect()
    }

    /// Semaphores on `core`
    pub fn num_semaphores_on_core(&self, core: CoreCoord) -> usize {
        self.semaphores_on_core(core).len()
    }

    /// Semaphores in the program
    pub fn num_semaphores(&self) -> usize {
        self.semaphores.len()
    }

    /// Address of semaphore `index`, in registration order
    ///
    /// # Errors
    ///
    /// Returns `UnknownSemaphore` if `index` is out of range.
    pub fn semaphore_address(&self, index: usize) -> Result<u32> {
        self.semaphores.get(index).map(Semaphore::address).ok_or_else(|| {
            tracing::error!("Program {} has {} semaphores, index {index} out of range", self.id, self.semaphores.len());
            GridError::UnknownSemaphore {
                index,
                count: self.semaphores.len(),
                program: self.id,
            }
        })
    }

    /// Write initial values of the semaphores on `core`
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the write.
    pub fn init_semaphores(&self, device: &dyn Device, core: CoreCoord) -> Result<()> {
        for semaphore in self.semaphores_on_core(core) {
            device.write_l1(core, semaphore.address(), &[semaphore.initial_value()])?;
        }
        Ok(())
    }

    // ---- compile ----

    /// Merged core range set of every kernel, set by compile
    pub const fn worker_cores(&self) -> &CoreRangeSet {
        &self.worker_crs
    }

    /// No kernel, buffer or semaphore was added since the last compile
    pub const fn is_compiled(&self) -> bool {
        !self.compile_needed
    }

    fn invalidate_compile(&mut self) {
        self.compile_needed = true;
    }

    /// Compile every kernel and load its binaries
    ///
    /// No-op unless something changed since the last compile.
    ///
    /// # Errors
    ///
    /// Returns error if the device is not initialized, the profiler and debug
    /// print server are both active, placement fails, two kernels share a
    /// role on a core, or the toolchain fails.
    pub fn compile(&mut self, device: &dyn Device, env: &BuildEnvironment) -> Result<()> {
        if !self.compile_needed {
            debug!("Program {} already compiled", self.id);
            return Ok(());
        }

        if !device.is_initialized() {
            tracing::error!(
                "Device {} needs to be initialized before program {} compilation",
                device.id(),
                self.id
            );
            return Err(GridError::DeviceNotInitialized {
                device: device.id(),
                program: self.id,
            });
        }

        let profile_kernel = env.tooling().profiler_enabled();
        if profile_kernel && env.tooling().print_server_running() {
            tracing::error!("Debug print server is running, profiling is not allowed");
            return Err(GridError::ProfilerConflict);
        }

        self.allocate_circular_buffers()?;
        env.compile_blank_kernel(device.id())?;
        let blanks = self.add_blank_kernels()?;

        if let Err(e) = self.compile_kernels(device.id(), env, profile_kernel) {
            self.remove_kernels(&blanks);
            return Err(e);
        }

        self.construct_core_range_set_for_worker_cores();

        if let Some(reporter) = env.compilation_reporter() {
            reporter.flush_program_entry(self.id, self.kernels.len());
        }
        if let Some(reporter) = env.memory_reporter() {
            reporter.flush_program_memory_usage(self, device);
        }

        self.compile_needed = false;
        info!(
            "Program {} compiled: {} kernels on {} worker cores",
            self.id,
            self.kernels.len(),
            self.worker_crs.num_cores()
        );
        Ok(())
    }

    /// Generate and load every kernel, one rayon job per kernel
    fn compile_kernels(&mut self, device_id: u32, env: &BuildEnvironment, profile_kernel: bool) -> Result<()> {
        let program_id = self.id;
        let buffers = &self.circular_buffers;
        let kernels = &mut self.kernels;

        let compiled: Vec<Result<()>> = env.install(|| {
            kernels
                .par_iter_mut()
                .map(|(_, kernel)| {
                    let options = build_options(buffers, device_id, kernel, profile_kernel);
                    compile_kernel(env, program_id, kernel, &options)
                })
                .collect()
        });
        compiled.into_iter().collect::<Result<()>>()?;

        let loaded: Vec<Result<()>> = env.install(|| {
            kernels
                .par_iter_mut()
                .map(|(_, kernel)| kernel.read_binaries(env.cache()))
                .collect()
        });
        loaded.into_iter().collect()
    }

    fn add_blank_kernels(&mut self) -> Result<Vec<KernelId>> {
        let mut missing: BTreeMap<Processor, Vec<CoreRange>> = BTreeMap::new();
        for (core, group) in self.core_to_kernel_group()? {
            for role in group.missing_roles() {
                missing.entry(role).or_default().push(CoreRange::single(*core));
            }
        }

        let mut added = Vec::new();
        for (role, ranges) in missing {
            let cores = CoreRangeSet::new(ranges);
            debug!("Program {}: blank {role} kernel on {cores}", self.id);
            added.push(self.add_kernel(BuildEnvironment::blank_kernel(cores, role)));
        }
        Ok(added)
    }

    fn remove_kernels(&mut self, ids: &[KernelId]) {
        if ids.is_empty() {
            return;
        }
        debug!("Program {}: dropping {} blank kernels after failed compile", self.id, ids.len());
        self.kernel_ids.retain(|id| !ids.contains(id));
        for id in ids {
            self.kernels.remove(id);
        }
        self.core_to_kernel_group = None;
    }

    fn construct_core_range_set_for_worker_cores(&mut self) {
        let mut worker_crs = CoreRangeSet::empty();
        for kernel in self.kernels.values() {
            worker_crs.merge(kernel.core_range_set());
        }
        debug_assert!(
            self.kernels.is_empty() || !worker_crs.ranges().is_empty(),
            "kernels present but no worker range"
        );
        self.worker_crs = worker_crs;
    }

    // ---- launch ----

    /// Validate placement and write semaphore initial values on every core
    ///
    /// # Errors
    ///
    /// Returns error if validation fails or the device rejects a write.
    pub fn configure_device(&self, device: &dyn Device) -> Result<()> {
        self.validate_circular_buffer_region(device, None)?;
        for core in self.logical_cores() {
            self.init_semaphores(device, core)?;
        }
        Ok(())
    }

    /// Launch command targeting every worker range, one multicast group each
    pub fn launch_command(&self, device: &dyn Device) -> DeviceCommand {
        let launch_groups: Vec<LaunchGroup> = self
            .worker_crs
            .ranges()
            .iter()
            .map(|range| {
                let start = device.worker_core_from_logical_core(range.start);
                let end = device.worker_core_from_logical_core(range.end);
                LaunchGroup {
                    dst_noc: range_multicast(CoreRange::new(start, end)),
                    num_receivers: range.size() as u32,
                }
            })
            .collect();

        DeviceCommand {
            finish: true,
            num_workers: self.worker_crs.num_cores() as u32,
            launch_groups,
            ..DeviceCommand::default()
        }
    }
}

/// Group kernels by core, one kernel per role
///
/// # Errors
///
/// Returns `DuplicateRole` on the first core where two kernels share a role.
pub fn group_kernels<'a>(kernels: impl IntoIterator<Item = &'a Kernel>) -> Result<BTreeMap<CoreCoord, KernelGroup>> {
    let mut groups: BTreeMap<CoreCoord, KernelGroup> = BTreeMap::new();
    for kernel in kernels {
        for core in kernel.logical_cores() {
            groups.entry(core).or_default().update(core, kernel)?;
        }
    }
    Ok(groups)
}

/// Kernel build options merged with the formats of every circular buffer
/// sharing a core with the kernel
fn build_options(buffers: &[CircularBuffer], device_id: u32, kernel: &Kernel, profile_kernel: bool) -> BuildOptions {
    let mut options = BuildOptions::new(device_id, kernel.name());
    kernel.set_build_options(&mut options);
    options.profile_kernel = profile_kernel;
    for range in kernel.logical_coreranges() {
        for buffer in buffers.iter().filter(|cb| cb.is_on_logical_corerange(range)) {
            for index in buffer.buffer_indices() {
                if let Some(format) = buffer.data_format(index) {
                    options.set_cb_format(index, format);
                }
            }
        }
    }
    options
}

fn compile_kernel(env: &BuildEnvironment, program_id: u64, kernel: &mut Kernel, options: &BuildOptions) -> Result<()> {
    let hash = kernel_compile_hash(kernel, options);
    let suffix = BinaryCache::relative_path(kernel.name(), hash);
    let dir = env.cache().path_for(&suffix);

    let cache_hit = if env.persistent_cache_enabled() && dir.exists() {
        env.ledger().add(hash);
        true
    } else {
        let target: &Kernel = kernel;
        let generated = env
            .ledger()
            .get_or_generate(hash, || target.generate_binaries(env.toolchain(), options, &dir))
            .map_err(|e| {
                tracing::error!("Failed to generate binaries for {}: {e}", target.name());
                e
            })?;
        !generated
    };

    debug!(
        "Kernel {} ({}): hash {hash:#018x}, {}",
        kernel.id(),
        kernel.name(),
        if cache_hit { "cache hit" } else { "generated" }
    );
    if let Some(reporter) = env.compilation_reporter() {
        reporter.add_kernel_compile_stats(program_id, kernel, cache_hit, hash);
    }
    kernel.set_binary_path(suffix);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circular_buffer::DataFormat;
    use crate::kernel::DataMovementProcessor;
    use gridcore_chip::memory_map::L1_UNRESERVED_BASE;

    fn cb(size: u64) -> CircularBufferConfig {
        CircularBufferConfig::new(size, [(0, DataFormat::Float16B)])
    }

    fn cb_at(index: usize, size: u64) -> CircularBufferConfig {
        CircularBufferConfig::new(size, [(index, DataFormat::Float16B)])
    }

    #[test]
    fn new_program_is_clean() {
        let p = Program::new();
        assert!(p.is_compiled());
        assert!(!p.circular_buffer_allocation_needed());
        assert!(p.worker_cores().is_empty());
    }

    #[test]
    fn program_ids_are_unique() {
        assert_ne!(Program::new().id(), Program::new().id());
    }

    #[test]
    fn sequential_buffers_pack_upward() {
        let mut p = Program::new();
        let core = CoreCoord::new(0, 0);
        let a = p.add_circular_buffer(core, cb_at(0, 100)).unwrap();
        let b = p.add_circular_buffer(core, cb_at(1, 50)).unwrap();
        p.allocate_circular_buffers().unwrap();
        assert_eq!(p.get_circular_buffer(a).unwrap().address(), Some(L1_UNRESERVED_BASE));
        assert_eq!(p.get_circular_buffer(b).unwrap().address(), Some(L1_UNRESERVED_BASE + 100));
        assert!(!p.circular_buffer_allocation_needed());
    }

    #[test]
    fn spanning_buffer_takes_max_candidate() {
        let mut p = Program::new();
        p.add_circular_buffer(CoreCoord::new(1, 0), cb_at(0, 256)).unwrap();
        let spanning = p
            .add_circular_buffer(CoreRange::new(CoreCoord::new(0, 0), CoreCoord::new(1, 0)), cb_at(1, 64))
            .unwrap();
        p.allocate_circular_buffers().unwrap();
        assert_eq!(
            p.get_circular_buffer(spanning).unwrap().address(),
            Some(L1_UNRESERVED_BASE + 256)
        );
        assert_eq!(
            p.circular_buffer_regions(CoreCoord::new(0, 0)).unwrap().last(),
            Some(&(L1_UNRESERVED_BASE + 256, L1_UNRESERVED_BASE + 320))
        );
    }

    #[test]
    fn add_invalidates_and_reallocation_is_stable() {
        let mut p = Program::new();
        let core = CoreCoord::new(0, 0);
        let a = p.add_circular_buffer(core, cb_at(0, 100)).unwrap();
        p.allocate_circular_buffers().unwrap();
        let first = p.get_circular_buffer(a).unwrap().address();

        p.invalidate_circular_buffer_allocation();
        assert!(p.circular_buffer_allocation_needed());
        assert_eq!(p.circular_buffer_regions(core).unwrap(), &[(L1_UNRESERVED_BASE, L1_UNRESERVED_BASE)]);
        assert_eq!(p.get_circular_buffer(a).unwrap().address(), None);
        p.allocate_circular_buffers().unwrap();
        assert_eq!(p.get_circular_buffer(a).unwrap().address(), first);
    }

    #[test]
    fn duplicate_slot_leaves_allocator_untouched() {
        let mut p = Program::new();
        let core = CoreCoord::new(0, 0);
        p.add_circular_buffer(core, cb_at(3, 64)).unwrap();
        let err = p
            .add_circular_buffer(
                CoreRange::new(CoreCoord::new(1, 0), CoreCoord::new(0, 0)),
                CircularBufferConfig::new(64, [(4, DataFormat::Float32), (3, DataFormat::Float32)]),
            )
            .unwrap_err();
        assert!(matches!(err, GridError::BufferIndexInUse { index: 3, .. }));
        assert_eq!(p.circular_buffers().len(), 1);
        assert!(p.circular_buffer_regions(CoreCoord::new(1, 0)).is_none());
    }

    #[test]
    fn requested_address_below_minimum_fails() {
        let mut p = Program::new();
        let core = CoreCoord::new(0, 0);
        p.add_circular_buffer(core, cb_at(0, 100)).unwrap();
        p.add_circular_buffer(core, cb_at(1, 10).with_address(L1_UNRESERVED_BASE + 50))
            .unwrap();
        let err = p.allocate_circular_buffers().unwrap_err();
        assert!(matches!(
            err,
            GridError::RequestedAddressTooLow { requested, minimum, .. }
                if requested == L1_UNRESERVED_BASE + 50 && minimum == L1_UNRESERVED_BASE + 100
        ));
    }

    #[test]
    fn requested_address_is_honoured() {
        let mut p = Program::new();
        let core = CoreCoord::new(0, 0);
        p.add_circular_buffer(core, cb_at(0, 100)).unwrap();
        let fixed = p
            .add_circular_buffer(core, cb_at(1, 10).with_address(L1_UNRESERVED_BASE + 4096))
            .unwrap();
        p.allocate_circular_buffers().unwrap();
        assert_eq!(p.get_circular_buffer(fixed).unwrap().address(), Some(L1_UNRESERVED_BASE + 4096));
        assert_eq!(p.circular_buffer_regions(core).unwrap().len(), 2);
    }

    #[test]
    fn unknown_ids() {
        let p = Program::new();
        assert!(matches!(p.get_circular_buffer(usize::MAX), Err(GridError::UnknownCircularBuffer { .. })));
        assert!(matches!(p.semaphore_address(0), Err(GridError::UnknownSemaphore { count: 0, .. })));
    }

    #[test]
    fn kernel_groups_are_cached_until_add() {
        let mut p = Program::new();
        let core = CoreCoord::new(0, 0);
        p.create_data_movement_kernel("a.cpp", core, DataMovementConfig::new(DataMovementProcessor::Riscv0));
        assert_eq!(p.core_to_kernel_group().unwrap().len(), 1);
        p.create_data_movement_kernel("b.cpp", CoreCoord::new(1, 0), DataMovementConfig::new(DataMovementProcessor::Riscv0));
        assert_eq!(p.core_to_kernel_group().unwrap().len(), 2);
        assert!(p.kernels_on_core(CoreCoord::new(5, 5)).unwrap().is_none());
    }

    #[test]
    fn duplicate_role_on_shared_core() {
        let mut p = Program::new();
        p.create_compute_kernel(
            "a.cpp",
            CoreRange::new(CoreCoord::new(0, 0), CoreCoord::new(1, 1)),
            ComputeConfig::default(),
        );
        p.create_compute_kernel("b.cpp", CoreCoord::new(1, 1), ComputeConfig::default());
        let err = p.core_to_kernel_group().unwrap_err();
        assert!(matches!(err, GridError::DuplicateRole { core, processor: Processor::Compute, .. } if core == CoreCoord::new(1, 1)));
    }

    #[test]
    fn cores_to_ops_lists_names_per_core() {
        let mut p = Program::new();
        let core = CoreCoord::new(0, 0);
        p.create_data_movement_kernel("reader.cpp", core, DataMovementConfig::new(DataMovementProcessor::Riscv1));
        p.create_compute_kernel("eltwise.cpp", core, ComputeConfig::default());
        assert_eq!(p.cores_to_ops(), vec!["reader".to_owned(), "eltwise".to_owned()]);
        assert_eq!(p.logical_cores(), vec![core]);
    }

    #[test]
    fn create_semaphore_takes_first_free_slot() {
        let mut p = Program::new();
        let a = p.create_semaphore(CoreCoord::new(0, 0), 1).unwrap();
        let b = p
            .create_semaphore(CoreRange::new(CoreCoord::new(0, 0), CoreCoord::new(1, 0)), 0)
            .unwrap();
        let c = p.create_semaphore(CoreCoord::new(1, 0), 0).unwrap();
        assert_eq!(Some(a), semaphore_address(0));
        assert_eq!(Some(b), semaphore_address(1));
        assert_eq!(c, a);
        assert_eq!(p.num_semaphores(), 3);
        assert_eq!(p.num_semaphores_on_core(CoreCoord::new(1, 0)), 2);
        assert!(!p.is_compiled());
    }

    #[test]
    fn semaphore_slots_run_out() {
        let mut p = Program::new();
        let core = CoreCoord::new(0, 0);
        for _ in 0..NUM_SEMAPHORES {
            p.create_semaphore(core, 0).unwrap();
        }
        assert!(matches!(p.create_semaphore(core, 0), Err(GridError::NoSemaphoreSlot { .. })));
    }
}
