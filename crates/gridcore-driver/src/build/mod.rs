// SPDX-License-Identifier: AGPL-3.0-only

//! Compile pipeline collaborators
//!
//! A [`BuildEnvironment`] bundles everything a compile shares across
//! programs: the hash ledger, the binary cache, the toolchain, tooling
//! state, reporters and the memoised blank kernel. Tests build their own;
//! [`BuildEnvironment::global`] is the process-wide instance.

mod cache;
mod options;
mod toolchain;

pub use cache::{BinaryCache, HashLedger};
pub use options::{kernel_compile_hash, BuildOptions, StableHasher};
pub use toolchain::{SoftwareToolchain, Toolchain};

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::config::BuildConfig;
use crate::error::Result;
use crate::kernel::{ComputeConfig, DataMovementConfig, DataMovementProcessor, Kernel, KernelConfig, Processor};
use crate::report::{CompilationReporter, MemoryReporter};

/// Data-movement fallback kernel for unassigned roles
pub const BLANK_DATAFLOW_SOURCE: &str = "kernels/dataflow/blank.cpp";

/// Compute fallback kernel for unassigned roles
pub const BLANK_COMPUTE_SOURCE: &str = "kernels/compute/blank.cpp";

const BLANK_OP_NAME: &str = "blank_op";

/// Runtime tooling that constrains compilation
#[derive(Debug, Default)]
pub struct ToolingState {
    profiler_enabled: AtomicBool,
    print_server_running: AtomicBool,
}

impl ToolingState {
    /// Enable or disable the device profiler
    pub fn set_profiler_enabled(&self, enabled: bool) {
        self.profiler_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Profiler is enabled
    pub fn profiler_enabled(&self) -> bool {
        self.profiler_enabled.load(Ordering::SeqCst)
    }

    /// Mark the debug print server as running or stopped
    pub fn set_print_server_running(&self, running: bool) {
        self.print_server_running.store(running, Ordering::SeqCst);
    }

    /// Debug print server is running
    pub fn print_server_running(&self) -> bool {
        self.print_server_running.load(Ordering::SeqCst)
    }
}

/// Shared state of the compile pipeline
#[derive(Debug)]
pub struct BuildEnvironment {
    config: BuildConfig,
    ledger: HashLedger,
    cache: BinaryCache,
    toolchain: Arc<dyn Toolchain>,
    tooling: ToolingState,
    persistent_cache: AtomicBool,
    compilation_reporter: Option<Arc<dyn CompilationReporter>>,
    memory_reporter: Option<Arc<dyn MemoryReporter>>,
    blank_kernel: Mutex<Option<PathBuf>>,
    pool: Option<rayon::ThreadPool>,
}

static GLOBAL: OnceLock<BuildEnvironment> = OnceLock::new();

impl BuildEnvironment {
    /// Environment for `config` with the software toolchain
    ///
    /// A dedicated pool is built when `worker_threads` is set; if that fails
    /// the global rayon pool is used.
    pub fn new(config: BuildConfig) -> Self {
        let pool = config.worker_threads.and_then(|n| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .thread_name(|i| format!("gridcore-compile-{i}"))
                .build()
                .map_err(|e| warn!("Compile pool of {n} threads unavailable, using global pool: {e}"))
                .ok()
        });

        info!(
            "Build environment: cache at {}, {} compile threads",
            config.output_dir.display(),
            pool.as_ref().map_or_else(rayon::current_num_threads, rayon::ThreadPool::current_num_threads)
        );

        Self {
            cache: BinaryCache::new(config.output_dir.clone()),
            persistent_cache: AtomicBool::new(config.persistent_cache),
            config,
            ledger: HashLedger::new(),
            toolchain: Arc::new(SoftwareToolchain::new()),
            tooling: ToolingState::default(),
            compilation_reporter: None,
            memory_reporter: None,
            blank_kernel: Mutex::new(None),
            pool,
        }
    }

    /// Process-wide environment, configured from the environment on first use
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| Self::new(BuildConfig::from_env()))
    }

    /// Replace the toolchain
    #[must_use]
    pub fn with_toolchain(mut self, toolchain: Arc<dyn Toolchain>) -> Self {
        self.toolchain = toolchain;
        self
    }

    /// Attach a compilation reporter
    #[must_use]
    pub fn with_compilation_reporter(mut self, reporter: Arc<dyn CompilationReporter>) -> Self {
        self.compilation_reporter = Some(reporter);
        self
    }

    /// Attach a memory reporter
    #[must_use]
    pub fn with_memory_reporter(mut self, reporter: Arc<dyn MemoryReporter>) -> Self {
        self.memory_reporter = Some(reporter);
        self
    }

    /// Configuration
    pub const fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Compile hash ledger
    pub const fn ledger(&self) -> &HashLedger {
        &self.ledger
    }

    /// Binary cache
    pub const fn cache(&self) -> &BinaryCache {
        &self.cache
    }

    /// Toolchain
    pub fn toolchain(&self) -> &dyn Toolchain {
        self.toolchain.as_ref()
    }

    /// Profiler and print-server state
    pub const fn tooling(&self) -> &ToolingState {
        &self.tooling
    }

    /// Enabled compilation reporter
    pub fn compilation_reporter(&self) -> Option<&dyn CompilationReporter> {
        self.compilation_reporter.as_deref().filter(|r| r.enabled())
    }

    /// Enabled memory reporter
    pub fn memory_reporter(&self) -> Option<&dyn MemoryReporter> {
        self.memory_reporter.as_deref().filter(|r| r.enabled())
    }

    /// Accept on-disk binaries as hits
    pub fn enable_persistent_cache(&self) {
        self.persistent_cache.store(true, Ordering::SeqCst);
    }

    /// Always consult the ledger
    pub fn disable_persistent_cache(&self) {
        self.persistent_cache.store(false, Ordering::SeqCst);
    }

    /// Persistent cache is on
    pub fn persistent_cache_enabled(&self) -> bool {
        self.persistent_cache.load(Ordering::SeqCst)
    }

    /// Run `f` inside the compile pool
    pub fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// Build the blank op for every role once and return its directory
    ///
    /// Later calls return the memoised path until [`reset`](Self::reset).
    ///
    /// # Errors
    ///
    /// Returns error if the toolchain fails.
    pub fn compile_blank_kernel(&self, device_id: u32) -> Result<PathBuf> {
        let mut blank = self.blank_kernel.lock();
        if let Some(path) = blank.as_ref() {
            return Ok(path.clone());
        }

        let dir = self.cache.root().join(BLANK_OP_NAME);
        for processor in Processor::ALL {
            let kernel = Self::blank_kernel(gridcore_chip::CoreCoord::new(0, 0), processor);
            let mut options = BuildOptions::new(device_id, BLANK_OP_NAME);
            kernel.set_build_options(&mut options);
            kernel.generate_binaries(self.toolchain(), &options, &dir)?;
        }

        debug!("Blank op built into {}", dir.display());
        *blank = Some(dir.clone());
        Ok(dir)
    }

    /// Blank kernel was built in this lifetime
    pub fn blank_kernel_compiled(&self) -> bool {
        self.blank_kernel.lock().is_some()
    }

    /// Drop the memoised blank kernel and every recorded hash
    pub fn reset(&self) {
        *self.blank_kernel.lock() = None;
        self.ledger.clear();
        debug!("Build environment reset");
    }

    /// Blank kernel for `processor` on `cores`
    pub(crate) fn blank_kernel(cores: impl Into<gridcore_chip::CoreRangeSet>, processor: Processor) -> Kernel {
        match processor {
            Processor::DataMovement0 => Kernel::new(
                BLANK_DATAFLOW_SOURCE,
                cores,
                KernelConfig::DataMovement(DataMovementConfig::new(DataMovementProcessor::Riscv0)),
            ),
            Processor::DataMovement1 => Kernel::new(
                BLANK_DATAFLOW_SOURCE,
                cores,
                KernelConfig::DataMovement(DataMovementConfig::new(DataMovementProcessor::Riscv1)),
            ),
            Processor::Compute => {
                Kernel::new(BLANK_COMPUTE_SOURCE, cores, KernelConfig::Compute(ComputeConfig::default()))
            }
        }
    }

    /// Root of the binary cache
    pub fn output_dir(&self) -> &Path {
        self.cache.root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> (tempfile::TempDir, BuildEnvironment) {
        let dir = tempfile::tempdir().unwrap();
        let env = BuildEnvironment::new(BuildConfig::with_output_dir(dir.path()));
        (dir, env)
    }

    #[test]
    fn blank_kernel_is_memoised() {
        let (_dir, env) = env();
        let toolchain = Arc::new(SoftwareToolchain::new());
        let env = env.with_toolchain(toolchain.clone());

        let first = env.compile_blank_kernel(0).unwrap();
        let second = env.compile_blank_kernel(0).unwrap();
        assert_eq!(first, second);
        assert_eq!(toolchain.generations(), 3);
        assert!(env.blank_kernel_compiled());
        assert!(first.join("unpack.bin").is_file());

        env.reset();
        assert!(!env.blank_kernel_compiled());
        env.compile_blank_kernel(0).unwrap();
        assert_eq!(toolchain.generations(), 6);
    }

    #[test]
    fn persistent_cache_toggles() {
        let (_dir, env) = env();
        assert!(!env.persistent_cache_enabled());
        env.enable_persistent_cache();
        assert!(env.persistent_cache_enabled());
        env.disable_persistent_cache();
        assert!(!env.persistent_cache_enabled());
    }

    #[test]
    fn dedicated_pool_runs_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let config = BuildConfig {
            worker_threads: Some(2),
            ..BuildConfig::with_output_dir(dir.path())
        };
        let env = BuildEnvironment::new(config);
        assert_eq!(env.install(rayon::current_num_threads), 2);
    }
}
