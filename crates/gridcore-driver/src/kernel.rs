// SPDX-License-Identifier: AGPL-3.0-only

//! Kernels: per-core code bound to one processor role
//!
//! A kernel targets one of three roles on every core of its range set: two
//! data-movement engines and the compute engine. Compute kernels build to
//! three images (unpack, math, pack); data-movement kernels build to one.

use bytes::Bytes;
use gridcore_chip::{CoreRange, CoreRangeSet};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::build::{BinaryCache, BuildOptions, StableHasher, Toolchain};
use crate::error::{GridError, Result};

static NEXT_KERNEL_ID: AtomicUsize = AtomicUsize::new(0);

/// Process-unique kernel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelId(usize);

impl KernelId {
    fn next() -> Self {
        Self(NEXT_KERNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processor role a kernel runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Processor {
    /// Data-movement engine 0
    DataMovement0,
    /// Data-movement engine 1
    DataMovement1,
    /// Compute engine
    Compute,
}

impl Processor {
    /// Every role, in launch-message order
    pub const ALL: [Self; 3] = [Self::DataMovement0, Self::DataMovement1, Self::Compute];

    /// Image files the toolchain produces for this role
    pub const fn image_names(self) -> &'static [&'static str] {
        match self {
            Self::DataMovement0 => &["dm0.bin"],
            Self::DataMovement1 => &["dm1.bin"],
            Self::Compute => &["unpack.bin", "math.bin", "pack.bin"],
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataMovement0 => write!(f, "DM0"),
            Self::DataMovement1 => write!(f, "DM1"),
            Self::Compute => write!(f, "COMPUTE"),
        }
    }
}

/// Data-movement engine selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataMovementProcessor {
    /// Engine 0
    Riscv0,
    /// Engine 1
    Riscv1,
}

impl From<DataMovementProcessor> for Processor {
    fn from(p: DataMovementProcessor) -> Self {
        match p {
            DataMovementProcessor::Riscv0 => Self::DataMovement0,
            DataMovementProcessor::Riscv1 => Self::DataMovement1,
        }
    }
}

/// NoC a data-movement kernel issues transfers on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NocIndex {
    /// NoC 0
    Noc0,
    /// NoC 1
    Noc1,
}

/// Compute engine math fidelity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MathFidelity {
    /// Single pass
    LoFi,
    /// Two passes
    HiFi2,
    /// Three passes
    HiFi3,
    /// Four passes
    #[default]
    HiFi4,
}

/// Configuration of a data-movement kernel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataMovementConfig {
    /// Engine
    pub processor: DataMovementProcessor,
    /// NoC
    pub noc: NocIndex,
    /// Compile-time arguments
    pub compile_args: Vec<u32>,
    /// Preprocessor defines
    pub defines: BTreeMap<String, String>,
}

impl DataMovementConfig {
    /// Engine with its default NoC (engine 0 on NoC 0, engine 1 on NoC 1)
    pub fn new(processor: DataMovementProcessor) -> Self {
        let noc = match processor {
            DataMovementProcessor::Riscv0 => NocIndex::Noc0,
            DataMovementProcessor::Riscv1 => NocIndex::Noc1,
        };
        Self {
            processor,
            noc,
            compile_args: Vec::new(),
            defines: BTreeMap::new(),
        }
    }

    /// Set compile-time arguments
    #[must_use]
    pub fn with_compile_args(mut self, args: Vec<u32>) -> Self {
        self.compile_args = args;
        self
    }

    /// Add a define
    #[must_use]
    pub fn with_define(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(key.into(), value.into());
        self
    }
}

/// Configuration of a compute kernel
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ComputeConfig {
    /// Math fidelity
    pub math_fidelity: MathFidelity,
    /// Accumulate in fp32
    pub fp32_dest_acc_en: bool,
    /// Approximate SFPU math
    pub math_approx_mode: bool,
    /// Compile-time arguments
    pub compile_args: Vec<u32>,
    /// Preprocessor defines
    pub defines: BTreeMap<String, String>,
}

impl ComputeConfig {
    /// Set compile-time arguments
    #[must_use]
    pub fn with_compile_args(mut self, args: Vec<u32>) -> Self {
        self.compile_args = args;
        self
    }
}

/// Role-specific kernel configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KernelConfig {
    /// Data-movement kernel
    DataMovement(DataMovementConfig),
    /// Compute kernel
    Compute(ComputeConfig),
}

/// Loaded binaries of one kernel
#[derive(Debug, Clone)]
pub struct KernelImage {
    /// One image per file in [`Processor::image_names`]
    pub binaries: Vec<Bytes>,
}

impl KernelImage {
    /// Total bytes across all images
    pub fn packed_size(&self) -> usize {
        self.binaries.iter().map(Bytes::len).sum()
    }
}

/// A unit of per-core code owned by one program
#[derive(Debug)]
pub struct Kernel {
    id: KernelId,
    source: PathBuf,
    name: String,
    core_range_set: CoreRangeSet,
    config: KernelConfig,
    binary_path: Option<PathBuf>,
    image: Option<KernelImage>,
}

impl Kernel {
    /// Create a kernel with a fresh id; the name is the source file stem
    pub fn new(source: impl Into<PathBuf>, core_range_set: impl Into<CoreRangeSet>, config: KernelConfig) -> Self {
        let source = source.into();
        let name = source
            .file_stem()
            .map_or_else(|| source.display().to_string(), |s| s.to_string_lossy().into_owned());
        Self {
            id: KernelId::next(),
            source,
            name,
            core_range_set: core_range_set.into(),
            config,
            binary_path: None,
            image: None,
        }
    }

    /// Kernel id
    pub const fn id(&self) -> KernelId {
        self.id
    }

    /// Name used for the binary cache directory
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source path
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Role
    pub fn processor(&self) -> Processor {
        match &self.config {
            KernelConfig::DataMovement(c) => c.processor.into(),
            KernelConfig::Compute(_) => Processor::Compute,
        }
    }

    /// Configuration
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Cores this kernel runs on
    pub const fn core_range_set(&self) -> &CoreRangeSet {
        &self.core_range_set
    }

    /// Cores this kernel runs on, one by one
    pub fn logical_cores(&self) -> impl Iterator<Item = gridcore_chip::CoreCoord> + '_ {
        self.core_range_set.cores()
    }

    /// Ranges this kernel runs on
    pub fn logical_coreranges(&self) -> &[CoreRange] {
        self.core_range_set.ranges()
    }

    /// Structural hash: source, role and role-specific settings
    ///
    /// Core placement is not hashed: one kernel placed on different cores
    /// shares one binary.
    pub fn compute_hash(&self) -> u64 {
        let mut hasher = StableHasher::default();
        self.source.hash(&mut hasher);
        self.config.hash(&mut hasher);
        hasher.finish()
    }

    /// Fill role-specific fields of the build options
    pub fn set_build_options(&self, options: &mut BuildOptions) {
        options.processor = Some(self.processor());
        options.source = self.source.clone();
        match &self.config {
            KernelConfig::DataMovement(c) => {
                options.noc = Some(c.noc);
                options.compile_args.clone_from(&c.compile_args);
                options.defines.clone_from(&c.defines);
            }
            KernelConfig::Compute(c) => {
                options.math_fidelity = c.math_fidelity;
                options.fp32_dest_acc_en = c.fp32_dest_acc_en;
                options.math_approx_mode = c.math_approx_mode;
                options.compile_args.clone_from(&c.compile_args);
                options.defines.clone_from(&c.defines);
            }
        }
    }

    /// Run the toolchain for this kernel into `out_dir`
    ///
    /// # Errors
    ///
    /// Returns error if the toolchain fails or the directory cannot be created.
    pub fn generate_binaries(&self, toolchain: &dyn Toolchain, options: &BuildOptions, out_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(out_dir)?;
        debug!("Generating binaries for kernel {} ({}) into {}", self.id, self.name, out_dir.display());
        toolchain.generate(options, out_dir)
    }

    /// Cache-relative binary directory, set during compile
    pub fn binary_path(&self) -> Option<&Path> {
        self.binary_path.as_deref()
    }

    /// Record the cache-relative binary directory
    pub fn set_binary_path(&mut self, path: PathBuf) {
        self.binary_path = Some(path);
    }

    /// Load this kernel's images from the binary cache
    ///
    /// # Errors
    ///
    /// Returns error if the kernel has not been compiled or an image is missing.
    pub fn read_binaries(&mut self, cache: &BinaryCache) -> Result<()> {
        let suffix = self.binary_path.as_ref().ok_or_else(|| {
            tracing::error!("Kernel {} ({}) has no binaries, compile it first", self.id, self.name);
            GridError::BinaryNotFound {
                path: PathBuf::from(&self.name),
            }
        })?;
        let dir = cache.path_for(suffix);

        let mut binaries = Vec::new();
        for file in self.processor().image_names() {
            let path = dir.join(file);
            let data = std::fs::read(&path).map_err(|e| {
                tracing::error!("Failed to read binary {} for kernel {}: {e}", path.display(), self.name);
                GridError::BinaryNotFound { path: path.clone() }
            })?;
            binaries.push(Bytes::from(data));
        }

        let image = KernelImage { binaries };
        debug!("Kernel {} ({}): loaded {} bytes", self.id, self.name, image.packed_size());
        self.image = Some(image);
        Ok(())
    }

    /// Loaded images, after compile
    pub const fn image(&self) -> Option<&KernelImage> {
        self.image.as_ref()
    }
}
