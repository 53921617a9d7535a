// SPDX-License-Identifier: AGPL-3.0-only

//! Per-kernel compile options and compile hashes

use gridcore_chip::memory_map::NUM_CIRCULAR_BUFFERS;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::circular_buffer::DataFormat;
use crate::kernel::{Kernel, MathFidelity, NocIndex, Processor};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a hasher for compile hashes
///
/// Compile hashes name directories in the persistent binary cache, so the
/// output depends only on the bytes fed in, never on the toolchain release.
#[derive(Debug, Clone, Copy)]
pub struct StableHasher(u64);

impl Default for StableHasher {
    fn default() -> Self {
        Self(FNV_OFFSET_BASIS)
    }
}

impl Hasher for StableHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= u64::from(byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }
}

/// Options handed to the toolchain for one kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Target device
    pub device_id: u32,
    /// Kernel name
    pub name: String,
    /// Kernel source
    pub source: PathBuf,
    /// Role
    pub processor: Option<Processor>,
    /// Compile-time arguments
    pub compile_args: Vec<u32>,
    /// Preprocessor defines
    pub defines: BTreeMap<String, String>,
    /// NoC for data-movement kernels
    pub noc: Option<NocIndex>,
    /// Compute math fidelity
    pub math_fidelity: MathFidelity,
    /// Compute fp32 accumulation
    pub fp32_dest_acc_en: bool,
    /// Compute approximate math
    pub math_approx_mode: bool,
    /// Data format per circular-buffer slot visible to the kernel
    pub cb_formats: [Option<DataFormat>; NUM_CIRCULAR_BUFFERS],
    /// Build with profiler markers
    pub profile_kernel: bool,
}

impl BuildOptions {
    /// Empty options for `name` on `device_id`
    pub fn new(device_id: u32, name: impl Into<String>) -> Self {
        Self {
            device_id,
            name: name.into(),
            source: PathBuf::new(),
            processor: None,
            compile_args: Vec::new(),
            defines: BTreeMap::new(),
            noc: None,
            math_fidelity: MathFidelity::default(),
            fp32_dest_acc_en: false,
            math_approx_mode: false,
            cb_formats: [None; NUM_CIRCULAR_BUFFERS],
            profile_kernel: false,
        }
    }

    /// Set the data format of one circular-buffer slot
    pub fn set_cb_format(&mut self, index: usize, format: DataFormat) {
        if let Some(slot) = self.cb_formats.get_mut(index) {
            *slot = Some(format);
        }
    }

    /// Hash of the descriptor-generating options
    ///
    /// Covers role, device, slot formats, compute settings and the profiler
    /// flag. Source and compile arguments live in the kernel's own hash.
    pub fn descriptor_hash(&self) -> u64 {
        let mut hasher = StableHasher::default();
        self.device_id.hash(&mut hasher);
        self.processor.hash(&mut hasher);
        self.noc.hash(&mut hasher);
        self.cb_formats.hash(&mut hasher);
        self.math_fidelity.hash(&mut hasher);
        self.fp32_dest_acc_en.hash(&mut hasher);
        self.math_approx_mode.hash(&mut hasher);
        self.profile_kernel.hash(&mut hasher);
        hasher.finish()
    }
}

/// Compile hash of `kernel` under merged `options`
pub fn kernel_compile_hash(kernel: &Kernel, options: &BuildOptions) -> u64 {
    let mut hasher = StableHasher::default();
    options.descriptor_hash().hash(&mut hasher);
    kernel.compute_hash().hash(&mut hasher);
    hasher.finish()
}
