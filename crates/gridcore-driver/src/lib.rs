// SPDX-License-Identifier: AGPL-3.0-only

//! Host compiler and device dispatcher for a many-core accelerator.
//!
//! A [`Program`] collects kernels, circular buffers and semaphores over
//! logical core ranges. Compiling it places every circular buffer in L1,
//! fills unassigned roles with blank kernels, generates binaries once per
//! compile hash and loads them back. The device side executes the command
//! stream that ships those binaries and launches the workers.
//!
//! # Pipeline
//!
//! ```text
//! Program::add_kernel / add_circular_buffer / create_semaphore
//!        │
//!        ▼
//! Program::compile ── allocate circular buffers (max candidate per range set)
//!        │         ── blank kernels for missing roles
//!        │         ── generate (rayon, hash ledger) ▶ binary cache
//!        │         ── load binaries
//!        ▼
//! Program::launch_command ──▶ DeviceCommand::encode ──▶ DispatchExecutor::run
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use gridcore_driver::prelude::*;
//! use gridcore_chip::{CoreCoord, CoreRange};
//!
//! # fn main() -> gridcore_driver::Result<()> {
//! let device = SoftwareDevice::new(0, 2, 2);
//! device.initialize();
//!
//! let cores = CoreRange::new(CoreCoord::new(0, 0), CoreCoord::new(1, 1));
//! let mut program = Program::new();
//! program.create_compute_kernel("kernels/compute/eltwise.cpp", cores, ComputeConfig::default());
//! program.add_circular_buffer(cores, CircularBufferConfig::new(4096, [(0, DataFormat::Float16B)]))?;
//!
//! program.compile(&device, BuildEnvironment::global())?;
//! let words = program.launch_command(&device).encode();
//! # let _ = words;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod build;
mod circular_buffer;
mod config;
mod device;
pub mod dispatch;
mod error;
mod kernel;
mod kernel_group;
mod program;
pub mod report;
mod semaphore;

pub use build::{BuildEnvironment, BuildOptions, SoftwareToolchain, Toolchain};
pub use circular_buffer::{CircularBuffer, CircularBufferAllocator, CircularBufferConfig, CircularBufferId, DataFormat};
pub use config::{BuildConfig, DispatchConfig};
pub use device::{Device, SoftwareDevice};
pub use dispatch::{DispatchExecutor, DispatchStats, SoftwareNoc};
pub use error::{GridError, Result};
pub use kernel::{
    ComputeConfig, DataMovementConfig, DataMovementProcessor, Kernel, KernelConfig, KernelId, KernelImage,
    MathFidelity, NocIndex, Processor,
};
pub use kernel_group::KernelGroup;
pub use program::{group_kernels, Program};
pub use semaphore::Semaphore;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BuildConfig, BuildEnvironment, CircularBufferConfig, ComputeConfig, DataFormat, DataMovementConfig,
        DataMovementProcessor, Device, DispatchConfig, DispatchExecutor, GridError, KernelConfig, Processor, Program,
        Result, SoftwareDevice, SoftwareNoc,
    };
}
