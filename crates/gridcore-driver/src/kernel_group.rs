// SPDX-License-Identifier: AGPL-3.0-only

//! Per-core kernel grouping

use gridcore_chip::launch::LaunchMessage;
use gridcore_chip::CoreCoord;

use crate::error::{GridError, Result};
use crate::kernel::{Kernel, KernelId, Processor};

/// At most one kernel per role on one core, plus its launch message template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelGroup {
    /// Data-movement engine 0 kernel
    pub dm0: Option<KernelId>,
    /// Data-movement engine 1 kernel
    pub dm1: Option<KernelId>,
    /// Compute kernel
    pub compute: Option<KernelId>,
    /// Per-role enable flags, `run == GO`
    pub launch_msg: LaunchMessage,
}

impl KernelGroup {
    /// Empty group
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `kernel` to its role on `core`
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRole` if the role already holds a kernel.
    pub fn update(&mut self, core: CoreCoord, kernel: &Kernel) -> Result<()> {
        let processor = kernel.processor();
        let (slot, enable) = match processor {
            Processor::DataMovement0 => (&mut self.dm0, &mut self.launch_msg.enable_dm0),
            Processor::DataMovement1 => (&mut self.dm1, &mut self.launch_msg.enable_dm1),
            Processor::Compute => (&mut self.compute, &mut self.launch_msg.enable_compute),
        };

        if let Some(existing) = *slot {
            tracing::error!(
                "Core {core}: {processor} already runs kernel {existing}, rejecting kernel {} ({})",
                kernel.id(),
                kernel.name()
            );
            return Err(GridError::DuplicateRole {
                core,
                processor,
                existing,
                kernel: kernel.id(),
            });
        }

        *slot = Some(kernel.id());
        *enable = true;
        Ok(())
    }

    /// Kernel on `processor`, if any
    pub const fn kernel(&self, processor: Processor) -> Option<KernelId> {
        match processor {
            Processor::DataMovement0 => self.dm0,
            Processor::DataMovement1 => self.dm1,
            Processor::Compute => self.compute,
        }
    }

    /// Roles with no kernel
    pub fn missing_roles(&self) -> impl Iterator<Item = Processor> + '_ {
        Processor::ALL.into_iter().filter(|p| self.kernel(*p).is_none())
    }

    /// Every role holds a kernel
    pub fn is_complete(&self) -> bool {
        self.missing_roles().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{ComputeConfig, DataMovementConfig, DataMovementProcessor, KernelConfig};
    use gridcore_chip::memory_map::run_msg;

    fn dm0() -> Kernel {
        Kernel::new(
            "writer.cpp",
            CoreCoord::new(0, 0),
            KernelConfig::DataMovement(DataMovementConfig::new(DataMovementProcessor::Riscv0)),
        )
    }

    #[test]
    fn update_sets_role_and_enable_flag() {
        let core = CoreCoord::new(0, 0);
        let mut group = KernelGroup::new();
        let k = dm0();
        group.update(core, &k).unwrap();
        assert_eq!(group.dm0, Some(k.id()));
        assert!(group.launch_msg.enable_dm0);
        assert!(!group.launch_msg.enable_compute);
        assert_eq!(group.launch_msg.run, run_msg::GO);
        assert_eq!(group.missing_roles().collect::<Vec<_>>(), vec![Processor::DataMovement1, Processor::Compute]);
    }

    #[test]
    fn duplicate_role_is_rejected() {
        let core = CoreCoord::new(0, 0);
        let mut group = KernelGroup::new();
        let first = dm0();
        group.update(core, &first).unwrap();
        let err = group.update(core, &dm0()).unwrap_err();
        assert!(matches!(err, GridError::DuplicateRole { existing, .. } if existing == first.id()));
        assert_eq!(group.dm0, Some(first.id()));
    }

    #[test]
    fn complete_group() {
        let core = CoreCoord::new(0, 0);
        let mut group = KernelGroup::new();
        group.update(core, &dm0()).unwrap();
        group
            .update(
                core,
                &Kernel::new(
                    "reader.cpp",
                    core,
                    KernelConfig::DataMovement(DataMovementConfig::new(DataMovementProcessor::Riscv1)),
                ),
            )
            .unwrap();
        group
            .update(core, &Kernel::new("eltwise.cpp", core, KernelConfig::Compute(ComputeConfig::default())))
            .unwrap();
        assert!(group.is_complete());
    }
}
