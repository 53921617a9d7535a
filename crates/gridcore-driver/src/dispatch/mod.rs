// SPDX-License-Identifier: AGPL-3.0-only

//! Device-side command execution
//!
//! The dispatch core reads a command stream produced by
//! [`DeviceCommand::encode`](gridcore_chip::command::DeviceCommand::encode)
//! and drives the NoC: it stages host buffers through its L1 into banks,
//! relays program sections to workers with multicast writes, launches the
//! workers and waits on the completion counter, then signals the host.
//!
//! ```text
//! host ──read──▶ staging (one burst) ──write per page──▶ banks
//! host ──read──▶ staging (one section) ──multicast──▶ workers
//! launch msg ──multicast──▶ worker mailboxes ──▶ spin on counter
//! ```

mod executor;
mod noc;
mod software;
pub mod stream;

pub use executor::{DispatchExecutor, DispatchStats};
pub use noc::{BankDescriptor, InterleavedAddrGen, Noc};
pub use software::{NocStats, SoftwareNoc, DRAM_BANK_SIZE, HOST_MEMORY_SIZE};
