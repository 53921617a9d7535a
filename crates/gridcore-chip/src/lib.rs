// SPDX-License-Identifier: AGPL-3.0-only

//! Silicon model for a many-core accelerator grid.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the silicon as the host compiler and the dispatch firmware
//! both see it: core geometry, the per-core L1 memory map, NoC address
//! encoding, the worker launch message, and the command-stream wire format.
//!
//! Host and firmware must agree on every layout here word for word; there is
//! no version field, so any change means rebuilding both sides together.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`coord`] | `CoreCoord`, `CoreRange`, `CoreRangeSet` (coalescing merge) |
//! | [`memory_map`] | L1 layout: reserved base, mailboxes, staging, semaphores |
//! | [`noc`] | Unicast / multicast NoC coordinate encoding |
//! | [`launch`] | Launch message written to every worker's mailbox |
//! | [`command`] | Dispatch command stream records and encoder |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod command;
pub mod coord;
pub mod launch;
pub mod memory_map;
pub mod noc;

pub use coord::{CoreCoord, CoreRange, CoreRangeSet};
