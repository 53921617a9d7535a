// SPDX-License-Identifier: AGPL-3.0-only

//! Command interpreter of the dispatch core
//!
//! One call to [`DispatchExecutor::run`] consumes one command front to back:
//! buffer writes, buffer reads, program relays, launch, finish. Every
//! asynchronous transfer is fenced by the matching barrier before the next
//! phase starts, and staging memory never holds more than one burst.

use gridcore_chip::command::{BufferTransfer, LaunchGroup, ProgramRelay};
use gridcore_chip::launch::LaunchMessage;
use gridcore_chip::memory_map::{
    CQ_FINISH_PTR, DEVICE_COMMAND_DATA_ADDR, DISPATCH_MESSAGE_ADDR, HOST_CQ_FINISH_PTR, LAUNCH_MAILBOX_ADDR,
    LAUNCH_MSG_STAGING_ADDR, PCIE_NOC_X, PCIE_NOC_Y,
};
use gridcore_chip::noc::{noc_xy_encoding, NocAddr};
use tracing::{debug, error, info, warn};

use super::noc::{InterleavedAddrGen, Noc};
use super::stream::{read_buffer_transfer, read_launch_group, read_program_relay, CommandHeader, CommandReader};
use crate::config::DispatchConfig;
use crate::error::{GridError, Result};

/// Counters for one executed command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Buffer-write records executed
    pub buffer_writes: u32,
    /// Buffer-read records executed
    pub buffer_reads: u32,
    /// Pages moved between staging and banks
    pub pages: u32,
    /// Bursts staged
    pub bursts: u32,
    /// Program relays executed
    pub relays: u32,
    /// Multicast writes issued, relays and launch
    pub multicasts: u32,
    /// Workers the launch barrier waited for
    pub workers_launched: u32,
    /// Polls of the completion counter
    pub completion_polls: u64,
    /// Host was signalled
    pub finished: bool,
}

/// Executes command streams against a [`Noc`]
#[derive(Debug)]
pub struct DispatchExecutor<N: Noc> {
    noc: N,
    config: DispatchConfig,
}

impl<N: Noc> DispatchExecutor<N> {
    /// Executor over `noc`
    pub const fn new(noc: N, config: DispatchConfig) -> Self {
        Self { noc, config }
    }

    /// Underlying NoC
    pub const fn noc(&self) -> &N {
        &self.noc
    }

    /// Underlying NoC, mutable
    pub fn noc_mut(&mut self) -> &mut N {
        &mut self.noc
    }

    /// Release the NoC
    pub fn into_noc(self) -> N {
        self.noc
    }

    /// Configuration
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Execute one command
    ///
    /// Blocks until every launched worker has bumped the completion
    /// counter. There is no timeout.
    ///
    /// # Errors
    ///
    /// Returns error on a malformed stream, a burst larger than staging
    /// memory or a failed NoC transfer. Records before the failing one have
    /// already executed.
    pub fn run(&mut self, words: &[u32]) -> Result<DispatchStats> {
        let mut reader = CommandReader::new(words);
        let header = CommandHeader::read(&mut reader)?;
        let mut stats = DispatchStats::default();

        debug!(
            "Command: {} writes, {} reads, {} relays, {} launch groups, {} workers, {} data bytes",
            header.num_buffer_writes,
            header.num_buffer_reads,
            header.num_program_relays,
            header.num_multicast_groups,
            header.num_workers,
            header.data_size
        );

        for _ in 0..header.num_buffer_writes {
            let offset = reader.position();
            let transfer = read_buffer_transfer(&mut reader)?;
            self.write_buffer(&transfer, offset, &mut stats)?;
            stats.buffer_writes += 1;
        }

        for _ in 0..header.num_buffer_reads {
            let offset = reader.position();
            let transfer = read_buffer_transfer(&mut reader)?;
            self.read_buffer(&transfer, offset, &mut stats)?;
            stats.buffer_reads += 1;
        }

        for _ in 0..header.num_program_relays {
            let offset = reader.position();
            let relay = read_program_relay(&mut reader)?;
            self.relay_program(&relay, offset, &mut stats)?;
            stats.relays += 1;
        }

        let groups = (0..header.num_multicast_groups)
            .map(|_| read_launch_group(&mut reader))
            .collect::<Result<Vec<_>>>()?;
        self.launch(header.num_workers, &groups, &mut stats)?;

        if header.finish {
            self.finish()?;
            stats.finished = true;
        }

        if reader.remaining() != 0 {
            warn!("{} words after the last record were ignored", reader.remaining());
        }

        info!(
            "Command done: {} pages in {} bursts, {} relays, {} workers",
            stats.pages, stats.bursts, stats.relays, stats.workers_launched
        );
        Ok(stats)
    }

    fn check_transfer(&self, t: &BufferTransfer, offset: usize) -> Result<()> {
        if t.padded_buf_size == 0 {
            return Ok(());
        }
        if t.burst_size == 0 || t.burst_size > self.config.staging_capacity {
            error!(
                "Burst of {} B at word {offset} does not fit staging memory of {} B",
                t.burst_size, self.config.staging_capacity
            );
            return Err(GridError::malformed(
                offset,
                format!(
                    "burst size {} outside 1..={}",
                    t.burst_size, self.config.staging_capacity
                ),
            ));
        }
        if t.padded_page_size == 0 || t.page_size > t.padded_page_size || t.padded_page_size > t.burst_size {
            error!(
                "Page size {} padded to {} with burst {} at word {offset}",
                t.page_size, t.padded_page_size, t.burst_size
            );
            return Err(GridError::malformed(
                offset,
                format!(
                    "page size {} padded to {} does not fit burst {}",
                    t.page_size, t.padded_page_size, t.burst_size
                ),
            ));
        }
        if t.remote_addr.checked_add(t.padded_buf_size).is_none() {
            error!(
                "Remote range {:#x} + {} B at word {offset} leaves the address space",
                t.remote_addr, t.padded_buf_size
            );
            return Err(GridError::malformed(
                offset,
                format!("remote range {:#x} + {} B overflows", t.remote_addr, t.padded_buf_size),
            ));
        }
        Ok(())
    }

    /// Stream a host buffer into banks, one burst at a time
    fn write_buffer(&mut self, t: &BufferTransfer, offset: usize, stats: &mut DispatchStats) -> Result<()> {
        self.check_transfer(t, offset)?;
        let addr_gen = InterleavedAddrGen::new(self.config.banks(t.bank_kind), t.bank_base_addr, t.padded_page_size)?;
        debug!(
            "Buffer write: {} B from {:#x}:{:#x} to {:?} banks at {:#x}",
            t.padded_buf_size, t.remote_noc, t.remote_addr, t.bank_kind, t.bank_base_addr
        );

        let mut src_addr = t.remote_addr;
        let mut remaining = t.padded_buf_size;
        let mut page = 0u32;
        while remaining > 0 {
            let read_size = remaining.min(t.burst_size);
            self.noc
                .async_read(NocAddr::new(t.remote_noc, src_addr), DEVICE_COMMAND_DATA_ADDR, read_size)?;
            src_addr = advance(src_addr, read_size, offset)?;
            self.noc.async_read_barrier();

            for staged in (0..read_size).step_by(t.padded_page_size as usize) {
                let local = advance(DEVICE_COMMAND_DATA_ADDR, staged, offset)?;
                let dst = bank_addr(&addr_gen, page, offset)?;
                self.noc.async_write(local, dst, t.page_size)?;
                page += 1;
                stats.pages += 1;
            }
            self.noc.async_write_barrier();

            remaining -= read_size;
            stats.bursts += 1;
        }
        Ok(())
    }

    /// Gather pages from banks and stream them to the destination
    fn read_buffer(&mut self, t: &BufferTransfer, offset: usize, stats: &mut DispatchStats) -> Result<()> {
        self.check_transfer(t, offset)?;
        let addr_gen = InterleavedAddrGen::new(self.config.banks(t.bank_kind), t.bank_base_addr, t.padded_page_size)?;
        debug!(
            "Buffer read: {} B from {:?} banks at {:#x} to {:#x}:{:#x}",
            t.padded_buf_size, t.bank_kind, t.bank_base_addr, t.remote_noc, t.remote_addr
        );

        let mut dst_addr = t.remote_addr;
        let mut remaining = t.padded_buf_size;
        let mut page = 0u32;
        while remaining > 0 {
            let write_size = remaining.min(t.burst_size);

            for staged in (0..write_size).step_by(t.padded_page_size as usize) {
                let local = advance(DEVICE_COMMAND_DATA_ADDR, staged, offset)?;
                let src = bank_addr(&addr_gen, page, offset)?;
                self.noc.async_read(src, local, t.page_size)?;
                page += 1;
                stats.pages += 1;
            }
            self.noc.async_read_barrier();

            self.noc
                .async_write(DEVICE_COMMAND_DATA_ADDR, NocAddr::new(t.remote_noc, dst_addr), write_size)?;
            dst_addr = advance(dst_addr, write_size, offset)?;
            self.noc.async_write_barrier();

            remaining -= write_size;
            stats.bursts += 1;
        }
        Ok(())
    }

    /// Stage one program section and fan it out
    fn relay_program(&mut self, relay: &ProgramRelay, offset: usize, stats: &mut DispatchStats) -> Result<()> {
        if relay.transfer_size > self.config.staging_capacity {
            error!(
                "Program section of {} B at word {offset} does not fit staging memory of {} B",
                relay.transfer_size, self.config.staging_capacity
            );
            return Err(GridError::malformed(
                offset,
                format!("relay of {} B exceeds staging memory", relay.transfer_size),
            ));
        }
        debug!(
            "Relay {} B from {:#x}:{:#x} to {} destinations",
            relay.transfer_size,
            relay.src_noc,
            relay.src,
            relay.writes.len()
        );

        self.noc.async_read(
            NocAddr::new(relay.src_noc, relay.src),
            DEVICE_COMMAND_DATA_ADDR,
            relay.transfer_size,
        )?;
        self.noc.async_read_barrier();

        for write in &relay.writes {
            self.noc.async_write_multicast(
                write.src,
                NocAddr::new(write.dst_noc, write.dst),
                write.transfer_size,
                write.num_receivers,
            )?;
            stats.multicasts += 1;
        }
        self.noc.async_write_barrier();
        Ok(())
    }

    /// Send GO to every group and wait for all workers to report back
    fn launch(&mut self, num_workers: u32, groups: &[LaunchGroup], stats: &mut DispatchStats) -> Result<()> {
        if num_workers == 0 {
            return Ok(());
        }
        self.noc.write_local(DISPATCH_MESSAGE_ADDR, &0u32.to_le_bytes())?;
        self.noc
            .write_local(LAUNCH_MSG_STAGING_ADDR, &LaunchMessage::all_enabled().to_bytes())?;

        for group in groups {
            self.noc.async_write_multicast(
                LAUNCH_MSG_STAGING_ADDR,
                NocAddr::new(group.dst_noc, LAUNCH_MAILBOX_ADDR),
                LaunchMessage::SIZE as u32,
                group.num_receivers,
            )?;
            stats.multicasts += 1;
        }
        self.noc.async_write_barrier();
        debug!("Launched {} groups, waiting for {num_workers} workers", groups.len());

        while self.noc.read_local_u32(DISPATCH_MESSAGE_ADDR) != num_workers {
            stats.completion_polls += 1;
            std::hint::spin_loop();
        }
        stats.workers_launched = num_workers;
        Ok(())
    }

    /// Raise the host finish pointer
    fn finish(&mut self) -> Result<()> {
        self.noc.write_local(CQ_FINISH_PTR, &1u32.to_le_bytes())?;
        self.noc.async_write(
            CQ_FINISH_PTR,
            NocAddr::new(noc_xy_encoding(PCIE_NOC_X, PCIE_NOC_Y), HOST_CQ_FINISH_PTR),
            4,
        )?;
        self.noc.async_write_barrier();
        self.noc.write_local(CQ_FINISH_PTR, &0u32.to_le_bytes())?;
        debug!("Host signalled");
        Ok(())
    }
}

/// `addr + by`, or a malformed-record error for the record at `offset`
fn advance(addr: u32, by: u32, offset: usize) -> Result<u32> {
    addr.checked_add(by).ok_or_else(|| {
        error!("Address {addr:#x} + {by:#x} overflows in record at word {offset}");
        GridError::malformed(offset, format!("address {addr:#x} + {by:#x} overflows"))
    })
}

fn bank_addr(addr_gen: &InterleavedAddrGen<'_>, page: u32, offset: usize) -> Result<NocAddr> {
    addr_gen.get_noc_addr(page).ok_or_else(|| {
        error!("Page {page} at word {offset} lies beyond the bank address space");
        GridError::malformed(offset, format!("page {page} beyond the bank address space"))
    })
}
