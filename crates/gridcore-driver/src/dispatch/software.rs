// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory NoC
//!
//! Models the dispatch core's L1, a set of remote nodes (host window, DRAM
//! banks, worker cores) and worker progress. Transfers complete immediately,
//! so barriers only count. A worker that receives a GO launch message in its
//! mailbox finishes on a later poll of the completion counter: each poll
//! retires one pending worker and bumps the counter by one.

use gridcore_chip::launch::LaunchMessage;
use gridcore_chip::memory_map::{run_msg, DISPATCH_MESSAGE_ADDR, L1_SIZE, LAUNCH_MAILBOX_ADDR, PCIE_NOC_X, PCIE_NOC_Y};
use gridcore_chip::noc::{core_xy, noc_multicast_decode, noc_xy_decode, noc_xy_encoding, NocAddr};
use gridcore_chip::CoreCoord;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::{debug, error, trace};

use super::noc::Noc;
use crate::error::{GridError, Result};

/// Capacity of the host memory window
pub const HOST_MEMORY_SIZE: u64 = 64 * 1024 * 1024;

/// Capacity of one DRAM bank
pub const DRAM_BANK_SIZE: u64 = 1024 * 1024 * 1024;

/// Transfer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NocStats {
    /// Unicast reads
    pub reads: u64,
    /// Unicast writes
    pub writes: u64,
    /// Multicast writes
    pub multicasts: u64,
    /// Bytes read into local memory
    pub bytes_read: u64,
    /// Bytes written out of local memory, once per receiver
    pub bytes_written: u64,
    /// Read barriers
    pub read_barriers: u64,
    /// Write barriers
    pub write_barriers: u64,
}

#[derive(Debug)]
struct Node {
    capacity: u64,
    data: Vec<u8>,
}

impl Node {
    const fn new(capacity: u64) -> Self {
        Self {
            capacity,
            data: Vec::new(),
        }
    }

    fn check(&self, xy: u32, addr: u32, len: usize) -> Result<usize> {
        let start = u64::from(addr);
        let end = start + len as u64;
        if end > self.capacity {
            error!(
                "Access [{start:#x}, {end:#x}) on node {:?} beyond capacity {:#x}",
                noc_xy_decode(xy),
                self.capacity
            );
            return Err(GridError::transfer_failed(format!(
                "[{start:#x}, {end:#x}) beyond node {:?} capacity {:#x}",
                noc_xy_decode(xy),
                self.capacity
            )));
        }
        Ok(addr as usize)
    }

    fn write(&mut self, xy: u32, addr: u32, bytes: &[u8]) -> Result<()> {
        let start = self.check(xy, addr, bytes.len())?;
        let end = start + bytes.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn read(&self, xy: u32, addr: u32, len: usize) -> Result<Vec<u8>> {
        let start = self.check(xy, addr, len)?;
        let mut out = vec![0u8; len];
        if start < self.data.len() {
            let available = (self.data.len() - start).min(len);
            out[..available].copy_from_slice(&self.data[start..start + available]);
        }
        Ok(out)
    }
}

/// Software NoC for tests and the CLI
#[derive(Debug)]
pub struct SoftwareNoc {
    local: Vec<u8>,
    nodes: HashMap<u32, Node>,
    workers: BTreeSet<u32>,
    pending: VecDeque<u32>,
    stats: NocStats,
}

impl Default for SoftwareNoc {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareNoc {
    /// Dispatch core with the host window mapped
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(noc_xy_encoding(PCIE_NOC_X, PCIE_NOC_Y), Node::new(HOST_MEMORY_SIZE));
        Self {
            local: vec![0; L1_SIZE as usize],
            nodes,
            workers: BTreeSet::new(),
            pending: VecDeque::new(),
            stats: NocStats::default(),
        }
    }

    /// NoC encoding of the host window
    pub const fn host_xy() -> u32 {
        noc_xy_encoding(PCIE_NOC_X, PCIE_NOC_Y)
    }

    /// Map a node with `capacity` bytes
    pub fn add_node(&mut self, xy: u32, capacity: u64) {
        self.nodes.entry(xy).or_insert_with(|| Node::new(capacity));
    }

    /// Map a DRAM bank
    pub fn add_dram_bank(&mut self, xy: u32) {
        self.add_node(xy, DRAM_BANK_SIZE);
    }

    /// Map a worker core, NoC coordinates
    pub fn add_worker(&mut self, core: CoreCoord) {
        let xy = core_xy(core);
        self.add_node(xy, L1_SIZE);
        self.workers.insert(xy);
    }

    /// Store bytes on a node
    ///
    /// # Errors
    ///
    /// Returns error if the node is not mapped or the range exceeds it.
    pub fn write_node(&mut self, xy: u32, addr: u32, bytes: &[u8]) -> Result<()> {
        self.node_mut(xy)?.write(xy, addr, bytes)
    }

    /// Load bytes from a node; unwritten bytes read as zero
    ///
    /// # Errors
    ///
    /// Returns error if the node is not mapped or the range exceeds it.
    pub fn read_node(&self, xy: u32, addr: u32, len: usize) -> Result<Vec<u8>> {
        let node = self.nodes.get(&xy).ok_or_else(|| unmapped(xy))?;
        node.read(xy, addr, len)
    }

    /// Local memory slice
    ///
    /// # Errors
    ///
    /// Returns error if the range exceeds local memory.
    pub fn read_local(&self, addr: u32, len: usize) -> Result<&[u8]> {
        let range = self.local_range(addr, len)?;
        Ok(&self.local[range])
    }

    /// Launch mailbox of a worker
    ///
    /// # Errors
    ///
    /// Returns error if the worker is not mapped.
    pub fn launch_message(&self, core: CoreCoord) -> Result<LaunchMessage> {
        let bytes = self.read_node(core_xy(core), LAUNCH_MAILBOX_ADDR, LaunchMessage::SIZE)?;
        let mut msg = [0u8; LaunchMessage::SIZE];
        msg.copy_from_slice(&bytes);
        Ok(LaunchMessage::from_bytes(msg))
    }

    /// Workers started but not yet reported
    pub fn pending_workers(&self) -> usize {
        self.pending.len()
    }

    /// Transfer counters
    pub const fn stats(&self) -> NocStats {
        self.stats
    }

    fn node_mut(&mut self, xy: u32) -> Result<&mut Node> {
        self.nodes.get_mut(&xy).ok_or_else(|| unmapped(xy))
    }

    fn local_range(&self, addr: u32, len: usize) -> Result<std::ops::Range<usize>> {
        let start = addr as usize;
        let end = start + len;
        if end > self.local.len() {
            error!("Local access [{start:#x}, {end:#x}) beyond L1 of {:#x}", self.local.len());
            return Err(GridError::transfer_failed(format!(
                "local [{start:#x}, {end:#x}) beyond L1"
            )));
        }
        Ok(start..end)
    }

    fn deliver(&mut self, xy: u32, addr: u32, bytes: &[u8]) -> Result<()> {
        self.node_mut(xy)?.write(xy, addr, bytes)?;
        self.stats.bytes_written += bytes.len() as u64;
        if addr == LAUNCH_MAILBOX_ADDR
            && bytes.len() >= LaunchMessage::SIZE
            && bytes[3] == run_msg::GO
            && self.workers.contains(&xy)
        {
            trace!("Worker {:?} started", noc_xy_decode(xy));
            self.pending.push_back(xy);
        }
        Ok(())
    }

    /// One pending worker finishes and reports
    fn retire_worker(&mut self) -> Result<()> {
        let Some(xy) = self.pending.pop_front() else {
            return Ok(());
        };
        self.node_mut(xy)?
            .write(xy, LAUNCH_MAILBOX_ADDR + 3, &[run_msg::DONE])?;
        let range = self.local_range(DISPATCH_MESSAGE_ADDR, 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.local[range.clone()]);
        let count = u32::from_le_bytes(word) + 1;
        self.local[range].copy_from_slice(&count.to_le_bytes());
        trace!("Worker {:?} done, counter {count}", noc_xy_decode(xy));
        Ok(())
    }
}

fn unmapped(xy: u32) -> GridError {
    error!("NoC node {:?} is not mapped", noc_xy_decode(xy));
    GridError::transfer_failed(format!("node {:?} not mapped", noc_xy_decode(xy)))
}

impl Noc for SoftwareNoc {
    fn async_read(&mut self, src: NocAddr, local_addr: u32, size: u32) -> Result<()> {
        let bytes = self.read_node(src.xy, src.addr, size as usize)?;
        let range = self.local_range(local_addr, bytes.len())?;
        self.local[range].copy_from_slice(&bytes);
        self.stats.reads += 1;
        self.stats.bytes_read += u64::from(size);
        Ok(())
    }

    fn async_write(&mut self, local_addr: u32, dst: NocAddr, size: u32) -> Result<()> {
        let bytes = self.read_local(local_addr, size as usize)?.to_vec();
        self.deliver(dst.xy, dst.addr, &bytes)?;
        self.stats.writes += 1;
        Ok(())
    }

    fn async_write_multicast(&mut self, local_addr: u32, dst: NocAddr, size: u32, num_dests: u32) -> Result<()> {
        let ((sx, sy), (ex, ey)) = noc_multicast_decode(dst.xy);
        if ex < sx || ey < sy {
            error!("Multicast rectangle ({sx}, {sy})-({ex}, {ey}) is inverted");
            return Err(GridError::transfer_failed(format!(
                "inverted multicast rectangle ({sx}, {sy})-({ex}, {ey})"
            )));
        }
        let area = (ex - sx + 1) * (ey - sy + 1);
        if area != num_dests {
            error!("Multicast to ({sx}, {sy})-({ex}, {ey}) covers {area} cores, caller expects {num_dests}");
            return Err(GridError::transfer_failed(format!(
                "multicast covers {area} cores, expected {num_dests}"
            )));
        }

        let bytes = self.read_local(local_addr, size as usize)?.to_vec();
        for y in sy..=ey {
            for x in sx..=ex {
                self.deliver(noc_xy_encoding(x, y), dst.addr, &bytes)?;
            }
        }
        debug!("Multicast {size} B to ({sx}, {sy})-({ex}, {ey}) at {:#x}", dst.addr);
        self.stats.multicasts += 1;
        Ok(())
    }

    fn async_read_barrier(&mut self) {
        self.stats.read_barriers += 1;
    }

    fn async_write_barrier(&mut self) {
        self.stats.write_barriers += 1;
    }

    fn read_local_u32(&mut self, addr: u32) -> u32 {
        if addr == DISPATCH_MESSAGE_ADDR {
            if let Err(e) = self.retire_worker() {
                error!("Worker could not report: {e}");
            }
        }
        self.read_local(addr, 4).map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn write_local(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let range = self.local_range(addr, data.len())?;
        self.local[range].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcore_chip::noc::noc_multicast_encoding;

    #[test]
    fn unwritten_memory_reads_zero() {
        let mut noc = SoftwareNoc::new();
        noc.add_dram_bank(noc_xy_encoding(1, 0));
        assert_eq!(noc.read_node(noc_xy_encoding(1, 0), 0x100, 4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn unmapped_node_rejected() {
        let mut noc = SoftwareNoc::new();
        assert!(noc.async_read(NocAddr::new(noc_xy_encoding(9, 9), 0), 0, 4).is_err());
    }

    #[test]
    fn read_then_write_moves_bytes() {
        let mut noc = SoftwareNoc::new();
        let bank = noc_xy_encoding(1, 0);
        noc.add_dram_bank(bank);
        noc.write_node(SoftwareNoc::host_xy(), 0x40, &[1, 2, 3, 4]).unwrap();

        noc.async_read(NocAddr::new(SoftwareNoc::host_xy(), 0x40), 0x2000, 4).unwrap();
        noc.async_write(0x2000, NocAddr::new(bank, 0x80), 4).unwrap();
        assert_eq!(noc.read_node(bank, 0x80, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(noc.stats().bytes_read, 4);
    }

    #[test]
    fn multicast_checks_receiver_count() {
        let mut noc = SoftwareNoc::new();
        for x in 1..=2 {
            for y in 1..=2 {
                noc.add_worker(CoreCoord::new(x, y));
            }
        }
        let rect = noc_multicast_encoding((1, 1), (2, 2));
        assert!(noc.async_write_multicast(0, NocAddr::new(rect, 0x100), 4, 3).is_err());
        noc.write_local(0, &[7; 4]).unwrap();
        noc.async_write_multicast(0, NocAddr::new(rect, 0x100), 4, 4).unwrap();
        assert_eq!(noc.read_node(noc_xy_encoding(2, 2), 0x100, 4).unwrap(), vec![7; 4]);
    }

    #[test]
    fn go_message_completes_one_worker_per_poll() {
        let mut noc = SoftwareNoc::new();
        noc.add_worker(CoreCoord::new(1, 1));
        noc.add_worker(CoreCoord::new(2, 1));
        noc.write_local(0x9020, &LaunchMessage::all_enabled().to_bytes()).unwrap();
        let rect = noc_multicast_encoding((1, 1), (2, 1));
        noc.async_write_multicast(0x9020, NocAddr::new(rect, LAUNCH_MAILBOX_ADDR), 4, 2)
            .unwrap();
        assert_eq!(noc.pending_workers(), 2);

        assert_eq!(noc.read_local_u32(DISPATCH_MESSAGE_ADDR), 1);
        assert_eq!(noc.launch_message(CoreCoord::new(1, 1)).unwrap().run, run_msg::DONE);
        assert_eq!(noc.launch_message(CoreCoord::new(2, 1)).unwrap().run, run_msg::GO);
        assert_eq!(noc.read_local_u32(DISPATCH_MESSAGE_ADDR), 2);
        assert_eq!(noc.read_local_u32(DISPATCH_MESSAGE_ADDR), 2);
    }

    #[test]
    fn node_capacity_enforced() {
        let mut noc = SoftwareNoc::new();
        noc.add_worker(CoreCoord::new(1, 1));
        let xy = core_xy(CoreCoord::new(1, 1));
        assert!(noc.write_node(xy, (L1_SIZE - 2) as u32, &[0; 4]).is_err());
    }
}
