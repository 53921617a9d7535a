// SPDX-License-Identifier: AGPL-3.0-only

//! Dispatch command stream wire format.
//!
//! One command is a linear run of 32-bit words consumed strictly in order by
//! the dispatch firmware. There are no backward references and no version
//! field.
//!
//! ```text
//! ┌──────────────────────── header (8 words) ───────────────────────┐
//! │ finish │ num_workers │ num_mcast │ n_writes │ n_reads │ n_relays │ data_size │ 0 │
//! └─────────────────────────────────────────────────────────────────┘
//! buffer write  × n_writes   8 words  remote_addr remote_noc bank_base padded_size
//!                                     burst_size page_size padded_page_size bank_kind
//! buffer read   × n_reads    8 words  (same layout, remote side is the destination)
//! program relay × n_relays   4 words  src src_noc transfer_size num_writes
//!                          + 5 words  src dst dst_noc transfer_size num_receivers  (× num_writes)
//! launch group  × n_mcast    2 words  dst_noc (multicast encoding) num_receivers
//! ```

/// Word offsets inside the header.
pub mod header {
    /// Non-zero: signal the host when the command completes.
    pub const FINISH: usize = 0;
    /// Worker cores the launch barrier waits for.
    pub const NUM_WORKERS: usize = 1;
    /// Launch multicast groups that follow the relays.
    pub const NUM_MULTICAST_GROUPS: usize = 2;
    /// Buffer-write records.
    pub const NUM_BUFFER_WRITES: usize = 3;
    /// Buffer-read records.
    pub const NUM_BUFFER_READS: usize = 4;
    /// Program-relay records.
    pub const NUM_PROGRAM_RELAYS: usize = 5;
    /// Bytes of inline data that trail the command in host memory.
    pub const DATA_SIZE: usize = 6;
}

/// Header length in words.
pub const HEADER_WORDS: usize = 8;
/// Buffer write / read record length in words.
pub const BUFFER_TRANSFER_WORDS: usize = 8;
/// Fixed part of a program relay in words.
pub const RELAY_HEADER_WORDS: usize = 4;
/// One multicast sub-write of a relay in words.
pub const RELAY_WRITE_WORDS: usize = 5;
/// One launch group in words.
pub const LAUNCH_GROUP_WORDS: usize = 2;

/// Which bank address generator a transfer pages through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BankKind {
    /// Pages striped round-robin across the DRAM bank set.
    Interleaved = 0,
    /// Pages placed across the L1 banks of worker cores.
    Local = 1,
}

impl BankKind {
    /// Decode a wire word.
    #[must_use]
    pub const fn from_word(word: u32) -> Option<Self> {
        match word {
            0 => Some(Self::Interleaved),
            1 => Some(Self::Local),
            _ => None,
        }
    }
}

/// Paged transfer between a remote linear region and a bank set.
///
/// For writes the remote region is the source; for reads it is the
/// destination. The layout is identical either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTransfer {
    /// Linear address on the remote node (host or another core).
    pub remote_addr: u32,
    /// Remote node, unicast encoding.
    pub remote_noc: u32,
    /// Base address inside every bank.
    pub bank_base_addr: u32,
    /// Total bytes, a whole number of padded pages.
    pub padded_buf_size: u32,
    /// Bytes staged per burst.
    pub burst_size: u32,
    /// Logical bytes per page.
    pub page_size: u32,
    /// Bank-aligned bytes per page.
    pub padded_page_size: u32,
    /// Bank set.
    pub bank_kind: BankKind,
}

impl BufferTransfer {
    fn encode_into(&self, words: &mut Vec<u32>) {
        words.extend_from_slice(&[
            self.remote_addr,
            self.remote_noc,
            self.bank_base_addr,
            self.padded_buf_size,
            self.burst_size,
            self.page_size,
            self.padded_page_size,
            self.bank_kind as u32,
        ]);
    }
}

/// One multicast fan-out of a staged program section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayWrite {
    /// Source address inside the dispatcher's staging region.
    pub src: u32,
    /// Destination address on every receiver.
    pub dst: u32,
    /// Receivers, multicast encoding.
    pub dst_noc: u32,
    /// Bytes to send.
    pub transfer_size: u32,
    /// Cores covered by `dst_noc`.
    pub num_receivers: u32,
}

/// A contiguous program section and the multicasts that distribute it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRelay {
    /// Section address on the source node.
    pub src: u32,
    /// Source node, unicast encoding.
    pub src_noc: u32,
    /// Section length in bytes.
    pub transfer_size: u32,
    /// Fan-out writes.
    pub writes: Vec<RelayWrite>,
}

/// One launch multicast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGroup {
    /// Worker rectangle, multicast encoding.
    pub dst_noc: u32,
    /// Workers in the rectangle.
    pub num_receivers: u32,
}

/// One complete dispatch command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCommand {
    /// Push the finish flag to the host after everything else.
    pub finish: bool,
    /// Workers that must report back before the launch returns.
    pub num_workers: u32,
    /// Inline data bytes trailing the command in host memory.
    pub data_size: u32,
    /// Host → bank transfers.
    pub buffer_writes: Vec<BufferTransfer>,
    /// Bank → host transfers.
    pub buffer_reads: Vec<BufferTransfer>,
    /// Program sections to relay to workers.
    pub program_relays: Vec<ProgramRelay>,
    /// Launch multicasts.
    pub launch_groups: Vec<LaunchGroup>,
}

impl DeviceCommand {
    /// Encoded length in words.
    #[must_use]
    pub fn word_count(&self) -> usize {
        HEADER_WORDS
            + BUFFER_TRANSFER_WORDS * (self.buffer_writes.len() + self.buffer_reads.len())
            + self
                .program_relays
                .iter()
                .map(|r| RELAY_HEADER_WORDS + RELAY_WRITE_WORDS * r.writes.len())
                .sum::<usize>()
            + LAUNCH_GROUP_WORDS * self.launch_groups.len()
    }

    /// Encode to wire words.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Vec<u32> {
        let mut words = Vec::with_capacity(self.word_count());
        let mut head = [0u32; HEADER_WORDS];
        head[header::FINISH] = u32::from(self.finish);
        head[header::NUM_WORKERS] = self.num_workers;
        head[header::NUM_MULTICAST_GROUPS] = self.launch_groups.len() as u32;
        head[header::NUM_BUFFER_WRITES] = self.buffer_writes.len() as u32;
        head[header::NUM_BUFFER_READS] = self.buffer_reads.len() as u32;
        head[header::NUM_PROGRAM_RELAYS] = self.program_relays.len() as u32;
        head[header::DATA_SIZE] = self.data_size;
        words.extend_from_slice(&head);

        for transfer in self.buffer_writes.iter().chain(&self.buffer_reads) {
            transfer.encode_into(&mut words);
        }
        for relay in &self.program_relays {
            words.extend_from_slice(&[relay.src, relay.src_noc, relay.transfer_size, relay.writes.len() as u32]);
            for w in &relay.writes {
                words.extend_from_slice(&[w.src, w.dst, w.dst_noc, w.transfer_size, w.num_receivers]);
            }
        }
        for group in &self.launch_groups {
            words.extend_from_slice(&[group.dst_noc, group.num_receivers]);
        }
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_counts_match_records() {
        let cmd = DeviceCommand {
            finish: true,
            num_workers: 8,
            launch_groups: vec![
                LaunchGroup { dst_noc: 1, num_receivers: 3 },
                LaunchGroup { dst_noc: 2, num_receivers: 5 },
            ],
            ..DeviceCommand::default()
        };
        let words = cmd.encode();
        assert_eq!(words.len(), cmd.word_count());
        assert_eq!(words[header::FINISH], 1);
        assert_eq!(words[header::NUM_WORKERS], 8);
        assert_eq!(words[header::NUM_MULTICAST_GROUPS], 2);
        assert_eq!(&words[HEADER_WORDS..], &[1, 3, 2, 5]);
    }

    #[test]
    fn relay_writes_follow_relay_header() {
        let cmd = DeviceCommand {
            program_relays: vec![ProgramRelay {
                src: 0x100,
                src_noc: 7,
                transfer_size: 64,
                writes: vec![RelayWrite { src: 0x1E000, dst: 0x2000, dst_noc: 9, transfer_size: 64, num_receivers: 4 }],
            }],
            ..DeviceCommand::default()
        };
        let words = cmd.encode();
        assert_eq!(words.len(), HEADER_WORDS + RELAY_HEADER_WORDS + RELAY_WRITE_WORDS);
        assert_eq!(&words[HEADER_WORDS..HEADER_WORDS + 4], &[0x100, 7, 64, 1]);
    }

    #[test]
    fn bank_kind_words() {
        assert_eq!(BankKind::from_word(0), Some(BankKind::Interleaved));
        assert_eq!(BankKind::from_word(1), Some(BankKind::Local));
        assert_eq!(BankKind::from_word(2), None);
    }
}
