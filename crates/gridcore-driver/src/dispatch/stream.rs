// SPDX-License-Identifier: AGPL-3.0-only

//! Forward-only decoding of the command stream

use gridcore_chip::command::{
    header, BankKind, BufferTransfer, DeviceCommand, LaunchGroup, ProgramRelay, RelayWrite, HEADER_WORDS,
};

use crate::error::{GridError, Result};

/// Cursor over command words; never moves backward
#[derive(Debug)]
pub struct CommandReader<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> CommandReader<'a> {
    /// Reader at word 0
    pub const fn new(words: &'a [u32]) -> Self {
        Self { words, pos: 0 }
    }

    /// Word offset of the next read
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Words left
    pub const fn remaining(&self) -> usize {
        self.words.len() - self.pos
    }

    /// Consume `n` words
    ///
    /// # Errors
    ///
    /// Returns `MalformedCommand` if fewer than `n` words remain.
    pub fn take(&mut self, n: usize, what: &str) -> Result<&'a [u32]> {
        let Some(slice) = self.words.get(self.pos..self.pos + n) else {
            tracing::error!(
                "Command truncated at word {}: {what} needs {n} words, {} left",
                self.pos,
                self.remaining()
            );
            return Err(GridError::malformed(
                self.pos,
                format!("{what} needs {n} words, {} left", self.remaining()),
            ));
        };
        self.pos += n;
        Ok(slice)
    }

    /// Consume a fixed-size record
    ///
    /// # Errors
    ///
    /// Returns `MalformedCommand` if fewer than `N` words remain.
    pub fn take_array<const N: usize>(&mut self, what: &str) -> Result<[u32; N]> {
        let slice = self.take(N, what)?;
        let mut out = [0u32; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}

/// Decoded header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    /// Signal the host at the end
    pub finish: bool,
    /// Workers the launch barrier waits for
    pub num_workers: u32,
    /// Launch groups
    pub num_multicast_groups: u32,
    /// Buffer-write records
    pub num_buffer_writes: u32,
    /// Buffer-read records
    pub num_buffer_reads: u32,
    /// Program-relay records
    pub num_program_relays: u32,
    /// Inline data bytes
    pub data_size: u32,
}

impl CommandHeader {
    /// Read the header
    ///
    /// # Errors
    ///
    /// Returns `MalformedCommand` if the stream is shorter than a header.
    pub fn read(reader: &mut CommandReader<'_>) -> Result<Self> {
        let w: [u32; HEADER_WORDS] = reader.take_array("header")?;
        Ok(Self {
            finish: w[header::FINISH] != 0,
            num_workers: w[header::NUM_WORKERS],
            num_multicast_groups: w[header::NUM_MULTICAST_GROUPS],
            num_buffer_writes: w[header::NUM_BUFFER_WRITES],
            num_buffer_reads: w[header::NUM_BUFFER_READS],
            num_program_relays: w[header::NUM_PROGRAM_RELAYS],
            data_size: w[header::DATA_SIZE],
        })
    }
}

/// Read one buffer-transfer record
///
/// # Errors
///
/// Returns `MalformedCommand` on truncation or an unknown bank kind.
pub fn read_buffer_transfer(reader: &mut CommandReader<'_>) -> Result<BufferTransfer> {
    let kind_offset = reader.position() + 7;
    let w: [u32; 8] = reader.take_array("buffer transfer")?;
    let bank_kind = BankKind::from_word(w[7]).ok_or_else(|| {
        tracing::error!("Unknown bank kind {} at word {kind_offset}", w[7]);
        GridError::malformed(kind_offset, format!("unknown bank kind {}", w[7]))
    })?;
    Ok(BufferTransfer {
        remote_addr: w[0],
        remote_noc: w[1],
        bank_base_addr: w[2],
        padded_buf_size: w[3],
        burst_size: w[4],
        page_size: w[5],
        padded_page_size: w[6],
        bank_kind,
    })
}

/// Read one program-relay header and its writes
///
/// # Errors
///
/// Returns `MalformedCommand` on truncation.
pub fn read_program_relay(reader: &mut CommandReader<'_>) -> Result<ProgramRelay> {
    let [src, src_noc, transfer_size, num_writes] = reader.take_array("program relay")?;
    let writes = (0..num_writes)
        .map(|_| {
            let [src, dst, dst_noc, transfer_size, num_receivers] = reader.take_array("relay write")?;
            Ok(RelayWrite {
                src,
                dst,
                dst_noc,
                transfer_size,
                num_receivers,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ProgramRelay {
        src,
        src_noc,
        transfer_size,
        writes,
    })
}

/// Read one launch group
///
/// # Errors
///
/// Returns `MalformedCommand` on truncation.
pub fn read_launch_group(reader: &mut CommandReader<'_>) -> Result<LaunchGroup> {
    let [dst_noc, num_receivers] = reader.take_array("launch group")?;
    Ok(LaunchGroup { dst_noc, num_receivers })
}

/// Decode a whole command without executing it
///
/// # Errors
///
/// Returns `MalformedCommand` on truncation, unknown bank kinds or
/// trailing words.
pub fn decode(words: &[u32]) -> Result<DeviceCommand> {
    let mut reader = CommandReader::new(words);
    let head = CommandHeader::read(&mut reader)?;

    let buffer_writes = (0..head.num_buffer_writes)
        .map(|_| read_buffer_transfer(&mut reader))
        .collect::<Result<Vec<_>>>()?;
    let buffer_reads = (0..head.num_buffer_reads)
        .map(|_| read_buffer_transfer(&mut reader))
        .collect::<Result<Vec<_>>>()?;
    let program_relays = (0..head.num_program_relays)
        .map(|_| read_program_relay(&mut reader))
        .collect::<Result<Vec<_>>>()?;
    let launch_groups = (0..head.num_multicast_groups)
        .map(|_| read_launch_group(&mut reader))
        .collect::<Result<Vec<_>>>()?;

    if reader.remaining() != 0 {
        return Err(GridError::malformed(
            reader.position(),
            format!("{} trailing words", reader.remaining()),
        ));
    }

    Ok(DeviceCommand {
        finish: head.finish,
        num_workers: head.num_workers,
        data_size: head.data_size,
        buffer_writes,
        buffer_reads,
        program_relays,
        launch_groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeviceCommand {
        DeviceCommand {
            finish: true,
            num_workers: 4,
            data_size: 4096,
            buffer_writes: vec![BufferTransfer {
                remote_addr: 0x100,
                remote_noc: 3,
                bank_base_addr: 0x2000,
                padded_buf_size: 4096,
                burst_size: 2048,
                page_size: 1024,
                padded_page_size: 1024,
                bank_kind: BankKind::Interleaved,
            }],
            program_relays: vec![ProgramRelay {
                src: 0x400,
                src_noc: 3,
                transfer_size: 64,
                writes: vec![RelayWrite {
                    src: 0x1E000,
                    dst: 0x3000,
                    dst_noc: 0x41041,
                    transfer_size: 64,
                    num_receivers: 4,
                }],
            }],
            launch_groups: vec![LaunchGroup {
                dst_noc: 0x41041,
                num_receivers: 4,
            }],
            ..DeviceCommand::default()
        }
    }

    #[test]
    fn decode_inverts_encode() {
        let cmd = sample();
        assert_eq!(decode(&cmd.encode()).unwrap(), cmd);
    }

    #[test]
    fn truncation_names_offset() {
        let words = sample().encode();
        let err = decode(&words[..HEADER_WORDS + 3]).unwrap_err();
        assert!(matches!(err, GridError::MalformedCommand { offset, .. } if offset == HEADER_WORDS));
    }

    #[test]
    fn unknown_bank_kind_rejected() {
        let mut words = sample().encode();
        words[HEADER_WORDS + 7] = 9;
        let err = decode(&words).unwrap_err();
        assert!(matches!(err, GridError::MalformedCommand { offset, .. } if offset == HEADER_WORDS + 7));
    }

    #[test]
    fn trailing_words_rejected() {
        let mut words = sample().encode();
        words.push(0);
        assert!(decode(&words).is_err());
    }

    #[test]
    fn reader_only_moves_forward() {
        let words = [1, 2, 3];
        let mut reader = CommandReader::new(&words);
        assert_eq!(reader.take(2, "pair").unwrap(), &[1, 2]);
        assert_eq!(reader.position(), 2);
        assert!(reader.take(2, "pair").is_err());
        assert_eq!(reader.position(), 2);
    }
}
