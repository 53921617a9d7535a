// SPDX-License-Identifier: AGPL-3.0-only

//! NoC primitives seen from the dispatch core

use gridcore_chip::noc::NocAddr;

use crate::error::{GridError, Result};

/// Asynchronous transfers and local memory of the dispatch core
///
/// Transfers are only guaranteed complete after the matching barrier.
pub trait Noc {
    /// Copy `size` bytes from `src` into local memory at `local_addr`
    ///
    /// # Errors
    ///
    /// Returns error if either side is not mapped.
    fn async_read(&mut self, src: NocAddr, local_addr: u32, size: u32) -> Result<()>;

    /// Copy `size` bytes from local memory at `local_addr` to `dst`
    ///
    /// # Errors
    ///
    /// Returns error if either side is not mapped.
    fn async_write(&mut self, local_addr: u32, dst: NocAddr, size: u32) -> Result<()>;

    /// Copy `size` bytes to every core of the rectangle in `dst.xy`
    ///
    /// # Errors
    ///
    /// Returns error if `num_dests` does not match the rectangle or a
    /// receiver is not mapped.
    fn async_write_multicast(&mut self, local_addr: u32, dst: NocAddr, size: u32, num_dests: u32) -> Result<()>;

    /// Wait for outstanding reads
    fn async_read_barrier(&mut self);

    /// Wait for outstanding writes
    fn async_write_barrier(&mut self);

    /// Volatile read of a local word
    fn read_local_u32(&mut self, addr: u32) -> u32;

    /// Store bytes into local memory
    ///
    /// # Errors
    ///
    /// Returns error if the range is not mapped.
    fn write_local(&mut self, addr: u32, data: &[u8]) -> Result<()>;
}

/// One bank of an interleaved bank set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankDescriptor {
    /// Bank node, unicast encoding
    pub noc_xy: u32,
    /// Added to every address on this bank
    pub offset: u32,
}

/// Page-to-bank address generator
///
/// Page `p` lives on bank `p % n` at
/// `offset + bank_base_address + (p / n) * page_size`.
#[derive(Debug, Clone, Copy)]
pub struct InterleavedAddrGen<'a> {
    banks: &'a [BankDescriptor],
    /// Buffer base address, identical on every bank
    pub bank_base_address: u32,
    /// Padded page size
    pub page_size: u32,
}

impl<'a> InterleavedAddrGen<'a> {
    /// Generator over `banks`
    ///
    /// # Errors
    ///
    /// Returns error if `banks` is empty.
    pub fn new(banks: &'a [BankDescriptor], bank_base_address: u32, page_size: u32) -> Result<Self> {
        if banks.is_empty() {
            tracing::error!("Interleaved address generator needs at least one bank");
            return Err(GridError::transfer_failed("empty bank set"));
        }
        Ok(Self {
            banks,
            bank_base_address,
            page_size,
        })
    }

    /// Banks in the set
    pub fn num_banks(&self) -> usize {
        self.banks.len()
    }

    /// NoC address of page `page`, `None` if it leaves the 32-bit address space
    #[allow(clippy::cast_possible_truncation)]
    pub fn get_noc_addr(&self, page: u32) -> Option<NocAddr> {
        let n = self.banks.len() as u32;
        let bank = self.banks[(page % n) as usize];
        let addr = (page / n)
            .checked_mul(self.page_size)?
            .checked_add(self.bank_base_address)?
            .checked_add(bank.offset)?;
        Some(NocAddr::new(bank.noc_xy, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banks() -> Vec<BankDescriptor> {
        (0..4).map(|i| BankDescriptor { noc_xy: 10 + i, offset: 0 }).collect()
    }

    #[test]
    fn pages_stripe_across_banks() {
        let banks = banks();
        let gen = InterleavedAddrGen::new(&banks, 0x1000, 2048).unwrap();
        assert_eq!(gen.get_noc_addr(0), Some(NocAddr::new(10, 0x1000)));
        assert_eq!(gen.get_noc_addr(3), Some(NocAddr::new(13, 0x1000)));
        assert_eq!(gen.get_noc_addr(4), Some(NocAddr::new(10, 0x1000 + 2048)));
        assert_eq!(gen.get_noc_addr(9), Some(NocAddr::new(11, 0x1000 + 2 * 2048)));
    }

    #[test]
    fn bank_offset_applies() {
        let banks = [BankDescriptor { noc_xy: 1, offset: 0x40 }];
        let gen = InterleavedAddrGen::new(&banks, 0x100, 32).unwrap();
        assert_eq!(gen.get_noc_addr(2), Some(NocAddr::new(1, 0x40 + 0x100 + 64)));
    }

    #[test]
    fn address_overflow_is_none() {
        let banks = banks();
        let gen = InterleavedAddrGen::new(&banks, 0xFFFF_F000, 4096).unwrap();
        assert_eq!(gen.get_noc_addr(3), Some(NocAddr::new(13, 0xFFFF_F000)));
        assert_eq!(gen.get_noc_addr(4), None);

        let huge = InterleavedAddrGen::new(&banks, 0, 0x8000_0000).unwrap();
        assert_eq!(huge.get_noc_addr(8), None);
    }

    #[test]
    fn empty_bank_set_rejected() {
        assert!(InterleavedAddrGen::new(&[], 0, 32).is_err());
    }
}
