// SPDX-License-Identifier: AGPL-3.0-only

//! NoC coordinate encoding.
//!
//! A NoC address is 64 bits: the destination node in the upper word and the
//! L1 (or bank) address in the lower word. Unicast nodes use a 12-bit
//! `(y << 6) | x` encoding; multicast destinations pack a start and end
//! corner into 24 bits.

use crate::coord::{CoreCoord, CoreRange};

/// Bits per coordinate component.
pub const NOC_ADDR_NODE_ID_BITS: u32 = 6;

const NODE_MASK: u32 = (1 << NOC_ADDR_NODE_ID_BITS) - 1;

/// Unicast node encoding.
#[must_use]
pub const fn noc_xy_encoding(x: u32, y: u32) -> u32 {
    ((y & NODE_MASK) << NOC_ADDR_NODE_ID_BITS) | (x & NODE_MASK)
}

/// Inverse of [`noc_xy_encoding`].
#[must_use]
pub const fn noc_xy_decode(xy: u32) -> (u32, u32) {
    (xy & NODE_MASK, (xy >> NOC_ADDR_NODE_ID_BITS) & NODE_MASK)
}

/// Multicast rectangle encoding (`start` and `end` inclusive).
#[must_use]
pub const fn noc_multicast_encoding(start: (u32, u32), end: (u32, u32)) -> u32 {
    ((end.1 & NODE_MASK) << (3 * NOC_ADDR_NODE_ID_BITS))
        | ((end.0 & NODE_MASK) << (2 * NOC_ADDR_NODE_ID_BITS))
        | ((start.1 & NODE_MASK) << NOC_ADDR_NODE_ID_BITS)
        | (start.0 & NODE_MASK)
}

/// Inverse of [`noc_multicast_encoding`]: `(start, end)`.
#[must_use]
pub const fn noc_multicast_decode(encoded: u32) -> ((u32, u32), (u32, u32)) {
    let s = NOC_ADDR_NODE_ID_BITS;
    (
        (encoded & NODE_MASK, (encoded >> s) & NODE_MASK),
        ((encoded >> (2 * s)) & NODE_MASK, (encoded >> (3 * s)) & NODE_MASK),
    )
}

#[allow(clippy::cast_possible_truncation)]
const fn component(v: usize) -> u32 {
    (v as u32) & NODE_MASK
}

/// Unicast encoding of a NoC-space core.
#[must_use]
pub const fn core_xy(core: CoreCoord) -> u32 {
    noc_xy_encoding(component(core.x), component(core.y))
}

/// Multicast encoding of a NoC-space rectangle.
#[must_use]
pub const fn range_multicast(range: CoreRange) -> u32 {
    noc_multicast_encoding(
        (component(range.start.x), component(range.start.y)),
        (component(range.end.x), component(range.end.y)),
    )
}

/// Node plus local address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NocAddr {
    /// Node encoding (unicast or multicast depending on the operation).
    pub xy: u32,
    /// Address on the node.
    pub addr: u32,
}

impl NocAddr {
    /// Combine a node and an address.
    #[must_use]
    pub const fn new(xy: u32, addr: u32) -> Self {
        Self { xy, addr }
    }

    /// `(xy << 32) | addr`.
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        ((self.xy as u64) << 32) | self.addr as u64
    }

    /// Split a packed address.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_u64(packed: u64) -> Self {
        Self {
            xy: (packed >> 32) as u32,
            addr: packed as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicast_encoding_inverts() {
        assert_eq!(noc_xy_decode(noc_xy_encoding(7, 11)), (7, 11));
        assert_eq!(core_xy(CoreCoord::new(1, 2)), (2 << 6) | 1);
    }

    #[test]
    fn multicast_encoding_inverts() {
        let enc = noc_multicast_encoding((1, 2), (5, 9));
        assert_eq!(noc_multicast_decode(enc), ((1, 2), (5, 9)));
    }

    #[test]
    fn packed_address_layout() {
        let a = NocAddr::new(0x41, 0x1234);
        assert_eq!(a.to_u64(), 0x0000_0041_0000_1234);
        assert_eq!(NocAddr::from_u64(a.to_u64()), a);
    }
}
