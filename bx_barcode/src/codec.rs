//!
//! 2-bit packing of fixed-length barcode sequences.
//!
use crate::BC_LEN;
use serde::{Deserialize, Serialize};
use std::fmt;

pub(crate) const BASE_OPTS: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Number of low-order bits not covered by the jump table bucket.
const LOW_BITS: u32 = 8;

/// Returns true for the upper case bases A, C, G and T.
#[inline]
pub fn is_acgt(base: u8) -> bool {
    matches!(base, b'A' | b'C' | b'G' | b'T')
}

#[inline]
fn base_to_bits(base: u8) -> Option<u32> {
    match base {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// A barcode of exactly `BC_LEN` bases packed into a u32, two bits per base with the
/// first base in the most significant position. A=0, C=1, G=2, T=3.
///
/// The natural ordering of the packed value is the lexicographic ordering of the sequence.
#[derive(Serialize, Deserialize, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Debug)]
pub struct PackedBarcode(u32);

impl PackedBarcode {
    /// Pack a barcode that is known to contain only upper case ACGT.
    /// Panics otherwise; validate with `is_acgt` or use `try_encode` for untrusted input.
    pub fn encode(seq: &[u8; BC_LEN]) -> Self {
        let mut code = 0u32;
        for (i, &base) in seq.iter().enumerate() {
            let bits = base_to_bits(base)
                .unwrap_or_else(|| panic!("non-ACGT character {base} at position {i}"));
            code = (code << 2) | bits;
        }
        PackedBarcode(code)
    }

    /// Pack a barcode, returning None if it is not exactly `BC_LEN` upper case ACGT bases.
    pub fn try_encode(seq: &[u8]) -> Option<Self> {
        if seq.len() != BC_LEN {
            return None;
        }
        seq.iter()
            .try_fold(0u32, |code, &base| Some((code << 2) | base_to_bits(base)?))
            .map(PackedBarcode)
    }

    pub fn from_code(code: u32) -> Self {
        PackedBarcode(code)
    }

    pub fn code(self) -> u32 {
        self.0
    }

    /// The high 24 bits of the packed code, used to index the jump table.
    #[inline]
    pub fn high24(self) -> usize {
        (self.0 >> LOW_BITS) as usize
    }

    pub fn decode(self) -> [u8; BC_LEN] {
        let mut seq = [b'A'; BC_LEN];
        for (i, base) in seq.iter_mut().enumerate() {
            let shift = 2 * (BC_LEN - 1 - i);
            *base = BASE_OPTS[((self.0 >> shift) & 0b11) as usize];
        }
        seq
    }
}

impl fmt::Display for PackedBarcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seq = self.decode();
        // Always ASCII by construction
        f.write_str(std::str::from_utf8(&seq).map_err(|_| fmt::Error)?)
    }
}

/// Upper-case and pack the first `BC_LEN` bases of a read.
/// Returns None if the read is too short or any of those bases is not A, C, G or T.
pub fn leading_barcode(seq: &[u8]) -> Option<PackedBarcode> {
    let mut bc = [0u8; BC_LEN];
    bc.copy_from_slice(seq.get(..BC_LEN)?);
    bc.make_ascii_uppercase();
    PackedBarcode::try_encode(&bc)
}
