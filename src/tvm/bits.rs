//! Fixed-capacity bit buffer
//!
//! `BitString` is the storage behind every cell: a big-endian sequence of bits
//! with a write cursor that can never move past the capacity chosen at
//! construction. Bits past the cursor are always zero, so two buffers can be
//! compared byte by byte once their lengths match.

use crate::tvm::cell::MAX_CELL_BITS;
use crate::tvm::error::{CellError, Result};
use num_bigint::BigUint;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Clone)]
pub struct BitString {
    data: Vec<u8>,
    len: usize,
    capacity: usize,
}

impl BitString {
    /// Creates an empty buffer that accepts at most `capacity` bits
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.div_ceil(8)),
            len: 0,
            capacity,
        }
    }

    /// Creates a cell-sized buffer holding the first `bit_len` bits of `bytes`
    pub fn from_bytes(bytes: &[u8], bit_len: usize) -> Result<Self> {
        let mut bits = Self::default();
        bits.write_bits(bytes, bit_len)?;
        Ok(bits)
    }

    /// Restores a buffer from its padded byte form.
    ///
    /// When `tagged` is set the last byte carries a completion tag (one set bit
    /// followed by zeros) which is stripped.
    pub fn from_padded_bytes(bytes: &[u8], tagged: bool) -> Result<Self> {
        if !tagged {
            return Self::from_bytes(bytes, bytes.len() * 8);
        }
        let last = match bytes.last() {
            Some(&b) if b != 0 => b,
            _ => {
                return Err(CellError::InvalidEncoding(
                    "missing completion tag".to_string(),
                ));
            }
        };
        let bit_len = bytes.len() * 8 - last.trailing_zeros() as usize - 1;
        Self::from_bytes(bytes, bit_len)
    }

    /// Parses the fift hex form produced by [`BitString::to_fift_hex`]
    pub fn from_fift_hex(src: &str) -> Result<Self> {
        let (digits, tagged) = match src.strip_suffix('_') {
            Some(rest) => (rest, true),
            None => (src, false),
        };

        let mut nibbles = Vec::with_capacity(digits.len());
        for c in digits.chars() {
            let n = c
                .to_digit(16)
                .ok_or_else(|| CellError::InvalidEncoding(format!("invalid hex digit {c:?}")))?;
            nibbles.push(n as u8);
        }

        let mut bit_len = nibbles.len() * 4;
        if tagged {
            let mut found = false;
            while bit_len > 0 {
                bit_len -= 1;
                if (nibbles[bit_len / 4] >> (3 - bit_len % 4)) & 1 == 1 {
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(CellError::InvalidEncoding(
                    "missing completion tag".to_string(),
                ));
            }
        }

        let mut bytes = vec![0u8; nibbles.len().div_ceil(2)];
        for (i, n) in nibbles.iter().enumerate() {
            bytes[i / 2] |= if i % 2 == 0 { n << 4 } else { *n };
        }
        Self::from_bytes(&bytes, bit_len)
    }

    /// Number of bits written so far
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bits that can still be written
    pub fn available(&self) -> usize {
        self.capacity - self.len
    }

    /// Raw storage, `ceil(len / 8)` bytes with unused low bits zeroed
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the bit at `index`, or `None` past the write cursor
    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.len {
            return None;
        }
        Some((self.data[index / 8] >> (7 - index % 8)) & 1 == 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| (self.data[i / 8] >> (7 - i % 8)) & 1 == 1)
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.len % 8 == 0
    }

    /// Number of zero bits needed to reach the next byte boundary
    pub fn padding_bits(&self) -> usize {
        (8 - self.len % 8) % 8
    }

    fn ensure(&self, bits: usize) -> Result<()> {
        if bits > self.available() {
            return Err(CellError::BitOverflow {
                requested: bits,
                available: self.available(),
            });
        }
        Ok(())
    }

    fn push_bit(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            self.data[self.len / 8] |= 1 << (7 - self.len % 8);
        }
        self.len += 1;
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<&mut Self> {
        self.ensure(1)?;
        self.push_bit(bit);
        Ok(self)
    }

    /// Appends the first `bit_len` bits of `bits`
    pub fn write_bits(&mut self, bits: &[u8], bit_len: usize) -> Result<&mut Self> {
        if bits.len() * 8 < bit_len {
            return Err(CellError::InvalidArgument(format!(
                "{} bytes cannot hold {} bits",
                bits.len(),
                bit_len
            )));
        }
        self.ensure(bit_len)?;

        if self.is_byte_aligned() {
            let full = bit_len / 8;
            self.data.extend_from_slice(&bits[..full]);
            self.len += full * 8;
            for i in full * 8..bit_len {
                self.push_bit((bits[i / 8] >> (7 - i % 8)) & 1 == 1);
            }
        } else {
            for i in 0..bit_len {
                self.push_bit((bits[i / 8] >> (7 - i % 8)) & 1 == 1);
            }
        }
        Ok(self)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        self.write_bits(bytes, bytes.len() * 8)
    }

    /// Appends the whole content of another buffer
    pub fn write_bit_string(&mut self, other: &BitString) -> Result<&mut Self> {
        self.write_bits(&other.data, other.len)
    }

    /// Appends the low `bits` bits of `value`, most significant first
    pub fn write_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self> {
        if bits > 64 || (bits < 64 && value >> bits != 0) {
            return Err(CellError::InvalidArgument(format!(
                "value {value} does not fit in {bits} bits"
            )));
        }
        self.ensure(bits)?;
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
        Ok(self)
    }

    /// Appends `value` in two's complement using `bits` bits
    pub fn write_int(&mut self, value: i64, bits: usize) -> Result<&mut Self> {
        let fits = match bits {
            0 => value == 0,
            1..=63 => {
                let bound = 1i64 << (bits - 1);
                (-bound..bound).contains(&value)
            }
            64 => true,
            _ => false,
        };
        if !fits {
            return Err(CellError::InvalidArgument(format!(
                "value {value} does not fit in {bits} signed bits"
            )));
        }
        let unsigned = if bits == 64 {
            value as u64
        } else {
            (value as u64) & ((1u64 << bits) - 1)
        };
        self.write_uint(unsigned, bits)
    }

    /// Appends an arbitrary-width unsigned integer
    pub fn write_biguint(&mut self, value: &BigUint, bits: usize) -> Result<&mut Self> {
        if value.bits() > bits as u64 {
            return Err(CellError::InvalidArgument(format!(
                "value {value} does not fit in {bits} bits"
            )));
        }
        self.ensure(bits)?;
        for i in (0..bits as u64).rev() {
            self.push_bit(value.bit(i));
        }
        Ok(self)
    }

    /// Byte form with a completion tag when the length is not byte aligned
    pub fn padded_bytes(&self) -> Vec<u8> {
        let mut result = self.data.clone();
        if !self.is_byte_aligned() {
            result[self.len / 8] |= 1 << (7 - self.len % 8);
        }
        result
    }

    /// Hex rendering in fift notation.
    ///
    /// Lengths that are not a multiple of four get a set bit plus zero fill up
    /// to the next nibble and a trailing `_`, so the exact length survives.
    pub fn to_fift_hex(&self) -> String {
        if self.len % 4 == 0 {
            let mut s = hex::encode_upper(&self.data);
            if self.len % 8 != 0 {
                s.pop();
            }
            return s;
        }
        let mut s = hex::encode_upper(self.padded_bytes());
        s.truncate((self.len + 1).div_ceil(4));
        s.push('_');
        s
    }
}

impl Default for BitString {
    fn default() -> Self {
        Self::new(MAX_CELL_BITS)
    }
}

impl PartialEq for BitString {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.data == other.data
    }
}

impl Eq for BitString {}

impl Hash for BitString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len.hash(state);
        self.data.hash(state);
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fift_hex())
    }
}

impl fmt::Debug for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitString({}, x{{{}}})", self.len, self.to_fift_hex())
    }
}
