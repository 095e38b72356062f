//! Slice implementation for reading data from cells
//!
//! A Slice provides a way to read data from a Cell sequentially,
//! tracking the current position in both bits and references.

use crate::tvm::bits::BitString;
use crate::tvm::cell::Cell;
use crate::tvm::error::{CellError, Result};
use num_bigint::BigUint;
use std::sync::Arc;

/// A read cursor over an ordinary cell
#[derive(Debug, Clone)]
pub struct Slice<'a> {
    cell: &'a Cell,
    bit_pos: usize,
    ref_pos: usize,
}

impl<'a> Slice<'a> {
    pub(crate) fn new(cell: &'a Cell) -> Self {
        Self {
            cell,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    /// Returns the number of remaining bits
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len() - self.bit_pos
    }

    /// Returns the number of remaining references
    pub fn remaining_refs(&self) -> usize {
        self.cell.reference_count() - self.ref_pos
    }

    /// True once every bit and reference has been consumed
    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0 && self.remaining_refs() == 0
    }

    fn ensure_bits(&self, n: usize) -> Result<()> {
        if n > self.remaining_bits() {
            return Err(CellError::BitUnderflow {
                requested: n,
                remaining: self.remaining_bits(),
            });
        }
        Ok(())
    }

    fn bit_at(&self, pos: usize) -> bool {
        (self.cell.data()[pos / 8] >> (7 - pos % 8)) & 1 == 1
    }

    pub fn load_bit(&mut self) -> Result<bool> {
        self.ensure_bits(1)?;
        let bit = self.bit_at(self.bit_pos);
        self.bit_pos += 1;
        Ok(bit)
    }

    /// Loads the next `n` bits
    pub fn load_bits(&mut self, n: usize) -> Result<BitString> {
        self.ensure_bits(n)?;
        let mut bits = BitString::new(n);
        if self.bit_pos % 8 == 0 {
            let start = self.bit_pos / 8;
            bits.write_bits(&self.cell.data()[start..start + n.div_ceil(8)], n)?;
        } else {
            for pos in self.bit_pos..self.bit_pos + n {
                bits.write_bit(self.bit_at(pos))?;
            }
        }
        self.bit_pos += n;
        Ok(bits)
    }

    pub fn load_byte(&mut self) -> Result<u8> {
        Ok(self.load_uint(8)? as u8)
    }

    pub fn load_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.load_bits(n * 8)?.as_bytes().to_vec())
    }

    pub fn load_u16(&mut self) -> Result<u16> {
        Ok(self.load_uint(16)? as u16)
    }

    pub fn load_u32(&mut self) -> Result<u32> {
        Ok(self.load_uint(32)? as u32)
    }

    pub fn load_u64(&mut self) -> Result<u64> {
        self.load_uint(64)
    }

    /// Loads an unsigned integer of `bits` width (at most 64)
    pub fn load_uint(&mut self, bits: usize) -> Result<u64> {
        if bits > 64 {
            return Err(CellError::InvalidArgument(format!(
                "cannot load {bits} bits into u64"
            )));
        }
        self.ensure_bits(bits)?;
        let mut result = 0u64;
        for pos in self.bit_pos..self.bit_pos + bits {
            result = (result << 1) | self.bit_at(pos) as u64;
        }
        self.bit_pos += bits;
        Ok(result)
    }

    /// Loads a two's complement integer of `bits` width (at most 64)
    pub fn load_int(&mut self, bits: usize) -> Result<i64> {
        let unsigned = self.load_uint(bits)?;
        if bits == 0 || bits == 64 {
            return Ok(unsigned as i64);
        }
        if unsigned & (1u64 << (bits - 1)) != 0 {
            Ok((unsigned | (!0u64 << bits)) as i64)
        } else {
            Ok(unsigned as i64)
        }
    }

    /// Loads an unsigned integer of any width
    pub fn load_biguint(&mut self, bits: usize) -> Result<BigUint> {
        self.ensure_bits(bits)?;
        let mut value = BigUint::default();
        for pos in self.bit_pos..self.bit_pos + bits {
            value <<= 1u8;
            if self.bit_at(pos) {
                value |= BigUint::from(1u8);
            }
        }
        self.bit_pos += bits;
        Ok(value)
    }

    /// Loads the next reference
    pub fn load_reference(&mut self) -> Result<&'a Arc<Cell>> {
        let cell = self.cell;
        let reference = cell.reference(self.ref_pos).ok_or(CellError::RefUnderflow)?;
        self.ref_pos += 1;
        Ok(reference)
    }

    /// Peeks at the reference `index` positions ahead without advancing
    pub fn preload_reference(&self, index: usize) -> Result<&'a Arc<Cell>> {
        let cell = self.cell;
        cell.reference(self.ref_pos + index)
            .ok_or(CellError::RefUnderflow)
    }

    /// Loads a `Maybe ^Cell`: one flag bit, then a reference when set.
    ///
    /// On error the slice is left where it was.
    pub fn load_maybe_ref(&mut self) -> Result<Option<&'a Arc<Cell>>> {
        let mut cursor = self.clone();
        let reference = if cursor.load_bit()? {
            Some(cursor.load_reference()?)
        } else {
            None
        };
        *self = cursor;
        Ok(reference)
    }

    /// Loads a `HashmapE` root
    pub fn load_dict(&mut self) -> Result<Option<&'a Arc<Cell>>> {
        self.load_maybe_ref()
    }

    pub fn skip_bits(&mut self, n: usize) -> Result<()> {
        self.ensure_bits(n)?;
        self.bit_pos += n;
        Ok(())
    }

    pub fn skip_refs(&mut self, n: usize) -> Result<()> {
        if n > self.remaining_refs() {
            return Err(CellError::RefUnderflow);
        }
        self.ref_pos += n;
        Ok(())
    }

    /// Gets the underlying cell
    pub fn cell(&self) -> &'a Cell {
        self.cell
    }

    pub fn bit_position(&self) -> usize {
        self.bit_pos
    }

    pub fn ref_position(&self) -> usize {
        self.ref_pos
    }

    pub fn load_remaining_bits(&mut self) -> Result<BitString> {
        self.load_bits(self.remaining_bits())
    }

    pub fn load_remaining_refs(&mut self) -> Result<Vec<&'a Arc<Cell>>> {
        let mut refs = Vec::with_capacity(self.remaining_refs());
        while self.remaining_refs() > 0 {
            refs.push(self.load_reference()?);
        }
        Ok(refs)
    }

    pub fn can_read_bits(&self, n: usize) -> bool {
        n <= self.remaining_bits()
    }

    pub fn can_read_refs(&self, n: usize) -> bool {
        n <= self.remaining_refs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tvm::builder::CellBuilder;

    #[test]
    fn test_slice_load_bits() {
        let mut builder = CellBuilder::new();
        builder.store_byte(0xFF).unwrap();
        builder.store_byte(0x00).unwrap();
        let cell = builder.build().unwrap();

        let mut slice = cell.begin_parse().unwrap();
        assert_eq!(slice.remaining_bits(), 16);
        assert_eq!(slice.load_byte().unwrap(), 0xFF);
        assert_eq!(slice.remaining_bits(), 8);
        assert_eq!(slice.load_byte().unwrap(), 0x00);
        assert!(slice.is_empty());
    }

    #[test]
    fn test_slice_load_uint() {
        let mut builder = CellBuilder::new();
        builder.store_u32(0x12345678).unwrap();
        builder.store_int(-3, 5).unwrap();
        let cell = builder.build().unwrap();

        let mut slice = cell.begin_parse().unwrap();
        assert_eq!(slice.load_u32().unwrap(), 0x12345678);
        assert_eq!(slice.load_int(5).unwrap(), -3);
        assert_eq!(slice.load_uint(0).unwrap(), 0);
    }

    #[test]
    fn test_slice_unaligned_bits() {
        let cell = CellBuilder::new()
            .with_data("1011001110")
            .unwrap()
            .build()
            .unwrap();

        let mut slice = cell.begin_parse().unwrap();
        assert!(slice.load_bit().unwrap());
        let bits = slice.load_bits(6).unwrap();
        assert_eq!(bits.len(), 6);
        assert_eq!(bits.as_bytes(), &[0b0110_0100]);
        assert_eq!(slice.load_biguint(3).unwrap(), BigUint::from(0b110u8));
    }

    #[test]
    fn test_slice_load_reference() {
        let ref_cell = CellBuilder::new().build().unwrap();

        let mut builder = CellBuilder::new();
        builder.store_reference(ref_cell.clone()).unwrap();
        let cell = builder.build().unwrap();

        let mut slice = cell.begin_parse().unwrap();
        assert_eq!(slice.remaining_refs(), 1);
        assert!(Arc::ptr_eq(slice.preload_reference(0).unwrap(), &ref_cell));

        let loaded = slice.load_reference().unwrap();
        assert!(Arc::ptr_eq(loaded, &ref_cell));
        assert_eq!(slice.remaining_refs(), 0);
        assert_eq!(slice.load_reference().unwrap_err(), CellError::RefUnderflow);
    }

    #[test]
    fn test_slice_underflow_keeps_position() {
        let mut builder = CellBuilder::new();
        builder.store_uint(0b101, 3).unwrap();
        let cell = builder.build().unwrap();

        let mut slice = cell.begin_parse().unwrap();
        assert_eq!(
            slice.load_byte().unwrap_err(),
            CellError::BitUnderflow {
                requested: 8,
                remaining: 3
            }
        );
        assert_eq!(slice.bit_position(), 0);
        assert_eq!(slice.load_uint(3).unwrap(), 0b101);
    }

    #[test]
    fn test_slice_skip() {
        let mut builder = CellBuilder::new();
        builder.store_u32(0x12345678).unwrap();
        let cell = builder.build().unwrap();

        let mut slice = cell.begin_parse().unwrap();
        slice.skip_bits(16).unwrap();
        assert_eq!(slice.remaining_bits(), 16);
        assert_eq!(slice.load_u16().unwrap(), 0x5678);
        assert!(slice.skip_bits(1).is_err());
    }

    #[test]
    fn test_slice_maybe_ref() {
        let child = CellBuilder::new().with_data("1").unwrap().build().unwrap();
        let mut builder = CellBuilder::new();
        builder.store_maybe_ref(None).unwrap();
        builder.store_maybe_ref(Some(child.clone())).unwrap();
        let cell = builder.build().unwrap();

        let mut slice = cell.begin_parse().unwrap();
        assert!(slice.load_maybe_ref().unwrap().is_none());
        assert!(Arc::ptr_eq(slice.load_dict().unwrap().unwrap(), &child));
        assert!(slice.is_empty());
    }

    #[test]
    fn test_maybe_ref_without_reference_keeps_position() {
        let cell = CellBuilder::new().with_data("1").unwrap().build().unwrap();

        let mut slice = cell.begin_parse().unwrap();
        assert_eq!(slice.load_maybe_ref().unwrap_err(), CellError::RefUnderflow);
        assert_eq!(slice.bit_position(), 0);
        assert_eq!(slice.ref_position(), 0);
        assert!(slice.load_bit().unwrap());
    }
}
