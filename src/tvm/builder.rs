//! Builder for constructing cells
//!
//! `CellBuilder` is the only mutable stage of a cell's life: bits and
//! references are appended to it, then [`CellBuilder::build`] consumes it and
//! returns an immutable, hashed [`Cell`]. Every `store_*` method checks the
//! limits before writing, so a failed call leaves the builder as it was.
//!
//! # Example
//!
//! ```rust
//! use tonboc::tvm::CellBuilder;
//!
//! let mut builder = CellBuilder::new();
//! builder.store_u32(0x12345678).unwrap();
//! builder.store_byte(0xFF).unwrap();
//! let cell = builder.build().unwrap();
//! assert_eq!(cell.bit_len(), 40);
//! ```

use crate::tvm::bits::BitString;
use crate::tvm::cell::{Cell, CellHash, CellType, LevelMask, MAX_CELL_REFS};
use crate::tvm::error::{CellError, Result};
use crate::tvm::slice::Slice;
use num_bigint::BigUint;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CellBuilder {
    bits: BitString,
    references: Vec<Arc<Cell>>,
    exotic: bool,
}

impl CellBuilder {
    /// Creates a new cell builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the cell as exotic; its type is taken from the first data byte
    pub fn set_exotic(&mut self, exotic: bool) -> &mut Self {
        self.exotic = exotic;
        self
    }

    /// Returns the number of bits used
    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    /// Returns the number of available bits
    pub fn available_bits(&self) -> usize {
        self.bits.available()
    }

    /// Returns the number of references
    pub fn ref_count(&self) -> usize {
        self.references.len()
    }

    /// Returns the number of available references
    pub fn available_refs(&self) -> usize {
        MAX_CELL_REFS - self.references.len()
    }

    /// Stores a single bit
    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self> {
        self.bits.write_bit(bit)?;
        Ok(self)
    }

    /// Stores bits from a byte slice
    pub fn store_bits(&mut self, bits: &[u8], bit_len: usize) -> Result<&mut Self> {
        self.bits.write_bits(bits, bit_len)?;
        Ok(self)
    }

    pub fn store_bit_string(&mut self, bits: &BitString) -> Result<&mut Self> {
        self.bits.write_bit_string(bits)?;
        Ok(self)
    }

    /// Stores a byte
    pub fn store_byte(&mut self, byte: u8) -> Result<&mut Self> {
        self.store_bits(&[byte], 8)
    }

    /// Stores multiple bytes
    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        self.bits.write_bytes(bytes)?;
        Ok(self)
    }

    /// Stores a u32 value
    pub fn store_u32(&mut self, value: u32) -> Result<&mut Self> {
        self.store_bits(&value.to_be_bytes(), 32)
    }

    /// Stores a u64 value
    pub fn store_u64(&mut self, value: u64) -> Result<&mut Self> {
        self.store_bits(&value.to_be_bytes(), 64)
    }

    /// Stores the low `bits` bits of `value`, most significant first
    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self> {
        self.bits.write_uint(value, bits)?;
        Ok(self)
    }

    /// Stores a signed integer with specific bit length
    pub fn store_int(&mut self, value: i64, bits: usize) -> Result<&mut Self> {
        self.bits.write_int(value, bits)?;
        Ok(self)
    }

    pub fn store_biguint(&mut self, value: &BigUint, bits: usize) -> Result<&mut Self> {
        self.bits.write_biguint(value, bits)?;
        Ok(self)
    }

    /// Adds a reference to another cell
    pub fn store_reference(&mut self, cell: Arc<Cell>) -> Result<&mut Self> {
        if self.references.len() >= MAX_CELL_REFS {
            return Err(CellError::RefOverflow);
        }
        self.references.push(cell);
        Ok(self)
    }

    /// Stores an optional reference (Maybe ^Cell)
    pub fn store_maybe_ref(&mut self, cell: Option<Arc<Cell>>) -> Result<&mut Self> {
        match cell {
            Some(c) => {
                if self.available_refs() == 0 {
                    return Err(CellError::RefOverflow);
                }
                self.store_bit(true)?;
                self.store_reference(c)?;
            }
            None => {
                self.store_bit(false)?;
            }
        }
        Ok(self)
    }

    /// Stores a dictionary root in `HashmapE` form
    pub fn store_dict(&mut self, dict: Option<Arc<Cell>>) -> Result<&mut Self> {
        self.store_maybe_ref(dict)
    }

    /// Stores the bits and references of another cell
    pub fn store_cell(&mut self, cell: &Cell) -> Result<&mut Self> {
        if cell.reference_count() > self.available_refs() {
            return Err(CellError::RefOverflow);
        }
        self.bits.write_bit_string(cell.bits())?;
        self.references.extend(cell.references().iter().cloned());
        Ok(self)
    }

    /// Stores whatever is left to read in a slice, without advancing it
    pub fn store_slice(&mut self, slice: &Slice<'_>) -> Result<&mut Self> {
        if slice.remaining_refs() > self.available_refs() {
            return Err(CellError::RefOverflow);
        }
        let mut rest = slice.clone();
        let bits = rest.load_remaining_bits()?;
        self.bits.write_bit_string(&bits)?;
        self.references.extend(rest.load_remaining_refs()?.into_iter().cloned());
        Ok(self)
    }

    /// Appends bits written as a `'0'`/`'1'` pattern.
    ///
    /// The whole pattern is checked first, so a failed call leaves the
    /// builder as it was.
    pub fn store_data(&mut self, pattern: &str) -> Result<&mut Self> {
        let mut bits = BitString::new(pattern.len());
        for c in pattern.chars() {
            match c {
                '0' => bits.write_bit(false)?,
                '1' => bits.write_bit(true)?,
                _ => {
                    return Err(CellError::InvalidArgument(format!(
                        "unexpected character {c:?} in bit pattern"
                    )));
                }
            };
        }
        self.bits.write_bit_string(&bits)?;
        Ok(self)
    }

    /// Builder-style [`CellBuilder::store_data`].
    ///
    /// Consumes the builder, so an error drops it; call `store_data` on a
    /// `&mut` builder to keep it.
    pub fn with_data(mut self, pattern: &str) -> Result<Self> {
        self.store_data(pattern)?;
        Ok(self)
    }

    /// Appends a child, builder style
    pub fn with_reference(mut self, cell: Arc<Cell>) -> Result<Self> {
        self.store_reference(cell)?;
        Ok(self)
    }

    /// Builds the cell
    pub fn build(self) -> Result<Arc<Cell>> {
        Ok(Arc::new(Cell::from_parts(
            self.bits,
            self.references,
            self.exotic,
        )?))
    }

    /// Replaces a cell by a pruned branch that keeps its hashes and depths.
    ///
    /// `new_level` is the level the pruned branch appears at; it must be above
    /// the level of `cell`.
    pub fn pruned_branch(cell: &Cell, new_level: u8) -> Result<Arc<Cell>> {
        let level_mask = cell.level_mask();
        let level = level_mask.level();
        if new_level <= level || new_level > 3 {
            return Err(CellError::InvalidArgument(format!(
                "cannot prune a level {level} cell at level {new_level}"
            )));
        }
        let new_mask = LevelMask::new(level_mask.mask() | (1 << (new_level - 1)))
            .ok_or_else(|| CellError::InvalidArgument("level mask out of range".to_string()))?;

        let mut builder = Self::new();
        builder.set_exotic(true);
        builder.store_byte(tag(CellType::PrunedBranch))?;
        builder.store_byte(new_mask.mask())?;
        for i in (0..=level).filter(|&i| level_mask.is_significant(i)) {
            builder.store_bytes(&cell.hash(i))?;
        }
        for i in (0..=level).filter(|&i| level_mask.is_significant(i)) {
            builder.store_uint(cell.depth(i) as u64, 16)?;
        }
        builder.build()
    }

    /// Wraps a (usually partially pruned) tree into a Merkle proof
    pub fn merkle_proof(cell: Arc<Cell>) -> Result<Arc<Cell>> {
        let mut builder = Self::new();
        builder.set_exotic(true);
        builder.store_byte(tag(CellType::MerkleProof))?;
        builder.store_bytes(&cell.hash(0))?;
        builder.store_uint(cell.depth(0) as u64, 16)?;
        builder.store_reference(cell)?;
        builder.build()
    }

    /// Links an old and a new version of a tree
    pub fn merkle_update(old: Arc<Cell>, new: Arc<Cell>) -> Result<Arc<Cell>> {
        let mut builder = Self::new();
        builder.set_exotic(true);
        builder.store_byte(tag(CellType::MerkleUpdate))?;
        builder.store_bytes(&old.hash(0))?;
        builder.store_bytes(&new.hash(0))?;
        builder.store_uint(old.depth(0) as u64, 16)?;
        builder.store_uint(new.depth(0) as u64, 16)?;
        builder.store_reference(old)?;
        builder.store_reference(new)?;
        builder.build()
    }

    /// Points at a library cell by its representation hash
    pub fn library_reference(hash: CellHash) -> Result<Arc<Cell>> {
        let mut builder = Self::new();
        builder.set_exotic(true);
        builder.store_byte(tag(CellType::LibraryReference))?;
        builder.store_bytes(&hash)?;
        builder.build()
    }
}

fn tag(cell_type: CellType) -> u8 {
    cell_type.tag().unwrap_or_default()
}
