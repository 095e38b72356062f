//! Cell implementation for TON blockchain
//!
//! A cell is a fundamental data structure in TON that can store up to 1023 bits
//! of data and maintain up to 4 references to other cells. Cells are immutable
//! once built; children are shared through `Arc`, so a cell graph is a DAG.

use crate::tvm::bits::BitString;
use crate::tvm::boc::{BocOptions, deserialize_boc_auto, serialize_boc};
use crate::tvm::error::{CellError, Result};
use crate::tvm::exotic::ExoticCell;
use crate::tvm::hash::{self, CellHashes};
use crate::tvm::slice::Slice;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

/// Maximum number of bits a cell can store
pub const MAX_CELL_BITS: usize = 1023;

/// Maximum number of references a cell can have
pub const MAX_CELL_REFS: usize = 4;

/// Cell level range (0-3)
pub const MAX_CELL_LEVEL: u8 = 3;

/// Maximum depth of a cell tree
pub const MAX_CELL_DEPTH: u16 = 1024;

/// SHA-256 digest of a cell
pub type CellHash = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellType {
    Ordinary,
    PrunedBranch,
    LibraryReference,
    MerkleProof,
    MerkleUpdate,
}

impl CellType {
    /// Maps the first data byte of an exotic cell to its type
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::PrunedBranch),
            2 => Some(Self::LibraryReference),
            3 => Some(Self::MerkleProof),
            4 => Some(Self::MerkleUpdate),
            _ => None,
        }
    }

    /// First data byte of an exotic cell, `None` for ordinary cells
    pub fn tag(self) -> Option<u8> {
        match self {
            Self::Ordinary => None,
            Self::PrunedBranch => Some(1),
            Self::LibraryReference => Some(2),
            Self::MerkleProof => Some(3),
            Self::MerkleUpdate => Some(4),
        }
    }

    pub fn is_merkle(self) -> bool {
        matches!(self, Self::MerkleProof | Self::MerkleUpdate)
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ordinary => "Ordinary",
            Self::PrunedBranch => "Pruned branch",
            Self::LibraryReference => "Library reference",
            Self::MerkleProof => "Merkle proof",
            Self::MerkleUpdate => "Merkle update",
        })
    }
}

/// Set of levels at which a cell has a distinct hash
///
/// Bit `i` set means the cell has its own hash at level `i + 1`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelMask(u8);

impl LevelMask {
    pub const EMPTY: Self = Self(0);

    /// Creates a mask from its raw 3-bit value, `None` if it does not fit
    pub fn new(mask: u8) -> Option<Self> {
        (mask <= 7).then_some(Self(mask))
    }

    pub fn mask(self) -> u8 {
        self.0
    }

    /// Highest level at which the cell has a distinct hash
    pub fn level(self) -> u8 {
        8 - self.0.leading_zeros() as u8
    }

    /// Number of distinct hashes: one per set bit plus level 0
    pub fn hash_count(self) -> usize {
        self.0.count_ones() as usize + 1
    }

    /// Keeps only the levels below `level`
    pub fn apply(self, level: u8) -> Self {
        Self(self.0 & ((1u8 << level.min(MAX_CELL_LEVEL)) - 1))
    }

    /// Level 0 is always significant, others when their bit is set
    pub fn is_significant(self, level: u8) -> bool {
        level == 0 || (self.0 >> (level - 1)) & 1 == 1
    }

    /// Position of the hash answering `level` among the stored hashes
    pub fn hash_index(self, level: u8) -> usize {
        self.apply(level).hash_count() - 1
    }

    /// Mask seen through a Merkle cell, which lowers every level by one
    pub fn shift_down(self) -> Self {
        Self(self.0 >> 1)
    }
}

impl BitOr for LevelMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for LevelMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Represents a cell in the TON blockchain
pub struct Cell {
    cell_type: CellType,
    bits: BitString,
    references: Vec<Arc<Cell>>,
    level_mask: LevelMask,
    /// Computed hashes, one per significant level (only the top one for pruned branches)
    hashes: Vec<CellHash>,
    depths: Vec<u16>,
}

impl Cell {
    /// Creates a new empty ordinary cell
    pub fn new() -> Self {
        let bits = BitString::default();
        Self {
            hashes: vec![hash::leaf_hash(&bits)],
            depths: vec![0],
            cell_type: CellType::Ordinary,
            bits,
            references: Vec::new(),
            level_mask: LevelMask::EMPTY,
        }
    }

    /// Builds a cell from its bits and children, computing its hashes.
    ///
    /// When `exotic` is set the cell type is read from the first data byte and
    /// the layout for that type is validated.
    pub fn from_parts(bits: BitString, references: Vec<Arc<Cell>>, exotic: bool) -> Result<Self> {
        if bits.len() > MAX_CELL_BITS {
            return Err(CellError::BitOverflow {
                requested: bits.len(),
                available: MAX_CELL_BITS,
            });
        }
        if references.len() > MAX_CELL_REFS {
            return Err(CellError::RefOverflow);
        }

        let exotic = if exotic {
            Some(ExoticCell::parse(&bits, &references)?)
        } else {
            None
        };
        let cell_type = exotic
            .as_ref()
            .map_or(CellType::Ordinary, ExoticCell::cell_type);

        let CellHashes {
            level_mask,
            hashes,
            depths,
        } = hash::compute(cell_type, exotic.as_ref(), &bits, &references)?;

        Ok(Self {
            cell_type,
            bits,
            references,
            level_mask,
            hashes,
            depths,
        })
    }

    /// Deserializes every root of a BoC given as raw bytes or hex text
    pub fn from_boc(src: impl AsRef<[u8]>) -> Result<Vec<Arc<Cell>>> {
        deserialize_boc_auto(src.as_ref())
    }

    /// Serializes this cell as the single root of a BoC
    pub fn to_boc(self: &Arc<Self>, options: &BocOptions) -> Result<Vec<u8>> {
        serialize_boc(std::slice::from_ref(self), options)
    }

    /// Starts reading the cell's data; exotic cells cannot be parsed
    pub fn begin_parse(&self) -> Result<Slice<'_>> {
        if self.is_exotic() {
            return Err(CellError::ExoticParse);
        }
        Ok(Slice::new(self))
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    /// Returns whether this is an exotic (special) cell
    pub fn is_exotic(&self) -> bool {
        self.cell_type != CellType::Ordinary
    }

    /// Typed view of an exotic cell's metadata
    pub fn exotic(&self) -> Option<ExoticCell> {
        if !self.is_exotic() {
            return None;
        }
        ExoticCell::parse(&self.bits, &self.references).ok()
    }

    pub fn bits(&self) -> &BitString {
        &self.bits
    }

    /// Returns the cell's data
    pub fn data(&self) -> &[u8] {
        self.bits.as_bytes()
    }

    /// Returns the number of bits in the cell
    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    /// Returns the cell's references
    pub fn references(&self) -> &[Arc<Cell>] {
        &self.references
    }

    /// Returns the number of references
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Gets a reference by index
    pub fn reference(&self, index: usize) -> Option<&Arc<Cell>> {
        self.references.get(index)
    }

    pub fn level_mask(&self) -> LevelMask {
        self.level_mask
    }

    /// Returns the cell's level
    pub fn level(&self) -> u8 {
        self.level_mask.level()
    }

    /// Highest level among this cell and everything below it
    pub fn max_level(&self) -> u8 {
        self.level()
    }

    /// Computes the cell's descriptors (2 bytes)
    pub fn descriptors(&self) -> [u8; 2] {
        hash::descriptor_bytes(
            self.bits.len(),
            self.references.len(),
            self.level_mask,
            self.is_exotic(),
        )
    }

    /// Hash of the cell at `level` (levels above 3 behave as 3)
    pub fn hash(&self, level: u8) -> CellHash {
        self.hash_by_index(self.level_mask.hash_index(level))
    }

    /// Depth of the cell at `level`
    pub fn depth(&self, level: u8) -> u16 {
        self.depth_by_index(self.level_mask.hash_index(level))
    }

    /// Representation hash, the one used to identify the cell
    pub fn repr_hash(&self) -> CellHash {
        self.hash(MAX_CELL_LEVEL)
    }

    pub fn repr_depth(&self) -> u16 {
        self.depth(MAX_CELL_LEVEL)
    }

    /// Longest path to a leaf, as seen at the representation level
    pub fn max_depth(&self) -> u16 {
        self.repr_depth()
    }

    pub(crate) fn hash_by_index(&self, index: usize) -> CellHash {
        match self.pruned_index(index) {
            Some(i) => {
                let offset = 2 + i * 32;
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&self.data()[offset..offset + 32]);
                hash
            }
            None => self.hashes[index.min(self.hashes.len() - 1)],
        }
    }

    pub(crate) fn depth_by_index(&self, index: usize) -> u16 {
        match self.pruned_index(index) {
            Some(i) => {
                let offset = 2 + (self.level_mask.hash_count() - 1) * 32 + i * 2;
                let data = self.data();
                u16::from_be_bytes([data[offset], data[offset + 1]])
            }
            None => self.depths[index.min(self.depths.len() - 1)],
        }
    }

    /// For pruned branches, hashes below the top are stored in the data
    fn pruned_index(&self, index: usize) -> Option<usize> {
        (self.cell_type == CellType::PrunedBranch && index < self.level_mask.hash_count() - 1)
            .then_some(index)
    }

    /// Like `Display`, but marks exotic cells
    pub fn to_debug_string(&self) -> String {
        let mut out = String::new();
        self.write_tree(&mut out, 0, true);
        out
    }

    fn write_tree(&self, out: &mut String, indent: usize, debug: bool) {
        out.extend(std::iter::repeat_n(' ', indent));
        if debug && self.is_exotic() {
            out.push_str("(exotic)");
        }
        out.push_str("x{");
        out.push_str(&self.bits.to_fift_hex());
        out.push_str("}\n");
        for reference in &self.references {
            reference.write_tree(out, indent + 1, debug);
        }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural equality. Children are compared by their representation hash,
/// which already covers their whole subtree, so shared subgraphs are not walked
/// once per path.
impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.cell_type == other.cell_type
            && self.references.len() == other.references.len()
            && self.bits == other.bits
            && self
                .references
                .iter()
                .zip(&other.references)
                .all(|(a, b)| Arc::ptr_eq(a, b) || a.repr_hash() == b.repr_hash())
    }
}

impl Eq for Cell {}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_tree(&mut out, 0, false);
        f.write_str(&out)
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("ty", &self.cell_type)
            .field("bits", &self.bits)
            .field("references", &self.references.len())
            .field("hash", &hex::encode(self.repr_hash()))
            .finish()
    }
}
