//! Level-aware cell hashing
//!
//! Every cell carries one SHA-256 hash and one depth per significant level.
//! A hash covers the cell descriptor, the padded data (or, for higher levels,
//! the hash of the level below) and the depths and hashes of all children, so
//! it commits to the whole reachable graph.

use crate::tvm::bits::BitString;
use crate::tvm::cell::{Cell, CellHash, CellType, LevelMask, MAX_CELL_DEPTH, MAX_CELL_LEVEL};
use crate::tvm::error::{CellError, Result};
use crate::tvm::exotic::ExoticCell;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub(crate) struct CellHashes {
    pub level_mask: LevelMask,
    pub hashes: Vec<CellHash>,
    pub depths: Vec<u16>,
}

/// Descriptor bytes: `refs + 8*exotic + 32*mask` and `floor(b/8) + ceil(b/8)`
pub fn descriptor_bytes(bit_len: usize, refs: usize, mask: LevelMask, exotic: bool) -> [u8; 2] {
    let d1 = refs as u8 + if exotic { 8 } else { 0 } + mask.mask() * 32;
    let d2 = (bit_len / 8 + bit_len.div_ceil(8)) as u8;
    [d1, d2]
}

/// Hash of an ordinary cell with no references
pub(crate) fn leaf_hash(bits: &BitString) -> CellHash {
    let mut hasher = Sha256::new();
    hasher.update(descriptor_bytes(bits.len(), 0, LevelMask::EMPTY, false));
    hasher.update(bits.padded_bytes());
    finish(hasher)
}

fn finish(hasher: Sha256) -> CellHash {
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

fn level_mask(
    cell_type: CellType,
    exotic: Option<&ExoticCell>,
    references: &[Arc<Cell>],
) -> LevelMask {
    let children = references
        .iter()
        .fold(LevelMask::EMPTY, |mask, r| mask | r.level_mask());
    match (cell_type, exotic) {
        (CellType::PrunedBranch, Some(ExoticCell::PrunedBranch { level_mask, .. })) => *level_mask,
        (CellType::LibraryReference, _) => LevelMask::EMPTY,
        (CellType::MerkleProof | CellType::MerkleUpdate, _) => children.shift_down(),
        _ => children,
    }
}

/// Computes the level mask, hashes and depths of a cell from its parts.
///
/// Children must already be built, so this never recurses.
pub(crate) fn compute(
    cell_type: CellType,
    exotic: Option<&ExoticCell>,
    bits: &BitString,
    references: &[Arc<Cell>],
) -> Result<CellHashes> {
    let level_mask = level_mask(cell_type, exotic, references);
    let is_pruned = cell_type == CellType::PrunedBranch;
    let is_merkle = cell_type.is_merkle();

    // pruned branches keep every hash but the top one in their data
    let skip = if is_pruned { level_mask.hash_count() - 1 } else { 0 };
    let count = level_mask.hash_count() - skip;

    let mut hashes: Vec<CellHash> = Vec::with_capacity(count);
    let mut depths = Vec::with_capacity(count);
    let mut hash_i = 0;

    for level_i in 0..=MAX_CELL_LEVEL {
        if !level_mask.is_significant(level_i) {
            continue;
        }
        hash_i += 1;
        if hash_i <= skip {
            continue;
        }

        let mut hasher = Sha256::new();
        hasher.update(descriptor_bytes(
            bits.len(),
            references.len(),
            level_mask.apply(level_i),
            cell_type != CellType::Ordinary,
        ));
        match hashes.last() {
            Some(prev) => hasher.update(prev),
            None => hasher.update(bits.padded_bytes()),
        }

        let child_level = if is_merkle { level_i + 1 } else { level_i };
        let mut depth = 0u32;
        for reference in references {
            let child_depth = reference.depth(child_level);
            hasher.update(child_depth.to_be_bytes());
            depth = depth.max(child_depth as u32 + 1);
        }
        if depth > MAX_CELL_DEPTH as u32 {
            return Err(CellError::DepthOverflow(depth));
        }
        for reference in references {
            hasher.update(reference.hash(child_level));
        }

        hashes.push(finish(hasher));
        depths.push(depth as u16);
    }

    Ok(CellHashes {
        level_mask,
        hashes,
        depths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tvm::builder::CellBuilder;

    fn chain(len: usize) -> Result<Arc<Cell>> {
        let mut cell = CellBuilder::new().build()?;
        for _ in 0..len {
            let mut builder = CellBuilder::new();
            builder.store_reference(cell)?;
            cell = builder.build()?;
        }
        Ok(cell)
    }

    #[test]
    fn test_descriptor_bytes() {
        assert_eq!(descriptor_bytes(0, 0, LevelMask::EMPTY, false), [0, 0]);
        assert_eq!(descriptor_bytes(8, 2, LevelMask::EMPTY, false), [2, 2]);
        assert_eq!(descriptor_bytes(7, 0, LevelMask::EMPTY, false), [0, 1]);
        let mask = LevelMask::new(0b011).unwrap();
        assert_eq!(descriptor_bytes(288, 0, mask, true), [8 + 96, 72]);
    }

    #[test]
    fn test_leaf_hash_matches_compute() {
        let bits = BitString::from_bytes(&[0xDE, 0xAD], 13).unwrap();
        let computed = compute(CellType::Ordinary, None, &bits, &[]).unwrap();
        assert_eq!(computed.hashes, vec![leaf_hash(&bits)]);
        assert_eq!(computed.depths, vec![0]);
    }

    #[test]
    fn test_depth_limit() {
        let deepest = chain(MAX_CELL_DEPTH as usize).unwrap();
        assert_eq!(deepest.max_depth(), MAX_CELL_DEPTH);

        let mut builder = CellBuilder::new();
        builder.store_reference(deepest).unwrap();
        assert_eq!(
            builder.build().unwrap_err(),
            CellError::DepthOverflow(MAX_CELL_DEPTH as u32 + 1)
        );
    }

    #[test]
    fn test_bit_flip_in_descendant_changes_root() {
        let build = |leaf: &str| -> Arc<Cell> {
            let leaf = CellBuilder::new().with_data(leaf).unwrap().build().unwrap();
            let middle = CellBuilder::new().with_reference(leaf).unwrap().build().unwrap();
            CellBuilder::new()
                .with_data("1")
                .unwrap()
                .with_reference(middle)
                .unwrap()
                .build()
                .unwrap()
        };

        let a = build("10110");
        let b = build("10110");
        let c = build("10111");
        assert_eq!(a.repr_hash(), b.repr_hash());
        assert_ne!(a.repr_hash(), c.repr_hash());
    }
}
