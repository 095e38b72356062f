//! Layouts of exotic (special) cells
//!
//! Exotic cells keep metadata instead of application data. The first byte is
//! the type tag; the rest is fixed per type and checked here.

use crate::tvm::bits::BitString;
use crate::tvm::cell::{Cell, CellHash, CellType, LevelMask};
use crate::tvm::error::{CellError, Result};
use std::sync::Arc;

const HASH_BITS: usize = 256;
const DEPTH_BITS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExoticCell {
    /// Stand-in for an elided subtree, one hash/depth per set bit of `level_mask`
    PrunedBranch {
        level_mask: LevelMask,
        hashes: Vec<CellHash>,
        depths: Vec<u16>,
    },
    /// Pointer to a library cell by its hash
    LibraryReference { hash: CellHash },
    MerkleProof { hash: CellHash, depth: u16 },
    MerkleUpdate {
        old_hash: CellHash,
        new_hash: CellHash,
        old_depth: u16,
        new_depth: u16,
    },
}

/// Sequential reader over the whole bytes of an exotic cell
struct Fields<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Fields<'_> {
    fn hash(&mut self) -> CellHash {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.data[self.pos..self.pos + 32]);
        self.pos += 32;
        hash
    }

    fn depth(&mut self) -> u16 {
        let depth = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        depth
    }
}

fn expect_layout(
    cell_type: CellType,
    bits: &BitString,
    references: &[Arc<Cell>],
    bit_len: usize,
    refs: usize,
) -> Result<()> {
    if bits.len() != bit_len {
        return Err(CellError::InvalidExotic(format!(
            "{cell_type} must hold {bit_len} bits, got {}",
            bits.len()
        )));
    }
    if references.len() != refs {
        return Err(CellError::InvalidExotic(format!(
            "{cell_type} must have {refs} references, got {}",
            references.len()
        )));
    }
    Ok(())
}

fn check_child(cell_type: CellType, child: &Cell, hash: &CellHash, depth: u16) -> Result<()> {
    if child.hash(0) != *hash || child.depth(0) != depth {
        return Err(CellError::InvalidExotic(format!(
            "{cell_type} hash or depth does not match its child"
        )));
    }
    Ok(())
}

impl ExoticCell {
    /// Decodes and validates the layout of an exotic cell
    pub fn parse(bits: &BitString, references: &[Arc<Cell>]) -> Result<Self> {
        let data = bits.as_bytes();
        if bits.len() < 8 {
            return Err(CellError::InvalidExotic(
                "exotic cell must hold at least 8 bits".to_string(),
            ));
        }
        let cell_type = CellType::from_tag(data[0])
            .ok_or_else(|| CellError::InvalidExotic(format!("unknown type tag {}", data[0])))?;
        let mut fields = Fields { data, pos: 1 };

        match cell_type {
            CellType::PrunedBranch => {
                if bits.len() < 16 {
                    return Err(CellError::InvalidExotic(
                        "pruned branch must hold a level mask".to_string(),
                    ));
                }
                let level_mask = match LevelMask::new(data[1]) {
                    Some(mask) if mask.level() > 0 => mask,
                    _ => {
                        return Err(CellError::InvalidExotic(format!(
                            "invalid pruned branch level mask {}",
                            data[1]
                        )));
                    }
                };
                let stored = level_mask.hash_count() - 1;
                expect_layout(
                    cell_type,
                    bits,
                    references,
                    16 + stored * (HASH_BITS + DEPTH_BITS),
                    0,
                )?;
                fields.pos = 2;
                let hashes = (0..stored).map(|_| fields.hash()).collect();
                let depths = (0..stored).map(|_| fields.depth()).collect();
                Ok(Self::PrunedBranch {
                    level_mask,
                    hashes,
                    depths,
                })
            }
            CellType::LibraryReference => {
                expect_layout(cell_type, bits, references, 8 + HASH_BITS, 0)?;
                Ok(Self::LibraryReference {
                    hash: fields.hash(),
                })
            }
            CellType::MerkleProof => {
                expect_layout(cell_type, bits, references, 8 + HASH_BITS + DEPTH_BITS, 1)?;
                let hash = fields.hash();
                let depth = fields.depth();
                check_child(cell_type, &references[0], &hash, depth)?;
                Ok(Self::MerkleProof { hash, depth })
            }
            CellType::MerkleUpdate => {
                expect_layout(
                    cell_type,
                    bits,
                    references,
                    8 + 2 * (HASH_BITS + DEPTH_BITS),
                    2,
                )?;
                let old_hash = fields.hash();
                let new_hash = fields.hash();
                let old_depth = fields.depth();
                let new_depth = fields.depth();
                check_child(cell_type, &references[0], &old_hash, old_depth)?;
                check_child(cell_type, &references[1], &new_hash, new_depth)?;
                Ok(Self::MerkleUpdate {
                    old_hash,
                    new_hash,
                    old_depth,
                    new_depth,
                })
            }
            CellType::Ordinary => Err(CellError::InvalidExotic(
                "ordinary cell marked as exotic".to_string(),
            )),
        }
    }

    pub fn cell_type(&self) -> CellType {
        match self {
            Self::PrunedBranch { .. } => CellType::PrunedBranch,
            Self::LibraryReference { .. } => CellType::LibraryReference,
            Self::MerkleProof { .. } => CellType::MerkleProof,
            Self::MerkleUpdate { .. } => CellType::MerkleUpdate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tvm::builder::CellBuilder;

    fn sample_tree() -> (Arc<Cell>, Arc<Cell>) {
        let leaf = CellBuilder::new().with_data("1101").unwrap().build().unwrap();
        let mut builder = CellBuilder::new();
        builder.store_u32(0xCAFE_BABE).unwrap();
        builder.store_reference(leaf.clone()).unwrap();
        (builder.build().unwrap(), leaf)
    }

    #[test]
    fn test_pruned_branch_keeps_level_zero_hash() {
        let (root, leaf) = sample_tree();
        let pruned = CellBuilder::pruned_branch(&leaf, 1).unwrap();

        assert_eq!(pruned.cell_type(), CellType::PrunedBranch);
        assert_eq!(pruned.level(), 1);
        assert_eq!(pruned.hash(0), leaf.hash(0));
        assert_eq!(pruned.depth(0), leaf.depth(0));
        assert_ne!(pruned.repr_hash(), leaf.repr_hash());

        let mut builder = CellBuilder::new();
        builder.store_u32(0xCAFE_BABE).unwrap();
        builder.store_reference(pruned).unwrap();
        let partial = builder.build().unwrap();

        assert_eq!(partial.level(), 1);
        assert_eq!(partial.hash(0), root.hash(0));
        assert_ne!(partial.repr_hash(), root.repr_hash());
    }

    #[test]
    fn test_merkle_proof_lowers_level() {
        let (root, leaf) = sample_tree();
        let pruned = CellBuilder::pruned_branch(&leaf, 1).unwrap();
        let mut builder = CellBuilder::new();
        builder.store_u32(0xCAFE_BABE).unwrap();
        builder.store_reference(pruned).unwrap();
        let partial = builder.build().unwrap();

        let proof = CellBuilder::merkle_proof(partial).unwrap();
        assert_eq!(proof.level(), 0);
        match proof.exotic() {
            Some(ExoticCell::MerkleProof { hash, depth }) => {
                assert_eq!(hash, root.hash(0));
                assert_eq!(depth, root.depth(0));
            }
            other => panic!("unexpected exotic view {other:?}"),
        }
    }

    #[test]
    fn test_merkle_update() {
        let (old, _) = sample_tree();
        let new = CellBuilder::new().with_data("0").unwrap().build().unwrap();
        let update = CellBuilder::merkle_update(old.clone(), new.clone()).unwrap();

        assert_eq!(update.cell_type(), CellType::MerkleUpdate);
        assert_eq!(update.reference_count(), 2);
        assert_eq!(
            update.exotic(),
            Some(ExoticCell::MerkleUpdate {
                old_hash: old.hash(0),
                new_hash: new.hash(0),
                old_depth: old.depth(0),
                new_depth: new.depth(0),
            })
        );
    }

    #[test]
    fn test_merkle_proof_rejects_wrong_hash() {
        let (root, _) = sample_tree();
        let mut builder = CellBuilder::new();
        builder.set_exotic(true);
        builder.store_byte(3).unwrap();
        builder.store_bytes(&[0u8; 32]).unwrap();
        builder.store_uint(root.depth(0) as u64, 16).unwrap();
        builder.store_reference(root).unwrap();

        let err = builder.build().unwrap_err();
        assert!(matches!(err, CellError::InvalidExotic(_)));
    }

    #[test]
    fn test_invalid_layouts() {
        let mut builder = CellBuilder::new();
        builder.set_exotic(true);
        builder.store_byte(9).unwrap();
        assert!(matches!(
            builder.build().unwrap_err(),
            CellError::InvalidExotic(_)
        ));

        let mut builder = CellBuilder::new();
        builder.set_exotic(true);
        builder.store_bytes(&[1, 0]).unwrap();
        assert!(matches!(
            builder.build().unwrap_err(),
            CellError::InvalidExotic(_)
        ));

        let mut builder = CellBuilder::new();
        builder.set_exotic(true);
        builder.store_byte(2).unwrap();
        builder.store_bytes(&[0u8; 31]).unwrap();
        assert!(matches!(
            builder.build().unwrap_err(),
            CellError::InvalidExotic(_)
        ));

        let mut builder = CellBuilder::new();
        builder.set_exotic(true);
        assert!(builder.build().is_err());
    }
}
