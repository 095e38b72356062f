//! TVM (TON Virtual Machine) data structures and utilities
//!
//! This module provides the cell layer of TON:
//! - BitString: fixed-capacity bit buffer behind every cell
//! - Cell: up to 1023 bits and 4 references, hashed at every level
//! - CellBuilder / Slice: the write and read sides of a cell
//! - BoC: Bag of Cells serialization format for encoding cell graphs into bytes
//! - Dict: Hashmap (binary trie) encoding on top of cells

pub mod bits;
pub mod boc;
pub mod builder;
pub mod cell;
pub mod dict;
pub mod error;
pub mod exotic;
pub mod hash;
pub mod slice;

pub use bits::BitString;
pub use boc::{
    BocHeader, BocOptions, base64_to_boc, boc_to_base64, boc_to_hex, deserialize_boc, hex_to_boc,
    parse_boc_header, serialize_boc,
};
pub use builder::CellBuilder;
pub use cell::{
    Cell, CellHash, CellType, LevelMask, MAX_CELL_BITS, MAX_CELL_DEPTH, MAX_CELL_LEVEL,
    MAX_CELL_REFS,
};
pub use dict::{parse_dict, parse_dict_bit_string, parse_dict_refs, serialize_dict};
pub use error::{CellError, ErrorKind};
pub use exotic::ExoticCell;
pub use slice::Slice;
