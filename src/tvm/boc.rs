//! Bag of Cells (BoC) serialization and deserialization
//!
//! BoC is a serialization format that encodes cells into byte arrays.
//! It allows storing and transmitting cell structures efficiently.
//!
//! Layout: magic, flags byte, `offset_bytes`, cell/root/absent counts,
//! total cell data size, root indices, an optional index of cell end offsets,
//! the cell records and an optional CRC32C trailer. Every reference points to
//! a cell with a strictly greater index, which keeps the graph acyclic and
//! lets the reader build cells back to front.

use crate::crc::CRC32C;
use crate::tvm::bits::BitString;
use crate::tvm::cell::{Cell, CellHash, LevelMask, MAX_CELL_REFS};
use crate::tvm::error::{CellError, Result};
use base64::Engine;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// BoC magic number for standard format
pub const BOC_GENERIC_MAGIC: u32 = 0xb5ee9c72;

/// BoC magic number for the legacy indexed format
pub const BOC_INDEXED_MAGIC: u32 = 0x68ff65f3;

/// BoC magic number for the legacy indexed format with CRC32C
pub const BOC_INDEXED_CRC32C_MAGIC: u32 = 0xacc3a728;

/// Switches for [`serialize_boc`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BocOptions {
    /// Emit the offset index
    pub idx: bool,
    /// Append a CRC32C trailer
    pub crc32: bool,
    /// Mark cells with several parents in the index (requires `idx`)
    pub cache_bits: bool,
    /// Reserved 2-bit field of the flags byte
    pub flags: u8,
}

impl Default for BocOptions {
    fn default() -> Self {
        Self {
            idx: true,
            crc32: true,
            cache_bits: false,
            flags: 0,
        }
    }
}

/// Decoded BoC header, everything before the cell records
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BocHeader {
    pub magic: u32,
    pub has_idx: bool,
    pub has_crc32: bool,
    pub has_cache_bits: bool,
    pub flags: u8,
    pub size_bytes: usize,
    pub offset_bytes: usize,
    pub cell_count: usize,
    pub root_count: usize,
    pub absent_count: usize,
    pub total_cells_size: usize,
    pub root_indices: Vec<usize>,
    /// Raw index entries, present when `has_idx` is set
    pub index: Option<Vec<u64>>,
    /// Offset of the first cell record in the buffer
    pub data_offset: usize,
}

/// Minimal number of bytes needed to write `value`, at least one
fn bytes_needed(value: usize) -> usize {
    let bits = (usize::BITS - value.leading_zeros()) as usize;
    bits.div_ceil(8).max(1)
}

fn write_uint(out: &mut Vec<u8>, value: usize, width: usize) {
    let mut buf = [0u8; 8];
    BigEndian::write_uint(&mut buf, value as u64, width);
    out.extend_from_slice(&buf[..width]);
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(CellError::UnexpectedEof(what));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn byte(&mut self, what: &'static str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn uint(&mut self, width: usize, what: &'static str) -> Result<u64> {
        Ok(BigEndian::read_uint(self.take(width, what)?, width))
    }

    fn usize(&mut self, width: usize, what: &'static str) -> Result<usize> {
        let value = self.uint(width, what)?;
        usize::try_from(value)
            .map_err(|_| CellError::InvalidHeader(format!("{what} {value} is too large")))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Distinct cells reachable from `roots`, parents before children.
///
/// Cells are deduplicated by representation hash. The walk is iterative
/// post-order, reversed at the end, so every reference gets a greater index
/// than the cell holding it.
fn topological_order(roots: &[Arc<Cell>]) -> Vec<&Arc<Cell>> {
    let mut order: Vec<&Arc<Cell>> = Vec::new();
    let mut visited: HashSet<CellHash> = HashSet::new();

    for root in roots {
        if visited.contains(&root.repr_hash()) {
            continue;
        }
        let mut stack: Vec<(&Arc<Cell>, usize)> = vec![(root, 0)];
        while let Some(top) = stack.last_mut() {
            let cell = top.0;
            match cell.references().get(top.1) {
                Some(child) => {
                    top.1 += 1;
                    if !visited.contains(&child.repr_hash()) {
                        stack.push((child, 0));
                    }
                }
                None => {
                    stack.pop();
                    if visited.insert(cell.repr_hash()) {
                        order.push(cell);
                    }
                }
            }
        }
    }

    order.reverse();
    order
}

/// Serializes the graphs under `roots` into a Bag of Cells
pub fn serialize_boc(roots: &[Arc<Cell>], options: &BocOptions) -> Result<Vec<u8>> {
    if roots.is_empty() {
        return Err(CellError::InvalidArgument(
            "a BoC needs at least one root".to_string(),
        ));
    }
    if options.cache_bits && !options.idx {
        return Err(CellError::InvalidArgument(
            "cache bits require the index".to_string(),
        ));
    }
    if options.flags > 3 {
        return Err(CellError::InvalidArgument(format!(
            "flags must fit in 2 bits, got {}",
            options.flags
        )));
    }
    let mut distinct = HashSet::with_capacity(roots.len());
    for (i, root) in roots.iter().enumerate() {
        if !distinct.insert(root.repr_hash()) {
            return Err(CellError::InvalidArgument(format!(
                "root {i} repeats an earlier root {}",
                hex::encode(root.repr_hash())
            )));
        }
    }

    let cells = topological_order(roots);
    let index_of: HashMap<CellHash, usize> = cells
        .iter()
        .enumerate()
        .map(|(i, cell)| (cell.repr_hash(), i))
        .collect();
    let lookup = |cell: &Cell| -> Result<usize> {
        index_of.get(&cell.repr_hash()).copied().ok_or_else(|| {
            CellError::InvalidArgument("cell missing from serialization order".to_string())
        })
    };

    let size_bytes = bytes_needed(cells.len());
    let mut records = Vec::new();
    let mut ends = Vec::with_capacity(cells.len());
    let mut parents = vec![0usize; cells.len()];

    for (i, cell) in cells.iter().enumerate() {
        records.extend_from_slice(&cell.descriptors());
        records.extend_from_slice(&cell.bits().padded_bytes());
        for reference in cell.references() {
            let ref_index = lookup(reference.as_ref())?;
            parents[ref_index] += 1;
            write_uint(&mut records, ref_index, size_bytes);
        }
        ends.push(records.len());
        trace!(
            "cell {i}: {} bits, {} refs, hash {}",
            cell.bit_len(),
            cell.reference_count(),
            hex::encode(cell.repr_hash())
        );
    }

    let index: Vec<usize> = ends
        .iter()
        .zip(&parents)
        .map(|(&end, &count)| {
            if options.cache_bits {
                end * 2 + usize::from(count > 1)
            } else {
                end
            }
        })
        .collect();
    let largest = index.last().copied().unwrap_or(0).max(records.len());
    let offset_bytes = bytes_needed(largest);

    let mut result = Vec::with_capacity(records.len() + 32);
    result.extend_from_slice(&BOC_GENERIC_MAGIC.to_be_bytes());
    result.push(
        (u8::from(options.idx) << 7)
            | (u8::from(options.crc32) << 6)
            | (u8::from(options.cache_bits) << 5)
            | (options.flags << 3)
            | size_bytes as u8,
    );
    result.push(offset_bytes as u8);
    write_uint(&mut result, cells.len(), size_bytes);
    write_uint(&mut result, roots.len(), size_bytes);
    write_uint(&mut result, 0, size_bytes);
    write_uint(&mut result, records.len(), offset_bytes);
    for root in roots {
        write_uint(&mut result, lookup(root.as_ref())?, size_bytes);
    }
    if options.idx {
        for &entry in &index {
            write_uint(&mut result, entry, offset_bytes);
        }
    }
    result.extend_from_slice(&records);

    if options.crc32 {
        let crc = CRC32C.checksum(&result);
        let mut trailer = [0u8; 4];
        LittleEndian::write_u32(&mut trailer, crc);
        result.extend_from_slice(&trailer);
    }

    debug!(
        "serialized BoC: {} roots, {} cells, {} bytes (size_bytes={size_bytes}, offset_bytes={offset_bytes})",
        roots.len(),
        cells.len(),
        result.len()
    );
    Ok(result)
}

/// Parses the header of a BoC, up to the first cell record
pub fn parse_boc_header(data: &[u8]) -> Result<BocHeader> {
    let mut reader = Reader { data, pos: 0 };
    let magic = BigEndian::read_u32(reader.take(4, "magic")?);

    let (has_idx, has_crc32, has_cache_bits, flags, size_bytes) = match magic {
        BOC_GENERIC_MAGIC => {
            let byte = reader.byte("flags")?;
            (
                byte & 0x80 != 0,
                byte & 0x40 != 0,
                byte & 0x20 != 0,
                (byte >> 3) & 0x03,
                (byte & 0x07) as usize,
            )
        }
        BOC_INDEXED_MAGIC => (true, false, false, 0, reader.byte("size_bytes")? as usize),
        BOC_INDEXED_CRC32C_MAGIC => (true, true, false, 0, reader.byte("size_bytes")? as usize),
        _ => return Err(CellError::UnknownMagic(magic)),
    };

    if !(1..=4).contains(&size_bytes) {
        return Err(CellError::InvalidHeader(format!(
            "size_bytes must be 1..=4, got {size_bytes}"
        )));
    }
    let offset_bytes = reader.byte("offset_bytes")? as usize;
    if !(1..=8).contains(&offset_bytes) {
        return Err(CellError::InvalidHeader(format!(
            "offset_bytes must be 1..=8, got {offset_bytes}"
        )));
    }
    if has_cache_bits && !has_idx {
        return Err(CellError::InvalidHeader(
            "cache bits set without an index".to_string(),
        ));
    }

    let cell_count = reader.usize(size_bytes, "cell count")?;
    let root_count = reader.usize(size_bytes, "root count")?;
    let absent_count = reader.usize(size_bytes, "absent count")?;
    let total_cells_size = reader.usize(offset_bytes, "total cells size")?;

    if root_count < 1 || root_count > cell_count {
        return Err(CellError::InvalidHeader(format!(
            "{root_count} roots for {cell_count} cells"
        )));
    }
    if absent_count != 0 {
        return Err(CellError::InvalidHeader(format!(
            "{absent_count} absent cells are not supported"
        )));
    }
    if total_cells_size > data.len() {
        return Err(CellError::UnexpectedEof("cell data"));
    }
    if total_cells_size < cell_count * 2 {
        return Err(CellError::InvalidHeader(format!(
            "{total_cells_size} bytes cannot hold {cell_count} cells"
        )));
    }

    let root_indices = if magic == BOC_GENERIC_MAGIC {
        let mut roots = Vec::with_capacity(root_count);
        for _ in 0..root_count {
            let root = reader.usize(size_bytes, "root list")?;
            if root >= cell_count {
                return Err(CellError::InvalidHeader(format!(
                    "root index {root} out of range"
                )));
            }
            roots.push(root);
        }
        roots
    } else {
        if root_count != 1 {
            return Err(CellError::InvalidHeader(format!(
                "indexed BoC must have exactly one root, got {root_count}"
            )));
        }
        vec![0]
    };

    let index = if has_idx {
        let mut entries = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            entries.push(reader.uint(offset_bytes, "index")?);
        }
        Some(entries)
    } else {
        None
    };

    Ok(BocHeader {
        magic,
        has_idx,
        has_crc32,
        has_cache_bits,
        flags,
        size_bytes,
        offset_bytes,
        cell_count,
        root_count,
        absent_count,
        total_cells_size,
        root_indices,
        index,
        data_offset: reader.pos,
    })
}

struct RawCell {
    bits: BitString,
    exotic: bool,
    level_mask: u8,
    references: Vec<usize>,
    stored: Option<(Vec<CellHash>, Vec<u16>)>,
}

fn parse_cell_record(
    reader: &mut Reader<'_>,
    index: usize,
    header: &BocHeader,
) -> Result<RawCell> {
    let invalid = |reason: String| CellError::InvalidCellRecord { index, reason };

    let d1 = reader.byte("cell descriptor")?;
    let d2 = reader.byte("cell descriptor")?;
    let ref_count = (d1 & 0x07) as usize;
    let exotic = d1 & 0x08 != 0;
    let with_hashes = d1 & 0x10 != 0;
    let level_mask = d1 >> 5;

    if ref_count > MAX_CELL_REFS {
        return Err(invalid(format!("{ref_count} references")));
    }

    let stored = if with_hashes {
        let count = LevelMask::new(level_mask)
            .map(LevelMask::hash_count)
            .unwrap_or(1);
        let hashes = reader
            .take(count * 32, "stored hashes")?
            .chunks_exact(32)
            .map(|chunk| {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();
        let depths = reader
            .take(count * 2, "stored depths")?
            .chunks_exact(2)
            .map(BigEndian::read_u16)
            .collect();
        Some((hashes, depths))
    } else {
        None
    };

    let tagged = d2 % 2 == 1;
    let bytes = reader.take((d2 as usize).div_ceil(2), "cell data")?;
    let bits = BitString::from_padded_bytes(bytes, tagged).map_err(|e| invalid(e.to_string()))?;
    if tagged && bits.is_byte_aligned() {
        return Err(invalid("completion tag fills a whole byte".to_string()));
    }

    let mut references = Vec::with_capacity(ref_count);
    for _ in 0..ref_count {
        let reference = reader.usize(header.size_bytes, "reference index")?;
        if reference <= index {
            return Err(CellError::BrokenOrder {
                cell: index,
                reference,
            });
        }
        if reference >= header.cell_count {
            return Err(invalid(format!("reference {reference} out of range")));
        }
        references.push(reference);
    }

    Ok(RawCell {
        bits,
        exotic,
        level_mask,
        references,
        stored,
    })
}

fn verify_stored(index: usize, cell: &Cell, stored: &(Vec<CellHash>, Vec<u16>)) -> Result<()> {
    let (hashes, depths) = stored;
    for (i, (hash, depth)) in hashes.iter().zip(depths).enumerate() {
        if cell.hash_by_index(i) != *hash || cell.depth_by_index(i) != *depth {
            return Err(CellError::HashMismatch(index));
        }
    }
    Ok(())
}

/// Deserializes a Bag of Cells, returning its roots in order
pub fn deserialize_boc(data: &[u8]) -> Result<Vec<Arc<Cell>>> {
    let header = parse_boc_header(data)?;
    debug!(
        "BoC header: magic 0x{:08x}, {} cells, {} roots, idx={}, crc32={}, cache_bits={}",
        header.magic,
        header.cell_count,
        header.root_count,
        header.has_idx,
        header.has_crc32,
        header.has_cache_bits
    );
    if header.magic != BOC_GENERIC_MAGIC {
        warn!("legacy indexed BoC magic 0x{:08x}", header.magic);
    }

    let mut reader = Reader {
        data,
        pos: header.data_offset,
    };
    let cells_data = reader.take(header.total_cells_size, "cell data")?;

    if header.has_crc32 {
        let checked = &data[..reader.pos];
        let expected = LittleEndian::read_u32(reader.take(4, "crc32c")?);
        let actual = CRC32C.checksum(checked);
        if expected != actual {
            return Err(CellError::ChecksumMismatch { expected, actual });
        }
    }
    if reader.remaining() > 0 {
        return Err(CellError::TrailingData(reader.remaining()));
    }

    let mut cells_reader = Reader {
        data: cells_data,
        pos: 0,
    };
    let mut raw_cells = Vec::with_capacity(header.cell_count);
    for i in 0..header.cell_count {
        raw_cells.push(parse_cell_record(&mut cells_reader, i, &header)?);
        if let Some(index) = &header.index {
            let entry = if header.has_cache_bits {
                index[i] >> 1
            } else {
                index[i]
            };
            if entry != cells_reader.pos as u64 {
                return Err(CellError::InvalidCellRecord {
                    index: i,
                    reason: format!(
                        "index says the cell ends at {entry}, it ends at {}",
                        cells_reader.pos
                    ),
                });
            }
        }
    }
    if cells_reader.remaining() > 0 {
        return Err(CellError::InvalidHeader(format!(
            "{} bytes of cell data left unread",
            cells_reader.remaining()
        )));
    }

    let mut built: Vec<Option<Arc<Cell>>> = vec![None; header.cell_count];
    for (i, raw) in raw_cells.into_iter().enumerate().rev() {
        let references = raw
            .references
            .iter()
            .map(|&r| {
                built[r].clone().ok_or(CellError::BrokenOrder {
                    cell: i,
                    reference: r,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let cell = Cell::from_parts(raw.bits, references, raw.exotic)?;

        if cell.level_mask().mask() != raw.level_mask {
            return Err(CellError::InvalidCellRecord {
                index: i,
                reason: format!(
                    "level mask {} in descriptor, {} computed",
                    raw.level_mask,
                    cell.level_mask().mask()
                ),
            });
        }
        if let Some(stored) = &raw.stored {
            verify_stored(i, &cell, stored)?;
        }
        trace!(
            "cell {i}: {}, {} bits, {} refs",
            cell.cell_type(),
            cell.bit_len(),
            cell.reference_count()
        );
        built[i] = Some(Arc::new(cell));
    }

    header
        .root_indices
        .iter()
        .map(|&root| {
            built[root]
                .clone()
                .ok_or_else(|| CellError::InvalidHeader(format!("root {root} was not built")))
        })
        .collect()
}

fn is_known_magic(magic: u32) -> bool {
    matches!(
        magic,
        BOC_GENERIC_MAGIC | BOC_INDEXED_MAGIC | BOC_INDEXED_CRC32C_MAGIC
    )
}

/// Accepts either raw BoC bytes or the same bytes as hex text
pub(crate) fn deserialize_boc_auto(src: &[u8]) -> Result<Vec<Arc<Cell>>> {
    if src.len() >= 4 && is_known_magic(BigEndian::read_u32(src)) {
        return deserialize_boc(src);
    }
    match std::str::from_utf8(src) {
        Ok(text)
            if !text.trim().is_empty()
                && text
                    .chars()
                    .all(|c| c.is_ascii_hexdigit() || c.is_whitespace()) =>
        {
            hex_to_boc(text)
        }
        _ => deserialize_boc(src),
    }
}

/// Converts a hex string to a BoC
pub fn hex_to_boc(hex: &str) -> Result<Vec<Arc<Cell>>> {
    let hex: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes =
        hex::decode(&hex).map_err(|e| CellError::InvalidEncoding(format!("hex: {e}")))?;
    deserialize_boc(&bytes)
}

/// Converts a BoC to a hex string
pub fn boc_to_hex(roots: &[Arc<Cell>], options: &BocOptions) -> Result<String> {
    Ok(hex::encode(serialize_boc(roots, options)?))
}

/// Converts a BoC to base64
pub fn boc_to_base64(roots: &[Arc<Cell>], options: &BocOptions) -> Result<String> {
    let bytes = serialize_boc(roots, options)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Converts a base64 string (standard or URL-safe alphabet) to a BoC
pub fn base64_to_boc(b64: &str) -> Result<Vec<Arc<Cell>>> {
    let b64 = b64.trim();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(b64))
        .map_err(|e| CellError::InvalidEncoding(format!("base64: {e}")))?;
    deserialize_boc(&bytes)
}
