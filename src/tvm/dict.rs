//! TON Dictionary (HashMap) implementation
//!
//! Dictionaries in TON are binary Patricia tries stored in cells. Every edge
//! carries a label holding the key bits shared by everything below it. A fork
//! then stores two references, one for keys continuing with `0` and one for
//! keys continuing with `1`. A leaf stores the value right after its label.
//!
//! Labels have three encodings (`hml_short`, `hml_long`, `hml_same`); the
//! writer always picks the shortest one.

use crate::tvm::bits::BitString;
use crate::tvm::builder::CellBuilder;
use crate::tvm::cell::{Cell, CellType};
use crate::tvm::error::{CellError, Result};
use crate::tvm::slice::Slice;
use log::trace;
use num_bigint::BigUint;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Width of the length field in long and same labels, `ceil(log2(max_len + 1))`
fn length_bits(max_len: usize) -> usize {
    (usize::BITS - max_len.leading_zeros()) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelKind {
    Short,
    Long,
    Same,
}

fn label_kind(label: &[bool], max_len: usize) -> LabelKind {
    let n = label.len();
    let mut kind = LabelKind::Short;
    let mut best = 2 * n + 2;

    let long = 2 + length_bits(max_len) + n;
    if long < best {
        kind = LabelKind::Long;
        best = long;
    }
    if n > 0 && label.iter().all(|&b| b == label[0]) {
        let same = 3 + length_bits(max_len);
        if same < best {
            kind = LabelKind::Same;
        }
    }
    kind
}

fn store_label(builder: &mut CellBuilder, label: &[bool], max_len: usize) -> Result<()> {
    match label_kind(label, max_len) {
        LabelKind::Short => {
            builder.store_bit(false)?;
            for _ in label {
                builder.store_bit(true)?;
            }
            builder.store_bit(false)?;
            for &bit in label {
                builder.store_bit(bit)?;
            }
        }
        LabelKind::Long => {
            builder.store_uint(0b10, 2)?;
            builder.store_uint(label.len() as u64, length_bits(max_len))?;
            for &bit in label {
                builder.store_bit(bit)?;
            }
        }
        LabelKind::Same => {
            builder.store_uint(0b11, 2)?;
            builder.store_bit(label[0])?;
            builder.store_uint(label.len() as u64, length_bits(max_len))?;
        }
    }
    Ok(())
}

struct Entry<'v, V> {
    key: Vec<bool>,
    value: &'v V,
}

fn build_node<V, F>(
    entries: &[Entry<'_, V>],
    offset: usize,
    store_value: &mut F,
) -> Result<Arc<Cell>>
where
    F: FnMut(&V, &mut CellBuilder) -> Result<()>,
{
    let first = &entries[0];
    let last = &entries[entries.len() - 1];
    let key_size = first.key.len();
    let max_len = key_size - offset;

    let mut builder = CellBuilder::new();
    if entries.len() == 1 {
        store_label(&mut builder, &first.key[offset..], max_len)?;
        store_value(first.value, &mut builder)?;
        return builder.build();
    }

    // entries are sorted, so the first and last keys bound the common prefix
    let common = first.key[offset..]
        .iter()
        .zip(&last.key[offset..])
        .take_while(|(a, b)| a == b)
        .count();
    let split_at = offset + common;
    store_label(&mut builder, &first.key[offset..split_at], max_len)?;

    let split = entries.partition_point(|e| !e.key[split_at]);
    let left = build_node(&entries[..split], split_at + 1, &mut *store_value)?;
    let right = build_node(&entries[split..], split_at + 1, &mut *store_value)?;
    builder.store_reference(left)?;
    builder.store_reference(right)?;
    builder.build()
}

/// Encodes a map of `key_size`-bit keys into a dictionary root cell.
///
/// `store_value` writes each value into its leaf after the label. Returns
/// `None` for an empty map, which `HashmapE` encodes as a single `0` bit.
pub fn serialize_dict<V, F>(
    entries: impl IntoIterator<Item = (BigUint, V)>,
    key_size: usize,
    mut store_value: F,
) -> Result<Option<Arc<Cell>>>
where
    F: FnMut(&V, &mut CellBuilder) -> Result<()>,
{
    let sorted: BTreeMap<BigUint, V> = entries.into_iter().collect();
    if sorted.is_empty() {
        return Ok(None);
    }

    let mut prepared = Vec::with_capacity(sorted.len());
    for (key, value) in &sorted {
        if key.bits() > key_size as u64 {
            return Err(CellError::InvalidArgument(format!(
                "key {key} does not fit in {key_size} bits"
            )));
        }
        let bits = (0..key_size as u64).rev().map(|i| key.bit(i)).collect();
        prepared.push(Entry { key: bits, value });
    }

    trace!("serializing dictionary: {} entries, {key_size}-bit keys", prepared.len());
    build_node(&prepared, 0, &mut store_value).map(Some)
}

fn load_label(slice: &mut Slice<'_>, max_len: usize) -> Result<(usize, Vec<bool>)> {
    let (len, bits) = if !slice.load_bit()? {
        let mut len = 0;
        while slice.load_bit()? {
            len += 1;
        }
        let bits = (0..len).map(|_| slice.load_bit()).collect::<Result<Vec<_>>>()?;
        (len, bits)
    } else if !slice.load_bit()? {
        let len = slice.load_uint(length_bits(max_len))? as usize;
        let bits = (0..len.min(max_len))
            .map(|_| slice.load_bit())
            .collect::<Result<Vec<_>>>()?;
        (len, bits)
    } else {
        let bit = slice.load_bit()?;
        let len = slice.load_uint(length_bits(max_len))? as usize;
        (len, vec![bit; len.min(max_len)])
    };

    if len > max_len {
        return Err(CellError::InvalidEncoding(format!(
            "dictionary label of {len} bits where only {max_len} remain"
        )));
    }
    Ok((len, bits))
}

fn parse_node<V, F>(
    slice: &mut Slice<'_>,
    prefix: BigUint,
    remaining: usize,
    out: &mut BTreeMap<BigUint, V>,
    extract: &mut F,
) -> Result<()>
where
    F: FnMut(&mut Slice<'_>) -> Result<V>,
{
    let (len, label) = load_label(slice, remaining)?;
    let prefix = label
        .into_iter()
        .fold(prefix, |acc, bit| (acc << 1u8) | BigUint::from(bit as u8));

    if len == remaining {
        let value = extract(slice)?;
        out.insert(prefix, value);
        return Ok(());
    }

    let left = slice.load_reference()?;
    let right = slice.load_reference()?;
    for (bit, child) in [(0u8, left), (1u8, right)] {
        // pruned subtrees of a proof carry no entries
        if child.cell_type() == CellType::PrunedBranch {
            continue;
        }
        let mut child_slice = child.begin_parse()?;
        let child_prefix = (prefix.clone() << 1u8) | BigUint::from(bit);
        parse_node(
            &mut child_slice,
            child_prefix,
            remaining - len - 1,
            out,
            &mut *extract,
        )?;
    }
    Ok(())
}

/// Decodes a dictionary whose root cell is being read by `slice`.
///
/// The key width is not stored in the trie and must match the one used to
/// write it. `extract` reads one value from the leaf slice.
pub fn parse_dict<V, F>(
    slice: &mut Slice<'_>,
    key_size: usize,
    mut extract: F,
) -> Result<BTreeMap<BigUint, V>>
where
    F: FnMut(&mut Slice<'_>) -> Result<V>,
{
    let mut out = BTreeMap::new();
    parse_node(slice, BigUint::default(), key_size, &mut out, &mut extract)?;
    Ok(out)
}

/// Decodes a dictionary, taking whatever bits each leaf holds as its value
pub fn parse_dict_bit_string(
    slice: &mut Slice<'_>,
    key_size: usize,
) -> Result<BTreeMap<BigUint, BitString>> {
    parse_dict(slice, key_size, |leaf| leaf.load_remaining_bits())
}

/// Decodes a dictionary whose values are stored as the leaf's first reference
pub fn parse_dict_refs(
    slice: &mut Slice<'_>,
    key_size: usize,
) -> Result<BTreeMap<BigUint, Arc<Cell>>> {
    parse_dict(slice, key_size, |leaf| leaf.load_reference().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn store_u32(value: &u32, builder: &mut CellBuilder) -> Result<()> {
        builder.store_u32(*value)?;
        Ok(())
    }

    fn bits_of(pattern: &str) -> Vec<bool> {
        pattern.chars().map(|c| c == '1').collect()
    }

    #[test]
    fn test_label_kinds() {
        assert_eq!(label_kind(&[], 8), LabelKind::Short);
        assert_eq!(label_kind(&bits_of("1"), 1), LabelKind::Short);
        assert_eq!(label_kind(&bits_of("10101010"), 8), LabelKind::Long);
        assert_eq!(label_kind(&bits_of("11111111"), 8), LabelKind::Same);
        assert_eq!(label_kind(&bits_of("01"), 16), LabelKind::Short);
        assert_eq!(length_bits(0), 0);
        assert_eq!(length_bits(8), 4);
        assert_eq!(length_bits(7), 3);
    }

    #[test]
    fn test_single_entry_layout() {
        let root = serialize_dict([(BigUint::from(0xAAu8), 7u32)], 8, store_u32)
            .unwrap()
            .unwrap();
        // hml_long: 10, length 8 in 4 bits, then the key bits
        let mut slice = root.begin_parse().unwrap();
        assert_eq!(slice.load_uint(2).unwrap(), 0b10);
        assert_eq!(slice.load_uint(4).unwrap(), 8);
        assert_eq!(slice.load_byte().unwrap(), 0xAA);
        assert_eq!(slice.load_u32().unwrap(), 7);

        let root = serialize_dict([(BigUint::from(0xFFu8), 1u32)], 8, store_u32)
            .unwrap()
            .unwrap();
        let mut slice = root.begin_parse().unwrap();
        assert_eq!(slice.load_uint(3).unwrap(), 0b111);
        assert_eq!(slice.load_uint(4).unwrap(), 8);
        assert_eq!(slice.remaining_bits(), 32);
    }

    #[test]
    fn test_fork_layout() {
        let entries = [(BigUint::from(0u8), 10u32), (BigUint::from(1u8), 11u32)];
        let root = serialize_dict(entries, 1, store_u32).unwrap().unwrap();
        assert_eq!(root.reference_count(), 2);
        // empty label on the root, each leaf gets an empty label too
        assert_eq!(root.bits().to_fift_hex(), "2_");

        let mut slice = root.begin_parse().unwrap();
        let parsed = parse_dict(&mut slice, 1, |leaf| leaf.load_u32()).unwrap();
        assert_eq!(parsed[&BigUint::from(0u8)], 10);
        assert_eq!(parsed[&BigUint::from(1u8)], 11);
    }

    #[test]
    fn test_round_trip() {
        let entries: BTreeMap<BigUint, u32> = [1u32, 17, 128, 255, 4096, 65535]
            .into_iter()
            .map(|k| (BigUint::from(k), k * 3))
            .collect();
        let root = serialize_dict(entries.clone(), 16, store_u32)
            .unwrap()
            .unwrap();

        let mut slice = root.begin_parse().unwrap();
        let parsed = parse_dict(&mut slice, 16, |leaf| leaf.load_u32()).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn test_empty_and_oversized_keys() {
        let empty: Vec<(BigUint, u32)> = Vec::new();
        assert!(serialize_dict(empty, 8, store_u32).unwrap().is_none());

        let err = serialize_dict([(BigUint::from(256u32), 0u32)], 8, store_u32).unwrap_err();
        assert!(matches!(err, CellError::InvalidArgument(_)));
    }

    #[test]
    fn test_bit_string_and_ref_values() {
        let child = CellBuilder::new().with_data("1011").unwrap().build().unwrap();
        let refs = serialize_dict(
            [(BigUint::from(5u8), child.clone())],
            4,
            |value, builder| {
                builder.store_reference(value.clone())?;
                Ok(())
            },
        )
        .unwrap()
        .unwrap();
        let mut slice = refs.begin_parse().unwrap();
        let parsed = parse_dict_refs(&mut slice, 4).unwrap();
        assert!(Arc::ptr_eq(&parsed[&BigUint::from(5u8)], &child));

        let bits = serialize_dict(
            [(BigUint::from(2u8), "110"), (BigUint::from(9u8), "0")],
            4,
            |value, builder| {
                for c in value.chars() {
                    builder.store_bit(c == '1')?;
                }
                Ok(())
            },
        )
        .unwrap()
        .unwrap();
        let mut slice = bits.begin_parse().unwrap();
        let parsed = parse_dict_bit_string(&mut slice, 4).unwrap();
        assert_eq!(parsed[&BigUint::from(2u8)].to_fift_hex(), "D_");
        assert_eq!(parsed[&BigUint::from(9u8)].len(), 1);
    }

    #[test]
    fn test_hashmap_e_wrapper() {
        let dict = serialize_dict([(BigUint::from(3u8), 42u32)], 8, store_u32).unwrap();
        let mut builder = CellBuilder::new();
        builder.store_dict(dict).unwrap();
        builder.store_dict(None).unwrap();
        let cell = builder.build().unwrap();

        let mut slice = cell.begin_parse().unwrap();
        let root = slice.load_dict().unwrap().unwrap();
        assert!(slice.load_dict().unwrap().is_none());

        let mut root_slice = root.begin_parse().unwrap();
        let parsed = parse_dict(&mut root_slice, 8, |leaf| leaf.load_u32()).unwrap();
        assert_eq!(parsed.into_iter().collect::<Vec<_>>(), vec![(BigUint::from(3u8), 42)]);
    }

    #[test]
    fn test_only_pruned_children_are_skipped() {
        let leaf = |value: u32| {
            let mut builder = CellBuilder::new();
            // hml_short with an empty label
            builder.store_uint(0b00, 2).unwrap();
            builder.store_u32(value).unwrap();
            builder.build().unwrap()
        };
        let fork = |right: Arc<Cell>| {
            let mut builder = CellBuilder::new();
            builder.store_uint(0b00, 2).unwrap();
            builder.store_reference(leaf(10)).unwrap();
            builder.store_reference(right).unwrap();
            builder.build().unwrap()
        };

        let pruned = CellBuilder::pruned_branch(&leaf(11), 1).unwrap();
        let root = fork(pruned);
        let mut slice = root.begin_parse().unwrap();
        let parsed = parse_dict(&mut slice, 1, |leaf| leaf.load_u32()).unwrap();
        assert_eq!(parsed.into_iter().collect::<Vec<_>>(), vec![(BigUint::from(0u8), 10)]);

        let library = CellBuilder::library_reference([3u8; 32]).unwrap();
        let root = fork(library);
        let mut slice = root.begin_parse().unwrap();
        assert_eq!(
            parse_dict(&mut slice, 1, |leaf| leaf.load_u32()).unwrap_err(),
            CellError::ExoticParse
        );
    }

    #[test]
    fn test_label_longer_than_key_is_rejected() {
        let mut builder = CellBuilder::new();
        builder.store_uint(0b10, 2).unwrap();
        builder.store_uint(7, 3).unwrap();
        builder.store_uint(0, 7).unwrap();
        let cell = builder.build().unwrap();

        let mut slice = cell.begin_parse().unwrap();
        let err = parse_dict_bit_string(&mut slice, 4).unwrap_err();
        assert!(matches!(err, CellError::InvalidEncoding(_)));
    }

    proptest! {
        #[test]
        fn prop_dict_identity(entries in proptest::collection::btree_map(any::<u16>(), any::<u32>(), 0..40)) {
            let map: BTreeMap<BigUint, u32> = entries
                .iter()
                .map(|(&k, &v)| (BigUint::from(k), v))
                .collect();
            let reversed: Vec<(BigUint, u32)> = map.clone().into_iter().rev().collect();

            let forward = serialize_dict(map.clone(), 16, store_u32).unwrap();
            let backward = serialize_dict(reversed, 16, store_u32).unwrap();

            match (forward, backward) {
                (None, None) => prop_assert!(map.is_empty()),
                (Some(a), Some(b)) => {
                    prop_assert_eq!(a.repr_hash(), b.repr_hash());
                    let mut slice = a.begin_parse().unwrap();
                    let parsed = parse_dict(&mut slice, 16, |leaf| leaf.load_u32()).unwrap();
                    prop_assert_eq!(parsed, map);
                }
                _ => prop_assert!(false, "insertion order changed emptiness"),
            }
        }
    }
}
