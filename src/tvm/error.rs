//! Error type shared by the cell, slice, BoC and dictionary code

use thiserror::Error;

/// Broad class of a [`CellError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A fixed limit (bits or references) was exceeded
    Capacity,
    /// The input bytes do not follow the wire format
    Format,
    /// The cell graph itself is malformed
    Structural,
    /// The API was used in a way it does not allow
    Misuse,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    #[error("Bit overflow: cannot write {requested} bits, only {available} available")]
    BitOverflow { requested: usize, available: usize },
    #[error("Reference overflow: a cell holds at most 4 references")]
    RefOverflow,

    #[error("Unknown BoC magic 0x{0:08x}")]
    UnknownMagic(u32),
    #[error("Unexpected end of BoC data: {0}")]
    UnexpectedEof(&'static str),
    #[error("Invalid BoC header: {0}")]
    InvalidHeader(String),
    #[error("Invalid cell record {index}: {reason}")]
    InvalidCellRecord { index: usize, reason: String },
    #[error("CRC32C mismatch: stored 0x{expected:08x}, computed 0x{actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("{0} unexpected bytes after BoC data")]
    TrailingData(usize),
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Cell {cell} references cell {reference}, topological order is broken")]
    BrokenOrder { cell: usize, reference: usize },
    #[error("Invalid exotic cell: {0}")]
    InvalidExotic(String),
    #[error("Cell depth {0} exceeds maximum")]
    DepthOverflow(u32),
    #[error("Stored hash of cell {0} does not match its contents")]
    HashMismatch(usize),

    #[error("Unable to parse exotic cell")]
    ExoticParse,
    #[error("Cell underflow: requested {requested} bits, {remaining} remaining")]
    BitUnderflow { requested: usize, remaining: usize },
    #[error("Cell underflow: no more references")]
    RefUnderflow,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl CellError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BitOverflow { .. } | Self::RefOverflow => ErrorKind::Capacity,
            Self::UnknownMagic(_)
            | Self::UnexpectedEof(_)
            | Self::InvalidHeader(_)
            | Self::InvalidCellRecord { .. }
            | Self::ChecksumMismatch { .. }
            | Self::TrailingData(_)
            | Self::InvalidEncoding(_) => ErrorKind::Format,
            Self::BrokenOrder { .. }
            | Self::InvalidExotic(_)
            | Self::DepthOverflow(_)
            | Self::HashMismatch(_) => ErrorKind::Structural,
            Self::ExoticParse
            | Self::BitUnderflow { .. }
            | Self::RefUnderflow
            | Self::InvalidArgument(_) => ErrorKind::Misuse,
        }
    }
}

pub type Result<T> = std::result::Result<T, CellError>;
