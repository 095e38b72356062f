//! Codec for TON cells and the Bag of Cells wire format

pub mod cli;
pub mod crc;
pub mod tvm;
pub mod utils;
