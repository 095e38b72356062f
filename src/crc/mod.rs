use crc::{CRC_32_ISCSI, Crc};

/// CRC-32C (Castagnoli), the checksum of the BoC trailer
pub const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);
