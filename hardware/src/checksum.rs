//! CRC-32 integrity check for fixed-layout records.
//!
//! Persistent records stored in FRAM carry a trailing little-endian CRC-32
//! (ISO HDLC, the Ethernet/ZIP polynomial) over every preceding byte.
//!
//! This module provides both standalone functions and a trait for
//! working with checksums on record structs.

use bytemuck::{bytes_of, bytes_of_mut, Pod};
use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Size of the trailing checksum field.
pub const CHECKSUM_LEN: usize = 4;

/// Trait for records with a trailing 32-bit checksum.
///
/// # Requirements
/// - The implementing type must be `Pod` (plain old data)
/// - The checksum field must be the last 4 bytes of the struct
pub trait Checksummed: Pod {
    /// Verify the record's stored checksum matches the computed value.
    fn verify_checksum(&self) -> bool {
        verify_checksum_bytes(bytes_of(self))
    }

    /// Compute what the checksum should be for this record.
    fn compute_checksum(&self) -> u32 {
        let bytes = bytes_of(self);
        compute_checksum(&bytes[..bytes.len() - CHECKSUM_LEN])
    }

    /// Compute and write the correct checksum to the record.
    ///
    /// After calling this, `verify_checksum()` will return `true`.
    fn update_checksum(&mut self) {
        let bytes = bytes_of_mut(self);
        let len = bytes.len();
        let checksum = compute_checksum(&bytes[..len - CHECKSUM_LEN]);
        bytes[len - CHECKSUM_LEN..].copy_from_slice(&checksum.to_le_bytes());
    }
}

/// CRC-32 of a byte slice.
pub fn compute_checksum(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Verify a record whose last four bytes hold the checksum of the rest.
pub fn verify_checksum_bytes(record: &[u8]) -> bool {
    if record.len() <= CHECKSUM_LEN {
        return false;
    }

    let data_end = record.len() - CHECKSUM_LEN;
    let mut stored = [0u8; CHECKSUM_LEN];
    stored.copy_from_slice(&record[data_end..]);

    compute_checksum(&record[..data_end]) == u32::from_le_bytes(stored)
}
