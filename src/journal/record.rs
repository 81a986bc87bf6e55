//! Journal record format.
//!
//! Each record consists of:
//! - Checksum (4 bytes): CRC32 of type and data
//! - Length (4 bytes): Length of the data
//! - Type (1 byte): Record type (Batch, Checkpoint)
//! - Data (variable): an encoded `WriteBatch`

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;

/// Size of the record header (checksum + length + type)
pub const HEADER_SIZE: usize = 9;

/// Largest payload accepted when reading a record back
pub const MAX_RECORD_SIZE: usize = 1 << 30; // 1GB

/// What a record's payload means on replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Mutations of one committed script or write
    Batch = 1,
    /// Full keyspace image; replay starts over from it
    Checkpoint = 2,
}

impl RecordType {
    /// Convert from u8 to RecordType
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordType::Batch),
            2 => Ok(RecordType::Checkpoint),
            _ => Err(Error::Corruption(format!("Invalid record type: {}", value))),
        }
    }
}

/// A journal record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Type of the record
    pub record_type: RecordType,
    /// Data payload
    pub data: Vec<u8>,
}

impl Record {
    /// Create a new record
    pub fn new(record_type: RecordType, data: Vec<u8>) -> Self {
        Self { record_type, data }
    }

    /// Encode the record into bytes
    ///
    /// Format: [checksum: u32][length: u32][type: u8][data: bytes]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.data.len());
        buf.put_u32_le(Self::calculate_checksum(self.record_type, &self.data));
        buf.put_u32_le(self.data.len() as u32);
        buf.put_u8(self.record_type as u8);
        buf.put_slice(&self.data);
        buf.to_vec()
    }

    /// Decode a record from bytes
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corruption(format!("Record too short: {} bytes", data.len())));
        }

        let checksum = data.get_u32_le();
        let length = data.get_u32_le() as usize;
        let record_type = RecordType::from_u8(data.get_u8())?;

        if data.len() < length {
            return Err(Error::Corruption(format!(
                "Incomplete record: expected {} bytes, got {}",
                length,
                data.len()
            )));
        }

        let record_data = data[..length].to_vec();
        let expected = Self::calculate_checksum(record_type, &record_data);
        if checksum != expected {
            return Err(Error::Corruption(format!(
                "Checksum mismatch: expected {:#x}, got {:#x}",
                expected, checksum
            )));
        }

        Ok(Record { record_type, data: record_data })
    }

    /// Calculate CRC32 checksum for record type and data
    fn calculate_checksum(record_type: RecordType, data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&[record_type as u8]);
        hasher.update(data);
        hasher.finalize()
    }

    /// Get the total size of the encoded record
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }
}
