//! Journal reader implementation for recovery.

use super::record::{Record, HEADER_SIZE, MAX_RECORD_SIZE};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Reads records back from a journal file
pub struct JournalReader {
    /// Buffered reader for efficient I/O
    reader: BufReader<File>,
    /// Offset just past the last record read successfully
    position: u64,
}

impl JournalReader {
    /// Open a journal file for reading
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self { reader: BufReader::new(file), position: 0 })
    }

    /// Read the next record
    ///
    /// Returns None at a clean end of file.
    pub fn read_next(&mut self) -> Result<Option<Record>> {
        let mut header = [0u8; HEADER_SIZE];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(None),
            n if n < HEADER_SIZE => {
                return Err(Error::Corruption(format!("Truncated header: {} bytes", n)))
            }
            _ => {}
        }

        let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if length > MAX_RECORD_SIZE {
            return Err(Error::Corruption(format!("Record length {} exceeds limit", length)));
        }

        let mut buffer = vec![0u8; HEADER_SIZE + length];
        buffer[..HEADER_SIZE].copy_from_slice(&header);
        let read = read_full(&mut self.reader, &mut buffer[HEADER_SIZE..])?;
        if read < length {
            return Err(Error::Corruption(format!(
                "Truncated record: expected {} bytes, got {}",
                length, read
            )));
        }

        let record = Record::decode(&buffer)?;
        self.position += buffer.len() as u64;
        Ok(Some(record))
    }

    /// Offset just past the last valid record
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Recover all records from the journal
    ///
    /// Returns every valid record. Stops on first corruption; the torn tail
    /// starts at [`JournalReader::position`].
    pub fn recover_all(&mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();

        loop {
            match self.read_next() {
                Ok(Some(record)) => records.push(record),
                Ok(None) => break,
                Err(Error::Corruption(msg)) => {
                    log::warn!("Journal corruption at position {}: {}", self.position, msg);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(records)
    }
}

/// Reads until `buf` is full or EOF; returns the number of bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(filled)
}
