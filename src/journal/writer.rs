//! Journal writer implementation.

use super::record::{Record, RecordType};
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends records to a journal file
pub struct JournalWriter {
    /// Path to the journal file
    path: PathBuf,
    /// Buffered writer for efficient I/O
    writer: BufWriter<File>,
    /// Current file size
    file_size: u64,
}

impl JournalWriter {
    /// Create a new journal writer
    ///
    /// Opens the file in append mode, creating it if it doesn't exist.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let file_size = file.metadata()?.len();

        Ok(Self { path, writer: BufWriter::new(file), file_size })
    }

    /// Append one record and flush it to the OS.
    ///
    /// Each record holds one complete unit, so a torn write can only ever
    /// lose the last unit, never half of it.
    pub fn append(&mut self, record_type: RecordType, data: &[u8]) -> Result<()> {
        let encoded = Record::new(record_type, data.to_vec()).encode();
        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        self.file_size += encoded.len() as u64;
        Ok(())
    }

    /// Sync the journal to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Get the current file size
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Get the path to the journal file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the writer, syncing all data
    pub fn close(mut self) -> Result<()> {
        self.sync()
    }
}

impl Drop for JournalWriter {
    fn drop(&mut self) {
        // Best effort flush on drop
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::record::HEADER_SIZE;
    use tempfile::NamedTempFile;

    #[test]
    fn test_append_tracks_size() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut writer = JournalWriter::new(temp_file.path()).unwrap();
        assert_eq!(writer.file_size(), 0);

        writer.append(RecordType::Batch, b"hello world").unwrap();
        writer.sync().unwrap();

        assert_eq!(writer.file_size(), (HEADER_SIZE + 11) as u64);
        assert_eq!(std::fs::metadata(temp_file.path()).unwrap().len(), writer.file_size());
    }

    #[test]
    fn test_writer_reopen() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        {
            let mut writer = JournalWriter::new(&path).unwrap();
            writer.append(RecordType::Batch, b"first write").unwrap();
            writer.close().unwrap();
        }

        // Reopen and append more
        let mut writer = JournalWriter::new(&path).unwrap();
        let initial_size = writer.file_size();
        assert!(initial_size > 0);
        writer.append(RecordType::Batch, b"second write").unwrap();
        assert!(writer.file_size() > initial_size);
        assert_eq!(writer.path(), path.as_path());
    }
}
