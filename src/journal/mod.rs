//! Write-ahead journal for the counter store.
//!
//! The journal makes committed scripts survive a restart. Every committed
//! unit is appended as one `Batch` record before its effects become visible
//! to other clients; recovery replays the records in order.
//!
//! ## Architecture
//!
//! - **Record Format**: each record carries a CRC32 checksum over its payload
//! - **Files**: numbered `000001.journal`, `000002.journal`, ...
//! - **Checkpoint**: the live keyspace is written as a single `Checkpoint`
//!   record into a fresh file and older files are deleted
//! - **Recovery**: records are replayed up to the first corrupt one; a torn
//!   tail in the newest file is truncated away
//!
//! ## Usage
//!
//! ```rust,no_run
//! use engagedb::journal::Journal;
//! use engagedb::WriteBatch;
//!
//! # fn main() -> Result<(), engagedb::Error> {
//! let (mut journal, records) = Journal::open("./journal", false)?;
//! println!("recovered {} records", records.len());
//!
//! let mut batch = WriteBatch::new(0);
//! batch.hset("article:1", "agree", "1");
//! journal.append(&batch)?;
//! # Ok(())
//! # }
//! ```

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::JournalReader;
pub use record::{Record, RecordType};
pub use writer::JournalWriter;

use crate::error::Result;
use crate::write_batch::WriteBatch;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Journal manager that owns the active file
pub struct Journal {
    dir: PathBuf,
    number: u64,
    writer: JournalWriter,
    sync: bool,
}

impl Journal {
    /// Opens the journal in `dir` and returns every recoverable record.
    ///
    /// `dir` must exist. With `sync` every append is fsync'd.
    pub fn open<P: AsRef<Path>>(dir: P, sync: bool) -> Result<(Self, Vec<Record>)> {
        let dir = dir.as_ref().to_path_buf();
        let numbers = list_journals(&dir)?;
        let mut records = Vec::new();

        for (i, number) in numbers.iter().enumerate() {
            let path = dir.join(journal_filename(*number));
            let mut reader = JournalReader::new(&path)?;
            records.extend(reader.recover_all()?);

            let file_len = fs::metadata(&path)?.len();
            if reader.position() < file_len {
                if i + 1 == numbers.len() {
                    log::warn!(
                        "Truncating torn journal tail of {:?} from {} to {} bytes",
                        path,
                        file_len,
                        reader.position()
                    );
                    OpenOptions::new().write(true).open(&path)?.set_len(reader.position())?;
                } else {
                    log::warn!("Ignoring corrupt tail of older journal {:?}", path);
                }
            }
        }

        let number = numbers.last().copied().unwrap_or(1);
        let writer = JournalWriter::new(dir.join(journal_filename(number)))?;
        log::info!(
            "Opened journal {:?} (file {}, {} records recovered)",
            dir,
            number,
            records.len()
        );

        Ok((Self { dir, number, writer, sync }, records))
    }

    /// Appends one committed batch.
    pub fn append(&mut self, batch: &WriteBatch) -> Result<()> {
        let data = batch.encode()?;
        self.writer.append(RecordType::Batch, &data)?;
        if self.sync {
            self.writer.sync()?;
        }
        Ok(())
    }

    /// Replaces the journal with a single snapshot record.
    ///
    /// The snapshot is written and synced to a new file before older files
    /// are removed, so a crash at any point leaves a replayable journal.
    pub fn checkpoint(&mut self, snapshot: &WriteBatch) -> Result<()> {
        let next = self.number + 1;
        let mut writer = JournalWriter::new(self.dir.join(journal_filename(next)))?;
        writer.append(RecordType::Checkpoint, &snapshot.encode()?)?;
        writer.sync()?;

        let previous = std::mem::replace(&mut self.writer, writer);
        drop(previous);
        self.number = next;

        for number in list_journals(&self.dir)? {
            if number < next {
                let path = self.dir.join(journal_filename(number));
                if let Err(e) = fs::remove_file(&path) {
                    log::warn!("Failed to remove old journal {:?}: {}", path, e);
                }
            }
        }

        log::info!(
            "Checkpointed {} keys into journal file {} ({} bytes)",
            snapshot.len(),
            next,
            self.writer.file_size()
        );
        Ok(())
    }

    /// Syncs the active file to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.sync()
    }

    /// Size of the active file in bytes.
    pub fn size(&self) -> u64 {
        self.writer.file_size()
    }

    /// Number of the active file.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Journal directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Generate a journal filename for a given file number
pub fn journal_filename(number: u64) -> String {
    format!("{:06}.journal", number)
}

/// Parse a journal filename to extract the file number
pub fn parse_journal_filename(filename: &str) -> Option<u64> {
    filename.strip_suffix(".journal")?.parse().ok()
}

/// Lists the journal file numbers in `dir`, oldest first.
fn list_journals(dir: &Path) -> Result<Vec<u64>> {
    let mut numbers = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(number) = entry.file_name().to_str().and_then(parse_journal_filename) {
            numbers.push(number);
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn batch(field: &str) -> WriteBatch {
        let mut batch = WriteBatch::new(1);
        batch.hset("article:1", field, "1");
        batch
    }

    #[test]
    fn test_journal_filename() {
        assert_eq!(journal_filename(1), "000001.journal");
        assert_eq!(journal_filename(123), "000123.journal");
        assert_eq!(parse_journal_filename("000123.journal"), Some(123));
        assert_eq!(parse_journal_filename("000123.log"), None);
        assert_eq!(parse_journal_filename("invalid"), None);
    }

    #[test]
    fn test_journal_append_and_recover() {
        let dir = TempDir::new().unwrap();
        {
            let (mut journal, records) = Journal::open(dir.path(), true).unwrap();
            assert!(records.is_empty());
            journal.append(&batch("agree")).unwrap();
            journal.append(&batch("view")).unwrap();
            assert!(journal.size() > 0);
        }

        let (_, records) = Journal::open(dir.path(), true).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(WriteBatch::decode(&records[1].data).unwrap(), batch("view"));
    }

    #[test]
    fn test_journal_checkpoint_rotates() {
        let dir = TempDir::new().unwrap();
        let (mut journal, _) = Journal::open(dir.path(), false).unwrap();
        journal.append(&batch("agree")).unwrap();
        journal.checkpoint(&batch("snapshot")).unwrap();
        journal.append(&batch("after")).unwrap();
        assert_eq!(journal.number(), 2);
        drop(journal);

        assert_eq!(list_journals(dir.path()).unwrap(), vec![2]);
        let (_, records) = Journal::open(dir.path(), false).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_type, RecordType::Checkpoint);
        assert_eq!(records[1].record_type, RecordType::Batch);
    }

    #[test]
    fn test_journal_truncates_torn_tail() {
        let dir = TempDir::new().unwrap();
        {
            let (mut journal, _) = Journal::open(dir.path(), true).unwrap();
            journal.append(&batch("agree")).unwrap();
        }
        let path = dir.path().join(journal_filename(1));
        let mut bytes = fs::read(&path).unwrap();
        let good_len = bytes.len();
        bytes.extend_from_slice(&[1, 2, 3]);
        fs::write(&path, &bytes).unwrap();

        {
            let (mut journal, records) = Journal::open(dir.path(), true).unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(fs::metadata(&path).unwrap().len(), good_len as u64);
            journal.append(&batch("view")).unwrap();
        }

        let (_, records) = Journal::open(dir.path(), true).unwrap();
        assert_eq!(records.len(), 2);
    }
}
