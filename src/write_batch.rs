//! WriteBatch records the mutations of one atomic unit.
//!
//! Every script and every direct write produces exactly one WriteBatch. The
//! batch is the unit the journal persists and the unit replayed on recovery,
//! so a script is either entirely present in the journal or not at all.
//!
//! Operations are effect-level (final field values, final scores) rather than
//! the commands that produced them, which makes replay deterministic.
//!
//! # Example
//!
//! ```
//! use engagedb::WriteBatch;
//!
//! let mut batch = WriteBatch::new(1_700_000_000_000);
//! batch.hset("article:1", "agree", "1");
//! batch.zset("article:hot", "1", 1);
//! assert_eq!(batch.len(), 2);
//! ```

use crate::error::Result;
use crate::store::value::Entry;
use serde::{Deserialize, Serialize};

/// Type of write operation in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Store a plain string, clearing any expiry
    Set {
        /// Target key
        key: String,
        /// New value
        value: String,
    },
    /// Set one hash field, creating the hash if needed
    HSet {
        /// Target key
        key: String,
        /// Hash field
        field: String,
        /// New field value
        value: String,
    },
    /// Remove one hash field
    HDel {
        /// Target key
        key: String,
        /// Hash field
        field: String,
    },
    /// Set a sorted-set member's score, creating the set if needed
    ZSet {
        /// Target key
        key: String,
        /// Member
        member: String,
        /// New score
        score: i64,
    },
    /// Remove a sorted-set member
    ZRem {
        /// Target key
        key: String,
        /// Member
        member: String,
    },
    /// Add a set member, creating the set if needed
    SAdd {
        /// Target key
        key: String,
        /// Member
        member: String,
    },
    /// Remove a set member
    SRem {
        /// Target key
        key: String,
        /// Member
        member: String,
    },
    /// Remove a key entirely
    Delete {
        /// Target key
        key: String,
    },
    /// Set (or clear) a key's absolute expiry in unix milliseconds
    ExpireAt {
        /// Target key
        key: String,
        /// Deadline, None to persist
        at: Option<u64>,
    },
    /// Replace a key with a full entry (checkpoint snapshots)
    Restore {
        /// Target key
        key: String,
        /// Complete entry
        entry: Entry,
    },
}

impl WriteOp {
    /// The key this operation touches.
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Set { key, .. }
            | WriteOp::HSet { key, .. }
            | WriteOp::HDel { key, .. }
            | WriteOp::ZSet { key, .. }
            | WriteOp::ZRem { key, .. }
            | WriteOp::SAdd { key, .. }
            | WriteOp::SRem { key, .. }
            | WriteOp::Delete { key }
            | WriteOp::ExpireAt { key, .. }
            | WriteOp::Restore { key, .. } => key,
        }
    }
}

/// WriteBatch accumulates the operations of one atomic unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    /// Wall-clock time (unix ms) the unit executed at; replay uses it to
    /// judge expiry the same way the original execution did.
    timestamp: u64,
    operations: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates a new empty WriteBatch stamped with `timestamp`.
    pub fn new(timestamp: u64) -> Self {
        Self { timestamp, operations: Vec::new() }
    }

    /// Appends an operation.
    pub fn push(&mut self, op: WriteOp) {
        self.operations.push(op);
    }

    /// Adds a hash field write.
    pub fn hset(&mut self, key: &str, field: &str, value: &str) {
        self.push(WriteOp::HSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        });
    }

    /// Adds a sorted-set score write.
    pub fn zset(&mut self, key: &str, member: &str, score: i64) {
        self.push(WriteOp::ZSet { key: key.to_string(), member: member.to_string(), score });
    }

    /// Adds a key deletion.
    pub fn delete(&mut self, key: &str) {
        self.push(WriteOp::Delete { key: key.to_string() });
    }

    /// Clears all operations from the batch.
    pub fn clear(&mut self) {
        self.operations.clear();
    }

    /// Returns the number of operations in the batch.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the batch contains no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Execution timestamp of the batch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns an iterator over the operations in the batch.
    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.operations.iter()
    }

    /// Serializes the batch for the journal.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserializes a batch read back from the journal.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
