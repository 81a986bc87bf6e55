//! The keyspace: every key of the counter store and its typed value.
//!
//! Expiry is lazy. An entry whose deadline has passed is invisible to every
//! typed getter and is evicted by the next write that touches its key (or
//! by [`Keyspace::purge_expired`]).

use crate::error::{Error, Result};
use crate::store::value::{Entry, SortedSet, Value};
use crate::write_batch::{WriteBatch, WriteOp};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// In-memory map from key to entry.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    /// Creates an empty keyspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the live entry for `key`.
    pub fn get(&self, key: &str, now: u64) -> Option<&Entry> {
        self.entries.get(key).filter(|e| !e.is_expired(now))
    }

    /// Returns true if `key` holds a live entry.
    pub fn contains(&self, key: &str, now: u64) -> bool {
        self.get(key, now).is_some()
    }

    /// Returns the string stored at `key`.
    pub fn string(&self, key: &str, now: u64) -> Result<Option<&str>> {
        match self.get(key, now).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(Error::WrongType(key.to_string())),
        }
    }

    /// Returns the hash stored at `key`.
    pub fn hash(&self, key: &str, now: u64) -> Result<Option<&BTreeMap<String, String>>> {
        match self.get(key, now).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(Some(h)),
            Some(_) => Err(Error::WrongType(key.to_string())),
        }
    }

    /// Returns the sorted set stored at `key`.
    pub fn sorted_set(&self, key: &str, now: u64) -> Result<Option<&SortedSet>> {
        match self.get(key, now).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::ZSet(z)) => Ok(Some(z)),
            Some(_) => Err(Error::WrongType(key.to_string())),
        }
    }

    /// Returns the set stored at `key`.
    pub fn set(&self, key: &str, now: u64) -> Result<Option<&BTreeSet<String>>> {
        match self.get(key, now).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Set(s)) => Ok(Some(s)),
            Some(_) => Err(Error::WrongType(key.to_string())),
        }
    }

    /// Remaining time to live in milliseconds.
    ///
    /// `None` if the key does not exist, `Some(None)` if it never expires.
    pub fn ttl_millis(&self, key: &str, now: u64) -> Option<Option<u64>> {
        self.get(key, now).map(|e| e.expires_at.map(|at| at.saturating_sub(now)))
    }

    /// Entry for `key` regardless of expiry.
    pub(crate) fn raw(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Mutable entry for `key` regardless of expiry.
    pub(crate) fn raw_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.entries.get_mut(key)
    }

    /// Puts `entry` back under `key` verbatim.
    pub(crate) fn restore_raw(&mut self, key: &str, entry: Option<Entry>) {
        match entry {
            Some(entry) => {
                self.entries.insert(key.to_string(), entry);
            }
            None => {
                self.entries.remove(key);
            }
        }
    }

    /// Applies one mutation at time `now`.
    ///
    /// An expired entry under the target key is evicted first, so the
    /// mutation sees the key as absent.
    pub fn apply(&mut self, op: &WriteOp, now: u64) -> Result<()> {
        let key = op.key();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }

        match op {
            WriteOp::Set { key, value } => {
                self.entries.insert(key.clone(), Entry::new(Value::Str(value.clone())));
            }
            WriteOp::HSet { key, field, value } => {
                let entry = self.entry_or_insert(key, || Value::Hash(BTreeMap::new()));
                match &mut entry.value {
                    Value::Hash(h) => {
                        h.insert(field.clone(), value.clone());
                    }
                    _ => return Err(Error::WrongType(key.clone())),
                }
            }
            WriteOp::HDel { key, field } => {
                if let Some(entry) = self.entries.get_mut(key) {
                    match &mut entry.value {
                        Value::Hash(h) => {
                            h.remove(field);
                        }
                        _ => return Err(Error::WrongType(key.clone())),
                    }
                    self.remove_if_empty(key);
                }
            }
            WriteOp::ZSet { key, member, score } => {
                let entry = self.entry_or_insert(key, || Value::ZSet(SortedSet::new()));
                match &mut entry.value {
                    Value::ZSet(z) => {
                        z.insert(member, *score);
                    }
                    _ => return Err(Error::WrongType(key.clone())),
                }
            }
            WriteOp::ZRem { key, member } => {
                if let Some(entry) = self.entries.get_mut(key) {
                    match &mut entry.value {
                        Value::ZSet(z) => {
                            z.remove(member);
                        }
                        _ => return Err(Error::WrongType(key.clone())),
                    }
                    self.remove_if_empty(key);
                }
            }
            WriteOp::SAdd { key, member } => {
                let entry = self.entry_or_insert(key, || Value::Set(BTreeSet::new()));
                match &mut entry.value {
                    Value::Set(s) => {
                        s.insert(member.clone());
                    }
                    _ => return Err(Error::WrongType(key.clone())),
                }
            }
            WriteOp::SRem { key, member } => {
                if let Some(entry) = self.entries.get_mut(key) {
                    match &mut entry.value {
                        Value::Set(s) => {
                            s.remove(member);
                        }
                        _ => return Err(Error::WrongType(key.clone())),
                    }
                    self.remove_if_empty(key);
                }
            }
            WriteOp::Delete { key } => {
                self.entries.remove(key);
            }
            WriteOp::ExpireAt { key, at } => {
                if let Some(entry) = self.entries.get_mut(key) {
                    entry.expires_at = *at;
                }
            }
            WriteOp::Restore { key, entry } => {
                self.entries.insert(key.clone(), entry.clone());
            }
        }
        Ok(())
    }

    /// Replays a committed batch using the time it originally executed at.
    pub fn apply_batch(&mut self, batch: &WriteBatch) -> Result<()> {
        for op in batch.iter() {
            self.apply(op, batch.timestamp())?;
        }
        Ok(())
    }

    /// Evicts every expired entry. Returns the number removed.
    pub fn purge_expired(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }

    /// Captures every live entry as a batch of `Restore` operations.
    pub fn snapshot(&self, now: u64) -> WriteBatch {
        let mut batch = WriteBatch::new(now);
        let mut keys: Vec<_> = self.entries.iter().filter(|(_, e)| !e.is_expired(now)).collect();
        keys.sort_by(|a, b| a.0.cmp(b.0));
        for (key, entry) in keys {
            batch.push(WriteOp::Restore { key: key.clone(), entry: entry.clone() });
        }
        batch
    }

    /// Iterates over live keys in no particular order.
    pub fn keys(&self, now: u64) -> impl Iterator<Item = &str> {
        self.entries.iter().filter(move |(_, e)| !e.is_expired(now)).map(|(k, _)| k.as_str())
    }

    fn entry_or_insert(&mut self, key: &str, init: impl FnOnce() -> Value) -> &mut Entry {
        self.entries.entry(key.to_string()).or_insert_with(|| Entry::new(init()))
    }

    fn remove_if_empty(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(|e| e.value.is_empty_container()) {
            self.entries.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hset(key: &str, field: &str, value: &str) -> WriteOp {
        WriteOp::HSet { key: key.into(), field: field.into(), value: value.into() }
    }

    #[test]
    fn test_apply_creates_and_types() {
        let mut ks = Keyspace::new();
        ks.apply(&hset("article:1", "agree", "0"), 0).unwrap();
        ks.apply(&WriteOp::SAdd { key: "m".into(), member: "1".into() }, 0).unwrap();

        assert_eq!(ks.hash("article:1", 0).unwrap().unwrap()["agree"], "0");
        assert!(ks.set("m", 0).unwrap().unwrap().contains("1"));
        assert!(matches!(ks.sorted_set("article:1", 0), Err(Error::WrongType(_))));
        assert!(matches!(ks.apply(&WriteOp::SAdd { key: "article:1".into(), member: "x".into() }, 0),
            Err(Error::WrongType(_))));
    }

    #[test]
    fn test_empty_containers_are_removed() {
        let mut ks = Keyspace::new();
        ks.apply(&WriteOp::ZSet { key: "z".into(), member: "a".into(), score: 1 }, 0).unwrap();
        ks.apply(&WriteOp::ZRem { key: "z".into(), member: "a".into() }, 0).unwrap();
        assert!(!ks.contains("z", 0));

        ks.apply(&hset("h", "f", "v"), 0).unwrap();
        ks.apply(&WriteOp::HDel { key: "h".into(), field: "f".into() }, 0).unwrap();
        assert!(ks.is_empty());
    }

    #[test]
    fn test_lazy_expiry() {
        let mut ks = Keyspace::new();
        ks.apply(&hset("h", "agree", "5"), 0).unwrap();
        ks.apply(&WriteOp::ExpireAt { key: "h".into(), at: Some(1_000) }, 0).unwrap();

        assert!(ks.contains("h", 999));
        assert_eq!(ks.ttl_millis("h", 400), Some(Some(600)));
        assert!(!ks.contains("h", 1_000));
        assert_eq!(ks.len(), 1);

        // A write after expiry starts from an empty key
        ks.apply(&hset("h", "view", "1"), 2_000).unwrap();
        let h = ks.hash("h", 2_000).unwrap().unwrap();
        assert_eq!(h.len(), 1);
        assert_eq!(ks.ttl_millis("h", 2_000), Some(None));
    }

    #[test]
    fn test_purge_expired() {
        let mut ks = Keyspace::new();
        for i in 0..10 {
            let key = format!("k{}", i);
            ks.apply(&WriteOp::Set { key: key.clone(), value: "v".into() }, 0).unwrap();
            if i % 2 == 0 {
                ks.apply(&WriteOp::ExpireAt { key, at: Some(10) }, 0).unwrap();
            }
        }
        assert_eq!(ks.purge_expired(10), 5);
        assert_eq!(ks.len(), 5);
    }

    #[test]
    fn test_snapshot_skips_expired() {
        let mut ks = Keyspace::new();
        ks.apply(&hset("a", "f", "1"), 0).unwrap();
        ks.apply(&hset("b", "f", "1"), 0).unwrap();
        ks.apply(&WriteOp::ExpireAt { key: "b".into(), at: Some(5) }, 0).unwrap();

        let snapshot = ks.snapshot(10);
        assert_eq!(snapshot.len(), 1);

        let mut restored = Keyspace::new();
        restored.apply_batch(&snapshot).unwrap();
        assert_eq!(restored.hash("a", 10).unwrap(), ks.hash("a", 10).unwrap());
        assert!(!restored.contains("b", 0));
    }
}
