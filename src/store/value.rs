//! Typed values held by the counter store.
//!
//! Every key maps to an [`Entry`]: one value plus an optional absolute
//! expiry. Values mirror the shapes the engagement engine needs:
//!
//! - `Str`: plain string
//! - `Hash`: field map (counter records)
//! - `ZSet`: members ordered by integer score (rankings, indexes)
//! - `Set`: unordered members (idempotency markers)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A value stored under a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Plain string.
    Str(String),
    /// Field map.
    Hash(BTreeMap<String, String>),
    /// Sorted set.
    ZSet(SortedSet),
    /// Unordered set.
    Set(BTreeSet<String>),
}

impl Value {
    /// Name of the value type, as reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Hash(_) => "hash",
            Value::ZSet(_) => "zset",
            Value::Set(_) => "set",
        }
    }

    /// Returns true for containers that hold no elements.
    ///
    /// Empty containers are removed from the keyspace.
    pub fn is_empty_container(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::Hash(h) => h.is_empty(),
            Value::ZSet(z) => z.is_empty(),
            Value::Set(s) => s.is_empty(),
        }
    }

    /// Number of elements in a container (1 for strings).
    pub fn len(&self) -> usize {
        match self {
            Value::Str(_) => 1,
            Value::Hash(h) => h.len(),
            Value::ZSet(z) => z.len(),
            Value::Set(s) => s.len(),
        }
    }
}

/// A value together with its absolute expiry (unix milliseconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The stored value
    pub value: Value,
    /// Expiry deadline, None for persistent keys
    pub expires_at: Option<u64>,
}

impl Entry {
    /// Creates a persistent entry.
    pub fn new(value: Value) -> Self {
        Self { value, expires_at: None }
    }

    /// Returns true if the entry is no longer visible at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// Members ordered by integer score, ties broken by member name.
///
/// Keeps a member -> score map for O(1) lookups and an ordered index for
/// range queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<(String, i64)>", into = "Vec<(String, i64)>")]
pub struct SortedSet {
    scores: HashMap<String, i64>,
    order: BTreeSet<(i64, String)>,
}

impl SortedSet {
    /// Creates an empty sorted set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the score of `member`. Returns true if the member was new.
    pub fn insert(&mut self, member: &str, score: i64) -> bool {
        match self.scores.insert(member.to_string(), score) {
            Some(old) => {
                self.order.remove(&(old, member.to_string()));
                self.order.insert((score, member.to_string()));
                false
            }
            None => {
                self.order.insert((score, member.to_string()));
                true
            }
        }
    }

    /// Adds `delta` to the score of `member` (starting from 0) and returns
    /// the new score. The set is unchanged if the score would overflow.
    pub fn incr_by(&mut self, member: &str, delta: i64) -> Result<i64> {
        let score = self
            .score(member)
            .unwrap_or(0)
            .checked_add(delta)
            .ok_or_else(|| Error::invalid_argument("increment would overflow"))?;
        self.insert(member, score);
        Ok(score)
    }

    /// Removes `member`. Returns true if it was present.
    pub fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.order.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    /// Returns the score of `member`.
    pub fn score(&self, member: &str) -> Option<i64> {
        self.scores.get(member).copied()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Returns true if there are no members.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Members from highest to lowest score, `start..=stop` by rank.
    ///
    /// Negative indexes count from the end, as in `ZREVRANGE`.
    pub fn rev_range(&self, start: isize, stop: isize) -> Vec<(String, i64)> {
        let len = self.len() as isize;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Vec::new();
        }

        self.order
            .iter()
            .rev()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|(score, member)| (member.clone(), *score))
            .collect()
    }

    /// Iterates members from lowest to highest score.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.order.iter().map(|(score, member)| (member.as_str(), *score))
    }
}

impl From<Vec<(String, i64)>> for SortedSet {
    fn from(pairs: Vec<(String, i64)>) -> Self {
        let mut set = SortedSet::new();
        for (member, score) in pairs {
            set.insert(&member, score);
        }
        set
    }
}

impl From<SortedSet> for Vec<(String, i64)> {
    fn from(set: SortedSet) -> Self {
        set.order.into_iter().map(|(score, member)| (member, score)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_set_insert_and_update() {
        let mut z = SortedSet::new();
        assert!(z.insert("a", 3));
        assert!(z.insert("b", 1));
        assert!(!z.insert("a", 0));

        assert_eq!(z.score("a"), Some(0));
        assert_eq!(z.len(), 2);
        let ordered: Vec<_> = z.iter().collect();
        assert_eq!(ordered, vec![("a", 0), ("b", 1)]);
    }

    #[test]
    fn test_sorted_set_incr_and_remove() {
        let mut z = SortedSet::new();
        assert_eq!(z.incr_by("x", 2).unwrap(), 2);
        assert_eq!(z.incr_by("x", -1).unwrap(), 1);
        assert!(z.remove("x"));
        assert!(!z.remove("x"));
        assert!(z.is_empty());
    }

    #[test]
    fn test_sorted_set_incr_overflow() {
        let mut z = SortedSet::new();
        z.insert("m", i64::MAX);
        assert!(matches!(z.incr_by("m", 1), Err(Error::InvalidArgument(_))));
        assert_eq!(z.score("m"), Some(i64::MAX));
        z.insert("n", i64::MIN);
        assert!(z.incr_by("n", -1).is_err());
        assert_eq!(z.len(), 2);
    }

    #[test]
    fn test_sorted_set_rev_range() {
        let mut z = SortedSet::new();
        for (i, m) in ["a", "b", "c", "d"].iter().enumerate() {
            z.insert(m, i as i64);
        }

        let top2: Vec<_> = z.rev_range(0, 1).into_iter().map(|(m, _)| m).collect();
        assert_eq!(top2, vec!["d", "c"]);

        let all = z.rev_range(0, -1);
        assert_eq!(all.len(), 4);
        assert_eq!(all[3], ("a".to_string(), 0));

        assert!(z.rev_range(5, 10).is_empty());
        assert_eq!(z.rev_range(-2, -1).len(), 2);
    }

    #[test]
    fn test_sorted_set_serde_keeps_order() {
        let mut z = SortedSet::new();
        z.insert("m1", 10);
        z.insert("m2", 5);

        let bytes = bincode::serialize(&z).unwrap();
        let decoded: SortedSet = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, z);
        assert_eq!(decoded.rev_range(0, 0), vec![("m1".to_string(), 10)]);
    }

    #[test]
    fn test_entry_expiry() {
        let entry = Entry { value: Value::Str("v".into()), expires_at: Some(100) };
        assert!(!entry.is_expired(99));
        assert!(entry.is_expired(100));
        assert!(!Entry::new(Value::Str("v".into())).is_expired(u64::MAX));
    }
}
