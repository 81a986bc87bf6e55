//! System-of-record interface.
//!
//! The repository owns the authoritative counters and the engagement edges
//! (who agreed with, collected or follows what). The controller writes it
//! before touching the cache and the rehydrator reads it on a cache miss.

use crate::engine::keys::{self, field};
use crate::engine::model::{Kind, Visibility};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Identity of an authoritative counter record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityRef {
    /// Counters of a content entity.
    Content {
        /// Content kind
        kind: Kind,
        /// Entity id
        id: u64,
    },
    /// Achievement of a user.
    Achievement(String),
    /// Per-kind content counts of a user.
    ContentCounts(String),
}

impl EntityRef {
    /// Content entity reference.
    pub fn content(kind: Kind, id: u64) -> Self {
        EntityRef::Content { kind, id }
    }

    /// Achievement reference.
    pub fn achievement(uuid: impl Into<String>) -> Self {
        EntityRef::Achievement(uuid.into())
    }

    /// Content-counts reference.
    pub fn content_counts(uuid: impl Into<String>) -> Self {
        EntityRef::ContentCounts(uuid.into())
    }

    /// Key of the cached copy.
    pub fn cache_key(&self) -> String {
        match self {
            EntityRef::Content { kind, id } => keys::counter(*kind, *id),
            EntityRef::Achievement(uuid) => keys::achievement(uuid),
            EntityRef::ContentCounts(uuid) => keys::content_counts(uuid),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

/// Relation recorded by an [`Edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Relation {
    /// User agreed with content
    Agree,
    /// User collected content
    Collect,
    /// User follows another user
    Follow,
}

impl Relation {
    fn as_str(self) -> &'static str {
        match self {
            Relation::Agree => "agree",
            Relation::Collect => "collect",
            Relation::Follow => "follow",
        }
    }
}

/// A toggled engagement: `user` holds `relation` towards `target`.
///
/// Edges are what make toggles idempotent. A toggle changes counters only
/// when it flips its edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    /// Kind of engagement
    pub relation: Relation,
    /// Acting user
    pub user: String,
    /// Content for agree and collect, the followed user's achievement for
    /// follow
    pub target: EntityRef,
}

impl Edge {
    /// `user` agrees with `kind:id`.
    pub fn agree(user: impl Into<String>, kind: Kind, id: u64) -> Self {
        Self { relation: Relation::Agree, user: user.into(), target: EntityRef::content(kind, id) }
    }

    /// `user` collected `kind:id`.
    pub fn collect(user: impl Into<String>, kind: Kind, id: u64) -> Self {
        Self { relation: Relation::Collect, user: user.into(), target: EntityRef::content(kind, id) }
    }

    /// `follower` follows `followed`.
    pub fn follow(follower: impl Into<String>, followed: &str) -> Self {
        Self {
            relation: Relation::Follow,
            user: follower.into(),
            target: EntityRef::achievement(followed),
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -{}-> {}", self.user, self.relation.as_str(), self.target)
    }
}

/// An authoritative counter record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    /// Record identity
    pub entity: EntityRef,
    /// Owner uuid (the user itself for per-user records)
    pub owner: String,
    /// Visibility of content records
    pub visibility: Visibility,
    /// Counter columns, never negative
    pub columns: BTreeMap<String, i64>,
    /// Soft-delete flag
    pub deleted: bool,
    /// Entity a comment belongs to
    #[serde(default)]
    pub parent: Option<EntityRef>,
}

fn zeroed(names: &[&str]) -> BTreeMap<String, i64> {
    names.iter().map(|n| (n.to_string(), 0)).collect()
}

impl CounterRecord {
    /// Fresh content record with zero counters.
    pub fn content(kind: Kind, id: u64, owner: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            entity: EntityRef::content(kind, id),
            owner: owner.into(),
            visibility,
            columns: zeroed(&field::CONTENT),
            deleted: false,
            parent: None,
        }
    }

    /// Fresh comment record attached to `parent`.
    pub fn comment(id: u64, author: impl Into<String>, parent: EntityRef) -> Self {
        Self {
            parent: Some(parent),
            ..Self::content(Kind::Comment, id, author, Visibility::Public)
        }
    }

    /// Fresh achievement record.
    pub fn achievement(uuid: impl Into<String>) -> Self {
        let uuid = uuid.into();
        Self {
            entity: EntityRef::achievement(uuid.clone()),
            owner: uuid,
            visibility: Visibility::Public,
            columns: zeroed(&field::ACHIEVEMENT),
            deleted: false,
            parent: None,
        }
    }

    /// Fresh content-counts record.
    pub fn content_counts(uuid: impl Into<String>) -> Self {
        let uuid = uuid.into();
        Self {
            entity: EntityRef::content_counts(uuid.clone()),
            owner: uuid,
            visibility: Visibility::Public,
            columns: zeroed(&field::COUNTS),
            deleted: false,
            parent: None,
        }
    }

    /// Value of a column, zero if absent.
    pub fn column(&self, name: &str) -> i64 {
        self.columns.get(name).copied().unwrap_or(0)
    }
}

/// The system of record.
///
/// Implementations must apply `increment_column` atomically per record and
/// never store a negative column value.
pub trait Repository: Send + Sync {
    /// Loads a record.
    fn get(&self, entity: &EntityRef) -> Result<Option<CounterRecord>>;

    /// Inserts or replaces a record.
    fn upsert(&self, record: CounterRecord) -> Result<()>;

    /// Adds `delta` to a column, clamping at zero, and returns the updated
    /// record.
    fn increment_column(&self, entity: &EntityRef, column: &str, delta: i64)
        -> Result<CounterRecord>;

    /// Records (`present`) or erases an edge. Returns true if the edge
    /// changed. Concurrent calls for the same edge and state must report
    /// exactly one change.
    fn set_edge(&self, edge: &Edge, present: bool) -> Result<bool>;

    /// Erases every edge pointing at `target`. Returns how many were erased.
    fn clear_edges(&self, target: &EntityRef) -> Result<usize>;
}

/// In-process repository.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: RwLock<HashMap<EntityRef, CounterRecord>>,
    edges: RwLock<HashSet<Edge>>,
    failing: AtomicBool,
}

impl MemoryRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`Error::Repository`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of records, deleted ones included.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no record was ever written.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::repository("system of record unavailable"));
        }
        Ok(())
    }
}

impl Repository for MemoryRepository {
    fn get(&self, entity: &EntityRef) -> Result<Option<CounterRecord>> {
        self.check()?;
        Ok(self.records.read().get(entity).cloned())
    }

    fn upsert(&self, record: CounterRecord) -> Result<()> {
        self.check()?;
        self.records.write().insert(record.entity.clone(), record);
        Ok(())
    }

    fn increment_column(
        &self,
        entity: &EntityRef,
        column: &str,
        delta: i64,
    ) -> Result<CounterRecord> {
        self.check()?;
        let mut records = self.records.write();
        let record = records.get_mut(entity).ok_or_else(|| Error::not_found(entity.to_string()))?;
        if record.deleted {
            return Err(Error::invalid_state(format!("{} is deleted", entity)));
        }
        let value = record.columns.entry(column.to_string()).or_insert(0);
        *value = value.saturating_add(delta).max(0);
        Ok(record.clone())
    }

    fn set_edge(&self, edge: &Edge, present: bool) -> Result<bool> {
        self.check()?;
        let mut edges = self.edges.write();
        Ok(if present { edges.insert(edge.clone()) } else { edges.remove(edge) })
    }

    fn clear_edges(&self, target: &EntityRef) -> Result<usize> {
        self.check()?;
        let mut edges = self.edges.write();
        let before = edges.len();
        edges.retain(|e| &e.target != target);
        Ok(before - edges.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_cache_keys() {
        assert_eq!(EntityRef::content(Kind::Talk, 3).cache_key(), "talk:3");
        assert_eq!(EntityRef::achievement("u1").to_string(), "user:u1:achievement");
        assert_eq!(EntityRef::content_counts("u1").cache_key(), "user:u1:count");
    }

    #[test]
    fn test_increment_clamps_at_zero() {
        let repo = MemoryRepository::new();
        let entity = EntityRef::content(Kind::Article, 1);
        repo.upsert(CounterRecord::content(Kind::Article, 1, "u1", Visibility::Public)).unwrap();

        assert_eq!(repo.increment_column(&entity, "agree", 2).unwrap().column("agree"), 2);
        assert_eq!(repo.increment_column(&entity, "agree", -5).unwrap().column("agree"), 0);
        assert_eq!(repo.get(&entity).unwrap().unwrap().column("agree"), 0);
    }

    #[test]
    fn test_increment_missing_or_deleted() {
        let repo = MemoryRepository::new();
        let entity = EntityRef::achievement("ghost");
        assert!(matches!(repo.increment_column(&entity, "follow", 1), Err(Error::NotFound(_))));

        let mut record = CounterRecord::achievement("ghost");
        record.deleted = true;
        repo.upsert(record).unwrap();
        assert!(matches!(
            repo.increment_column(&entity, "follow", 1),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_edges_flip_once() {
        let repo = MemoryRepository::new();
        let edge = Edge::agree("u2", Kind::Article, 1);
        assert!(!repo.set_edge(&edge, false).unwrap());
        assert!(repo.set_edge(&edge, true).unwrap());
        assert!(!repo.set_edge(&edge, true).unwrap());
        assert!(repo.set_edge(&edge, false).unwrap());
        assert!(!repo.set_edge(&edge, false).unwrap());
        assert_eq!(edge.to_string(), "u2 -agree-> article:1");
    }

    #[test]
    fn test_clear_edges_of_target() {
        let repo = MemoryRepository::new();
        repo.set_edge(&Edge::agree("a", Kind::Talk, 1), true).unwrap();
        repo.set_edge(&Edge::collect("b", Kind::Talk, 1), true).unwrap();
        repo.set_edge(&Edge::agree("a", Kind::Talk, 2), true).unwrap();
        repo.set_edge(&Edge::follow("a", "b"), true).unwrap();

        assert_eq!(repo.clear_edges(&EntityRef::content(Kind::Talk, 1)).unwrap(), 2);
        assert!(repo.set_edge(&Edge::agree("a", Kind::Talk, 1), true).unwrap());
        assert!(!repo.set_edge(&Edge::agree("a", Kind::Talk, 2), true).unwrap());
        assert!(!repo.set_edge(&Edge::follow("a", "b"), true).unwrap());
    }

    #[test]
    fn test_comment_keeps_parent() {
        let record = CounterRecord::comment(7, "u1", EntityRef::content(Kind::Article, 3));
        assert_eq!(record.entity, EntityRef::content(Kind::Comment, 7));
        assert_eq!(record.parent, Some(EntityRef::content(Kind::Article, 3)));
        assert_eq!(CounterRecord::content(Kind::Talk, 1, "u1", Visibility::Public).parent, None);
    }

    #[test]
    fn test_failure_switch() {
        let repo = MemoryRepository::new();
        repo.set_failing(true);
        let err = repo.upsert(CounterRecord::achievement("u1")).unwrap_err();
        assert!(matches!(err, Error::Repository(_)));
        assert!(!err.is_cache_failure());

        repo.set_failing(false);
        repo.upsert(CounterRecord::achievement("u1")).unwrap();
        assert_eq!(repo.len(), 1);
    }
}
