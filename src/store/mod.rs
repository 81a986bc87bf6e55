//! The embedded counter store.
//!
//! [`Store`] is a typed key-value store (strings, hashes, sorted sets,
//! sets) with per-key expiry and atomic multi-key scripts. Every write goes
//! through a [`ScriptContext`]; a unit of work either commits completely
//! (and is journaled) or leaves no trace.
//!
//! # Thread Safety
//!
//! `Store` is `Send + Sync` and is meant to be shared behind an `Arc`.
//! Scripts and writes hold the keyspace write lock for their whole
//! duration, which linearizes them; reads share the read lock. Waiting for
//! the lock is bounded by [`Options::op_timeout_ms`].

pub mod command;
pub mod keyspace;
pub mod value;

pub use command::{Command, Reply};
pub use keyspace::{now_millis, Keyspace};
pub use value::{Entry, SortedSet, Value};

use crate::config::Options;
use crate::error::{Error, Result};
use crate::journal::{Journal, RecordType};
use crate::script::{LuaExecutor, ScriptContext, Template};
use crate::write_batch::WriteBatch;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::path::Path;

struct Inner {
    keyspace: Keyspace,
    journal: Option<Journal>,
}

/// Handle to an embedded counter store.
///
/// # Example
///
/// ```rust,no_run
/// use engagedb::{Options, Store};
///
/// # fn main() -> Result<(), engagedb::Error> {
/// let store = Store::open("./counters", Options::default())?;
/// store.execute(&["HSET", "article:1", "agree", "0"])?;
/// store.execute(&["HINCRBY", "article:1", "agree", "1"])?;
/// assert_eq!(store.hget("article:1", "agree")?, Some("1".to_string()));
/// # Ok(())
/// # }
/// ```
pub struct Store {
    options: Options,
    inner: RwLock<Inner>,
    lua: LuaExecutor,
}

impl Store {
    /// Opens a journaled store in `path`, replaying any existing journal.
    ///
    /// With `use_journal` disabled this is the same as [`Store::in_memory`].
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        options.validate()?;
        if !options.use_journal {
            return Self::in_memory(options);
        }

        let path = path.as_ref();
        if !path.exists() {
            if options.create_if_missing {
                std::fs::create_dir_all(path)?;
            } else {
                return Err(Error::not_found(format!("store directory {:?}", path)));
            }
        }

        let (journal, records) = Journal::open(path, options.sync_journal)?;
        let mut keyspace = Keyspace::new();
        let mut replayed = 0;
        for record in &records {
            let batch = WriteBatch::decode(&record.data)?;
            if record.record_type == RecordType::Checkpoint {
                keyspace.clear();
            }
            if let Err(e) = keyspace.apply_batch(&batch) {
                log::warn!("Skipping unreplayable journal batch: {}", e);
                continue;
            }
            replayed += 1;
        }
        log::info!("Store opened at {:?}: {} batches replayed, {} keys", path, replayed, keyspace.len());

        Ok(Self::with_parts(options, keyspace, Some(journal)))
    }

    /// Creates a store that keeps everything in memory.
    pub fn in_memory(options: Options) -> Result<Self> {
        options.validate()?;
        Ok(Self::with_parts(options, Keyspace::new(), None))
    }

    fn with_parts(options: Options, keyspace: Keyspace, journal: Option<Journal>) -> Self {
        let lua = LuaExecutor::new(options.script_timeout_duration());
        Self { options, inner: RwLock::new(Inner { keyspace, journal }), lua }
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .try_write_for(self.options.op_timeout_duration())
            .ok_or_else(|| Error::Timeout("waiting for counter store write access".to_string()))
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .try_read_for(self.options.op_timeout_duration())
            .ok_or_else(|| Error::Timeout("waiting for counter store read access".to_string()))
    }

    /// Runs `f` as one atomic unit.
    ///
    /// If `f` fails, or the journal cannot record the unit, every write `f`
    /// made is rolled back before the lock is released.
    pub fn atomically<T>(&self, f: impl FnOnce(&mut ScriptContext<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.write_lock()?;
        let Inner { keyspace, journal } = &mut *guard;

        let mut ctx = ScriptContext::new(keyspace, now_millis());
        let value = f(&mut ctx)?;

        if let Some(journal) = journal.as_mut() {
            if !ctx.is_empty() {
                if let Err(e) = journal.append(ctx.batch()) {
                    log::warn!("Journal append failed, rolling back: {}", e);
                    ctx.rollback();
                    return Err(e);
                }
            }
        }
        ctx.commit();

        self.maybe_checkpoint(&mut guard);
        Ok(value)
    }

    fn maybe_checkpoint(&self, inner: &mut Inner) {
        let threshold = self.options.checkpoint_threshold;
        let Inner { keyspace, journal } = inner;
        if let Some(journal) = journal.as_mut() {
            if threshold > 0 && journal.size() >= threshold {
                if let Err(e) = journal.checkpoint(&keyspace.snapshot(now_millis())) {
                    log::warn!("Automatic checkpoint failed: {}", e);
                }
            }
        }
    }

    /// Executes a single command atomically.
    pub fn execute<S: AsRef<str>>(&self, argv: &[S]) -> Result<Reply> {
        let cmd = Command::parse(argv)?;
        self.atomically(|ctx| ctx.execute(&cmd))
    }

    /// Runs a script template atomically and returns its status code.
    pub fn run_template(&self, template: &Template, keys: &[String], args: &[String]) -> Result<i64> {
        log::debug!("Running script {} with {} keys", template.name, keys.len());
        self.atomically(|ctx| template.run(ctx, keys, args))
    }

    /// Runs a Lua script atomically (`EVAL`).
    pub fn eval(&self, source: &str, keys: &[String], args: &[String]) -> Result<Reply> {
        self.atomically(|ctx| self.lua.execute(ctx, source, keys, args))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// All fields of a hash; empty if the key is absent.
    pub fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>> {
        let guard = self.read_lock()?;
        Ok(guard.keyspace.hash(key, now_millis())?.cloned().unwrap_or_default())
    }

    /// One hash field.
    pub fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let guard = self.read_lock()?;
        Ok(guard.keyspace.hash(key, now_millis())?.and_then(|h| h.get(field).cloned()))
    }

    /// Returns true if the key holds a live value.
    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read_lock()?.keyspace.contains(key, now_millis()))
    }

    /// Score of a sorted-set member.
    pub fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>> {
        let guard = self.read_lock()?;
        Ok(guard.keyspace.sorted_set(key, now_millis())?.and_then(|z| z.score(member)))
    }

    /// Number of members of a sorted set.
    pub fn zcard(&self, key: &str) -> Result<usize> {
        let guard = self.read_lock()?;
        Ok(guard.keyspace.sorted_set(key, now_millis())?.map(|z| z.len()).unwrap_or(0))
    }

    /// Members from highest to lowest score, by rank.
    pub fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<(String, i64)>> {
        let guard = self.read_lock()?;
        Ok(guard
            .keyspace
            .sorted_set(key, now_millis())?
            .map(|z| z.rev_range(start, stop))
            .unwrap_or_default())
    }

    /// Set membership.
    pub fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let guard = self.read_lock()?;
        Ok(guard.keyspace.set(key, now_millis())?.is_some_and(|s| s.contains(member)))
    }

    /// Remaining time to live in seconds: -2 missing, -1 persistent.
    pub fn ttl(&self, key: &str) -> Result<i64> {
        let guard = self.read_lock()?;
        Ok(match guard.keyspace.ttl_millis(key, now_millis()) {
            None => -2,
            Some(None) => -1,
            Some(Some(ms)) => ((ms + 500) / 1000) as i64,
        })
    }

    /// Number of live keys.
    pub fn key_count(&self) -> Result<usize> {
        Ok(self.read_lock()?.keyspace.keys(now_millis()).count())
    }

    /// Copy of the whole keyspace.
    pub fn dump(&self) -> Result<Keyspace> {
        Ok(self.read_lock()?.keyspace.clone())
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Evicts expired keys. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let removed = self.write_lock()?.keyspace.purge_expired(now_millis());
        if removed > 0 {
            log::debug!("Purged {} expired keys", removed);
        }
        Ok(removed)
    }

    /// Compacts the journal into a snapshot of the live keyspace.
    ///
    /// A no-op for in-memory stores.
    pub fn checkpoint(&self) -> Result<()> {
        let mut guard = self.write_lock()?;
        let Inner { keyspace, journal } = &mut *guard;
        match journal.as_mut() {
            Some(journal) => journal.checkpoint(&keyspace.snapshot(now_millis())),
            None => Ok(()),
        }
    }

    /// Size of the active journal file, 0 for in-memory stores.
    pub fn journal_size(&self) -> Result<u64> {
        Ok(self.read_lock()?.journal.as_ref().map(Journal::size).unwrap_or(0))
    }

    /// Flushes and syncs the journal.
    pub fn sync(&self) -> Result<()> {
        match self.write_lock()?.journal.as_mut() {
            Some(journal) => journal.sync(),
            None => Ok(()),
        }
    }
}
