//! ScriptContext provides transaction support for script operations.
//!
//! A script runs with exclusive access to the keyspace. Every write is
//! applied in place immediately, so later commands in the same script read
//! their own writes, and an undo record is pushed for it. The effect of the
//! write is also recorded in a [`WriteBatch`] for the journal.
//!
//! ```text
//! Script Operation Flow:
//!
//! 1. hset / zadd / sadd ...  →  capture undo, apply to keyspace, record op
//! 2. hget / zscore ...       →  read keyspace directly (sees own writes)
//!
//! On success:  batch → journal, then commit() drops the undo log
//! On failure:  rollback() replays the undo log in reverse
//! ```
//!
//! A context dropped without `commit()` rolls back, so an early `?` return
//! inside a script can never leave a partial write behind.

use crate::error::{Error, Result};
use crate::store::command::{Command, Reply};
use crate::store::keyspace::Keyspace;
use crate::store::value::{Entry, Value};
use crate::write_batch::{WriteBatch, WriteOp};
use std::collections::BTreeMap;

/// One reversible step.
#[derive(Debug)]
enum Undo {
    /// Put back the whole previous entry (or remove the key).
    Key { key: String, prev: Option<Entry> },
    /// Put back one hash field.
    HField { key: String, field: String, prev: Option<String> },
    /// Put back one sorted-set member's score.
    ZMember { key: String, member: String, prev: Option<i64> },
    /// Put back one set member.
    SMember { key: String, member: String, was_member: bool },
    /// Put back the previous deadline.
    Expiry { key: String, prev: Option<u64> },
}

/// ScriptContext gives a script atomic, read-your-writes access to the
/// keyspace.
pub struct ScriptContext<'a> {
    keyspace: &'a mut Keyspace,
    now: u64,
    undo: Vec<Undo>,
    batch: WriteBatch,
    committed: bool,
}

impl<'a> ScriptContext<'a> {
    /// Creates a context over `keyspace`, executing at time `now` (unix ms).
    pub fn new(keyspace: &'a mut Keyspace, now: u64) -> Self {
        Self { keyspace, now, undo: Vec::new(), batch: WriteBatch::new(now), committed: false }
    }

    /// Execution time of the script.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Read-only view of the keyspace, including this script's writes.
    pub fn keyspace(&self) -> &Keyspace {
        &*self.keyspace
    }

    /// Operations recorded so far.
    pub fn batch(&self) -> &WriteBatch {
        &self.batch
    }

    /// Returns the number of recorded write operations.
    pub fn operation_count(&self) -> usize {
        self.batch.len()
    }

    /// Returns true if the script has not written anything.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Keeps every write and returns the batch for bookkeeping.
    pub fn commit(mut self) -> WriteBatch {
        self.committed = true;
        self.undo.clear();
        std::mem::take(&mut self.batch)
    }

    /// Reverts every write made through this context.
    pub fn rollback(mut self) {
        self.revert();
    }

    fn revert(&mut self) {
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Key { key, prev } => self.keyspace.restore_raw(&key, prev),
                Undo::HField { key, field, prev } => {
                    if let Some(Entry { value: Value::Hash(h), .. }) = self.keyspace.raw_mut(&key) {
                        match prev {
                            Some(v) => h.insert(field, v),
                            None => h.remove(&field),
                        };
                    }
                }
                Undo::ZMember { key, member, prev } => {
                    if let Some(Entry { value: Value::ZSet(z), .. }) = self.keyspace.raw_mut(&key) {
                        match prev {
                            Some(score) => {
                                z.insert(&member, score);
                            }
                            None => {
                                z.remove(&member);
                            }
                        }
                    }
                }
                Undo::SMember { key, member, was_member } => {
                    if let Some(Entry { value: Value::Set(s), .. }) = self.keyspace.raw_mut(&key) {
                        if was_member {
                            s.insert(member);
                        } else {
                            s.remove(&member);
                        }
                    }
                }
                Undo::Expiry { key, prev } => {
                    if let Some(entry) = self.keyspace.raw_mut(&key) {
                        entry.expires_at = prev;
                    }
                }
            }
        }
        self.batch.clear();
    }

    /// Applies one write, recording how to undo it.
    fn write(&mut self, op: WriteOp) -> Result<()> {
        let undo = undo_for(self.keyspace.raw(op.key()), &op, self.now);
        self.keyspace.apply(&op, self.now)?;
        self.undo.push(undo);
        self.batch.push(op);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Typed operations
    // ------------------------------------------------------------------

    /// EXISTS for a single key.
    pub fn exists(&self, key: &str) -> bool {
        self.keyspace.contains(key, self.now)
    }

    /// DEL for a single key. Returns true if the key existed.
    pub fn del(&mut self, key: &str) -> Result<bool> {
        if !self.exists(key) {
            return Ok(false);
        }
        self.write(WriteOp::Delete { key: key.to_string() })?;
        Ok(true)
    }

    /// EXPIRE. Returns true if the key exists. Non-positive seconds delete it.
    pub fn expire(&mut self, key: &str, seconds: i64) -> Result<bool> {
        if !self.exists(key) {
            return Ok(false);
        }
        if seconds <= 0 {
            return self.del(key);
        }
        let at = self.now.saturating_add((seconds as u64).saturating_mul(1000));
        self.write(WriteOp::ExpireAt { key: key.to_string(), at: Some(at) })?;
        Ok(true)
    }

    /// TTL in seconds: -2 missing, -1 persistent.
    pub fn ttl(&self, key: &str) -> i64 {
        match self.keyspace.ttl_millis(key, self.now) {
            None => -2,
            Some(None) => -1,
            Some(Some(ms)) => ((ms + 500) / 1000) as i64,
        }
    }

    /// GET.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.keyspace.string(key, self.now)?.map(str::to_string))
    }

    /// SET, clearing any expiry.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.write(WriteOp::Set { key: key.to_string(), value: value.to_string() })
    }

    /// HGET.
    pub fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self.keyspace.hash(key, self.now)?.and_then(|h| h.get(field).cloned()))
    }

    /// HGETALL.
    pub fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.keyspace.hash(key, self.now)?.cloned().unwrap_or_default())
    }

    /// HSET for one field. Returns true if the field was new.
    pub fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<bool> {
        let existed = self.hget(key, field)?.is_some();
        self.write(WriteOp::HSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        })?;
        Ok(!existed)
    }

    /// HSETNX. Returns true if the field was set.
    pub fn hsetnx(&mut self, key: &str, field: &str, value: &str) -> Result<bool> {
        if self.hget(key, field)?.is_some() {
            return Ok(false);
        }
        self.hset(key, field, value)
    }

    /// HINCRBY. Creates the key and field as needed; returns the new value.
    pub fn hincrby(&mut self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let current = match self.hget(key, field)? {
            Some(v) => v.parse::<i64>().map_err(|_| Error::NotInteger(format!("{} {}", key, field)))?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| Error::invalid_argument("increment or decrement would overflow"))?;
        self.hset(key, field, &next.to_string())?;
        Ok(next)
    }

    /// HDEL for one field. Returns true if it was present.
    pub fn hdel(&mut self, key: &str, field: &str) -> Result<bool> {
        if self.hget(key, field)?.is_none() {
            return Ok(false);
        }
        self.write(WriteOp::HDel { key: key.to_string(), field: field.to_string() })?;
        Ok(true)
    }

    /// ZSCORE.
    pub fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>> {
        Ok(self.keyspace.sorted_set(key, self.now)?.and_then(|z| z.score(member)))
    }

    /// ZADD for one member. Returns true if the member was new.
    ///
    /// With `nx` an existing member keeps its score.
    pub fn zadd(&mut self, key: &str, member: &str, score: i64, nx: bool) -> Result<bool> {
        let existed = self.zscore(key, member)?.is_some();
        if existed && nx {
            return Ok(false);
        }
        self.write(WriteOp::ZSet { key: key.to_string(), member: member.to_string(), score })?;
        Ok(!existed)
    }

    /// ZINCRBY. Returns the new score.
    pub fn zincrby(&mut self, key: &str, member: &str, delta: i64) -> Result<i64> {
        let score = self
            .zscore(key, member)?
            .unwrap_or(0)
            .checked_add(delta)
            .ok_or_else(|| Error::invalid_argument("increment would overflow"))?;
        self.write(WriteOp::ZSet { key: key.to_string(), member: member.to_string(), score })?;
        Ok(score)
    }

    /// ZREM for one member. Returns true if it was present.
    pub fn zrem(&mut self, key: &str, member: &str) -> Result<bool> {
        if self.zscore(key, member)?.is_none() {
            return Ok(false);
        }
        self.write(WriteOp::ZRem { key: key.to_string(), member: member.to_string() })?;
        Ok(true)
    }

    /// ZCARD.
    pub fn zcard(&self, key: &str) -> Result<usize> {
        Ok(self.keyspace.sorted_set(key, self.now)?.map(|z| z.len()).unwrap_or(0))
    }

    /// ZREVRANGE.
    pub fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<(String, i64)>> {
        Ok(self
            .keyspace
            .sorted_set(key, self.now)?
            .map(|z| z.rev_range(start, stop))
            .unwrap_or_default())
    }

    /// SISMEMBER.
    pub fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self.keyspace.set(key, self.now)?.is_some_and(|s| s.contains(member)))
    }

    /// SCARD.
    pub fn scard(&self, key: &str) -> Result<usize> {
        Ok(self.keyspace.set(key, self.now)?.map(|s| s.len()).unwrap_or(0))
    }

    /// SADD for one member. Returns true if it was added.
    pub fn sadd(&mut self, key: &str, member: &str) -> Result<bool> {
        if self.sismember(key, member)? {
            return Ok(false);
        }
        self.write(WriteOp::SAdd { key: key.to_string(), member: member.to_string() })?;
        Ok(true)
    }

    /// SREM for one member. Returns true if it was removed.
    pub fn srem(&mut self, key: &str, member: &str) -> Result<bool> {
        if !self.sismember(key, member)? {
            return Ok(false);
        }
        self.write(WriteOp::SRem { key: key.to_string(), member: member.to_string() })?;
        Ok(true)
    }

    /// Executes a parsed command.
    ///
    /// Type errors are detected before the first write, so a failed command
    /// leaves the keyspace as it found it.
    pub fn execute(&mut self, cmd: &Command) -> Result<Reply> {
        let reply = match cmd {
            Command::Get(key) => self.get(key)?.map(Reply::Bulk).unwrap_or(Reply::Nil),
            Command::Set(key, value) => {
                self.set(key, value)?;
                Reply::ok()
            }
            Command::Del(keys) => {
                let mut removed = 0;
                for key in keys {
                    removed += self.del(key)? as i64;
                }
                Reply::Int(removed)
            }
            Command::Exists(keys) => {
                Reply::Int(keys.iter().filter(|k| self.exists(k)).count() as i64)
            }
            Command::Expire(key, seconds) => Reply::Int(self.expire(key, *seconds)? as i64),
            Command::Ttl(key) => Reply::Int(self.ttl(key)),
            Command::HGet(key, field) => {
                self.hget(key, field)?.map(Reply::Bulk).unwrap_or(Reply::Nil)
            }
            Command::HSet(key, pairs) => {
                self.keyspace.hash(key, self.now)?;
                let mut added = 0;
                for (field, value) in pairs {
                    added += self.hset(key, field, value)? as i64;
                }
                Reply::Int(added)
            }
            Command::HSetNx(key, field, value) => {
                Reply::Int(self.hsetnx(key, field, value)? as i64)
            }
            Command::HIncrBy(key, field, delta) => Reply::Int(self.hincrby(key, field, *delta)?),
            Command::HDel(key, fields) => {
                let mut removed = 0;
                for field in fields {
                    removed += self.hdel(key, field)? as i64;
                }
                Reply::Int(removed)
            }
            Command::HGetAll(key) => Reply::Array(
                self.hgetall(key)?
                    .into_iter()
                    .flat_map(|(f, v)| [Reply::Bulk(f), Reply::Bulk(v)])
                    .collect(),
            ),
            Command::HExists(key, field) => Reply::Int(self.hget(key, field)?.is_some() as i64),
            Command::ZAdd { key, nx, members } => {
                self.keyspace.sorted_set(key, self.now)?;
                let mut added = 0;
                for (score, member) in members {
                    added += self.zadd(key, member, *score, *nx)? as i64;
                }
                Reply::Int(added)
            }
            Command::ZIncrBy(key, delta, member) => {
                Reply::Bulk(self.zincrby(key, member, *delta)?.to_string())
            }
            Command::ZRem(key, members) => {
                let mut removed = 0;
                for member in members {
                    removed += self.zrem(key, member)? as i64;
                }
                Reply::Int(removed)
            }
            Command::ZScore(key, member) => self
                .zscore(key, member)?
                .map(|s| Reply::Bulk(s.to_string()))
                .unwrap_or(Reply::Nil),
            Command::ZCard(key) => Reply::Int(self.zcard(key)? as i64),
            Command::ZRevRange { key, start, stop, with_scores } => {
                let mut items = Vec::new();
                for (member, score) in self.zrevrange(key, *start, *stop)? {
                    items.push(Reply::Bulk(member));
                    if *with_scores {
                        items.push(Reply::Bulk(score.to_string()));
                    }
                }
                Reply::Array(items)
            }
            Command::SAdd(key, members) => {
                self.keyspace.set(key, self.now)?;
                let mut added = 0;
                for member in members {
                    added += self.sadd(key, member)? as i64;
                }
                Reply::Int(added)
            }
            Command::SRem(key, members) => {
                let mut removed = 0;
                for member in members {
                    removed += self.srem(key, member)? as i64;
                }
                Reply::Int(removed)
            }
            Command::SIsMember(key, member) => Reply::Int(self.sismember(key, member)? as i64),
            Command::SCard(key) => Reply::Int(self.scard(key)? as i64),
        };
        Ok(reply)
    }
}

impl Drop for ScriptContext<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.undo.is_empty() {
            log::debug!("Rolling back {} uncommitted script writes", self.undo.len());
            self.revert();
        }
    }
}

/// Computes the undo record for applying `op` over `current`.
fn undo_for(current: Option<&Entry>, op: &WriteOp, now: u64) -> Undo {
    let key = op.key().to_string();
    let entry = match current {
        Some(e) if !e.is_expired(now) => e,
        other => return Undo::Key { key, prev: other.cloned() },
    };

    match (op, &entry.value) {
        (WriteOp::HSet { field, .. }, Value::Hash(h)) => {
            Undo::HField { key, field: field.clone(), prev: h.get(field).cloned() }
        }
        (WriteOp::HDel { field, .. }, Value::Hash(h)) if h.len() > 1 || !h.contains_key(field) => {
            Undo::HField { key, field: field.clone(), prev: h.get(field).cloned() }
        }
        (WriteOp::ZSet { member, .. }, Value::ZSet(z)) => {
            Undo::ZMember { key, member: member.clone(), prev: z.score(member) }
        }
        (WriteOp::ZRem { member, .. }, Value::ZSet(z))
            if z.len() > 1 || z.score(member).is_none() =>
        {
            Undo::ZMember { key, member: member.clone(), prev: z.score(member) }
        }
        (WriteOp::SAdd { member, .. }, Value::Set(s)) => {
            Undo::SMember { key, member: member.clone(), was_member: s.contains(member) }
        }
        (WriteOp::SRem { member, .. }, Value::Set(s)) if s.len() > 1 || !s.contains(member) => {
            Undo::SMember { key, member: member.clone(), was_member: s.contains(member) }
        }
        (WriteOp::ExpireAt { .. }, _) => Undo::Expiry { key, prev: entry.expires_at },
        _ => Undo::Key { key, prev: Some(entry.clone()) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Keyspace {
        let mut ks = Keyspace::new();
        let mut ctx = ScriptContext::new(&mut ks, 0);
        ctx.hset("article:1", "agree", "3").unwrap();
        ctx.zadd("article:hot", "1", 3, false).unwrap();
        ctx.zadd("article:hot", "2", 5, false).unwrap();
        ctx.sadd("user:u1:agree:article", "1").unwrap();
        ctx.commit();
        ks
    }

    #[test]
    fn test_context_read_your_writes() {
        let mut ks = Keyspace::new();
        let mut ctx = ScriptContext::new(&mut ks, 0);
        assert_eq!(ctx.hincrby("article:1", "agree", 2).unwrap(), 2);
        assert_eq!(ctx.hget("article:1", "agree").unwrap(), Some("2".to_string()));
        assert_eq!(ctx.operation_count(), 1);
    }

    #[test]
    fn test_context_commit() {
        let ks = seeded();
        assert_eq!(ks.hash("article:1", 0).unwrap().unwrap()["agree"], "3");
        assert_eq!(ks.sorted_set("article:hot", 0).unwrap().unwrap().len(), 2);
    }

    #[test]
    fn test_context_rollback_restores_everything() {
        let mut ks = seeded();
        let before = ks.clone();

        let mut ctx = ScriptContext::new(&mut ks, 0);
        ctx.hincrby("article:1", "agree", 1).unwrap();
        ctx.hset("article:1", "view", "9").unwrap();
        ctx.zincrby("article:hot", "1", 10).unwrap();
        ctx.zrem("article:hot", "2").unwrap();
        ctx.srem("user:u1:agree:article", "1").unwrap();
        ctx.sadd("user:u2:agree:article", "1").unwrap();
        ctx.expire("article:1", 60).unwrap();
        ctx.del("article:hot").unwrap();
        ctx.set("plain", "v").unwrap();
        ctx.rollback();

        assert_eq!(ks, before);
    }

    #[test]
    fn test_context_automatic_rollback_on_drop() {
        let mut ks = seeded();
        let before = ks.clone();
        {
            let mut ctx = ScriptContext::new(&mut ks, 0);
            ctx.hincrby("article:1", "agree", 5).unwrap();
            ctx.zrem("article:hot", "1").unwrap();
        }
        assert_eq!(ks, before);
    }

    #[test]
    fn test_context_score_overflow_is_an_error() {
        let mut ks = seeded();
        let mut ctx = ScriptContext::new(&mut ks, 0);
        ctx.zadd("z", "m", i64::MAX, false).unwrap();
        assert!(matches!(ctx.zincrby("z", "m", 1), Err(Error::InvalidArgument(_))));
        assert_eq!(ctx.zscore("z", "m").unwrap(), Some(i64::MAX));
        assert_eq!(ctx.zincrby("z", "m", -1).unwrap(), i64::MAX - 1);
    }

    #[test]
    fn test_context_wrong_type_leaves_no_trace() {
        let mut ks = seeded();
        let before = ks.clone();

        let mut ctx = ScriptContext::new(&mut ks, 0);
        assert!(matches!(ctx.sadd("article:1", "x"), Err(Error::WrongType(_))));
        assert!(matches!(ctx.hincrby("article:hot", "f", 1), Err(Error::WrongType(_))));
        assert!(ctx.is_empty());
        drop(ctx);
        assert_eq!(ks, before);
    }

    #[test]
    fn test_context_not_integer() {
        let mut ks = Keyspace::new();
        let mut ctx = ScriptContext::new(&mut ks, 0);
        ctx.hset("h", "uuid", "abc").unwrap();
        assert!(matches!(ctx.hincrby("h", "uuid", 1), Err(Error::NotInteger(_))));
    }

    #[test]
    fn test_context_expired_key_is_absent_and_restorable() {
        let mut ks = Keyspace::new();
        {
            let mut ctx = ScriptContext::new(&mut ks, 0);
            ctx.hset("article:1", "agree", "4").unwrap();
            ctx.expire("article:1", 1).unwrap();
            ctx.commit();
        }
        let before = ks.clone();

        let mut ctx = ScriptContext::new(&mut ks, 5_000);
        assert!(!ctx.exists("article:1"));
        assert_eq!(ctx.ttl("article:1"), -2);
        assert_eq!(ctx.hincrby("article:1", "agree", 1).unwrap(), 1);
        ctx.rollback();

        assert_eq!(ks, before);
    }

    #[test]
    fn test_context_execute_commands() {
        let mut ks = seeded();
        let mut ctx = ScriptContext::new(&mut ks, 0);

        let reply = ctx.execute(&Command::parse(&["ZREVRANGE", "article:hot", "0", "-1", "WITHSCORES"]).unwrap())
            .unwrap();
        assert_eq!(
            reply,
            Reply::Array(vec![
                Reply::Bulk("2".into()),
                Reply::Bulk("5".into()),
                Reply::Bulk("1".into()),
                Reply::Bulk("3".into()),
            ])
        );

        let reply = ctx.execute(&Command::parse(&["ZADD", "article:hot", "NX", "0", "2", "0", "3"]).unwrap()).unwrap();
        assert_eq!(reply, Reply::Int(1));
        assert_eq!(ctx.zscore("article:hot", "2").unwrap(), Some(5));

        let reply = ctx.execute(&Command::parse(&["TTL", "article:1"]).unwrap()).unwrap();
        assert_eq!(reply, Reply::Int(-1));
        let reply = ctx.execute(&Command::parse(&["EXPIRE", "article:1", "1800"]).unwrap()).unwrap();
        assert_eq!(reply, Reply::Int(1));
        assert_eq!(ctx.ttl("article:1"), 1800);

        let reply = ctx.execute(&Command::parse(&["DEL", "article:1", "missing"]).unwrap()).unwrap();
        assert_eq!(reply, Reply::Int(1));
    }
}
