//! Counter store adapter.
//!
//! The engine reaches the cache only through [`CounterStore`]. The embedded
//! [`Store`] runs catalog templates natively; [`LuaCounterStore`] runs the
//! same catalog as rendered Lua through `EVAL`, the way the scripts are
//! deployed on an external Redis-compatible store.

use crate::engine::catalog::{self, Catalog};
use crate::engine::dispatch::Invocation;
use crate::error::{Error, Result};
use crate::script::Template;
use crate::store::{Reply, Store};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Outcome code of a catalog script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Mutation applied.
    Applied,
    /// Nothing to do: marker already in the requested state, or a
    /// decrement clamped at zero.
    NoOp,
    /// The primary counter record is not cached.
    Missing,
}

impl Status {
    /// Parses a script return code.
    pub fn from_code(code: i64) -> Result<Status> {
        match code {
            0 => Ok(Status::Applied),
            1 => Ok(Status::NoOp),
            2 => Ok(Status::Missing),
            other => Err(Error::script(format!("unexpected script status {}", other))),
        }
    }

    /// The wire code.
    pub fn code(self) -> i64 {
        match self {
            Status::Applied => 0,
            Status::NoOp => 1,
            Status::Missing => 2,
        }
    }
}

/// A key-value counter store with atomic scripted execution.
///
/// Every method is atomic on its own. A failed call either applied nothing
/// or, for [`Error::Timeout`], has an unknown outcome.
pub trait CounterStore: Send + Sync {
    /// Runs a named catalog script and returns its raw status code.
    fn run(&self, script: &str, keys: &[String], args: &[String]) -> Result<i64>;

    /// Runs an ad-hoc Lua script.
    fn eval(&self, source: &str, keys: &[String], args: &[String]) -> Result<Reply>;

    /// All fields of a hash, empty when absent.
    fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>>;

    /// One hash field.
    fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Key existence.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Sorted-set member score.
    fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>>;

    /// Sorted-set members by descending score.
    fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<(String, i64)>>;

    /// Set membership.
    fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    /// TTL in seconds: -2 missing, -1 persistent.
    fn ttl(&self, key: &str) -> Result<i64>;

    /// Runs a dispatched invocation.
    fn invoke(&self, inv: &Invocation) -> Result<Status> {
        Status::from_code(self.run(inv.script, &inv.keys, &inv.args)?)
    }

    /// Increments `field` only if `key` exists.
    fn incr_if_exists(&self, key: &str, field: &str, delta: i64) -> Result<Status> {
        let code = self.run(
            catalog::HINCR_IF_EXISTS,
            &[key.to_string()],
            &[field.to_string(), delta.to_string()],
        )?;
        Status::from_code(code)
    }

    /// Decrements `field` only if `key` exists and the field is at least
    /// `delta`.
    fn decr_floor(&self, key: &str, field: &str, delta: i64) -> Result<Status> {
        let code = self.run(
            catalog::HDECR_FLOOR,
            &[key.to_string()],
            &[field.to_string(), delta.to_string()],
        )?;
        Status::from_code(code)
    }
}

fn lookup(script: &str) -> Result<&'static Template> {
    Catalog::builtin()
        .get(script)
        .ok_or_else(|| Error::invalid_argument(format!("unknown script '{}'", script)))
}

impl CounterStore for Store {
    fn run(&self, script: &str, keys: &[String], args: &[String]) -> Result<i64> {
        self.run_template(lookup(script)?, keys, args)
    }

    fn eval(&self, source: &str, keys: &[String], args: &[String]) -> Result<Reply> {
        Store::eval(self, source, keys, args)
    }

    fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>> {
        Store::hgetall(self, key)
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Store::hget(self, key, field)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Store::exists(self, key)
    }

    fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>> {
        Store::zscore(self, key, member)
    }

    fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<(String, i64)>> {
        Store::zrevrange(self, key, start, stop)
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        Store::sismember(self, key, member)
    }

    fn ttl(&self, key: &str) -> Result<i64> {
        Store::ttl(self, key)
    }
}

/// Runs catalog scripts as Lua source through `EVAL`.
pub struct LuaCounterStore {
    store: Arc<Store>,
    sources: HashMap<&'static str, String>,
}

impl LuaCounterStore {
    /// Renders the whole catalog once.
    pub fn new(store: Arc<Store>) -> Self {
        let sources = Catalog::builtin().iter().map(|t| (t.name, t.to_lua())).collect();
        Self { store, sources }
    }

    /// The underlying store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Rendered source of a catalog script.
    pub fn source(&self, script: &str) -> Option<&str> {
        self.sources.get(script).map(String::as_str)
    }
}

impl CounterStore for LuaCounterStore {
    fn run(&self, script: &str, keys: &[String], args: &[String]) -> Result<i64> {
        lookup(script)?.check_arity(keys, args)?;
        let source = self
            .source(script)
            .ok_or_else(|| Error::internal(format!("script '{}' was not rendered", script)))?;
        let reply = self.store.eval(source, keys, args)?;
        reply
            .as_int()
            .ok_or_else(|| Error::script(format!("{} returned {}", script, reply)))
    }

    fn eval(&self, source: &str, keys: &[String], args: &[String]) -> Result<Reply> {
        self.store.eval(source, keys, args)
    }

    fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>> {
        self.store.hgetall(key)
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.store.hget(key, field)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.store.exists(key)
    }

    fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>> {
        self.store.zscore(key, member)
    }

    fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<(String, i64)>> {
        self.store.zrevrange(key, start, stop)
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.store.sismember(key, member)
    }

    fn ttl(&self, key: &str) -> Result<i64> {
        self.store.ttl(key)
    }
}
