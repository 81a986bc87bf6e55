//! Declarative script templates.
//!
//! A [`Template`] is a named, positional-argument script built from a small
//! vocabulary of existence-gated counter steps. The same template can be
//! executed natively against a [`ScriptContext`] or rendered to Redis
//! dialect Lua with [`Template::to_lua`]; both produce the same keyspace.
//!
//! Every step records whether it changed anything in a `last` flag that
//! later [`Cond::Changed`] / [`Cond::Unchanged`] conditions inspect. A
//! template returns its `status` (0 unless set) or the code of the first
//! [`Step::Return`] reached.

use crate::error::{Error, Result};
use crate::script::context::ScriptContext;
use crate::store::command::parse_int;
use std::fmt::Write as _;

/// A key position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlot {
    /// The n-th key (0-based).
    At(usize),
    /// The key bound by the enclosing [`Step::ForEachKey`].
    Current,
}

/// A value position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// The n-th argument (0-based).
    Arg(usize),
    /// A literal string.
    Lit(&'static str),
    /// A literal integer.
    Int(i64),
    /// The n-th argument followed by a literal suffix.
    ArgSuffix(usize, &'static str),
}

/// A condition for [`Step::When`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cond {
    /// The n-th argument equals a literal.
    ArgEq(usize, &'static str),
    /// The previous step changed something.
    Changed,
    /// The previous step changed nothing.
    Unchanged,
    /// The key exists.
    Exists(KeySlot),
    /// The key does not exist.
    Missing(KeySlot),
}

/// One template operation.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Set a hash field only if absent.
    HSetNx { key: KeySlot, field: Operand, value: Operand },
    /// Set a hash field.
    HSet { key: KeySlot, field: Operand, value: Operand },
    /// Increment a hash field only if the key exists.
    HIncrIfExists { key: KeySlot, field: Operand, delta: Operand },
    /// Decrement a hash field only if the key exists and the field is at
    /// least `delta`; never goes below zero.
    HDecrFloor { key: KeySlot, field: Operand, delta: Operand },
    /// Set the key's expiry in seconds.
    Expire { key: KeySlot, seconds: Operand },
    /// Add a sorted-set member; with `nx` an existing score is kept.
    ZAdd { key: KeySlot, member: Operand, score: Operand, nx: bool },
    /// Increment a member's score only if it is already a member.
    ZIncrIfMember { key: KeySlot, member: Operand, delta: Operand },
    /// Decrement a member's score only if it is at least `delta`.
    ZDecrFloor { key: KeySlot, member: Operand, delta: Operand },
    /// Remove a sorted-set member.
    ZRem { key: KeySlot, member: Operand },
    /// Add a set member.
    SAdd { key: KeySlot, member: Operand },
    /// Remove a set member.
    SRem { key: KeySlot, member: Operand },
    /// Delete the key.
    Del { key: KeySlot },
    /// Stop and return a status code.
    Return(i64),
    /// Set the status returned at the end.
    SetStatus(i64),
    /// Run steps only if the condition holds.
    When { cond: Cond, then: Vec<Step> },
    /// Run steps once per key from slot `from` to the last key.
    ForEachKey { from: usize, steps: Vec<Step> },
}

/// A named script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Catalog name.
    pub name: &'static str,
    /// Names of the fixed key slots.
    pub keys: &'static [&'static str],
    /// Accept any number of extra keys after the fixed ones.
    pub variadic_keys: bool,
    /// Names of the argument slots.
    pub args: &'static [&'static str],
    /// Body.
    pub steps: Vec<Step>,
}

enum Flow {
    Next,
    Return(i64),
}

struct Frame<'t> {
    keys: &'t [String],
    args: &'t [String],
    current: Option<&'t str>,
    last: bool,
    status: i64,
}

impl<'t> Frame<'t> {
    fn key(&self, slot: KeySlot) -> Result<&'t str> {
        let key = match slot {
            KeySlot::At(i) => self.keys.get(i).map(String::as_str),
            KeySlot::Current => self.current,
        };
        key.ok_or_else(|| Error::internal(format!("unbound key slot {:?}", slot)))
    }

    fn value(&self, operand: Operand) -> Result<String> {
        let arg = |i: usize| {
            self.args.get(i).ok_or_else(|| Error::internal(format!("unbound argument {}", i)))
        };
        Ok(match operand {
            Operand::Arg(i) => arg(i)?.clone(),
            Operand::Lit(s) => s.to_string(),
            Operand::Int(n) => n.to_string(),
            Operand::ArgSuffix(i, suffix) => format!("{}{}", arg(i)?, suffix),
        })
    }

    fn int(&self, operand: Operand) -> Result<i64> {
        parse_int(&self.value(operand)?)
    }
}

impl Template {
    /// Validates key and argument counts.
    pub fn check_arity(&self, keys: &[String], args: &[String]) -> Result<()> {
        let keys_ok = if self.variadic_keys {
            keys.len() >= self.keys.len()
        } else {
            keys.len() == self.keys.len()
        };
        if !keys_ok || args.len() != self.args.len() {
            return Err(Error::invalid_argument(format!(
                "{} expects {}{} keys and {} args, got {} keys and {} args",
                self.name,
                self.keys.len(),
                if self.variadic_keys { "+" } else { "" },
                self.args.len(),
                keys.len(),
                args.len()
            )));
        }
        Ok(())
    }

    /// Executes the template and returns its status code.
    pub fn run(&self, ctx: &mut ScriptContext<'_>, keys: &[String], args: &[String]) -> Result<i64> {
        self.check_arity(keys, args)?;
        let mut frame = Frame { keys, args, current: None, last: false, status: 0 };
        match exec(&self.steps, ctx, &mut frame)? {
            Flow::Return(code) => Ok(code),
            Flow::Next => Ok(frame.status),
        }
    }

    /// Renders the template as a Lua script for `EVAL`.
    pub fn to_lua(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "-- {}", self.name);
        let _ = writeln!(out, "-- KEYS: {}{}", self.keys.join(", "), if self.variadic_keys { ", ..." } else { "" });
        let _ = writeln!(out, "-- ARGV: {}", self.args.join(", "));
        out.push_str("local last = 0\nlocal status = 0\n");
        render(&self.steps, 0, &mut out);
        out.push_str("return status\n");
        out
    }
}

fn exec(steps: &[Step], ctx: &mut ScriptContext<'_>, f: &mut Frame<'_>) -> Result<Flow> {
    for step in steps {
        match step {
            Step::HSetNx { key, field, value } => {
                f.last = ctx.hsetnx(f.key(*key)?, &f.value(*field)?, &f.value(*value)?)?;
            }
            Step::HSet { key, field, value } => {
                ctx.hset(f.key(*key)?, &f.value(*field)?, &f.value(*value)?)?;
                f.last = true;
            }
            Step::HIncrIfExists { key, field, delta } => {
                let key = f.key(*key)?;
                f.last = ctx.exists(key);
                if f.last {
                    ctx.hincrby(key, &f.value(*field)?, f.int(*delta)?)?;
                }
            }
            Step::HDecrFloor { key, field, delta } => {
                let key = f.key(*key)?;
                let field = f.value(*field)?;
                let delta = f.int(*delta)?;
                let current = match ctx.hget(key, &field)? {
                    Some(v) => parse_int(&v)?,
                    None => 0,
                };
                f.last = ctx.exists(key) && current >= delta;
                if f.last {
                    ctx.hincrby(key, &field, -delta)?;
                }
            }
            Step::Expire { key, seconds } => {
                f.last = ctx.expire(f.key(*key)?, f.int(*seconds)?)?;
            }
            Step::ZAdd { key, member, score, nx } => {
                f.last = ctx.zadd(f.key(*key)?, &f.value(*member)?, f.int(*score)?, *nx)?;
            }
            Step::ZIncrIfMember { key, member, delta } => {
                let key = f.key(*key)?;
                let member = f.value(*member)?;
                f.last = ctx.zscore(key, &member)?.is_some();
                if f.last {
                    ctx.zincrby(key, &member, f.int(*delta)?)?;
                }
            }
            Step::ZDecrFloor { key, member, delta } => {
                let key = f.key(*key)?;
                let member = f.value(*member)?;
                let delta = f.int(*delta)?;
                f.last = ctx.zscore(key, &member)?.is_some_and(|s| s >= delta);
                if f.last {
                    ctx.zincrby(key, &member, -delta)?;
                }
            }
            Step::ZRem { key, member } => {
                f.last = ctx.zrem(f.key(*key)?, &f.value(*member)?)?;
            }
            Step::SAdd { key, member } => {
                f.last = ctx.sadd(f.key(*key)?, &f.value(*member)?)?;
            }
            Step::SRem { key, member } => {
                f.last = ctx.srem(f.key(*key)?, &f.value(*member)?)?;
            }
            Step::Del { key } => {
                f.last = ctx.del(f.key(*key)?)?;
            }
            Step::Return(code) => return Ok(Flow::Return(*code)),
            Step::SetStatus(code) => f.status = *code,
            Step::When { cond, then } => {
                let holds = match cond {
                    Cond::ArgEq(i, lit) => f.value(Operand::Arg(*i))? == *lit,
                    Cond::Changed => f.last,
                    Cond::Unchanged => !f.last,
                    Cond::Exists(key) => ctx.exists(f.key(*key)?),
                    Cond::Missing(key) => !ctx.exists(f.key(*key)?),
                };
                if holds {
                    if let Flow::Return(code) = exec(then, ctx, f)? {
                        return Ok(Flow::Return(code));
                    }
                }
            }
            Step::ForEachKey { from, steps } => {
                let keys = f.keys;
                let outer = f.current;
                for key in keys.iter().skip(*from) {
                    f.current = Some(key.as_str());
                    if let Flow::Return(code) = exec(steps, ctx, f)? {
                        f.current = outer;
                        return Ok(Flow::Return(code));
                    }
                }
                f.current = outer;
            }
        }
    }
    Ok(Flow::Next)
}

// ----------------------------------------------------------------------
// Lua rendering
// ----------------------------------------------------------------------

fn lua_key(slot: KeySlot) -> String {
    match slot {
        KeySlot::At(i) => format!("KEYS[{}]", i + 1),
        KeySlot::Current => "key".to_string(),
    }
}

fn lua_value(operand: Operand) -> String {
    match operand {
        Operand::Arg(i) => format!("ARGV[{}]", i + 1),
        Operand::Lit(s) => format!("'{}'", s),
        Operand::Int(n) => n.to_string(),
        Operand::ArgSuffix(i, suffix) => format!("ARGV[{}] .. '{}'", i + 1, suffix),
    }
}

fn lua_num(operand: Operand) -> String {
    match operand {
        Operand::Int(n) => n.to_string(),
        other => format!("tonumber({})", lua_value(other)),
    }
}

fn render(steps: &[Step], depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    for step in steps {
        let line = match step {
            Step::HSetNx { key, field, value } => format!(
                "last = redis.call('HSETNX', {}, {}, {})",
                lua_key(*key),
                lua_value(*field),
                lua_value(*value)
            ),
            Step::HSet { key, field, value } => format!(
                "redis.call('HSET', {}, {}, {}) last = 1",
                lua_key(*key),
                lua_value(*field),
                lua_value(*value)
            ),
            Step::HIncrIfExists { key, field, delta } => format!(
                "if redis.call('EXISTS', {k}) == 1 then redis.call('HINCRBY', {k}, {f}, {d}) last = 1 else last = 0 end",
                k = lua_key(*key),
                f = lua_value(*field),
                d = lua_num(*delta)
            ),
            Step::HDecrFloor { key, field, delta } => format!(
                "if redis.call('EXISTS', {k}) == 1 and tonumber(redis.call('HGET', {k}, {f}) or '0') >= {d} then redis.call('HINCRBY', {k}, {f}, -{d}) last = 1 else last = 0 end",
                k = lua_key(*key),
                f = lua_value(*field),
                d = lua_num(*delta)
            ),
            Step::Expire { key, seconds } => {
                format!("last = redis.call('EXPIRE', {}, {})", lua_key(*key), lua_value(*seconds))
            }
            Step::ZAdd { key, member, score, nx } => format!(
                "last = redis.call('ZADD', {}, {}{}, {})",
                lua_key(*key),
                if *nx { "'NX', " } else { "" },
                lua_value(*score),
                lua_value(*member)
            ),
            Step::ZIncrIfMember { key, member, delta } => format!(
                "if redis.call('ZSCORE', {k}, {m}) then redis.call('ZINCRBY', {k}, {d}, {m}) last = 1 else last = 0 end",
                k = lua_key(*key),
                m = lua_value(*member),
                d = lua_num(*delta)
            ),
            Step::ZDecrFloor { key, member, delta } => format!(
                "do local s = redis.call('ZSCORE', {k}, {m}) if s and tonumber(s) >= {d} then redis.call('ZINCRBY', {k}, -{d}, {m}) last = 1 else last = 0 end end",
                k = lua_key(*key),
                m = lua_value(*member),
                d = lua_num(*delta)
            ),
            Step::ZRem { key, member } => {
                format!("last = redis.call('ZREM', {}, {})", lua_key(*key), lua_value(*member))
            }
            Step::SAdd { key, member } => {
                format!("last = redis.call('SADD', {}, {})", lua_key(*key), lua_value(*member))
            }
            Step::SRem { key, member } => {
                format!("last = redis.call('SREM', {}, {})", lua_key(*key), lua_value(*member))
            }
            Step::Del { key } => format!("last = redis.call('DEL', {})", lua_key(*key)),
            Step::Return(code) => format!("do return {} end", code),
            Step::SetStatus(code) => format!("status = {}", code),
            Step::When { cond, then } => {
                let test = match cond {
                    Cond::ArgEq(i, lit) => format!("ARGV[{}] == '{}'", i + 1, lit),
                    Cond::Changed => "last == 1".to_string(),
                    Cond::Unchanged => "last == 0".to_string(),
                    Cond::Exists(key) => format!("redis.call('EXISTS', {}) == 1", lua_key(*key)),
                    Cond::Missing(key) => format!("redis.call('EXISTS', {}) == 0", lua_key(*key)),
                };
                let _ = writeln!(out, "{}if {} then", pad, test);
                render(then, depth + 1, out);
                let _ = writeln!(out, "{}end", pad);
                continue;
            }
            Step::ForEachKey { from, steps } => {
                let _ = writeln!(out, "{}for i = {}, #KEYS do", pad, from + 1);
                let _ = writeln!(out, "{}  local key = KEYS[i]", pad);
                render(steps, depth + 1, out);
                let _ = writeln!(out, "{}end", pad);
                continue;
            }
        };
        let _ = writeln!(out, "{}{}", pad, line);
    }
}
