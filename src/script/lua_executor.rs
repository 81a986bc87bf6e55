//! LuaExecutor executes Lua scripts against a script context.
//!
//! Scripts follow the Redis `EVAL` conventions: keys arrive in the global
//! `KEYS` table, arguments in `ARGV`, and commands are issued through
//! `redis.call` (errors abort the script) or `redis.pcall` (errors are
//! returned as `{err = message}`). A nil reply is seen by Lua as `false`.
//!
//! The executor itself never commits. Every command writes through the
//! [`ScriptContext`], so when the script fails the caller drops the context
//! and all of its writes are rolled back.

use crate::error::{Error, Result};
use crate::script::context::ScriptContext;
use crate::store::command::{Command, Reply};
use mlua::{Lua, Value, Variadic};
use std::cell::RefCell;
use std::time::{Duration, Instant};

/// LuaExecutor runs `EVAL`-style scripts.
///
/// # Features
///
/// - **Automatic Rollback**: a failing script leaves the keyspace untouched
///   once its context is dropped
/// - **Timeout Control**: scripts can be limited to a maximum execution time
/// - **Read-Your-Writes**: `redis.call` sees the script's earlier writes
///
/// # Example
///
/// ```
/// use engagedb::script::{LuaExecutor, ScriptContext};
/// use engagedb::store::{Keyspace, Reply};
///
/// let mut keyspace = Keyspace::new();
/// let mut ctx = ScriptContext::new(&mut keyspace, 0);
/// let executor = LuaExecutor::new(None);
///
/// let reply = executor
///     .execute(&mut ctx, "return redis.call('HINCRBY', KEYS[1], 'agree', ARGV[1])",
///         &["article:1".to_string()], &["2".to_string()])
///     .unwrap();
/// assert_eq!(reply, Reply::Int(2));
/// ctx.commit();
/// ```
#[derive(Debug, Clone, Default)]
pub struct LuaExecutor {
    /// Maximum script execution time
    timeout: Option<Duration>,
}

impl LuaExecutor {
    /// Creates a new LuaExecutor.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Optional maximum execution time for scripts
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Executes a Lua script and returns its reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Script`] if:
    /// - The script has syntax errors
    /// - The script raises a runtime error or returns `{err = ...}`
    /// - A `redis.call` command fails
    /// - The script exceeds the timeout limit
    ///
    /// The writes already made through `ctx` are not reverted here; the
    /// caller drops or rolls back the context.
    pub fn execute(
        &self,
        ctx: &mut ScriptContext<'_>,
        script: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<Reply> {
        let start_time = Instant::now();

        // Create Lua VM
        let lua = Lua::new();

        // Set up timeout hook if specified
        if let Some(timeout) = self.timeout {
            let timeout_start = start_time;
            lua.set_hook(
                mlua::HookTriggers { every_nth_instruction: Some(1000), ..Default::default() },
                move |_lua, _debug| {
                    if timeout_start.elapsed() > timeout {
                        Err(mlua::Error::RuntimeError("Script execution timeout".to_string()))
                    } else {
                        Ok(())
                    }
                },
            );
        }

        let ctx = RefCell::new(ctx);
        let result = lua.scope(|scope| {
            let globals = lua.globals();
            globals.set("KEYS", lua.create_sequence_from(keys.iter().map(String::as_str))?)?;
            globals.set("ARGV", lua.create_sequence_from(args.iter().map(String::as_str))?)?;

            let redis = lua.create_table()?;
            redis.set(
                "call",
                scope.create_function(|lua, argv: Variadic<Value<'_>>| {
                    let reply = dispatch(&ctx, &argv)
                        .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
                    reply_to_lua(lua, reply)
                })?,
            )?;
            redis.set(
                "pcall",
                scope.create_function(|lua, argv: Variadic<Value<'_>>| match dispatch(&ctx, &argv) {
                    Ok(reply) => reply_to_lua(lua, reply),
                    Err(e) => reply_table(lua, "err", e.to_string()),
                })?,
            )?;
            redis.set(
                "status_reply",
                lua.create_function(|lua, msg: String| reply_table(lua, "ok", msg))?,
            )?;
            redis.set(
                "error_reply",
                lua.create_function(|lua, msg: String| reply_table(lua, "err", msg))?,
            )?;
            globals.set("redis", redis)?;

            let value = lua.load(script).eval::<Value<'_>>()?;
            reply_from_lua(value)
        });

        match result {
            Ok(reply) => {
                log::debug!("Lua script executed successfully in {:?}", start_time.elapsed());
                Ok(reply)
            }
            Err(e) => {
                log::warn!("Lua script failed: {}", e);
                Err(Error::script(format!("Lua script failed: {}", e)))
            }
        }
    }

    /// Sets the timeout for script execution.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum execution time, or None for no limit
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Gets the current timeout setting.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

fn dispatch(ctx: &RefCell<&mut ScriptContext<'_>>, argv: &[Value<'_>]) -> Result<Reply> {
    let argv = argv
        .iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.to_str()?.to_string()),
            Value::Integer(i) => Ok(i.to_string()),
            Value::Number(n) if n.fract() == 0.0 => Ok((*n as i64).to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(Error::script(format!(
                "Lua redis lib command arguments must be strings or integers, got {}",
                other.type_name()
            ))),
        })
        .collect::<Result<Vec<String>>>()?;

    let cmd = Command::parse(&argv)?;
    let mut ctx = ctx.try_borrow_mut().map_err(|_| Error::internal("re-entrant redis.call"))?;
    ctx.execute(&cmd)
}

fn reply_table<'lua>(lua: &'lua Lua, field: &str, msg: String) -> mlua::Result<Value<'lua>> {
    let table = lua.create_table()?;
    table.set(field, msg)?;
    Ok(Value::Table(table))
}

fn reply_to_lua<'lua>(lua: &'lua Lua, reply: Reply) -> mlua::Result<Value<'lua>> {
    Ok(match reply {
        Reply::Nil => Value::Boolean(false),
        Reply::Int(i) => Value::Integer(i),
        Reply::Bulk(s) => Value::String(lua.create_string(&s)?),
        Reply::Status(s) => return reply_table(lua, "ok", s),
        Reply::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.into_iter().enumerate() {
                table.raw_set(i + 1, reply_to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
    })
}

fn reply_from_lua(value: Value<'_>) -> mlua::Result<Reply> {
    Ok(match value {
        Value::Nil | Value::Boolean(false) => Reply::Nil,
        Value::Boolean(true) => Reply::Int(1),
        Value::Integer(i) => Reply::Int(i),
        Value::Number(n) => Reply::Int(n.trunc() as i64),
        Value::String(s) => Reply::Bulk(s.to_str()?.to_string()),
        Value::Table(table) => {
            if let Some(err) = table.get::<_, Option<String>>("err")? {
                return Err(mlua::Error::RuntimeError(err));
            }
            if let Some(ok) = table.get::<_, Option<String>>("ok")? {
                return Ok(Reply::Status(ok));
            }
            Reply::Array(
                table
                    .sequence_values::<Value<'_>>()
                    .map(|v| v.and_then(reply_from_lua))
                    .collect::<mlua::Result<Vec<_>>>()?,
            )
        }
        _ => Reply::Nil,
    })
}
