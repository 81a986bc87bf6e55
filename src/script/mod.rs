//! Atomic script execution with automatic rollback.
//!
//! Scripts run with exclusive access to the keyspace through a
//! [`ScriptContext`]. Writes are applied in place and undone if the script
//! fails, so other clients never observe a partially applied script.
//!
//! # Architecture
//!
//! - **ScriptContext**: read-your-writes view of the keyspace with an undo log
//! - **Template**: declarative catalog scripts, run natively or rendered to Lua
//! - **LuaExecutor**: runs `EVAL`-style Lua scripts through `redis.call`
//!
//! # Example
//!
//! ```
//! use engagedb::{Options, Store};
//!
//! # fn main() -> Result<(), engagedb::Error> {
//! let store = Store::in_memory(Options::default())?;
//!
//! let script = r#"
//!     if redis.call('EXISTS', KEYS[1]) == 0 then
//!         return 2
//!     end
//!     redis.call('HINCRBY', KEYS[1], 'agree', ARGV[1])
//!     return 0
//! "#;
//!
//! let reply = store.eval(script, &["article:1".to_string()], &["1".to_string()])?;
//! assert_eq!(reply.as_int(), Some(2));
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod lua_executor;
pub mod template;

pub use context::ScriptContext;
pub use lua_executor::LuaExecutor;
pub use template::{Cond, KeySlot, Operand, Step, Template};
