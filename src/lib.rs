//! # EngageDb - Engagement Counters over an Embedded Scripted Store
//!
//! EngageDb keeps the engagement counters of a content platform (agrees,
//! views, collects, comments, follows, rankings and per-user aggregates)
//! consistent across many cached views without a distributed transaction
//! between the cache and the system of record.
//!
//! ## Architecture
//!
//! - **Store**: typed key-value store (strings, hashes, sorted sets, sets)
//!   with per-key TTL and atomic script execution
//! - **Journal**: write-ahead journal of committed scripts, CRC-framed
//! - **Script**: declarative templates and Lua `EVAL` with rollback
//! - **Engine**: script catalog, dispatcher, controller and rehydration
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use engagedb::{Options, Store};
//!
//! # fn main() -> Result<(), engagedb::Error> {
//! // Open or create a journaled store
//! let store = Store::open("./data", Options::default())?;
//!
//! // Direct commands
//! store.execute(&["HSET", "article:1", "agree", "0"])?;
//! store.execute(&["HINCRBY", "article:1", "agree", "1"])?;
//!
//! // Reads
//! if let Some(agree) = store.hget("article:1", "agree")? {
//!     println!("agree: {}", agree);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod config;
pub mod engine;
pub mod error;
pub mod journal;
pub mod script;
pub mod store;
pub mod write_batch;

// Re-exports
pub use config::Options;
pub use engine::{Controller, CounterStore, Kind, MemoryRepository, Visibility};
pub use error::{Error, Result};
pub use store::Store;
pub use write_batch::{WriteBatch, WriteOp};
