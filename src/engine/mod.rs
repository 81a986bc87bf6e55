//! Engagement-counter synchronization engine.
//!
//! Keeps the cached, denormalized views of engagement counters (per-entity
//! counters, rankings, per-user indexes and achievements) consistent with
//! the system of record under concurrent mutation.
//!
//! # Architecture
//!
//! - **catalog**: the atomic scripts, one per logical mutation
//! - **dispatch**: business event → script, keys and arguments
//! - **adapter**: the [`CounterStore`] seam over the scripted store
//! - **controller**: system of record first, cache as best-effort accelerator
//! - **rehydrate**: repopulates counters on a cache miss
//!
//! # Example
//!
//! ```
//! use engagedb::engine::{Controller, Kind, MemoryRepository, Visibility};
//! use engagedb::{Options, Store};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), engagedb::Error> {
//! let options = Options::default();
//! let store = Arc::new(Store::in_memory(options.clone())?);
//! let repo = Arc::new(MemoryRepository::new());
//! let controller = Controller::new(repo, store, &options);
//!
//! controller.register_user("alice")?;
//! controller.create_content(Kind::Article, 1, "alice", Visibility::Public)?;
//! controller.agree(Kind::Article, 1, "bob")?;
//!
//! assert_eq!(controller.content_counters(Kind::Article, 1)?.agree, 1);
//! assert_eq!(controller.achievement("alice")?.agree, 1);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod catalog;
pub mod controller;
pub mod dispatch;
pub mod keys;
pub mod lifecycle;
pub mod model;
pub mod rehydrate;
pub mod repository;

pub use adapter::{CounterStore, LuaCounterStore, Status};
pub use catalog::Catalog;
pub use controller::{CacheOutcome, Controller, Outcome};
pub use dispatch::{Dispatcher, Event, Invocation, KindSpec, RankingSpec, KINDS, RANKINGS};
pub use lifecycle::{RecordState, Transition};
pub use model::{ContentCounters, Engagement, Kind, UserAchievement, UserContentCounts, Visibility};
pub use rehydrate::Rehydrator;
pub use repository::{CounterRecord, Edge, EntityRef, MemoryRepository, Relation, Repository};
