//! Example: Engagement Counters over a Journaled Store
//!
//! Walks through the life of one article: creation, agrees, views, a
//! collection, comments, a lost cache record and its rehydration, and
//! finally deletion.

use anyhow::Context;
use engagedb::engine::{CounterStore, LuaCounterStore};
use engagedb::{Controller, Kind, MemoryRepository, Options, Store, Visibility};
use std::sync::Arc;

const DATA_DIR: &str = "./example_engagement_db";

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let options = Options::default();
    let store = Arc::new(Store::open(DATA_DIR, options.clone()).context("opening the counter store")?);
    let repo = Arc::new(MemoryRepository::new());
    let controller = Controller::new(repo, store.clone(), &options);

    println!("=== Engagement Counters Example ===\n");

    controller.register_user("alice")?;
    controller.create_content(Kind::Article, 42, "alice", Visibility::Public)?;
    println!("alice published article 42");

    for reader in ["bob", "carol", "dave"] {
        controller.agree(Kind::Article, 42, reader)?;
        controller.view(Kind::Article, 42)?;
    }
    let duplicate = controller.agree(Kind::Article, 42, "bob")?;
    println!("bob agreeing twice is a no-op: {}", duplicate.is_noop());
    controller.cancel_agree(Kind::Article, 42, "dave")?;
    controller.collect(Kind::Article, 42, "carol")?;
    controller.add_comment(Kind::Article, 42, 1001, "bob")?;
    controller.follow("bob", "alice")?;

    let counters = controller.content_counters(Kind::Article, 42)?;
    println!("\narticle 42:\n{}", serde_json::to_string_pretty(&counters)?);
    println!("alice:\n{}", serde_json::to_string_pretty(&controller.achievement("alice")?)?);
    println!("hot ranking: {:?}", controller.ranking(Kind::Article, "hot", 10)?);

    // Lose the cached record; the next read rebuilds it from the system of record.
    store.execute(&["DEL", "article:42"])?;
    let rebuilt = controller.content_counters(Kind::Article, 42)?;
    println!("\nrehydrated after eviction: agree={} view={}", rebuilt.agree, rebuilt.view);

    // The same catalog, rendered to Lua and run through EVAL.
    let lua = LuaCounterStore::new(store.clone());
    let status = lua.incr_if_exists("article:42", "view", 1)?;
    println!("view via Lua: {:?}", status);
    if let Some(source) = lua.source("SetAgreeToCache") {
        println!("\nSetAgreeToCache as Lua:\n{}", source);
    }

    controller.delete_content(Kind::Article, 42)?;
    println!("\nafter delete: {:?}", controller.ranking(Kind::Article, "hot", 10)?);
    println!("alice's counts: {:?}", controller.content_counts("alice")?);

    drop(controller);
    drop(lua);
    drop(store);
    std::fs::remove_dir_all(DATA_DIR).ok();
    Ok(())
}
