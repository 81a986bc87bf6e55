// Lua Parity Tests for EngageDb
// The native template interpreter and the rendered Lua scripts must agree

use engagedb::engine::{CounterStore, LuaCounterStore, Outcome, Status};
use engagedb::store::{Keyspace, Value};
use engagedb::{Controller, Kind, MemoryRepository, Options, Result, Store, Visibility};
use std::sync::Arc;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Drives one controller through a fixed workload and returns every outcome.
fn workload<S: CounterStore>(controller: &Controller<MemoryRepository, S>, store: &Store) -> Result<Vec<Outcome>> {
    let mut outcomes = vec![
        controller.register_user("owner")?,
        controller.register_user("reader")?,
        controller.create_content(Kind::Article, 1, "owner", Visibility::Public)?,
        controller.create_content(Kind::Talk, 2, "owner", Visibility::Private)?,
        controller.create_content(Kind::Column, 3, "owner", Visibility::Public)?,
        controller.agree(Kind::Article, 1, "reader")?,
        controller.agree(Kind::Article, 1, "other")?,
        controller.agree(Kind::Article, 1, "reader")?,
        controller.cancel_agree(Kind::Article, 1, "other")?,
        controller.view(Kind::Article, 1)?,
        controller.view(Kind::Talk, 2)?,
        controller.collect(Kind::Article, 1, "reader")?,
        controller.collect(Kind::Column, 3, "reader")?,
        controller.cancel_collect(Kind::Column, 3, "reader")?,
        controller.add_comment(Kind::Article, 1, 10, "reader")?,
        controller.add_comment(Kind::Article, 1, 11, "other")?,
        controller.remove_comment(11)?,
        controller.agree(Kind::Comment, 10, "owner")?,
        controller.follow("reader", "owner")?,
        controller.follow("other", "owner")?,
        controller.unfollow("other", "owner")?,
        controller.republish(Kind::Talk, 2, Visibility::Public)?,
        controller.delete_content(Kind::Column, 3)?,
    ];

    // Lose the primary record, then mutate it.
    store.execute(&["DEL", "article:1"])?;
    outcomes.push(controller.view(Kind::Article, 1)?);

    // Lose a marker; the cancel refreshes the counters instead.
    store.execute(&["DEL", "user:reader:agree:article"])?;
    outcomes.push(controller.cancel_agree(Kind::Article, 1, "reader")?);
    Ok(outcomes)
}

/// Compares two keyspaces. Collection timestamps depend on the wall clock,
/// so those sorted sets are compared by membership only.
fn assert_same_keyspace(native: &Keyspace, lua: &Keyspace) {
    let now = engagedb::store::now_millis();
    let mut native_keys: Vec<&str> = native.keys(now).collect();
    let mut lua_keys: Vec<&str> = lua.keys(now).collect();
    native_keys.sort();
    lua_keys.sort();
    assert_eq!(native_keys, lua_keys);

    for key in native_keys {
        let a = native.get(key, now).unwrap();
        let b = lua.get(key, now).unwrap();
        assert_eq!(a.expires_at.is_some(), b.expires_at.is_some(), "expiry of {}", key);
        match (&a.value, &b.value) {
            (Value::ZSet(x), Value::ZSet(y)) if key.contains(":collections:") => {
                let members = |z: &engagedb::store::SortedSet| -> Vec<String> {
                    z.rev_range(0, -1).into_iter().map(|(m, _)| m.to_string()).collect()
                };
                let (mut mx, mut my) = (members(x), members(y));
                mx.sort();
                my.sort();
                assert_eq!(mx, my, "members of {}", key);
            }
            (x, y) => assert_eq!(x, y, "value of {}", key),
        }
    }
}

#[test]
fn test_controller_workload_parity() {
    let options = Options::default();

    let native_store = Arc::new(Store::in_memory(options.clone()).unwrap());
    let native = Controller::new(Arc::new(MemoryRepository::new()), native_store.clone(), &options);
    let native_outcomes = workload(&native, &native_store).unwrap();

    let lua_store = Arc::new(Store::in_memory(options.clone()).unwrap());
    let lua_backend = Arc::new(LuaCounterStore::new(lua_store.clone()));
    let lua = Controller::new(Arc::new(MemoryRepository::new()), lua_backend, &options);
    let lua_outcomes = workload(&lua, &lua_store).unwrap();

    assert_eq!(native_outcomes, lua_outcomes);
    assert_same_keyspace(&native_store.dump().unwrap(), &lua_store.dump().unwrap());
    assert_eq!(lua.content_counters(Kind::Article, 1).unwrap().agree, 0);
    assert_eq!(lua_store.zscore("article:leaderboard", "1").unwrap(), Some(0));
}

#[test]
fn test_generic_primitives_parity() {
    let options = Options::default();
    let native = Store::in_memory(options.clone()).unwrap();
    let lua_store = Arc::new(Store::in_memory(options).unwrap());
    let lua = LuaCounterStore::new(lua_store.clone());

    for store in [&native, lua.store()] {
        store.execute(&["HSET", "article:1", "agree", "1"]).unwrap();
    }
    let checks: [(&str, &str, i64, Status); 4] = [
        ("article:1", "agree", 1, Status::Applied),
        ("article:404", "agree", 1, Status::Missing),
        ("article:1", "view", 1, Status::Applied),
        ("article:1", "agree", 5, Status::NoOp),
    ];
    for (key, field, delta, expected) in checks {
        if expected == Status::NoOp {
            assert_eq!(native.decr_floor(key, field, delta).unwrap(), expected);
            assert_eq!(lua.decr_floor(key, field, delta).unwrap(), expected);
        } else {
            assert_eq!(native.incr_if_exists(key, field, delta).unwrap(), expected);
            assert_eq!(lua.incr_if_exists(key, field, delta).unwrap(), expected);
        }
    }
    assert_same_keyspace(&native.dump().unwrap(), &lua_store.dump().unwrap());
}

#[test]
fn test_failure_parity() {
    let options = Options::default();
    let native = Store::in_memory(options.clone()).unwrap();
    let lua_store = Arc::new(Store::in_memory(options).unwrap());
    let lua = LuaCounterStore::new(lua_store.clone());

    let keys = strings(&["user:a:achievement", "user:b:achievement", "user:b:following"]);
    let args = strings(&["a", "1"]);
    for store in [&native, lua.store()] {
        store.execute(&["HSET", "user:a:achievement", "followed", "0"]).unwrap();
        store.execute(&["SET", "user:b:achievement", "corrupt"]).unwrap();
    }

    assert!(native.run("SetAchievementFollowToCache", &keys, &args).is_err());
    assert!(lua.run("SetAchievementFollowToCache", &keys, &args).is_err());
    assert_same_keyspace(&native.dump().unwrap(), &lua_store.dump().unwrap());
    assert!(!lua_store.sismember("user:b:following", "a").unwrap());

    // Arity is checked before anything runs.
    assert!(lua.run("SetAchievementFollowToCache", &keys[..2], &args).is_err());
    assert!(lua.run("NoSuchScript", &keys, &args).is_err());
}

#[test]
fn test_every_template_renders() {
    let lua = LuaCounterStore::new(Arc::new(Store::in_memory(Options::default()).unwrap()));
    for template in engagedb::engine::Catalog::builtin().iter() {
        let source = lua.source(template.name).unwrap();
        assert!(source.contains("redis.call"), "{} renders no calls", template.name);
    }
}
