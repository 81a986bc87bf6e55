// Recovery Tests for EngageDb
// These tests verify that cached counters survive restarts and torn journals

use engagedb::engine::{CounterStore, EntityRef, Repository};
use engagedb::{Controller, Kind, MemoryRepository, Options, Store, Visibility};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn open_controller(
    path: &Path,
    repo: &Arc<MemoryRepository>,
) -> (Arc<Store>, Controller<MemoryRepository, Store>) {
    env_logger::try_init().ok();
    let options = Options::default();
    let store = Arc::new(Store::open(path, options.clone()).unwrap());
    let controller = Controller::new(repo.clone(), store.clone(), &options);
    (store, controller)
}

fn journal_path(dir: &Path) -> std::path::PathBuf {
    let mut journals: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "journal"))
        .collect();
    journals.sort();
    journals.pop().unwrap()
}

/// Test that committed scripts are replayed on reopen
#[test]
fn test_counters_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let repo = Arc::new(MemoryRepository::new());

    let before = {
        let (store, controller) = open_controller(temp_dir.path(), &repo);
        controller.register_user("owner").unwrap();
        controller.create_content(Kind::Column, 5, "owner", Visibility::Public).unwrap();
        controller.agree(Kind::Column, 5, "reader").unwrap();
        controller.agree(Kind::Column, 5, "other").unwrap();
        controller.follow("reader", "owner").unwrap();
        store.dump().unwrap()
    };

    let (store, controller) = open_controller(temp_dir.path(), &repo);
    assert_eq!(store.dump().unwrap(), before);
    assert_eq!(store.hget("column:5", "agree").unwrap(), Some("2".to_string()));
    assert_eq!(controller.achievement("owner").unwrap().followed, 1);

    // The system of record still holds the agree, so a repeat is a no-op.
    assert!(controller.agree(Kind::Column, 5, "reader").unwrap().is_noop());
    assert_eq!(controller.content_counters(Kind::Column, 5).unwrap().agree, 2);
}

/// Test that a failed script leaves nothing in the journal
#[test]
fn test_failed_script_is_not_journaled() {
    let temp_dir = TempDir::new().unwrap();
    let before = {
        let store = Store::open(temp_dir.path(), Options::default()).unwrap();
        store.execute(&["HSET", "user:a:achievement", "followed", "0"]).unwrap();
        store.execute(&["SET", "user:b:achievement", "corrupt"]).unwrap();
        let size = store.journal_size().unwrap();

        let keys = strings(&["user:a:achievement", "user:b:achievement", "user:b:following"]);
        let result = store.run("SetAchievementFollowToCache", &keys, &strings(&["a", "1"]));
        assert!(result.is_err());
        assert_eq!(store.journal_size().unwrap(), size);
        store.dump().unwrap()
    };

    let store = Store::open(temp_dir.path(), Options::default()).unwrap();
    assert_eq!(store.dump().unwrap(), before);
    assert!(!store.sismember("user:b:following", "a").unwrap());
}

/// Test recovery from a torn journal tail
#[test]
fn test_torn_tail_is_truncated() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = Store::open(temp_dir.path(), Options::default()).unwrap();
        for i in 0..10 {
            store.execute(&["HINCRBY", "article:1", "view", "1"]).unwrap();
            let score = i.to_string();
            store.execute(&["ZADD", "article:hot", score.as_str(), "1"]).unwrap();
        }
    }

    // Simulate a crash in the middle of an append
    {
        let mut file = OpenOptions::new().append(true).open(journal_path(temp_dir.path())).unwrap();
        file.write_all(&[0x5a, 0x00, 0x13, 0x07, 0xff]).unwrap();
    }

    {
        let store = Store::open(temp_dir.path(), Options::default()).unwrap();
        assert_eq!(store.hget("article:1", "view").unwrap(), Some("10".to_string()));
        assert_eq!(store.zscore("article:hot", "1").unwrap(), Some(9));
        store.execute(&["HINCRBY", "article:1", "view", "1"]).unwrap();
    }

    let store = Store::open(temp_dir.path(), Options::default()).unwrap();
    assert_eq!(store.hget("article:1", "view").unwrap(), Some("11".to_string()));
}

/// Test that a checkpoint compacts the journal without losing state
#[test]
fn test_checkpoint_then_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let repo = Arc::new(MemoryRepository::new());

    let before = {
        let (store, controller) = open_controller(temp_dir.path(), &repo);
        controller.register_user("owner").unwrap();
        controller.create_content(Kind::Talk, 1, "owner", Visibility::Public).unwrap();
        for _ in 0..200 {
            controller.view(Kind::Talk, 1).unwrap();
        }
        let size = store.journal_size().unwrap();
        store.checkpoint().unwrap();
        assert!(store.journal_size().unwrap() < size);
        controller.agree(Kind::Talk, 1, "reader").unwrap();
        store.dump().unwrap()
    };

    let (store, controller) = open_controller(temp_dir.path(), &repo);
    assert_eq!(store.dump().unwrap(), before);
    let counters = controller.content_counters(Kind::Talk, 1).unwrap();
    assert_eq!((counters.view, counters.agree), (200, 1));
}

/// Test that a lost cache is rebuilt from the system of record
#[test]
fn test_lost_cache_rehydrates_from_repository() {
    let repo = Arc::new(MemoryRepository::new());
    let options = Options::default().use_journal(false);
    {
        let store = Arc::new(Store::in_memory(options.clone()).unwrap());
        let controller = Controller::new(repo.clone(), store, &options);
        controller.register_user("owner").unwrap();
        controller.create_content(Kind::Article, 3, "owner", Visibility::Private).unwrap();
        controller.view(Kind::Article, 3).unwrap();
        controller.collect(Kind::Article, 3, "reader").unwrap();
    }

    let store = Arc::new(Store::in_memory(options.clone()).unwrap());
    let controller = Controller::new(repo.clone(), store.clone(), &options);
    assert_eq!(store.key_count().unwrap(), 0);

    let counters = controller.content_counters(Kind::Article, 3).unwrap();
    assert_eq!((counters.view, counters.collect), (1, 1));
    assert_eq!(counters.visibility, Visibility::Private);
    assert_eq!(controller.achievement("owner").unwrap().score, 1);
    assert_eq!(controller.content_counts("owner").unwrap().article, 1);

    let record = repo.get(&EntityRef::content(Kind::Article, 3)).unwrap().unwrap();
    assert_eq!(record.column("collect"), 1);
    assert!(store.exists("article:3").unwrap());
}
