// Concurrent Access Tests for EngageDb
// These tests verify that counters stay consistent under concurrent mutation

use engagedb::engine::{EntityRef, Repository};
use engagedb::{Controller, Kind, MemoryRepository, Options, Store, Visibility};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Barrier};
use std::thread;

type TestController = Controller<MemoryRepository, Store>;

fn setup_controller() -> (Arc<MemoryRepository>, Arc<Store>, Arc<TestController>) {
    let options = Options::default();
    env_logger::try_init().ok();
    let repo = Arc::new(MemoryRepository::new());
    let store = Arc::new(Store::in_memory(options.clone()).unwrap());
    let controller = Arc::new(Controller::new(repo.clone(), store.clone(), &options));
    controller.register_user("owner").unwrap();
    controller.create_content(Kind::Article, 1, "owner", Visibility::Public).unwrap();
    (repo, store, controller)
}

fn sor_column(repo: &MemoryRepository, entity: &EntityRef, column: &str) -> i64 {
    repo.get(entity).unwrap().unwrap().column(column)
}

/// Test concurrent agrees from distinct users
#[test]
fn test_concurrent_agrees_from_many_users() {
    let (repo, store, controller) = setup_controller();
    let num_threads = 16;
    let barrier = Arc::new(Barrier::new(num_threads));

    let mut handles = vec![];
    for thread_id in 0..num_threads {
        let controller = Arc::clone(&controller);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            controller.agree(Kind::Article, 1, &format!("user_{}", thread_id)).unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = num_threads as i64;
    assert_eq!(controller.content_counters(Kind::Article, 1).unwrap().agree, expected);
    assert_eq!(store.zscore("article:hot", "1").unwrap(), Some(expected));
    assert_eq!(controller.achievement("owner").unwrap().score, expected);
    assert_eq!(sor_column(&repo, &EntityRef::content(Kind::Article, 1), "agree"), expected);
}

/// Test the same user racing against itself
#[test]
fn test_duplicate_agree_race_counts_once() {
    let (repo, store, controller) = setup_controller();
    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));

    let mut handles = vec![];
    for _ in 0..num_threads {
        let controller = Arc::clone(&controller);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            controller.agree(Kind::Article, 1, "eager").unwrap().recorded
        }));
    }
    let recorded = handles.into_iter().map(|h| h.join().unwrap()).filter(|r| *r).count();

    assert_eq!(recorded, 1);
    assert_eq!(store.hget("article:1", "agree").unwrap(), Some("1".to_string()));
    assert_eq!(sor_column(&repo, &EntityRef::content(Kind::Article, 1), "agree"), 1);
    assert_eq!(sor_column(&repo, &EntityRef::achievement("owner"), "score"), 1);
}

/// Test random interleavings of agree and cancel
#[test]
fn test_random_toggle_interleavings() {
    let (repo, store, controller) = setup_controller();
    let num_threads = 8;
    let ops_per_thread = 50;
    let barrier = Arc::new(Barrier::new(num_threads));

    let mut handles = vec![];
    for thread_id in 0..num_threads {
        let controller = Arc::clone(&controller);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(thread_id as u64);
            let user = format!("user_{}", thread_id);
            let mut agreed = false;
            barrier.wait();
            for _ in 0..ops_per_thread {
                if rng.random_bool(0.5) {
                    controller.agree(Kind::Article, 1, &user).unwrap();
                    agreed = true;
                } else {
                    controller.cancel_agree(Kind::Article, 1, &user).unwrap();
                    agreed = false;
                }
                if rng.random_range(0..4) == 0 {
                    controller.view(Kind::Article, 1).unwrap();
                }
            }
            (user, agreed)
        }));
    }
    let finals: Vec<(String, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let expected = finals.iter().filter(|(_, agreed)| *agreed).count() as i64;

    let counters = controller.content_counters(Kind::Article, 1).unwrap();
    assert_eq!(counters.agree, expected);
    assert_eq!(store.zscore("article:leaderboard", "1").unwrap(), Some(expected));
    assert_eq!(sor_column(&repo, &EntityRef::content(Kind::Article, 1), "agree"), expected);
    assert_eq!(
        sor_column(&repo, &EntityRef::content(Kind::Article, 1), "view"),
        counters.view
    );
    for (user, agreed) in &finals {
        let marker = format!("user:{}:agree:article", user);
        assert_eq!(store.sismember(&marker, "1").unwrap(), *agreed, "{}", user);
    }
}

/// Test concurrent follows of one user
#[test]
fn test_concurrent_follows() {
    let (repo, _, controller) = setup_controller();
    let num_threads = 10;
    let barrier = Arc::new(Barrier::new(num_threads));

    let mut handles = vec![];
    for thread_id in 0..num_threads {
        let controller = Arc::clone(&controller);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let fan = format!("fan_{}", thread_id);
            controller.register_user(&fan).unwrap();
            barrier.wait();
            controller.follow(&fan, "owner").unwrap();
            // A second follow from the same fan changes nothing.
            controller.follow(&fan, "owner").unwrap();
            if thread_id % 2 == 0 {
                controller.unfollow(&fan, "owner").unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = (num_threads / 2) as i64;
    assert_eq!(controller.achievement("owner").unwrap().followed, expected);
    assert_eq!(sor_column(&repo, &EntityRef::achievement("owner"), "followed"), expected);
    assert_eq!(controller.achievement("fan_1").unwrap().follow, 1);
    assert_eq!(controller.achievement("fan_0").unwrap().follow, 0);
}

/// Test readers running alongside writers
#[test]
fn test_concurrent_reads_and_writes() {
    let (_, _, controller) = setup_controller();
    let writers = 4;
    let views_per_writer = 100;
    let barrier = Arc::new(Barrier::new(writers + 2));

    let mut handles = vec![];
    for _ in 0..writers {
        let controller = Arc::clone(&controller);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for _ in 0..views_per_writer {
                controller.view(Kind::Article, 1).unwrap();
            }
        }));
    }
    for _ in 0..2 {
        let controller = Arc::clone(&controller);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let mut last = 0;
            for _ in 0..views_per_writer {
                let view = controller.content_counters(Kind::Article, 1).unwrap().view;
                assert!(view >= last, "view count went backwards: {} < {}", view, last);
                last = view;
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let total = (writers * views_per_writer) as i64;
    assert_eq!(controller.content_counters(Kind::Article, 1).unwrap().view, total);
    assert_eq!(controller.achievement("owner").unwrap().view, total);
}
