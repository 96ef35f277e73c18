use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use kv_sql::config::ExpiryConfig;
use kv_sql::store::{ExpiryManager, ManualClock, SqliteTransactor, StoreError, StoreManager};

const START: i64 = 1_700_000_000_000;

fn setup() -> (StoreManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let manager = StoreManager::open_memory_with_clock(clock.clone()).unwrap();
    (manager, clock)
}

#[test]
fn test_expired_keys_are_invisible() {
    let (manager, clock) = setup();
    let ttl = Duration::from_secs(10);
    manager.strings().set_expires("s", "v", ttl).unwrap();
    manager.hashes().set("h", "f", "v").unwrap();
    manager.lists().push_back("l", "a").unwrap();
    manager.sets().add("set", ["a"]).unwrap();
    manager.zsets().add("z", "a", 1.0).unwrap();
    for name in ["h", "l", "set", "z"] {
        manager.keys().expire(name, ttl).unwrap();
    }

    clock.advance(ttl);

    // 所有读操作都把过期键视为不存在
    let keys = manager.keys();
    assert_eq!(keys.len().unwrap(), 0);
    assert!(!keys.exists("s").unwrap());
    assert!(keys.keys("*").unwrap().is_empty());
    assert!(keys.scan(0, "*", None, 10).unwrap().items.is_empty());
    assert_eq!(keys.random(), Err(StoreError::NotFound));
    assert_eq!(manager.strings().get("s"), Err(StoreError::NotFound));
    assert_eq!(manager.hashes().get("h", "f"), Err(StoreError::NotFound));
    assert!(manager.hashes().scan("h", 0, "*", 10).unwrap().items.is_empty());
    assert!(manager.lists().range("l", 0, -1).unwrap().is_empty());
    assert_eq!(manager.lists().get("l", 0), Err(StoreError::NotFound));
    assert!(!manager.sets().exists("set", "a").unwrap());
    assert!(manager.sets().union(&["set"]).unwrap().is_empty());
    assert_eq!(manager.zsets().get_score("z", "a"), Err(StoreError::NotFound));
    assert_eq!(manager.zsets().len("z").unwrap(), 0);
}

#[test]
fn test_expired_key_can_change_type() {
    let (manager, clock) = setup();
    manager
        .strings()
        .set_expires("k", "v", Duration::from_secs(1))
        .unwrap();
    clock.advance(Duration::from_secs(1));

    // 过期的字符串键可以被其他类型覆盖
    manager.lists().push_back("k", "a").unwrap();
    assert_eq!(manager.lists().range("k", 0, -1).unwrap(), vec!["a"]);
    assert_eq!(manager.keys().get("k").unwrap().expire_at, None);
}

#[test]
fn test_delete_expired() {
    let (manager, clock) = setup();
    let strings = manager.strings();
    for i in 0..5 {
        strings
            .set_expires(&format!("tmp{}", i), "v", Duration::from_secs(1))
            .unwrap();
    }
    strings.set("keep", "v").unwrap();

    // 未过期时不删除
    assert_eq!(manager.keys().delete_expired(0).unwrap(), 0);

    clock.advance(Duration::from_secs(5));
    assert_eq!(manager.keys().delete_expired(2).unwrap(), 2);
    assert_eq!(manager.keys().delete_expired(0).unwrap(), 3);
    assert_eq!(manager.keys().delete_expired(0).unwrap(), 0);
    assert_eq!(strings.get("keep").unwrap(), "v");
}

#[test]
fn test_expiry_manager_sweep() {
    let clock = Arc::new(ManualClock::new(START));
    let db = Arc::new(SqliteTransactor::open_memory().unwrap().with_clock(clock.clone()));
    let manager = StoreManager::new(db.as_ref().clone());
    for i in 0..3 {
        manager
            .strings()
            .set_expires(&format!("k{}", i), "v", Duration::from_millis(100))
            .unwrap();
    }
    clock.advance(Duration::from_secs(1));

    let config = ExpiryConfig {
        sweep_interval_seconds: 1,
        sweep_batch_size: 2,
    };
    let expiry = ExpiryManager::new(db, &config);
    assert_eq!(expiry.sweep().unwrap(), 2);
    assert_eq!(expiry.sweep().unwrap(), 1);
    assert_eq!(expiry.sweep().unwrap(), 0);
}

#[test]
fn test_expiry_manager_run_stops() {
    let (manager, clock) = setup();
    for i in 0..5 {
        manager
            .strings()
            .set_expires(&format!("k{}", i), "v", Duration::from_millis(10))
            .unwrap();
    }
    clock.advance(Duration::from_secs(1));

    let expiry = manager.expiry_manager().with_batch_size(2);
    let stop = Arc::new(AtomicBool::new(false));
    let stopper = {
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            stop.store(true, std::sync::atomic::Ordering::SeqCst);
        })
    };
    let stats = expiry.run(&stop);
    stopper.join().unwrap();

    assert_eq!(stats.removed, 5);
    assert!(stats.sweeps >= 3);
    assert_eq!(manager.keys().len().unwrap(), 0);
}

#[test]
fn test_expiry_manager_run_survives_timeouts() {
    let clock = Arc::new(ManualClock::new(START));
    let db = SqliteTransactor::open_memory().unwrap().with_clock(clock.clone());
    let manager = StoreManager::new(db.clone());
    manager
        .strings()
        .set_expires("k", "v", Duration::from_millis(10))
        .unwrap();
    clock.advance(Duration::from_secs(1));

    let config = ExpiryConfig {
        sweep_interval_seconds: 1,
        sweep_batch_size: 10,
    };
    let expiry = ExpiryManager::new(Arc::new(db.with_timeout(Duration::ZERO)), &config);
    let err = expiry.sweep().unwrap_err();
    assert_eq!(err, StoreError::Timeout);
    assert!(err.is_transient());

    // 超时只记录日志，循环继续直到停止
    let stop = Arc::new(AtomicBool::new(false));
    let stopper = {
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            stop.store(true, std::sync::atomic::Ordering::SeqCst);
        })
    };
    let stats = expiry.run(&stop);
    stopper.join().unwrap();

    assert_eq!(stats.sweeps, 0);
    assert_eq!(stats.removed, 0);
    assert_eq!(manager.keys().delete_expired(0).unwrap(), 1);
}
