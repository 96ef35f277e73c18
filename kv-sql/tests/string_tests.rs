use std::sync::Arc;
use std::time::Duration;

use kv_sql::store::{ManualClock, StoreError, StoreManager, Value};

const START: i64 = 1_700_000_000_000;

fn setup() -> (StoreManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let manager = StoreManager::open_memory_with_clock(clock.clone()).unwrap();
    (manager, clock)
}

#[test]
fn test_set_and_get() {
    let (manager, _clock) = setup();
    let strings = manager.strings();

    strings.set("name", "alice").unwrap();
    assert_eq!(strings.get("name").unwrap(), "alice");

    // 覆盖写入
    strings.set("name", "bob").unwrap();
    assert_eq!(strings.get("name").unwrap(), "bob");

    // 二进制值原样保存
    strings.set("bin", vec![0u8, 159, 146, 150]).unwrap();
    assert_eq!(strings.get("bin").unwrap().as_bytes(), &[0u8, 159, 146, 150]);

    assert_eq!(strings.get("missing"), Err(StoreError::NotFound));
}

#[test]
fn test_get_wrong_type_is_not_found() {
    let (manager, _clock) = setup();
    manager.lists().push_back("list", "x").unwrap();
    assert_eq!(manager.strings().get("list"), Err(StoreError::NotFound));
}

#[test]
fn test_get_many() {
    let (manager, _clock) = setup();
    let strings = manager.strings();
    strings.set("a", "1").unwrap();
    strings.set("b", "2").unwrap();
    manager.hashes().set("h", "f", "v").unwrap();

    let values = strings.get_many(&["a", "b", "c", "h"]).unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values["a"], "1");
    assert_eq!(values["b"], "2");
}

#[test]
fn test_set_expires() {
    let (manager, clock) = setup();
    let strings = manager.strings();
    strings
        .set_expires("session", "token", Duration::from_secs(60))
        .unwrap();
    assert_eq!(
        manager.keys().get("session").unwrap().expire_at,
        Some(START + 60_000)
    );

    clock.advance(Duration::from_secs(59));
    assert_eq!(strings.get("session").unwrap(), "token");

    clock.advance(Duration::from_secs(1));
    assert_eq!(strings.get("session"), Err(StoreError::NotFound));
}

#[test]
fn test_set_resets_ttl() {
    let (manager, _clock) = setup();
    let strings = manager.strings();
    strings.set_expires("k", "1", Duration::from_secs(10)).unwrap();
    strings.set("k", "2").unwrap();
    assert_eq!(manager.keys().get("k").unwrap().expire_at, None);
}

#[test]
fn test_set_with_keep_ttl() {
    let (manager, _clock) = setup();
    let strings = manager.strings();
    strings.set_expires("k", "1", Duration::from_secs(10)).unwrap();

    let out = strings.set_with("k", "2").keep_ttl().run().unwrap();
    assert_eq!(out.prev, Some(Value::from("1")));
    assert!(out.updated);
    assert!(!out.created);
    assert_eq!(strings.get("k").unwrap(), "2");
    assert_eq!(
        manager.keys().get("k").unwrap().expire_at,
        Some(START + 10_000)
    );
}

#[test]
fn test_set_with_absolute_expiry() {
    let (manager, clock) = setup();
    let strings = manager.strings();
    let out = strings.set_with("k", "v").at(START + 500).run().unwrap();
    assert!(out.created);
    assert_eq!(out.prev, None);

    clock.set(START + 500);
    assert!(!manager.keys().exists("k").unwrap());
}

#[test]
fn test_set_not_exists() {
    let (manager, clock) = setup();
    let strings = manager.strings();

    assert!(strings.set_not_exists("lock", "a", None).unwrap());
    assert!(!strings.set_not_exists("lock", "b", None).unwrap());
    assert_eq!(strings.get("lock").unwrap(), "a");

    // 已过期的键视为不存在
    strings
        .set_not_exists("lease", "1", Some(Duration::from_secs(1)))
        .unwrap();
    clock.advance(Duration::from_secs(2));
    assert!(strings.set_not_exists("lease", "2", None).unwrap());
    assert_eq!(strings.get("lease").unwrap(), "2");
}

#[test]
fn test_set_not_exists_on_other_type() {
    let (manager, _clock) = setup();
    manager.lists().push_back("l", "a").unwrap();
    let before = manager.keys().get("l").unwrap();
    let strings = manager.strings();

    // 其他类型的有效键同样算作已存在，不写入也不报类型错误
    assert!(!strings.set_not_exists("l", "v", None).unwrap());
    assert!(!strings.set_many_nx([("l", "v")]).unwrap());

    let out = strings.set_with("l", "v").if_not_exists().run().unwrap();
    assert_eq!(out.prev, None);
    assert!(!out.created);
    assert!(!out.updated);

    assert_eq!(manager.keys().get("l").unwrap(), before);
    assert_eq!(manager.lists().range("l", 0, -1).unwrap(), vec!["a"]);
}

#[test]
fn test_set_exists() {
    let (manager, _clock) = setup();
    let strings = manager.strings();

    assert!(!strings.set_exists("k", "1", None).unwrap());
    assert!(!manager.keys().exists("k").unwrap());

    strings.set("k", "1").unwrap();
    assert!(strings
        .set_exists("k", "2", Some(Duration::from_secs(5)))
        .unwrap());
    assert_eq!(strings.get("k").unwrap(), "2");
    assert_eq!(
        manager.keys().get("k").unwrap().expire_at,
        Some(START + 5_000)
    );
}

#[test]
fn test_get_set() {
    let (manager, _clock) = setup();
    let strings = manager.strings();
    assert_eq!(strings.get_set("k", "1", None).unwrap(), None);
    assert_eq!(
        strings.get_set("k", "2", None).unwrap(),
        Some(Value::from("1"))
    );
    assert_eq!(strings.get("k").unwrap(), "2");
}

#[test]
fn test_set_many() {
    let (manager, _clock) = setup();
    let strings = manager.strings();
    strings.set_many([("a", "1"), ("b", "2")]).unwrap();
    assert_eq!(strings.get("a").unwrap(), "1");
    assert_eq!(strings.get("b").unwrap(), "2");

    // 任一键类型不符时整体失败
    manager.hashes().set("h", "f", "v").unwrap();
    assert_eq!(
        strings.set_many([("a", "x"), ("h", "y")]),
        Err(StoreError::KeyType)
    );
    assert_eq!(strings.get("a").unwrap(), "1");
}

#[test]
fn test_set_many_nx() {
    let (manager, _clock) = setup();
    let strings = manager.strings();
    assert!(strings.set_many_nx([("a", "1"), ("b", "2")]).unwrap());
    assert!(!strings.set_many_nx([("b", "x"), ("c", "3")]).unwrap());
    assert_eq!(strings.get("b").unwrap(), "2");
    assert!(!manager.keys().exists("c").unwrap());
}

#[test]
fn test_incr() {
    let (manager, _clock) = setup();
    let strings = manager.strings();

    // 不存在的键视为 0
    assert_eq!(strings.incr("counter", 1).unwrap(), 1);
    assert_eq!(strings.incr("counter", 10).unwrap(), 11);
    assert_eq!(strings.incr("counter", -20).unwrap(), -9);
    assert_eq!(strings.get("counter").unwrap(), "-9");

    strings.set("text", "abc").unwrap();
    assert_eq!(strings.incr("text", 1), Err(StoreError::ValueType));
    assert_eq!(strings.get("text").unwrap(), "abc");

    strings.set("max", i64::MAX).unwrap();
    assert_eq!(strings.incr("max", 1), Err(StoreError::ValueType));

    manager.lists().push_back("list", "1").unwrap();
    assert_eq!(strings.incr("list", 1), Err(StoreError::KeyType));
}

#[test]
fn test_incr_keeps_ttl() {
    let (manager, _clock) = setup();
    let strings = manager.strings();
    strings.set_expires("c", "5", Duration::from_secs(30)).unwrap();
    assert_eq!(strings.incr("c", 1).unwrap(), 6);
    assert_eq!(
        manager.keys().get("c").unwrap().expire_at,
        Some(START + 30_000)
    );
}

#[test]
fn test_incr_float() {
    let (manager, _clock) = setup();
    let strings = manager.strings();
    assert_eq!(strings.incr_float("f", 1.5).unwrap(), 1.5);
    assert_eq!(strings.incr_float("f", 2.25).unwrap(), 3.75);
    assert_eq!(strings.get("f").unwrap().to_f64().unwrap(), 3.75);

    strings.set("n", "10").unwrap();
    assert_eq!(strings.incr_float("n", 0.5).unwrap(), 10.5);

    strings.set("text", "abc").unwrap();
    assert_eq!(strings.incr_float("text", 1.0), Err(StoreError::ValueType));
    assert_eq!(
        strings.incr_float("n", f64::INFINITY),
        Err(StoreError::ValueType)
    );
}

#[test]
fn test_type_guard_leaves_key_unchanged() {
    let (manager, _clock) = setup();
    manager.hashes().set("h", "f", "v").unwrap();
    let before = manager.keys().get("h").unwrap();

    assert_eq!(manager.strings().set("h", "x"), Err(StoreError::KeyType));
    assert_eq!(manager.keys().get("h").unwrap(), before);
    assert_eq!(manager.hashes().get("h", "f").unwrap(), "v");
}
