use std::collections::BTreeSet;

use kv_sql::store::{StoreError, StoreManager, Value};

fn setup() -> StoreManager {
    StoreManager::open_memory().unwrap()
}

fn as_set(values: Vec<Value>) -> BTreeSet<String> {
    values.iter().map(Value::to_string_lossy).collect()
}

fn set_of(elems: &[&str]) -> BTreeSet<String> {
    elems.iter().map(|e| e.to_string()).collect()
}

#[test]
fn test_add_and_items() {
    let manager = setup();
    let sets = manager.sets();

    assert_eq!(sets.add("s", ["a", "b", "c"]).unwrap(), 3);
    // 已存在的元素不计入
    assert_eq!(sets.add("s", ["c", "d"]).unwrap(), 1);
    assert_eq!(sets.add("s", ["a", "a"]).unwrap(), 0);

    assert_eq!(sets.items("s").unwrap(), vec!["a", "b", "c", "d"]);
    assert_eq!(sets.len("s").unwrap(), 4);
    assert!(sets.exists("s", "a").unwrap());
    assert!(!sets.exists("s", "z").unwrap());
    assert!(!sets.exists("missing", "a").unwrap());
    assert!(sets.items("missing").unwrap().is_empty());
}

#[test]
fn test_delete() {
    let manager = setup();
    let sets = manager.sets();
    sets.add("s", ["a", "b", "c"]).unwrap();

    assert_eq!(sets.delete("s", ["a", "z"]).unwrap(), 1);
    assert_eq!(sets.len("s").unwrap(), 2);
    assert_eq!(sets.delete("s", ["b", "c"]).unwrap(), 2);
    assert!(manager.keys().exists("s").unwrap());
    assert_eq!(sets.delete("missing", ["a"]).unwrap(), 0);
}

#[test]
fn test_move() {
    let manager = setup();
    let sets = manager.sets();
    sets.add("src", ["a", "b"]).unwrap();

    sets.move_elem("src", "dst", "a").unwrap();
    assert_eq!(sets.items("src").unwrap(), vec!["b"]);
    assert_eq!(sets.items("dst").unwrap(), vec!["a"]);

    assert_eq!(sets.move_elem("src", "dst", "z"), Err(StoreError::NotFound));
    assert_eq!(
        sets.move_elem("missing", "dst", "a"),
        Err(StoreError::NotFound)
    );

    // 目标类型不符时整个操作回滚
    manager.strings().set("str", "v").unwrap();
    assert_eq!(sets.move_elem("src", "str", "b"), Err(StoreError::KeyType));
    assert_eq!(sets.items("src").unwrap(), vec!["b"]);
    assert_eq!(sets.len("src").unwrap(), 1);
}

#[test]
fn test_pop_and_random() {
    let manager = setup();
    let sets = manager.sets();
    sets.add("s", ["a", "b", "c"]).unwrap();

    let picked = sets.random("s").unwrap();
    assert!(sets.exists("s", picked).unwrap());
    assert_eq!(sets.len("s").unwrap(), 3);

    let mut popped = BTreeSet::new();
    for _ in 0..3 {
        popped.insert(sets.pop("s").unwrap().to_string_lossy());
    }
    assert_eq!(popped, set_of(&["a", "b", "c"]));
    assert_eq!(sets.pop("s"), Err(StoreError::NotFound));
    assert_eq!(sets.random("s"), Err(StoreError::NotFound));
    assert_eq!(sets.random("missing"), Err(StoreError::NotFound));
}

#[test]
fn test_diff() {
    let manager = setup();
    let sets = manager.sets();
    sets.add("a", ["1", "2", "3", "4"]).unwrap();
    sets.add("b", ["2"]).unwrap();
    sets.add("c", ["4", "5"]).unwrap();
    manager.strings().set("str", "3").unwrap();

    assert_eq!(sets.diff(&["a", "b", "c"]).unwrap(), vec!["1", "3"]);
    // 不存在或类型不符的键视为空集合
    assert_eq!(
        sets.diff(&["a", "missing", "str"]).unwrap(),
        vec!["1", "2", "3", "4"]
    );
    assert!(sets.diff(&["missing", "a"]).unwrap().is_empty());
    assert!(sets.diff(&["str", "a"]).unwrap().is_empty());
}

#[test]
fn test_inter() {
    let manager = setup();
    let sets = manager.sets();
    sets.add("a", ["1", "2", "3"]).unwrap();
    sets.add("b", ["2", "3", "4"]).unwrap();
    sets.add("c", ["3", "2", "9"]).unwrap();

    assert_eq!(as_set(sets.inter(&["a", "b", "c"]).unwrap()), set_of(&["2", "3"]));
    // 任一输入不存在时结果为空
    assert!(sets.inter(&["a", "missing"]).unwrap().is_empty());
    // 重复的键不影响结果
    assert_eq!(as_set(sets.inter(&["a", "a"]).unwrap()), set_of(&["1", "2", "3"]));
}

#[test]
fn test_union() {
    let manager = setup();
    let sets = manager.sets();
    sets.add("a", ["1", "2"]).unwrap();
    sets.add("b", ["2", "3"]).unwrap();
    manager.hashes().set("h", "f", "v").unwrap();

    assert_eq!(
        as_set(sets.union(&["a", "b", "missing", "h"]).unwrap()),
        set_of(&["1", "2", "3"])
    );
    assert!(sets.union(&["missing"]).unwrap().is_empty());
}

#[test]
fn test_algebra_laws() {
    let manager = setup();
    let sets = manager.sets();
    sets.add("a", ["1", "2", "3", "4", "5"]).unwrap();
    sets.add("b", ["4", "5", "6", "7"]).unwrap();

    let union = as_set(sets.union(&["a", "b"]).unwrap());
    let inter = as_set(sets.inter(&["a", "b"]).unwrap());
    let diff = as_set(sets.diff(&["a", "b"]).unwrap());
    let items = as_set(sets.items("a").unwrap());

    assert!(union.is_superset(&inter));
    assert_eq!(diff.union(&inter).cloned().collect::<BTreeSet<_>>(), items);
    assert_eq!(as_set(sets.inter(&["a"]).unwrap()), items);
}

#[test]
fn test_store_variants() {
    let manager = setup();
    let sets = manager.sets();
    sets.add("a", ["1", "2", "3"]).unwrap();
    sets.add("b", ["2", "3", "4"]).unwrap();
    sets.add("dest", ["old"]).unwrap();

    assert_eq!(sets.inter_store("dest", &["a", "b"]).unwrap(), 2);
    assert_eq!(as_set(sets.items("dest").unwrap()), set_of(&["2", "3"]));
    assert_eq!(sets.len("dest").unwrap(), 2);

    assert_eq!(sets.union_store("dest", &["a", "b"]).unwrap(), 4);
    assert_eq!(sets.diff_store("dest", &["a", "b"]).unwrap(), 1);
    assert_eq!(sets.items("dest").unwrap(), vec!["1"]);

    // 目标键可以是输入之一
    assert_eq!(sets.union_store("a", &["a", "b"]).unwrap(), 4);
    assert_eq!(sets.len("a").unwrap(), 4);
}

#[test]
fn test_store_into_wrong_type() {
    let manager = setup();
    let sets = manager.sets();
    sets.add("a", ["1"]).unwrap();
    manager.zsets().add("z", "m", 1.0).unwrap();
    let before = manager.keys().get("z").unwrap();

    assert_eq!(sets.union_store("z", &["a"]), Err(StoreError::KeyType));
    assert_eq!(manager.keys().get("z").unwrap(), before);
    assert_eq!(manager.zsets().get_score("z", "m").unwrap(), 1.0);
}

#[test]
fn test_scan_elements() {
    let manager = setup();
    let sets = manager.sets();
    let elems: Vec<String> = (0..30).map(|i| format!("m{}", i)).collect();
    sets.add("s", elems.iter().map(String::as_str)).unwrap();
    sets.add("s", ["other"]).unwrap();

    let mut pages = 0;
    let mut cursor = 0;
    let mut seen = BTreeSet::new();
    loop {
        let page = sets.scan("s", cursor, "m*", 8).unwrap();
        if page.items.is_empty() {
            assert_eq!(page.cursor, 0);
            break;
        }
        pages += 1;
        for item in page.items {
            assert!(seen.insert(item.to_string_lossy()));
        }
        cursor = page.cursor;
    }
    assert_eq!(pages, 4);
    assert_eq!(seen.len(), 30);

    let count = sets.scanner("s", "*", 0).filter_map(Result::ok).count();
    assert_eq!(count, 31);
}

#[test]
fn test_type_guard() {
    let manager = setup();
    manager.lists().push_back("l", "a").unwrap();
    let before = manager.keys().get("l").unwrap();
    let sets = manager.sets();

    assert_eq!(sets.add("l", ["x"]), Err(StoreError::KeyType));
    assert_eq!(sets.delete("l", ["a"]), Err(StoreError::KeyType));
    assert_eq!(sets.pop("l"), Err(StoreError::KeyType));
    assert_eq!(manager.keys().get("l").unwrap(), before);
    assert_eq!(manager.lists().range("l", 0, -1).unwrap(), vec!["a"]);
}
