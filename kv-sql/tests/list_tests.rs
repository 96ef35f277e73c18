use kv_sql::store::{InsertResult, StoreError, StoreManager, Value};

fn setup() -> StoreManager {
    StoreManager::open_memory().unwrap()
}

fn items(manager: &StoreManager, name: &str) -> Vec<String> {
    manager
        .lists()
        .range(name, 0, -1)
        .unwrap()
        .iter()
        .map(Value::to_string_lossy)
        .collect()
}

#[test]
fn test_push_and_range() {
    let manager = setup();
    let lists = manager.lists();

    assert_eq!(lists.push_back("l", "b").unwrap(), 1);
    assert_eq!(lists.push_back("l", "c").unwrap(), 2);
    assert_eq!(lists.push_front("l", "a").unwrap(), 3);

    assert_eq!(items(&manager, "l"), vec!["a", "b", "c"]);
    assert_eq!(lists.len("l").unwrap(), 3);
    assert_eq!(lists.range("l", 1, 1).unwrap(), vec!["b"]);
    assert_eq!(lists.range("l", -2, -1).unwrap(), vec!["b", "c"]);
    assert_eq!(lists.range("l", 0, 100).unwrap().len(), 3);
    // 同号且 start > stop 时为空
    assert!(lists.range("l", 2, 1).unwrap().is_empty());
    assert!(lists.range("l", -1, -2).unwrap().is_empty());
    assert!(lists.range("missing", 0, -1).unwrap().is_empty());
}

#[test]
fn test_get_by_index() {
    let manager = setup();
    let lists = manager.lists();
    for elem in ["a", "b", "c"] {
        lists.push_back("l", elem).unwrap();
    }

    assert_eq!(lists.get("l", 0).unwrap(), "a");
    assert_eq!(lists.get("l", 2).unwrap(), "c");
    assert_eq!(lists.get("l", -1).unwrap(), "c");
    assert_eq!(lists.get("l", -3).unwrap(), "a");
    assert_eq!(lists.get("l", 3), Err(StoreError::NotFound));
    assert_eq!(lists.get("l", -4), Err(StoreError::NotFound));
    assert_eq!(lists.get("missing", 0), Err(StoreError::NotFound));
}

#[test]
fn test_extreme_indices() {
    let manager = setup();
    let lists = manager.lists();
    lists.push_back("l", "a").unwrap();

    assert_eq!(lists.get("l", i64::MIN), Err(StoreError::NotFound));
    assert_eq!(lists.get("l", i64::MAX), Err(StoreError::NotFound));
    assert_eq!(lists.set("l", i64::MIN, "x"), Err(StoreError::NotFound));
    assert_eq!(lists.set("l", i64::MAX, "x"), Err(StoreError::NotFound));
    assert_eq!(items(&manager, "l"), vec!["a"]);

    assert_eq!(lists.range("l", i64::MIN, i64::MAX).unwrap(), vec!["a"]);
    assert_eq!(lists.trim("l", i64::MIN, i64::MAX).unwrap(), 0);
}

#[test]
fn test_set_by_negative_index() {
    let manager = setup();
    let lists = manager.lists();
    for elem in ["a", "b", "c"] {
        lists.push_back("l", elem).unwrap();
    }

    lists.set("l", -2, "x").unwrap();
    assert_eq!(items(&manager, "l"), vec!["a", "x", "c"]);

    assert_eq!(lists.set("l", 5, "y"), Err(StoreError::NotFound));
    assert_eq!(lists.set("missing", 0, "y"), Err(StoreError::NotFound));
    assert_eq!(items(&manager, "l"), vec!["a", "x", "c"]);
}

#[test]
fn test_pop() {
    let manager = setup();
    let lists = manager.lists();
    for elem in ["a", "b", "c"] {
        lists.push_back("l", elem).unwrap();
    }

    assert_eq!(lists.pop_front("l").unwrap(), "a");
    assert_eq!(lists.pop_back("l").unwrap(), "c");
    assert_eq!(lists.pop_back("l").unwrap(), "b");
    assert_eq!(lists.pop_back("l"), Err(StoreError::NotFound));
    assert_eq!(lists.pop_front("missing"), Err(StoreError::NotFound));

    // 弹空后键仍然存在
    assert!(manager.keys().exists("l").unwrap());
    assert_eq!(lists.len("l").unwrap(), 0);
    assert_eq!(lists.push_back("l", "d").unwrap(), 1);
}

#[test]
fn test_pop_back_push_front() {
    let manager = setup();
    let lists = manager.lists();
    for elem in ["a", "b", "c"] {
        lists.push_back("src", elem).unwrap();
    }

    assert_eq!(lists.pop_back_push_front("src", "dst").unwrap(), "c");
    assert_eq!(items(&manager, "src"), vec!["a", "b"]);
    assert_eq!(items(&manager, "dst"), vec!["c"]);

    // 同一个键时为旋转
    assert_eq!(lists.pop_back_push_front("src", "src").unwrap(), "b");
    assert_eq!(items(&manager, "src"), vec!["b", "a"]);

    // 目标键类型不符时源列表不变
    manager.strings().set("s", "v").unwrap();
    assert_eq!(
        lists.pop_back_push_front("src", "s"),
        Err(StoreError::KeyType)
    );
    assert_eq!(items(&manager, "src"), vec!["b", "a"]);

    assert_eq!(
        lists.pop_back_push_front("missing", "dst"),
        Err(StoreError::NotFound)
    );
}

#[test]
fn test_insert_before_after() {
    let manager = setup();
    let lists = manager.lists();
    lists.push_back("l", "a").unwrap();
    lists.push_back("l", "c").unwrap();

    assert_eq!(
        lists.insert_before("l", "c", "b").unwrap(),
        InsertResult::Inserted(3)
    );
    assert_eq!(
        lists.insert_after("l", "c", "d").unwrap(),
        InsertResult::Inserted(4)
    );
    assert_eq!(
        lists.insert_before("l", "a", "0").unwrap(),
        InsertResult::Inserted(5)
    );
    assert_eq!(items(&manager, "l"), vec!["0", "a", "b", "c", "d"]);

    let missing_pivot = lists.insert_after("l", "zz", "x").unwrap();
    assert_eq!(missing_pivot, InsertResult::PivotNotFound);
    assert_eq!(missing_pivot.sentinel(), -1);
    assert_eq!(lists.len("l").unwrap(), 5);

    let missing_key = lists.insert_after("missing", "a", "x").unwrap();
    assert_eq!(missing_key, InsertResult::KeyNotFound);
    assert_eq!(missing_key.sentinel(), 0);
    assert!(!manager.keys().exists("missing").unwrap());
}

#[test]
fn test_insert_uses_first_matching_pivot() {
    let manager = setup();
    let lists = manager.lists();
    for elem in ["x", "a", "x"] {
        lists.push_back("l", elem).unwrap();
    }
    lists.insert_after("l", "x", "y").unwrap();
    assert_eq!(items(&manager, "l"), vec!["x", "y", "a", "x"]);
}

#[test]
fn test_repeated_insert_keeps_order() {
    let manager = setup();
    let lists = manager.lists();
    lists.push_back("l", "start").unwrap();
    lists.push_back("l", "end").unwrap();

    // 反复在同一位置插入会不断缩小相邻位置的间隔，超出精度时重新编号
    let mut expected = vec!["start".to_string()];
    for i in 0..200 {
        let elem = format!("e{}", i);
        lists.insert_before("l", "end", elem.as_str()).unwrap();
        expected.push(elem);
    }
    expected.push("end".to_string());

    assert_eq!(items(&manager, "l"), expected);
    assert_eq!(lists.len("l").unwrap(), 202);
    assert_eq!(lists.get("l", -2).unwrap(), "e199");
}

#[test]
fn test_mixed_operations_keep_insertion_order() {
    let manager = setup();
    let lists = manager.lists();
    lists.push_back("l", "m").unwrap();
    lists.push_front("l", "f").unwrap();
    lists.push_back("l", "z").unwrap();
    lists.insert_after("l", "f", "g").unwrap();
    lists.insert_before("l", "z", "y").unwrap();
    lists.insert_after("l", "g", "h").unwrap();
    lists.push_front("l", "a").unwrap();
    assert_eq!(items(&manager, "l"), vec!["a", "f", "g", "h", "m", "y", "z"]);
}

#[test]
fn test_trim() {
    let manager = setup();
    let lists = manager.lists();
    for elem in ["a", "b", "c", "d", "e"] {
        lists.push_back("l", elem).unwrap();
    }

    assert_eq!(lists.trim("l", 1, -2).unwrap(), 2);
    assert_eq!(items(&manager, "l"), vec!["b", "c", "d"]);
    assert_eq!(lists.len("l").unwrap(), 3);

    // 同号且 start > stop 时不删除
    assert_eq!(lists.trim("l", 2, 1).unwrap(), 0);
    assert_eq!(items(&manager, "l"), vec!["b", "c", "d"]);

    assert_eq!(lists.trim("l", 0, 100).unwrap(), 0);

    // 范围超出列表时删除全部
    assert_eq!(lists.trim("l", 5, 10).unwrap(), 3);
    assert!(items(&manager, "l").is_empty());
    assert_eq!(lists.trim("missing", 0, 1).unwrap(), 0);
}

#[test]
fn test_delete_elements() {
    let manager = setup();
    let lists = manager.lists();
    for elem in ["a", "x", "b", "x", "c", "x"] {
        lists.push_back("l", elem).unwrap();
    }

    assert_eq!(lists.delete_front("l", "x", 1).unwrap(), 1);
    assert_eq!(items(&manager, "l"), vec!["a", "b", "x", "c", "x"]);

    assert_eq!(lists.delete_back("l", "x", 1).unwrap(), 1);
    assert_eq!(items(&manager, "l"), vec!["a", "b", "x", "c"]);

    lists.push_back("l", "x").unwrap();
    assert_eq!(lists.delete("l", "x").unwrap(), 2);
    assert_eq!(items(&manager, "l"), vec!["a", "b", "c"]);
    assert_eq!(lists.len("l").unwrap(), 3);

    assert_eq!(lists.delete("l", "nothing").unwrap(), 0);
    assert_eq!(lists.delete("missing", "x").unwrap(), 0);
}

#[test]
fn test_type_guard() {
    let manager = setup();
    manager.sets().add("s", ["a"]).unwrap();
    let lists = manager.lists();

    assert_eq!(lists.push_back("s", "x"), Err(StoreError::KeyType));
    assert_eq!(lists.push_front("s", "x"), Err(StoreError::KeyType));
    assert_eq!(lists.pop_back("s"), Err(StoreError::KeyType));
    assert_eq!(lists.set("s", 0, "x"), Err(StoreError::KeyType));
    assert_eq!(lists.trim("s", 0, 1), Err(StoreError::KeyType));
    assert_eq!(
        lists.insert_before("s", "a", "x").unwrap(),
        InsertResult::KeyNotFound
    );
    assert_eq!(lists.len("s").unwrap(), 0);
    assert_eq!(manager.sets().items("s").unwrap(), vec!["a"]);
}
