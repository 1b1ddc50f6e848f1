use kv_layer::store::{lock_key, StoreError, StoreManager, Value};
use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_bytes_operations() {
    let store = StoreManager::in_memory();

    // 测试写入与读取
    store.set("key1", "value1").unwrap();
    assert_eq!(store.get("key1").unwrap(), b"value1".to_vec());
    assert_eq!(store.length("key1").unwrap(), 6);

    // 测试读取不存在的键
    assert_eq!(
        store.get("nonexistent"),
        Err(StoreError::KeyNotFound("nonexistent".to_string()))
    );

    // 测试删除
    assert!(store.delete("key1").unwrap());
    assert!(!store.has("key1").unwrap());
    assert!(!store.delete("key1").unwrap());
}

#[test]
fn test_invalid_keys_rejected() {
    let store = StoreManager::in_memory();
    assert!(matches!(store.set("", "v"), Err(StoreError::InvalidKey(_))));
    assert!(matches!(store.set("\0", "v"), Err(StoreError::InvalidKey(_))));
}

#[test]
fn test_set_nx_and_many() {
    let store = StoreManager::in_memory();
    assert!(store.set_nx("once", "first").unwrap());
    assert!(!store.set_nx("once", "second").unwrap());
    assert_eq!(store.get("once").unwrap(), b"first".to_vec());
    // set_nx 不会遗留锁
    assert!(!store.has(std::str::from_utf8(&lock_key("once")).unwrap()).unwrap());

    let errors = store.set_many(vec![
        ("a".to_string(), "1"),
        ("b".to_string(), "2"),
        ("".to_string(), "3"),
    ]);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors.get(""), Some(StoreError::InvalidKey(_))));

    let values = store.get_many(&["a", "b", "missing"]).unwrap();
    let expected: HashMap<String, Vec<u8>> = [
        ("a".to_string(), b"1".to_vec()),
        ("b".to_string(), b"2".to_vec()),
    ]
    .into_iter()
    .collect();
    assert_eq!(values, expected);
}

#[test]
fn test_prefix_enumeration() {
    let store = StoreManager::in_memory();
    store.set("key1", "a").unwrap();
    store.set("key2", "b").unwrap();
    store.set("other", "c").unwrap();

    assert_eq!(store.keys_with_prefix("key").unwrap(), vec!["key1", "key2"]);
    assert_eq!(store.keys().unwrap(), vec!["key1", "key2", "other"]);

    let values = store.get_with_prefix("key").unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values["key2"], b"b".to_vec());

    assert_eq!(store.clear().unwrap(), 3);
    assert!(store.keys().unwrap().is_empty());
}

#[test]
fn test_numbers() {
    let store = StoreManager::in_memory();

    // 不存在的键从 0 开始
    assert_eq!(store.increment_int("counter", 5).unwrap(), 5);
    assert_eq!(store.decrement_int("counter", 2).unwrap(), 3);
    assert_eq!(store.get_int("counter").unwrap(), 3);

    store.set_int("max", i64::MAX).unwrap();
    assert_eq!(store.increment_int("max", 1).unwrap(), i64::MIN);

    assert_eq!(store.increment_float("ratio", 1.5).unwrap(), 1.5);
    assert_eq!(store.decrement_float("ratio", 0.25).unwrap(), 1.25);
    store.set_float("half", 0.5).unwrap();
    assert_eq!(store.get_float("half").unwrap(), 0.5);
}

#[test]
fn test_type_mismatch() {
    let store = StoreManager::in_memory();
    store.set_int("k", 1).unwrap();
    assert_eq!(
        store.get_list("k"),
        Err(StoreError::TypeMismatch { expected: "list" })
    );
    assert!(matches!(store.get_float("k"), Err(StoreError::TypeMismatch { .. })));

    // 类型错误后锁已释放
    store.set("text", "abc").unwrap();
    assert!(matches!(
        store.increment_int("text", 1),
        Err(StoreError::TypeMismatch { .. })
    ));
    store.lock_with_timeout("text", 0).unwrap();
    store.unlock("text").unwrap();
}

#[test]
fn test_value_conversions() {
    let store = StoreManager::in_memory();
    store.set("flag", true).unwrap();
    assert_eq!(store.get("flag").unwrap(), vec![1]);

    store.set("elapsed", Duration::from_millis(2)).unwrap();
    assert_eq!(store.get_int("elapsed").unwrap(), 2_000_000);

    let json = serde_json::json!({"name": "kv", "kind": "layer"});
    store.set("meta", Value::try_from(json).unwrap()).unwrap();
    assert_eq!(store.get_hash_field("meta", "name").unwrap(), b"kv".to_vec());

    assert!(matches!(
        Value::try_from(serde_json::json!([1, 2])),
        Err(StoreError::UnsupportedValue(_))
    ));
    assert!(Value::try_from(serde_json::Value::Null).is_err());
}

#[test]
fn test_lock_blocks_writers() {
    let store = StoreManager::in_memory();
    store.lock("guarded").unwrap();

    // 锁被持有时 set 超时失败
    let impatient = store.with_max_lock_wait(1);
    let start = Instant::now();
    assert_eq!(
        impatient.set("guarded", "x"),
        Err(StoreError::KeyLocked("guarded".to_string()))
    );
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert!(impatient.lock_with_timeout("guarded", 0).unwrap_err().is_retryable());

    store.unlock_then_set("guarded", "released").unwrap();
    assert_eq!(store.get("guarded").unwrap(), b"released".to_vec());
    store.set("guarded", "free").unwrap();
}

#[test]
fn test_lock_mutual_exclusion() {
    let store = StoreManager::in_memory();
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.with_max_lock_wait(-1);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..25 {
                    store.increment_int("shared", 1).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(store.get_int("shared").unwrap(), 200);
}

#[test]
fn test_blocking_get() {
    let store = StoreManager::in_memory();
    let writer = store.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        writer.set("late", "arrived").unwrap();
    });

    let start = Instant::now();
    assert_eq!(store.get_blocking("late", 2).unwrap(), b"arrived".to_vec());
    assert!(start.elapsed() < Duration::from_secs(2));
    handle.join().unwrap();

    assert!(matches!(
        store.get_blocking("never", 1),
        Err(StoreError::KeyNotFound(_))
    ));
}

#[test]
fn test_expire() {
    let store = StoreManager::in_memory();
    store.set("session", "token").unwrap();
    store.set_expire("session", 1).unwrap();
    assert_eq!(store.get("session").unwrap(), b"token".to_vec());

    thread::sleep(Duration::from_millis(1200));
    assert!(!store.has("session").unwrap());

    assert!(matches!(
        store.set_expire("missing", 1),
        Err(StoreError::KeyNotFound(_))
    ));
}

#[test]
fn test_huge_wait_does_not_overflow() {
    let store = StoreManager::in_memory();

    // 超出时钟范围的等待时间视为一直等待
    store.lock_with_timeout("k", i64::MAX).unwrap();
    store.unlock("k").unwrap();

    let patient = store.with_max_lock_wait(i64::MAX);
    patient.set("k", "v").unwrap();
    assert_eq!(patient.increment_int("n", 1).unwrap(), 1);
    assert!(patient.delete("k").unwrap());

    store.list_append("queue", "job").unwrap();
    assert_eq!(
        store.list_pop_left_blocking("queue", i64::MAX).unwrap(),
        b"job".to_vec()
    );
    assert_eq!(store.get_blocking("n", i64::MAX).unwrap(), store.get("n").unwrap());
}

#[test]
fn test_huge_expire_rejected_store_still_usable() {
    let store = StoreManager::in_memory();
    store.set("a", "v").unwrap();

    assert!(matches!(
        store.set_expire("a", i64::MAX),
        Err(StoreError::Backend(_))
    ));

    // 存储仍然可用，键没有被绑定租约
    assert_eq!(store.get("a").unwrap(), b"v".to_vec());
    store.set("b", "w").unwrap();
    store.set_expire("a", 60).unwrap();
    assert!(store.has("a").unwrap());
}

#[test]
fn test_invalid_key_releases_lock() {
    let store = StoreManager::in_memory().with_max_lock_wait(0);

    // 连续两次都应当返回 InvalidKey，而不是 KeyLocked
    for _ in 0..2 {
        assert!(matches!(store.list_append("", "x"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.increment_int("", 1), Err(StoreError::InvalidKey(_))));
        assert!(matches!(
            store.set_hash_field("", "f", "v"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(store.list_insert("", 0, "x"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.set_nx("", "x"), Err(StoreError::InvalidKey(_))));
    }

    // 没有遗留锁标记
    assert!(store.keys().unwrap().is_empty());
}
