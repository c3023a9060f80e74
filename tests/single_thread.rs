//! Single-threaded store scenarios over the public surface.

use garner::{GarnerError, Protocol, Store, StoreConfig};

#[test]
fn round_trip_without_protocol() {
    let store: Store<String, String> =
        Store::open(StoreConfig::new(4, Protocol::None)).unwrap();

    assert!(store.put("k1".into(), "v1".into(), None).unwrap());
    assert!(store.put("k2".into(), "v2".into(), None).unwrap());

    let (value, committed) = store.get(&"k1".into(), None).unwrap();
    assert!(committed);
    assert_eq!(value.as_deref(), Some("v1"));

    let (value, committed) = store.get(&"k3".into(), None).unwrap();
    assert!(committed);
    assert_eq!(value, None);

    let mut results = Vec::new();
    let (nrecords, committed) = store
        .scan(&"k0".into(), &"k9".into(), &mut results, None)
        .unwrap();
    assert!(committed);
    assert_eq!(nrecords, 2);
    assert_eq!(
        results,
        vec![
            ("k1".to_string(), "v1".to_string()),
            ("k2".to_string(), "v2".to_string()),
        ]
    );
}

#[test]
fn open_rejects_tiny_degree() {
    let err = Store::<u64, u64>::open(StoreConfig::new(3, Protocol::None)).unwrap_err();
    assert!(matches!(err, GarnerError::Config(_)));
    let msg = err.to_string();
    assert!(msg.contains('3'), "error should carry the offending degree: {msg}");
}

#[test]
fn delete_surfaces_unsupported() {
    let store: Store<u64, u64> = Store::open(StoreConfig::new(4, Protocol::Silo)).unwrap();
    store.put(1, 1, None).unwrap();

    let err = store.delete(&1, None).unwrap_err();
    assert!(matches!(err, GarnerError::Unsupported(_)));

    let mut txn = store.start_txn().unwrap();
    let err = store.delete(&1, Some(&mut txn)).unwrap_err();
    assert!(matches!(err, GarnerError::Unsupported(_)));
}

#[test]
fn stats_walk_tracks_growth() {
    let store: Store<u64, u64> = Store::open(StoreConfig::new(4, Protocol::None)).unwrap();

    let stats = store.gather_stats(false).unwrap();
    assert_eq!(stats.height, 1);
    assert_eq!(stats.npages, 1);

    for key in 0..256 {
        store.put(key, key, None).unwrap();
    }
    let stats = store.gather_stats(true).unwrap();
    assert!(stats.height >= 3);
    assert_eq!(stats.nkeys_leaf, 256);
    assert_eq!(stats.npages, stats.npages_itnl + stats.npages_leaf);
}

#[test]
fn overwrite_keeps_single_record_per_key() {
    let store: Store<u64, String> = Store::open(StoreConfig::new(5, Protocol::None)).unwrap();
    for round in 0..3 {
        for key in 0..64 {
            store.put(key, format!("r{round}-{key}"), None).unwrap();
        }
    }
    let stats = store.gather_stats(false).unwrap();
    assert_eq!(stats.nkeys_leaf, 64);

    let mut results = Vec::new();
    let (n, _) = store.scan(&0, &63, &mut results, None).unwrap();
    assert_eq!(n, 64);
    for (key, value) in results {
        assert_eq!(value, format!("r2-{key}"));
    }
}

#[test]
fn implicit_transactions_commit_under_silo() {
    let store: Store<String, u64> = Store::open(StoreConfig::default()).unwrap();
    assert!(store.put("a".into(), 1, None).unwrap());
    let (value, committed) = store.get(&"a".into(), None).unwrap();
    assert!(committed);
    assert_eq!(value, Some(1));
}
