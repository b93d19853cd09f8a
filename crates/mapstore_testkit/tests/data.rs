//! Data operations, iteration and maintenance through the handle layer.

use mapstore_core::{
    CoreError, Cursor, HashFunction, MapStore, OpenFlags, OpenOptions, PruneDecision, ShakeFn,
    StoreFlags, StoreMode,
};
use mapstore_engine::EngineError;
use mapstore_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn insert_twice_reports_existing_key() {
    with_temp_store(|store| {
        assert_eq!(store.store(b"k", b"first", StoreMode::Insert), Ok(true));
        assert_eq!(store.store(b"k", b"second", StoreMode::Insert), Ok(false));
        assert_eq!(store.fetch(b"k").unwrap(), b"first");
    });
}

#[test]
fn fetch_of_missing_key_is_no_entry() {
    with_temp_store(|store| {
        let err = store.fetch(b"missing").unwrap_err();
        assert!(err.is_no_entry());
        assert!(err.to_string().contains("fetch"));
        assert!(!err.is_invalid_state());
    });
}

#[test]
fn delete_then_fetch() {
    with_temp_store(|store| {
        store.store_str("k", "v", StoreMode::Insert).unwrap();
        store.delete_str("k").unwrap();
        assert!(store.fetch(b"k").unwrap_err().is_no_entry());
        assert!(store.delete(b"k").unwrap_err().is_no_entry());
    });
}

#[test]
fn modify_of_missing_key_is_store_error() {
    with_temp_store(|store| {
        match store.store(b"absent", b"v", StoreMode::Modify) {
            Err(CoreError::Store { source, .. }) => assert!(source.is_not_found()),
            other => panic!("unexpected {other:?}"),
        }
    });
}

#[test]
fn empty_key_is_rejected() {
    with_temp_store(|store| {
        assert!(matches!(
            store.store(b"", b"v", StoreMode::Replace),
            Err(CoreError::Store {
                source: EngineError::InvalidArgument(_),
                ..
            })
        ));
    });
}

#[test]
fn iteration_visits_every_key_once() {
    let store = scenarios::populated_store(300);
    let mut seen = HashSet::new();
    let mut cursor = store.cursor().unwrap();
    let mut next = store.first_key(&mut cursor).unwrap();
    while let Some(key) = next {
        assert!(seen.insert(key), "key visited twice");
        next = store.next_key(&mut cursor).unwrap();
    }
    assert_eq!(seen.len(), 300);
    assert!(seen.contains(&scenarios::key(299)));
}

#[test]
fn iteration_of_empty_store_ends_immediately() {
    with_temp_store(|store| {
        let mut cursor = Cursor::new();
        assert_eq!(store.first(&mut cursor).unwrap(), None);
        assert_eq!(store.entries().unwrap().count(), 0);
    });
}

#[test]
fn cursor_delete_twice_is_no_entry() {
    with_temp_store(|store| {
        let mut cursor = Cursor::new();
        assert!(matches!(
            store.delete_at(&mut cursor),
            Err(CoreError::Delete {
                source: EngineError::InvalidArgument(_),
                ..
            })
        ));

        store.store(b"a", b"1", StoreMode::Insert).unwrap();
        store.store(b"b", b"2", StoreMode::Insert).unwrap();
        let (first, _) = store.first(&mut cursor).unwrap().unwrap();
        store.delete_at(&mut cursor).unwrap();
        assert!(store.delete_at(&mut cursor).unwrap_err().is_no_entry());
        assert!(store.fetch(&first).unwrap_err().is_no_entry());

        // The cursor still advances to the remaining entry.
        let (rest, _) = store.next(&mut cursor).unwrap().unwrap();
        assert_ne!(rest, first);
        assert_eq!(store.next(&mut cursor).unwrap(), None);
    });
}

#[test]
fn cursor_positioning_variants() {
    with_temp_store(|store| {
        let mut cursor = Cursor::new();
        store
            .store_at(b"k", b"v", StoreMode::Insert, &mut cursor)
            .unwrap();
        assert!(cursor.is_positioned());
        store.delete_at(&mut cursor).unwrap();
        assert!(store.fetch(b"k").unwrap_err().is_no_entry());

        store.store(b"k", b"w", StoreMode::Insert).unwrap();
        let mut cursor = Cursor::new();
        assert_eq!(store.fetch_at(b"k", &mut cursor).unwrap(), b"w");
        store.delete_at(&mut cursor).unwrap();
        assert!(store.fetch(b"k").unwrap_err().is_no_entry());
    });
}

#[test]
fn duplicates_walk_in_order() {
    with_temp_store(|store| {
        for value in [b"1", b"2", b"3"] {
            assert!(store.store(b"dup", value, StoreMode::InsertDup).unwrap());
        }
        let mut cursor = Cursor::new();
        let values: Vec<_> = (0..3)
            .map(|_| store.fetch_dup(b"dup", &mut cursor).unwrap())
            .collect();
        assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
        assert!(store.fetch_dup(b"dup", &mut cursor).unwrap_err().is_no_entry());
    });
}

#[test]
fn reserve_stores_zeroed_value() {
    with_temp_store(|store| {
        let flags = StoreFlags::from(StoreMode::Replace).reserve();
        store.store(b"k", b"abcd", flags).unwrap();
        assert_eq!(store.fetch(b"k").unwrap(), vec![0; 4]);
    });
}

#[test]
fn non_utf8_value_is_fetch_error() {
    with_temp_store(|store| {
        store.store(b"k", &[0xff, 0xfe], StoreMode::Replace).unwrap();
        assert!(matches!(
            store.fetch_str("k"),
            Err(CoreError::Fetch { .. })
        ));
    });
}

#[test]
fn read_only_handle_rejects_writes() {
    let runtime = test_runtime();
    let path = unique_path("ro");
    let writer = runtime.open(&path, &OpenOptions::new()).unwrap();
    writer.store(b"k", b"v", StoreMode::Insert).unwrap();

    let reader = runtime
        .open(&path, &OpenOptions::new().read_only())
        .unwrap();
    assert_eq!(reader.fetch(b"k").unwrap(), b"v");
    assert!(matches!(
        reader.store(b"k", b"w", StoreMode::Replace),
        Err(CoreError::Store {
            source: EngineError::ReadOnly,
            ..
        })
    ));

    reader.close().unwrap();
    writer.close().unwrap();
}

#[test]
fn hash_change_strands_existing_keys() {
    with_store_options(&OpenOptions::new().presize(64 * 4096), |store| {
        scenarios::populate(store, 100);
        store.set_hash(HashFunction::Crc32).unwrap();
        assert_eq!(store.hash().unwrap(), HashFunction::Crc32);
        assert_eq!(store.hash_code().unwrap(), 0);

        let stranded = (0..100)
            .filter(|&i| store.fetch(&scenarios::key(i)).is_err())
            .count();
        assert!(stranded > 0);
        assert_eq!(store.entries().unwrap().count(), 100);
    });
}

#[test]
fn maintenance_operations() {
    with_store_options(&OpenOptions::new().presize(8 * 4096), |store| {
        scenarios::populate(store, 20);
        store.sync().unwrap();
        store.fsync().unwrap();
        store.compress_tree().unwrap();
        assert_eq!(store.entries().unwrap().count(), 20);

        store.set_spill_size(1024).unwrap();
        assert!(matches!(
            store.set_spill_size(1 << 20),
            Err(CoreError::Engine {
                operation: "set_spill_size",
                ..
            })
        ));

        store.purge().unwrap();
        assert_eq!(store.entries().unwrap().count(), 0);

        scenarios::populate(store, 5);
        store.truncate().unwrap();
        assert_eq!(store.entries().unwrap().count(), 0);
        assert_eq!(store.size().unwrap(), 4096);
    });
}

#[test]
fn pre_split_grows_reported_geometry() {
    with_store_options(&OpenOptions::new().page_size(1024).presize(1024), |store| {
        assert_eq!(store.page_size().unwrap(), 1024);
        assert_eq!(store.size().unwrap(), 1024);
        assert_eq!(store.limit_size().unwrap(), 0);
        assert_eq!(store.alignment().unwrap(), 0);

        store.pre_split(8).unwrap();
        assert_eq!(store.size().unwrap(), 8 * 1024);

        // Never shrinks.
        store.pre_split(2).unwrap();
        assert_eq!(store.size().unwrap(), 8 * 1024);
    });
}

fn small_store_options() -> OpenOptions {
    OpenOptions::new().page_size(128).presize(128)
}

fn sized_entry(i: usize) -> (Vec<u8>, Vec<u8>) {
    (format!("k{i:02}").into_bytes(), vec![b'v'; 60])
}

#[test]
fn size_limit_is_reported_and_enforced() {
    with_store_options(&small_store_options(), |store| {
        assert_eq!(store.limit_size().unwrap(), 0);
        store.set_limit_size(2, None).unwrap();
        assert_eq!(store.limit_size().unwrap(), 256);

        let mut stored = 0;
        let err = loop {
            let (key, value) = sized_entry(stored);
            match store.store(&key, &value, StoreMode::Insert) {
                Ok(_) => stored += 1,
                Err(err) => break err,
            }
        };
        match err {
            CoreError::Store { source, .. } => assert!(source.is_no_space()),
            other => panic!("unexpected {other:?}"),
        }
        assert!((2..=4).contains(&stored));
        assert_eq!(store.size().unwrap(), 256);
        assert_eq!(store.entries().unwrap().count(), stored);
    });
}

#[test]
fn size_limit_rejects_zero_and_shrinking() {
    with_store_options(&small_store_options(), |store| {
        assert!(matches!(
            store.set_limit_size(0, None),
            Err(CoreError::Engine {
                operation: "limit_size",
                ..
            })
        ));
        store.pre_split(4).unwrap();
        assert!(store.set_limit_size(2, None).is_err());
        assert_eq!(store.limit_size().unwrap(), 0);
    });
}

#[test]
fn shake_frees_room_in_a_full_page() {
    with_store_options(&small_store_options(), |store| {
        let shaken = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&shaken);
        let shake: ShakeFn = Box::new(move |key, _| {
            counter.fetch_add(1, Ordering::Relaxed);
            PruneDecision::from(key == b"k00")
        });
        store.set_limit_size(1, Some(shake)).unwrap();

        for i in 0..2 {
            let (key, value) = sized_entry(i);
            store.store(&key, &value, StoreMode::Insert).unwrap();
        }
        let (key, value) = sized_entry(2);
        store.store(&key, &value, StoreMode::Insert).unwrap();

        assert_eq!(shaken.load(Ordering::Relaxed), 2);
        assert!(store.fetch(b"k00").unwrap_err().is_no_entry());
        assert_eq!(store.fetch(b"k01").unwrap(), value);
        assert_eq!(store.fetch(&key).unwrap(), value);
    });
}

#[test]
fn prune_deletes_what_the_callback_rejects() {
    let runtime = test_runtime();
    let store = runtime
        .open_synchronized(unique_path("prune"), &OpenOptions::new())
        .unwrap();
    scenarios::populate(&store, 20);

    let removed = store
        .prune(|key, _| PruneDecision::from(key.ends_with(b"7")))
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(store.entries().unwrap().count(), 18);
    assert!(store.fetch(&scenarios::key(7)).unwrap_err().is_no_entry());
    assert!(store.fetch(&scenarios::key(8)).is_ok());
    store.close().unwrap();
}

#[test]
fn replace_db_is_seen_by_every_handle() {
    let runtime = test_runtime();
    let live = unique_path("live");
    let staged = unique_path("staged");

    let writer = runtime.open(&live, &OpenOptions::new()).unwrap();
    let reader = runtime.open(&live, &OpenOptions::new()).unwrap();
    writer.store(b"k", b"old", StoreMode::Replace).unwrap();

    let staging = runtime.open(&staged, &OpenOptions::new()).unwrap();
    staging.store(b"k", b"new", StoreMode::Replace).unwrap();
    staging.close().unwrap();

    writer.replace_db(&staged).unwrap();
    assert_eq!(reader.fetch(b"k").unwrap(), b"new");
    assert!(runtime
        .open(&staged, &OpenOptions::new().flags(OpenFlags::RDWR))
        .is_err());

    reader.close().unwrap();
    writer.close().unwrap();
}

#[test]
fn replace_file_swaps_by_path() {
    let runtime = test_runtime();
    let live = unique_path("file-live");
    let staged = unique_path("file-staged");

    let store = runtime.open(&live, &OpenOptions::new()).unwrap();
    store.store(b"k", b"old", StoreMode::Replace).unwrap();
    let staging = runtime.open(&staged, &OpenOptions::new()).unwrap();
    staging.store(b"k", b"new", StoreMode::Replace).unwrap();
    staging.close().unwrap();

    store.replace_file(&live, &staged).unwrap();
    assert_eq!(store.fetch(b"k").unwrap(), b"new");
    store.close().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn operations_match_model(ops in op_sequence_strategy(8, 64)) {
        with_temp_store(|store| {
            let mut harness = ModelHarness::new(store);
            for op in &ops {
                harness.apply(op);
            }
            harness.verify_all();
        });
    }

    #[test]
    fn entries_round_trip_under_any_hash(
        entries in entries_strategy(48),
        hash in hash_function_strategy(),
    ) {
        with_store_options(&OpenOptions::new().presize(16 * 4096), |store| {
            store.set_hash(hash).unwrap();
            let mut harness = ModelHarness::new(store);
            for (key, value) in &entries {
                harness.store_and_verify(key, value, StoreMode::Insert);
            }
            harness.verify_all();
            for key in entries.keys() {
                harness.fetch_and_verify(key);
            }
        });
    }
}
