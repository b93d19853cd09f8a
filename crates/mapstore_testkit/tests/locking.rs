//! Lock operations across whole-store, page, smart and shared modes.

use mapstore_core::{CoreError, LockProbe, MapStore, OpenFlags, OpenOptions, StoreHandle};
use mapstore_testkit::prelude::*;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn pair(options: &OpenOptions) -> (mapstore_core::Runtime, StoreHandle, StoreHandle) {
    let runtime = test_runtime();
    let a = runtime.open(unique_path("locks"), options).unwrap();
    let b = a.duplicate().unwrap();
    (runtime, a, b)
}

#[test]
fn shared_lock_without_rw_locks_is_violation() {
    with_temp_store(|store| {
        let err = store.shared_lock().unwrap_err();
        assert!(matches!(err, CoreError::SharedLockViolation { .. }));
        assert!(err.is_invalid_state());
        assert!(store.try_shared_lock().unwrap_err().is_invalid_state());
        assert!(store.probe_shared_lock().unwrap_err().is_invalid_state());
        assert!(store.shared_unlock().unwrap_err().is_invalid_state());
        assert!(!store.is_locked().unwrap());
    });
}

#[test]
fn shared_lock_violation_ignores_held_locks() {
    with_temp_store(|store| {
        store.lock().unwrap();
        assert!(matches!(
            store.shared_lock(),
            Err(CoreError::SharedLockViolation { .. })
        ));
        assert!(store.is_owned().unwrap());
        store.unlock().unwrap();
        assert!(!store.is_locked().unwrap());

        store.plock(b"k", OpenFlags::RDWR).unwrap();
        assert!(matches!(
            store.shared_lock(),
            Err(CoreError::SharedLockViolation { .. })
        ));
        assert!(matches!(
            store.try_shared_lock(),
            Err(CoreError::SharedLockViolation { .. })
        ));
        assert!(store.is_owned().unwrap());
        store.punlock(b"k", OpenFlags::RDWR).unwrap();
        assert!(!store.is_locked().unwrap());
    });
}

#[test]
fn whole_store_lock_nests_per_owner() {
    let (_runtime, a, b) = pair(&OpenOptions::new());

    a.lock().unwrap();
    a.lock().unwrap();
    a.unlock().unwrap();
    assert!(a.is_owned().unwrap());
    assert_eq!(b.probe_lock().unwrap(), LockProbe::Busy);

    a.unlock().unwrap();
    assert!(!a.is_locked().unwrap());
    assert!(matches!(a.unlock(), Err(CoreError::UnlockFailed { .. })));

    b.close().unwrap();
    a.close().unwrap();
}

#[test]
fn try_lock_fails_when_busy() {
    let (runtime, a, b) = pair(&OpenOptions::new());
    a.lock().unwrap();

    assert!(matches!(b.try_lock(), Err(CoreError::LockFailed { .. })));
    assert_eq!(b.probe_lock().unwrap().as_raw(), -1);
    assert_eq!(runtime.stats().lock_failures(), 1);

    a.unlock().unwrap();
    b.try_lock().unwrap();
    assert_eq!(a.probe_lock().unwrap().as_raw(), -1);
    b.unlock().unwrap();

    b.close().unwrap();
    a.close().unwrap();
}

#[test]
fn blocking_lock_waits_for_release() {
    let (_runtime, a, b) = pair(&OpenOptions::new());
    a.lock().unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        b.lock().unwrap();
        tx.send(()).unwrap();
        b.unlock().unwrap();
        b.close().unwrap();
    });

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    a.unlock().unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    waiter.join().unwrap();
    a.close().unwrap();
}

#[test]
fn closing_a_handle_releases_its_locks() {
    let (_runtime, a, b) = pair(&OpenOptions::new());
    a.lock().unwrap();
    a.close().unwrap();
    assert!(!b.is_locked().unwrap());
    assert_eq!(b.probe_lock().unwrap(), LockProbe::Acquired);
    b.unlock().unwrap();
    b.close().unwrap();
}

fn keys_on_distinct_pages(store: &StoreHandle, pages: u32) -> (Vec<u8>, Vec<u8>) {
    let hash = store.hash().unwrap();
    let page = |key: &[u8]| store.hash_value(key, hash).unwrap() % pages;
    let first = b"key-0".to_vec();
    let second = (1..)
        .map(|i| format!("key-{i}").into_bytes())
        .find(|key| page(key) != page(&first))
        .unwrap();
    (first, second)
}

#[test]
fn page_locks_are_independent_when_partitioned() {
    let options = OpenOptions::new()
        .partitioned_locks()
        .presize(16 * 4096);
    let (_runtime, a, b) = pair(&options);
    let (k1, k2) = keys_on_distinct_pages(&a, 16);

    a.plock(&k1, OpenFlags::RDWR).unwrap();
    assert_eq!(b.probe_plock(&k1, OpenFlags::RDWR).unwrap(), LockProbe::Busy);
    assert_eq!(b.probe_plock(&k2, OpenFlags::RDWR).unwrap(), LockProbe::Acquired);
    assert!(matches!(
        b.try_plock(&k1, OpenFlags::RDWR),
        Err(CoreError::LockFailed { .. })
    ));

    b.punlock(&k2, OpenFlags::RDWR).unwrap();
    a.punlock(&k1, OpenFlags::RDWR).unwrap();
    assert!(!a.is_locked().unwrap());
    b.close().unwrap();
    a.close().unwrap();
}

#[test]
fn page_lock_degrades_to_store_lock() {
    let options = OpenOptions::new().presize(16 * 4096);
    let (_runtime, a, b) = pair(&options);
    let (k1, k2) = keys_on_distinct_pages(&a, 16);

    a.plock(&k1, OpenFlags::RDWR).unwrap();
    assert_eq!(b.probe_plock(&k2, OpenFlags::RDWR).unwrap(), LockProbe::Busy);
    assert_eq!(b.probe_lock().unwrap(), LockProbe::Busy);
    a.punlock(&k1, OpenFlags::RDWR).unwrap();

    b.close().unwrap();
    a.close().unwrap();
}

#[test]
fn shared_locks_admit_many_readers() {
    let options = OpenOptions::new().shared_locks();
    let (_runtime, a, b) = pair(&options);

    a.shared_lock().unwrap();
    b.try_shared_lock().unwrap();
    assert!(a.is_owned().unwrap());
    assert!(b.is_owned().unwrap());
    assert_eq!(a.probe_lock().unwrap(), LockProbe::Busy);

    b.shared_unlock().unwrap();
    a.shared_unlock().unwrap();
    assert_eq!(a.probe_lock().unwrap(), LockProbe::Acquired);
    a.unlock().unwrap();

    b.close().unwrap();
    a.close().unwrap();
}

#[test]
fn smart_lock_resolves_by_mode() {
    // Shared mode: readers share, writers exclude.
    let (_runtime, a, b) = pair(&OpenOptions::new().shared_locks());
    a.lock_smart(b"k", OpenFlags::RDONLY).unwrap();
    assert_eq!(
        b.probe_lock_smart(b"k", OpenFlags::RDONLY).unwrap(),
        LockProbe::Acquired
    );
    assert_eq!(
        b.probe_lock_smart(b"k", OpenFlags::RDWR).unwrap(),
        LockProbe::Busy
    );
    b.unlock_smart(b"k", OpenFlags::RDONLY).unwrap();
    a.unlock_smart(b"k", OpenFlags::RDONLY).unwrap();
    b.close().unwrap();
    a.close().unwrap();

    // Default mode: everything is exclusive.
    let (_runtime, a, b) = pair(&OpenOptions::new());
    a.lock_smart(b"k", OpenFlags::RDONLY).unwrap();
    assert!(matches!(
        b.try_lock_smart(b"k", OpenFlags::RDONLY),
        Err(CoreError::LockFailed { .. })
    ));
    a.unlock_smart(b"k", OpenFlags::RDONLY).unwrap();
    b.close().unwrap();
    a.close().unwrap();
}

#[test]
fn rw_and_partitioned_locks_conflict_at_open() {
    let runtime = test_runtime();
    let options = OpenOptions::new().shared_locks().partitioned_locks();
    assert!(matches!(
        runtime.open(unique_path("conflict"), &options),
        Err(CoreError::Open { .. })
    ));
}

#[test]
fn nolock_stores_grant_every_lock() {
    let options = OpenOptions::new().flags(
        OpenFlags::RDWR
            .with(OpenFlags::CREAT)
            .with(OpenFlags::OPEN_NOLOCK),
    );
    let (_runtime, a, b) = pair(&options);
    a.lock().unwrap();
    b.try_lock().unwrap();
    assert!(!a.is_locked().unwrap());
    b.close().unwrap();
    a.close().unwrap();
}

#[test]
fn guards_unlock_on_scope_exit() {
    let (_runtime, a, b) = pair(&OpenOptions::new());
    {
        let _guard = a.lock_guard().unwrap();
        assert_eq!(b.probe_lock().unwrap(), LockProbe::Busy);
    }
    assert_eq!(b.probe_lock().unwrap(), LockProbe::Acquired);
    b.unlock().unwrap();

    let guard = a.lock_guard().unwrap();
    guard.unlock().unwrap();
    assert!(!a.is_locked().unwrap());

    b.close().unwrap();
    a.close().unwrap();
}
