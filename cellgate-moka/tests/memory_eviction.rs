//! Byte-capacity eviction and retention expiry.

use std::time::Duration;

use bytes::Bytes;
use cellgate::{Backend, DeleteStatus};
use cellgate_core::{
    CacheKey, CacheValue, CredentialHash, MockTimeProvider, ResourceKey, TimeProvider,
};
use cellgate_moka::MokaBackend;
use chrono::Utc;

fn make_key(id: u32) -> CacheKey {
    CacheKey::Resource(ResourceKey::new(
        "http",
        "localhost",
        format!("/nexus/v1/resources/{id:04}"),
        "",
    ))
}

fn make_value(size: usize) -> CacheValue<Bytes> {
    make_value_retained(size, chrono::Duration::hours(1))
}

fn make_value_retained(size: usize, retain: chrono::Duration) -> CacheValue<Bytes> {
    let now = Utc::now();
    let fresh = now + retain / 2;
    CacheValue::new(Bytes::from(vec![0u8; size]), now, fresh, fresh, now + retain)
}

fn entry_size(key: &CacheKey, value: &CacheValue<Bytes>) -> usize {
    key.memory_size() + value.memory_size()
}

async fn count_present(backend: &MokaBackend, ids: impl IntoIterator<Item = u32>) -> usize {
    let mut count = 0;
    for id in ids {
        if backend.read(&make_key(id)).await.unwrap().is_some() {
            count += 1;
        }
    }
    count
}

#[tokio::test]
async fn capacity_is_measured_in_bytes() {
    let single = entry_size(&make_key(1), &make_value(100));
    let backend = MokaBackend::builder((single * 3) as u64).build();

    for id in 1..=3 {
        backend.write(&make_key(id), make_value(100)).await.unwrap();
    }
    backend.cache().run_pending_tasks().await;
    assert_eq!(count_present(&backend, 1..=3).await, 3);

    backend.write(&make_key(4), make_value(100)).await.unwrap();
    backend.cache().run_pending_tasks().await;

    assert!(backend.read(&make_key(4)).await.unwrap().is_some());
    assert_eq!(count_present(&backend, 1..=4).await, 3);
}

#[tokio::test]
async fn large_entry_displaces_small_ones() {
    let small = entry_size(&make_key(1), &make_value(50));
    let large = entry_size(&make_key(3), &make_value(200));
    let backend = MokaBackend::builder((large + small / 2) as u64).build();

    backend.write(&make_key(1), make_value(50)).await.unwrap();
    backend.write(&make_key(2), make_value(50)).await.unwrap();
    backend.cache().run_pending_tasks().await;
    assert_eq!(count_present(&backend, 1..=2).await, 2);

    backend.write(&make_key(3), make_value(200)).await.unwrap();
    backend.cache().run_pending_tasks().await;

    assert!(backend.read(&make_key(3)).await.unwrap().is_some());
    assert!(count_present(&backend, 1..=2).await < 2);
}

#[tokio::test]
async fn least_recently_read_entry_is_evicted_first() {
    let single = entry_size(&make_key(1), &make_value(100));
    let backend = MokaBackend::builder((single * 3) as u64).build();

    for id in 1..=3 {
        backend.write(&make_key(id), make_value(100)).await.unwrap();
        backend.cache().run_pending_tasks().await;
    }

    // Touch the oldest entry so the second one becomes the LRU victim.
    assert!(backend.read(&make_key(1)).await.unwrap().is_some());
    backend.cache().run_pending_tasks().await;

    backend.write(&make_key(4), make_value(100)).await.unwrap();
    backend.cache().run_pending_tasks().await;

    assert!(backend.read(&make_key(1)).await.unwrap().is_some());
    assert!(backend.read(&make_key(2)).await.unwrap().is_none());
}

#[tokio::test]
async fn entries_are_reclaimed_after_retention() {
    let backend = MokaBackend::builder(1024 * 1024).build();
    let key = make_key(1);

    backend
        .write(&key, make_value_retained(10, chrono::Duration::milliseconds(100)))
        .await
        .unwrap();
    assert!(backend.read(&key).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(250)).await;
    backend.cache().run_pending_tasks().await;

    assert!(backend.read(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn retention_is_measured_against_the_configured_clock() {
    // The store's clock runs a day behind the wall clock.
    let clock = MockTimeProvider::at(Utc::now() - chrono::Duration::days(1));
    let backend = MokaBackend::builder(1024 * 1024).clock(clock.clone()).build();
    let key = make_key(1);

    let stored_at = clock.now();
    let retain_until = stored_at + chrono::Duration::hours(1);
    let value = CacheValue::new(
        Bytes::from_static(b"v"),
        stored_at,
        retain_until,
        retain_until,
        retain_until,
    );
    backend.write(&key, value).await.unwrap();
    backend.cache().run_pending_tasks().await;

    assert!(backend.read(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn auth_and_resource_keys_share_the_cache() {
    let backend = MokaBackend::builder(1024 * 1024).label("gateway").build();
    let auth = CacheKey::Auth(CredentialHash::of("Bearer abc"));

    backend.write(&auth, make_value(2)).await.unwrap();
    backend.write(&make_key(1), make_value(2)).await.unwrap();

    assert!(backend.read(&auth).await.unwrap().is_some());
    assert_eq!(backend.name(), "gateway");

    assert!(matches!(
        backend.remove(&auth).await.unwrap(),
        DeleteStatus::Deleted(1)
    ));
    assert!(matches!(
        backend.remove(&auth).await.unwrap(),
        DeleteStatus::Missing
    ));
    assert!(backend.read(&make_key(1)).await.unwrap().is_some());
}
