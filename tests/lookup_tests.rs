//! Integration Tests for the Cache-Aside Read Path
//!
//! Counts durable calls and injects store faults to check when each store is hit.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{deadline, sample_record, BrokenCache, Fault, FlakyStore};
use exam_cache::error::LookupError;
use exam_cache::models::{KeyRange, StudentKey};
use exam_cache::preload::{PreloadSettings, Preloader};
use exam_cache::service::{LookupService, LookupSettings};
use exam_cache::store::{DurableStore, MemoryCache, ResultCache};
use futures_util::future::join_all;
use tokio_test::{assert_err, assert_ok};

// == Helper Functions ==

const RANGE: KeyRange = KeyRange {
    start: StudentKey(10_000),
    end: StudentKey(10_999),
};

fn lookup_settings() -> LookupSettings {
    LookupSettings {
        key_range: RANGE,
        call_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

async fn seeded_store() -> Arc<FlakyStore> {
    let store = Arc::new(FlakyStore::new());
    let records: Vec<_> = (10_000..10_010).map(sample_record).collect();
    store.inner().insert_batch(&records, deadline()).await.unwrap();
    store
}

// == Cache Hits ==

#[tokio::test]
async fn test_hit_after_warm_never_reads_durable_store() {
    let store = seeded_store().await;
    let cache = Arc::new(MemoryCache::new());
    let preloader = Preloader::new(
        store.clone(),
        cache.clone(),
        PreloadSettings {
            key_range: RANGE,
            ..Default::default()
        },
    );
    preloader.warm().await.unwrap();

    let lookup = LookupService::new(store.clone(), cache, lookup_settings());
    for key in 10_000..10_010 {
        let record = assert_ok!(lookup.get_result(StudentKey(key)).await);
        assert_eq!(record, sample_record(key));
    }
    assert_eq!(store.fetch_calls(), 0);
    assert_eq!(lookup.stats().hits, 10);
}

#[tokio::test]
async fn test_miss_then_repeat_is_served_from_cache() {
    let store = seeded_store().await;
    let cache = Arc::new(MemoryCache::new());
    let lookup = LookupService::new(store.clone(), cache.clone(), lookup_settings());

    let first = assert_ok!(lookup.get_result(StudentKey(10_004)).await);
    let second = assert_ok!(lookup.get_result(StudentKey(10_004)).await);

    assert_eq!(first, second);
    assert_eq!(store.fetch_calls(), 1);
    let stats = lookup.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert!(cache.get("10004", deadline()).await.unwrap().is_some());
}

// == Degraded Cache ==

#[tokio::test]
async fn test_cache_failure_falls_back_to_durable_store() {
    let store = seeded_store().await;
    let lookup = LookupService::new(store.clone(), Arc::new(BrokenCache), lookup_settings());

    let record = assert_ok!(lookup.get_result(StudentKey(10_002)).await);
    assert_eq!(record, sample_record(10_002));

    let stats = lookup.stats();
    assert_eq!(stats.cache_errors, 1);
    assert_eq!(stats.fill_failures, 1);
    assert_eq!(stats.fills, 0);
}

#[tokio::test]
async fn test_cache_failure_still_reports_not_found() {
    let store = seeded_store().await;
    let lookup = LookupService::new(store, Arc::new(BrokenCache), lookup_settings());
    let err = assert_err!(lookup.get_result(StudentKey(10_500)).await);
    assert!(matches!(err, LookupError::NotFound(_)));
}

// == Durable Failures ==

#[tokio::test]
async fn test_durable_timeout_surfaces_as_timeout() {
    let store = seeded_store().await;
    store.fail_fetches(Some(Fault::Stall));
    let lookup = LookupService::new(
        store,
        Arc::new(MemoryCache::new()),
        LookupSettings {
            call_timeout: Duration::from_millis(20),
            ..lookup_settings()
        },
    );

    let err = assert_err!(lookup.get_result(StudentKey(10_001)).await);
    assert!(matches!(err, LookupError::Timeout));
}

#[tokio::test]
async fn test_durable_unavailable_surfaces_as_unavailable() {
    let store = seeded_store().await;
    store.fail_fetches(Some(Fault::Unavailable));
    let cache = Arc::new(MemoryCache::new());
    let lookup = LookupService::new(store, cache.clone(), lookup_settings());

    let err = assert_err!(lookup.get_result(StudentKey(10_001)).await);
    assert!(matches!(err, LookupError::StoreUnavailable(_)));
    assert!(cache.is_empty().await);
}

// == Negative Caching ==

#[tokio::test]
async fn test_negative_entry_replaced_by_warm() {
    let store = seeded_store().await;
    let cache = Arc::new(MemoryCache::new());
    let lookup = LookupService::new(
        store.clone(),
        cache.clone(),
        LookupSettings {
            negative_cache: true,
            ..lookup_settings()
        },
    );

    // Looked up before it was seeded
    assert_err!(lookup.get_result(StudentKey(10_020)).await);
    store
        .inner()
        .insert_batch(&[sample_record(10_020)], deadline())
        .await
        .unwrap();

    let preloader = Preloader::new(
        store.clone(),
        cache,
        PreloadSettings {
            key_range: RANGE,
            ..Default::default()
        },
    );
    preloader.warm().await.unwrap();

    let record = assert_ok!(lookup.get_result(StudentKey(10_020)).await);
    assert_eq!(record, sample_record(10_020));
    assert_eq!(store.fetch_calls(), 1);
}

#[tokio::test]
async fn test_negative_entry_from_racing_lookup_keeps_warmed_record() {
    let store = Arc::new(FlakyStore::new());
    let cache = Arc::new(MemoryCache::new());
    let lookup = Arc::new(LookupService::new(
        store.clone(),
        cache.clone(),
        LookupSettings {
            negative_cache: true,
            ..lookup_settings()
        },
    ));

    // The lookup reads "no row", then answers only after seed and warm finished
    store.delay_replies(Duration::from_millis(200));
    let racing = tokio::spawn({
        let lookup = Arc::clone(&lookup);
        async move { lookup.get_result(StudentKey(10_005)).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let preloader = Preloader::new(
        store.clone(),
        cache.clone(),
        PreloadSettings {
            key_range: RANGE,
            ..Default::default()
        },
    );
    store
        .inner()
        .insert_batch(&[sample_record(10_005)], deadline())
        .await
        .unwrap();
    preloader.warm().await.unwrap();

    let err = assert_err!(racing.await.unwrap());
    assert!(matches!(err, LookupError::NotFound(_)));

    store.delay_replies(Duration::ZERO);
    assert!(preloader.is_warm().await);
    let record = assert_ok!(lookup.get_result(StudentKey(10_005)).await);
    assert_eq!(record, sample_record(10_005));
    assert_eq!(store.fetch_calls(), 1, "served from the warmed entry");
}

// == Miss Coalescing ==

#[tokio::test]
async fn test_concurrent_misses_are_not_deduplicated_by_default() {
    let store = seeded_store().await;
    store.delay_fetches(Duration::from_millis(50));
    let lookup = LookupService::new(store.clone(), Arc::new(MemoryCache::new()), lookup_settings());

    let results = join_all((0..8).map(|_| lookup.get_result(StudentKey(10_003)))).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(store.fetch_calls(), 8);
}

#[tokio::test]
async fn test_concurrent_misses_coalesce_when_enabled() {
    let store = seeded_store().await;
    store.delay_fetches(Duration::from_millis(50));
    let lookup = LookupService::new(
        store.clone(),
        Arc::new(MemoryCache::new()),
        LookupSettings {
            coalesce_misses: true,
            ..lookup_settings()
        },
    );

    let results = join_all((0..8).map(|_| lookup.get_result(StudentKey(10_003)))).await;
    for result in results {
        assert_eq!(result.unwrap(), sample_record(10_003));
    }
    assert_eq!(store.fetch_calls(), 1);
    let stats = lookup.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 7);
}
