// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Tests for the upload ledger retry window.

use activity_sync::db::{keys, BlobStore, MemoryBlobStore};
use activity_sync::models::ApiVersion;
use activity_sync::services::UploadLedger;
use activity_sync::time_utils::ManualClock;
use chrono::Duration;
use std::sync::atomic::Ordering;
use std::sync::Arc;

mod common;
use common::{test_clock, test_now, FlakyBlobStore};

const RETRY_MIN: std::time::Duration = std::time::Duration::from_secs(15 * 60);
const DEADLINE: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

async fn open_ledger(blobs: Arc<MemoryBlobStore>, clock: &ManualClock) -> UploadLedger {
    UploadLedger::open(blobs, DEADLINE, Arc::new(clock.clone()))
        .await
        .expect("Failed to open ledger")
}

#[tokio::test]
async fn test_complete_upload_is_never_revisited() {
    let clock = test_clock();
    let ledger = open_ledger(Arc::new(MemoryBlobStore::new()), &clock).await;

    ledger
        .mark_uploaded("act-1", true, ApiVersion::V2)
        .await
        .unwrap();

    assert!(ledger.is_uploaded("act-1", ApiVersion::V2).await);
    assert!(!ledger.should_attempt("act-1", ApiVersion::V2).await);
    clock.advance(Duration::hours(1));
    assert!(ledger.records_needing_retry(RETRY_MIN).await.is_empty());
    assert!(!ledger.is_terminal("act-1").await);
}

#[tokio::test]
async fn test_incomplete_upload_retry_window_boundaries() {
    let clock = test_clock();
    let ledger = open_ledger(Arc::new(MemoryBlobStore::new()), &clock).await;

    ledger
        .mark_uploaded("act-1", false, ApiVersion::V2)
        .await
        .unwrap();

    clock.advance(Duration::minutes(14));
    assert!(
        ledger.records_needing_retry(RETRY_MIN).await.is_empty(),
        "too young to revisit"
    );

    clock.advance(Duration::minutes(1));
    assert_eq!(ledger.records_needing_retry(RETRY_MIN).await, vec!["act-1"]);

    clock.advance(Duration::hours(23) + Duration::minutes(44));
    assert_eq!(
        ledger.records_needing_retry(RETRY_MIN).await,
        vec!["act-1"],
        "still inside the deadline at 23h59m"
    );
    assert!(!ledger.is_terminal("act-1").await);

    clock.advance(Duration::minutes(1));
    assert!(
        ledger.records_needing_retry(RETRY_MIN).await.is_empty(),
        "abandoned at the deadline"
    );
    assert!(ledger.is_terminal("act-1").await);
}

#[tokio::test]
async fn test_failed_attempts_stop_after_deadline() {
    let clock = test_clock();
    let ledger = open_ledger(Arc::new(MemoryBlobStore::new()), &clock).await;

    ledger.record_attempt("act-2", ApiVersion::V2).await.unwrap();
    assert!(!ledger.is_uploaded("act-2", ApiVersion::V2).await);
    assert!(ledger.should_attempt("act-2", ApiVersion::V2).await);

    clock.advance(Duration::hours(3));
    ledger.record_attempt("act-2", ApiVersion::V2).await.unwrap();
    let record = ledger.get("act-2").await.unwrap();
    assert_eq!(record.attempts, 2);
    assert!(record.uploaded_at.is_none());

    clock.advance(Duration::hours(21));
    assert!(!ledger.should_attempt("act-2", ApiVersion::V2).await);
    assert!(ledger.is_terminal("act-2").await);
}

#[tokio::test]
async fn test_new_api_version_allows_reupload() {
    let clock = test_clock();
    let ledger = open_ledger(Arc::new(MemoryBlobStore::new()), &clock).await;

    ledger
        .mark_uploaded("act-3", true, ApiVersion::V1)
        .await
        .unwrap();

    assert!(!ledger.should_attempt("act-3", ApiVersion::V1).await);
    assert!(ledger.should_attempt("act-3", ApiVersion::V2).await);
    assert!(!ledger.is_uploaded("act-3", ApiVersion::V2).await);
}

#[tokio::test]
async fn test_ledger_persists_and_clears() {
    let clock = test_clock();
    let blobs = Arc::new(MemoryBlobStore::new());

    let ledger = open_ledger(blobs.clone(), &clock).await;
    ledger
        .mark_uploaded("act-4", false, ApiVersion::V2)
        .await
        .unwrap();
    drop(ledger);

    let reopened = open_ledger(blobs.clone(), &clock).await;
    assert_eq!(reopened.len().await, 1);
    let record = reopened.get("act-4").await.unwrap();
    assert!(!record.has_complete_sensor_data);

    reopened.clear().await.unwrap();
    assert!(reopened.is_empty().await);
    assert!(!blobs.contains_key(keys::UPLOAD_LEDGER));
}

#[tokio::test]
async fn test_revisit_does_not_extend_retry_deadline() {
    let clock = test_clock();
    let ledger = open_ledger(Arc::new(MemoryBlobStore::new()), &clock).await;

    ledger
        .mark_uploaded("act-5", false, ApiVersion::V2)
        .await
        .unwrap();
    clock.advance(Duration::minutes(15));
    ledger
        .mark_uploaded("act-5", false, ApiVersion::V2)
        .await
        .unwrap();

    let record = ledger.get("act-5").await.unwrap();
    assert_eq!(record.uploaded_at, Some(test_now()));
    assert_eq!(record.attempts, 2);

    clock.advance(Duration::hours(23) + Duration::minutes(50));
    assert!(ledger.records_needing_retry(RETRY_MIN).await.is_empty());
    assert!(ledger.is_terminal("act-5").await);
}

#[tokio::test]
async fn test_failed_write_leaves_memory_matching_store() {
    let clock = test_clock();
    let blobs = FlakyBlobStore::new();
    let ledger = UploadLedger::open(blobs.clone(), DEADLINE, Arc::new(clock.clone()))
        .await
        .unwrap();

    ledger
        .mark_uploaded("act-6", false, ApiVersion::V2)
        .await
        .unwrap();

    blobs.fail_puts.store(true, Ordering::SeqCst);
    assert!(ledger
        .mark_uploaded("act-7", true, ApiVersion::V2)
        .await
        .is_err());
    assert!(ledger.get("act-7").await.is_none());

    clock.advance(Duration::minutes(30));
    assert!(ledger
        .mark_uploaded("act-6", true, ApiVersion::V2)
        .await
        .is_err());
    let record = ledger.get("act-6").await.unwrap();
    assert!(!record.has_complete_sensor_data);
    assert_eq!(record.attempts, 1);

    blobs.fail_puts.store(false, Ordering::SeqCst);
    let reopened = UploadLedger::open(blobs.clone(), DEADLINE, Arc::new(clock.clone()))
        .await
        .unwrap();
    assert_eq!(reopened.get("act-6").await, Some(record));
    assert_eq!(reopened.len().await, 1);
}

#[tokio::test]
async fn test_unreadable_ledger_starts_empty() {
    let clock = test_clock();
    let blobs = Arc::new(MemoryBlobStore::new());
    blobs
        .put(keys::UPLOAD_LEDGER, b"{not json".to_vec())
        .await
        .unwrap();

    let ledger = open_ledger(blobs, &clock).await;

    assert!(ledger.is_empty().await);
    assert!(ledger.should_attempt("act-8", ApiVersion::V2).await);
}
