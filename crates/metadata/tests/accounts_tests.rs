// Quota accounts: atomic deltas, reservations and purchases.

mod common;

use common::{file, store};
use pinbox_metadata::models::PurchaseRow;
use pinbox_metadata::repos::{AccountRepo, FileRepo};
use std::sync::Arc;
use time::OffsetDateTime;

const ID: &str = "0xabc";

#[tokio::test]
async fn test_ensure_account_is_lazy_upsert() {
    let (_dir, store) = store().await;
    let now = OffsetDateTime::now_utc();

    assert!(store.get_account(ID).await.unwrap().is_none());
    let account = store.ensure_account(ID, now).await.unwrap();
    assert_eq!(account.used_bytes, 0);
    assert_eq!(account.purchased_bytes, 0);

    store.apply_delta(ID, 10, now).await.unwrap();
    let again = store.ensure_account(ID, now).await.unwrap();
    assert_eq!(again.used_bytes, 10);
}

#[tokio::test]
async fn test_apply_delta_clamps_and_upserts() {
    let (_dir, store) = store().await;
    let now = OffsetDateTime::now_utc();

    assert_eq!(store.apply_delta("0xnew", -5, now).await.unwrap(), 0);
    assert_eq!(store.apply_delta(ID, 100, now).await.unwrap(), 100);
    assert_eq!(store.apply_delta(ID, -30, now).await.unwrap(), 70);
    assert_eq!(store.apply_delta(ID, -1000, now).await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_deltas_are_not_lost() {
    let (_dir, store) = store().await;
    let store = Arc::new(store);
    let now = OffsetDateTime::now_utc();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.apply_delta(ID, 3, now).await.unwrap();
        }));
    }
    futures::future::join_all(handles).await;

    assert_eq!(store.get_account(ID).await.unwrap().unwrap().used_bytes, 60);
}

#[tokio::test]
async fn test_reservation_respects_capacity() {
    let (_dir, store) = store().await;
    let now = OffsetDateTime::now_utc();
    let free = 100;

    assert!(store.reserve(ID, 60, free, now).await.unwrap());
    assert!(!store.reserve(ID, 41, free, now).await.unwrap());
    assert!(store.reserve(ID, 40, free, now).await.unwrap());

    store.release(ID, 40, now).await.unwrap();
    let account = store.get_account(ID).await.unwrap().unwrap();
    assert_eq!(account.reserved_bytes, 60);

    // Committing turns reserved bytes into used bytes.
    store
        .create_files_charged(&[file(ID, "f", 60, None)], ID, 60, now)
        .await
        .unwrap();
    let account = store.get_account(ID).await.unwrap().unwrap();
    assert_eq!(account.used_bytes, 60);
    assert_eq!(account.reserved_bytes, 0);

    assert!(!store.reserve(ID, 41, free, now).await.unwrap());
}

#[tokio::test]
async fn test_failed_charge_rolls_back_records() {
    let (_dir, store) = store().await;
    let now = OffsetDateTime::now_utc();

    store.create_file(&file(ID, "taken", 1, None)).await.unwrap();
    assert!(store.reserve(ID, 10, 100, now).await.unwrap());

    let rows = [file(ID, "fresh", 5, None), file(ID, "taken", 5, None)];
    assert!(store.create_files_charged(&rows, ID, 10, now).await.is_err());

    assert!(store.get_file_by_cid("fresh").await.unwrap().is_none());
    let account = store.get_account(ID).await.unwrap().unwrap();
    assert_eq!(account.used_bytes, 0);
    assert_eq!(account.reserved_bytes, 10);
}

#[tokio::test]
async fn test_purchase_credited_once() {
    let (_dir, store) = store().await;
    let now = OffsetDateTime::now_utc();
    let purchase = PurchaseRow {
        transaction_hash: "0xtx1".to_string(),
        identity: ID.to_string(),
        bytes: 1024,
        created_at: now,
    };

    assert!(store.record_purchase(&purchase).await.unwrap());
    assert!(!store.record_purchase(&purchase).await.unwrap());

    let account = store.get_account(ID).await.unwrap().unwrap();
    assert_eq!(account.purchased_bytes, 1024);
    assert!(store.reserve(ID, 1100, 100, now).await.unwrap());
}

#[tokio::test]
async fn test_recompute_used_corrects_drift() {
    let (_dir, store) = store().await;
    let now = OffsetDateTime::now_utc();

    store.create_file(&file(ID, "a", 30, None)).await.unwrap();
    store.create_file(&file(ID, "b", 12, None)).await.unwrap();
    store.apply_delta(ID, 500, now).await.unwrap();

    let recount = store.recompute_used(ID, now).await.unwrap();
    assert_eq!(recount.previous, 500);
    assert_eq!(recount.used, 42);
    assert_eq!(recount.files, 2);
    assert!(recount.corrected());

    let account = store.get_account(ID).await.unwrap().unwrap();
    assert_eq!(account.used_bytes, 42);
    assert!(account.last_checked_at.is_some());

    let again = store.recompute_used(ID, now).await.unwrap();
    assert!(!again.corrected());
}

#[tokio::test]
async fn test_recompute_used_creates_account() {
    let (_dir, store) = store().await;
    let now = OffsetDateTime::now_utc();

    let recount = store.recompute_used("0xfresh", now).await.unwrap();
    assert_eq!(recount.previous, 0);
    assert_eq!(recount.used, 0);
    assert!(store.get_account("0xfresh").await.unwrap().is_some());
}
