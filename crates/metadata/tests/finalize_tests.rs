// Finalize claims: single flight, completion and release.

mod common;

use common::{file, store};
use pinbox_metadata::models::ClaimOutcome;
use pinbox_metadata::repos::{AccountRepo, FileRepo, FinalizeRepo};
use time::{Duration, OffsetDateTime};

const OWNER: &str = "0xowner";

#[tokio::test]
async fn test_second_claim_sees_in_progress() {
    let (_dir, store) = store().await;
    let now = OffsetDateTime::now_utc();
    let stale = now - Duration::minutes(10);

    assert!(matches!(
        store.claim_finalize("u1", OWNER, now, stale).await.unwrap(),
        ClaimOutcome::Claimed
    ));
    assert!(matches!(
        store.claim_finalize("u1", OWNER, now, stale).await.unwrap(),
        ClaimOutcome::InProgress
    ));

    store.release_finalize("u1").await.unwrap();
    assert!(matches!(
        store.claim_finalize("u1", OWNER, now, stale).await.unwrap(),
        ClaimOutcome::Claimed
    ));
}

#[tokio::test]
async fn test_completed_claim_returns_result_and_charges_once() {
    let (_dir, store) = store().await;
    let now = OffsetDateTime::now_utc();
    let stale = now - Duration::minutes(10);

    assert!(matches!(
        store.claim_finalize("u2", OWNER, now, stale).await.unwrap(),
        ClaimOutcome::Claimed
    ));
    assert!(store.reserve(OWNER, 64, 1024, now).await.unwrap());
    let row = file(OWNER, "sha256-aa", 64, None);
    store.complete_finalize("u2", &row, 64, now).await.unwrap();

    match store.claim_finalize("u2", OWNER, now, stale).await.unwrap() {
        ClaimOutcome::Completed(claim) => {
            assert_eq!(claim.cid.as_deref(), Some("sha256-aa"));
            assert_eq!(claim.size, Some(64));
        }
        other => panic!("expected Completed, got {other:?}"),
    }

    // Release never drops a completed claim.
    store.release_finalize("u2").await.unwrap();
    assert!(store.get_finalize_claim("u2").await.unwrap().unwrap().is_completed());

    let account = store.get_account(OWNER).await.unwrap().unwrap();
    assert_eq!(account.used_bytes, 64);
    assert_eq!(account.reserved_bytes, 0);
    assert!(store.get_file_by_cid("sha256-aa").await.unwrap().is_some());
}

#[tokio::test]
async fn test_stale_claim_taken_over() {
    let (_dir, store) = store().await;
    let then = OffsetDateTime::now_utc() - Duration::hours(2);
    let now = OffsetDateTime::now_utc();

    store
        .claim_finalize("u3", OWNER, then, then - Duration::minutes(10))
        .await
        .unwrap();
    assert!(matches!(
        store
            .claim_finalize("u3", OWNER, now, now - Duration::minutes(10))
            .await
            .unwrap(),
        ClaimOutcome::Claimed
    ));
}

#[tokio::test]
async fn test_complete_without_claim_fails_atomically() {
    let (_dir, store) = store().await;
    let now = OffsetDateTime::now_utc();
    assert!(store.reserve(OWNER, 8, 1024, now).await.unwrap());

    let row = file(OWNER, "sha256-bb", 8, None);
    assert!(store.complete_finalize("nobody", &row, 8, now).await.is_err());
    assert!(store.get_file_by_cid("sha256-bb").await.unwrap().is_none());
    assert_eq!(store.get_account(OWNER).await.unwrap().unwrap().used_bytes, 0);
}

#[tokio::test]
async fn test_purge_drops_only_old_claims() {
    let (_dir, store) = store().await;
    let now = OffsetDateTime::now_utc();
    let long_ago = now - Duration::days(30);
    let stale = long_ago - Duration::minutes(10);

    // Completed long ago, completed just now, and abandoned long ago.
    for (upload_id, cid, at) in [("old", "sha256-01", long_ago), ("new", "sha256-02", now)] {
        store.claim_finalize(upload_id, OWNER, at, stale).await.unwrap();
        store
            .complete_finalize(upload_id, &file(OWNER, cid, 0, None), 0, at)
            .await
            .unwrap();
    }
    store
        .claim_finalize("abandoned", OWNER, long_ago, stale)
        .await
        .unwrap();
    store.claim_finalize("running", OWNER, now, stale).await.unwrap();

    let purged = store
        .purge_finalize_claims(now - Duration::days(7))
        .await
        .unwrap();
    assert_eq!(purged, 2);
    assert!(store.get_finalize_claim("old").await.unwrap().is_none());
    assert!(store.get_finalize_claim("abandoned").await.unwrap().is_none());
    assert!(store.get_finalize_claim("new").await.unwrap().unwrap().is_completed());
    assert!(store.get_finalize_claim("running").await.unwrap().is_some());

    // The file records are untouched.
    assert!(store.get_file_by_cid("sha256-01").await.unwrap().is_some());
}
