//! Behaviour when a backing store fails.

mod common;

use axum::http::StatusCode;
use common::mocks::{FailingWriteContent, UnavailableMetadata};
use common::{TestServer, WALLET};
use pinbox_core::UploadId;
use pinbox_metadata::MetadataStore;
use std::sync::Arc;

#[tokio::test]
async fn test_storage_info_falls_back_to_estimate() {
    let server = TestServer::with_stores(
        |_| {},
        |content| content,
        |_| Arc::new(UnavailableMetadata) as Arc<dyn MetadataStore>,
    )
    .await;
    let free_tier = server.state.config.quota.free_tier_bytes;

    let info = server.storage_info(WALLET).await;
    assert_eq!(info["success"], true);
    assert_eq!(info["estimated"], true);
    assert_eq!(info["totalStorageUsed"], 0);
    assert_eq!(info["totalAvailableStorage"], free_tier);
    assert_eq!(info["remainingStorage"], free_tier);
    assert_eq!(info["filesCount"], 0);

    // Operations that need the figures still fail.
    let (status, body) = server
        .json("GET", &format!("/upload?walletAddress={WALLET}"), None, None)
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "metadata_error");
}

#[tokio::test]
async fn test_finalize_surfaces_content_store_failure() {
    let server =
        TestServer::with_stores(|_| {}, FailingWriteContent::wrap, |metadata| metadata).await;

    server.upload_chunk("doomed", 0, 2, b"first half ").await;
    server.upload_chunk("doomed", 1, 2, b"second half").await;

    let (status, body) = server.finalize("doomed", "doomed.txt", 2, WALLET).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY, "{body}");
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "upstream_storage_error");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("disk quota exceeded"),
        "{body}"
    );

    // Staging is gone and the claim released.
    let upload_id = UploadId::parse("doomed").unwrap();
    let staging = &server.state.staging;
    assert_eq!(staging.declared_total(&upload_id).await.unwrap(), None);
    assert_eq!(
        staging.first_missing_chunk(&upload_id, 2).await.unwrap(),
        Some(0)
    );
    assert!(
        server
            .state
            .metadata
            .get_finalize_claim("doomed")
            .await
            .unwrap()
            .is_none()
    );

    // No bytes stay reserved and nothing was recorded.
    let account = server
        .state
        .metadata
        .get_account(WALLET)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.reserved_bytes, 0);
    assert_eq!(account.used_bytes, 0);
    assert!(server.list(WALLET).await.is_empty());

    // A retry reports the missing chunks instead of the old failure.
    let (status, body) = server.finalize("doomed", "doomed.txt", 2, WALLET).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(body["code"], "incomplete_upload");
}

#[tokio::test]
async fn test_direct_upload_surfaces_content_store_failure() {
    let server =
        TestServer::with_stores(|_| {}, FailingWriteContent::wrap, |metadata| metadata).await;

    let (status, body) = server
        .direct_upload("notes.txt", b"some notes", WALLET, None)
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY, "{body}");
    assert_eq!(body["code"], "upstream_storage_error");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("disk quota exceeded")
    );

    let account = server
        .state
        .metadata
        .get_account(WALLET)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.reserved_bytes, 0);
    assert!(server.list(WALLET).await.is_empty());
}
