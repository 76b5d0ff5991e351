//! Common test utilities.
//!
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.

#[allow(dead_code)]
pub mod mocks;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use pinbox_core::config::AppConfig;
use pinbox_metadata::MetadataStore;
use pinbox_server::{AppState, create_router};
use pinbox_storage::ContentStore;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const WALLET: &str = "0xa11ce";
pub const OTHER_WALLET: &str = "0xb0b";

const BOUNDARY: &str = "pinbox-test-boundary";

/// A router wired over temporary stores.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Build a server from the testing config after applying `tweak`.
    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        Self::with_stores(tweak, |content| content, |metadata| metadata).await
    }

    /// Like `with_config`, with the content and metadata stores passed
    /// through `wrap_content` and `wrap_metadata` before the state is built.
    pub async fn with_stores(
        tweak: impl FnOnce(&mut AppConfig),
        wrap_content: impl FnOnce(Arc<dyn ContentStore>) -> Arc<dyn ContentStore>,
        wrap_metadata: impl FnOnce(Arc<dyn MetadataStore>) -> Arc<dyn MetadataStore>,
    ) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        tweak(&mut config);

        let staging = pinbox_storage::staging_from_config(&config.staging)
            .await
            .expect("Failed to create staging area");
        let content = pinbox_storage::content_from_config(&config.content)
            .await
            .expect("Failed to create content store");
        let metadata = pinbox_metadata::from_config(&config.metadata)
            .await
            .expect("Failed to create metadata store");

        let state = AppState::new(
            config,
            staging,
            wrap_content(content),
            wrap_metadata(metadata),
        );
        let router = create_router(state.clone());
        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request and return status and raw body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    /// Send a request with an optional JSON body and parse the JSON response.
    pub async fn json(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        wallet_header: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(wallet) = wallet_header {
            builder = builder.header("x-wallet-address", wallet);
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        let (status, bytes) = self.send(builder.body(body).unwrap()).await;
        (status, parse_json(&bytes))
    }

    /// POST a multipart form and parse the JSON response.
    pub async fn multipart(&self, uri: &str, parts: &[Part<'_>]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        let (status, bytes) = self.send(request).await;
        (status, parse_json(&bytes))
    }

    /// Stage one chunk.
    pub async fn upload_chunk(
        &self,
        upload_id: &str,
        index: u32,
        total: u32,
        data: &[u8],
    ) -> (StatusCode, Value) {
        let index = index.to_string();
        let total = total.to_string();
        self.multipart(
            "/upload-chunk",
            &[
                Part::file("chunk", "blob", "application/octet-stream", data),
                Part::text("uploadId", upload_id),
                Part::text("chunkIndex", &index),
                Part::text("totalChunks", &total),
                Part::text("fileName", "payload.bin"),
            ],
        )
        .await
    }

    /// Finalize a chunked upload for `wallet`.
    pub async fn finalize(
        &self,
        upload_id: &str,
        file_name: &str,
        total: u32,
        wallet: &str,
    ) -> (StatusCode, Value) {
        self.json(
            "POST",
            "/finalize-upload",
            Some(serde_json::json!({
                "uploadId": upload_id,
                "fileName": file_name,
                "totalChunks": total,
                "walletAddress": wallet,
            })),
            None,
        )
        .await
    }

    /// Upload `data` through the direct multipart endpoint.
    pub async fn direct_upload(
        &self,
        file_name: &str,
        data: &[u8],
        wallet: &str,
        parent_cid: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut parts = vec![
            Part::file("file", file_name, "application/octet-stream", data),
            Part::text("walletAddress", wallet),
        ];
        if let Some(parent) = parent_cid {
            parts.push(Part::text("parentCid", parent));
        }
        self.multipart("/upload", &parts).await
    }

    /// List `wallet`'s records.
    pub async fn list(&self, wallet: &str) -> Vec<Value> {
        let (status, body) = self
            .json("GET", &format!("/upload?walletAddress={wallet}"), None, None)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["files"].as_array().cloned().unwrap_or_default()
    }

    /// Current `/storage/info` figures for `wallet`.
    pub async fn storage_info(&self, wallet: &str) -> Value {
        let (status, body) = self
            .json("GET", "/storage/info", None, Some(wallet))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    /// Download stored bytes.
    pub async fn download(&self, cid: &str, wallet: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .uri(format!("/files/{cid}?walletAddress={wallet}"))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }
}

/// One multipart form field.
#[allow(dead_code)]
pub struct Part<'a> {
    name: &'a str,
    file_name: Option<&'a str>,
    content_type: Option<&'a str>,
    data: &'a [u8],
}

#[allow(dead_code)]
impl<'a> Part<'a> {
    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            file_name: None,
            content_type: None,
            data: value.as_bytes(),
        }
    }

    pub fn file(name: &'a str, file_name: &'a str, content_type: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            file_name: Some(file_name),
            content_type: Some(content_type),
            data,
        }
    }
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    part.name, file_name
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name).as_bytes(),
            ),
        }
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn parse_json(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(bytes).unwrap_or(Value::Null)
    }
}

/// Deterministic test payload.
#[allow(dead_code)]
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Find a listed record by name.
#[allow(dead_code)]
pub fn find<'a>(files: &'a [Value], name: &str) -> Option<&'a Value> {
    files.iter().find(|f| f["name"] == name)
}
