//! Upload session types and staging layout.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum upload id length.
const MAX_UPLOAD_ID_LEN: usize = 128;

/// Staging key prefix shared by every upload session.
pub const STAGING_PREFIX: &str = "uploads";

/// Opaque client-chosen identifier for an upload session.
///
/// Restricted to `[A-Za-z0-9_-]` because it becomes part of a staging key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UploadId(String);

impl UploadId {
    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() || s.len() > MAX_UPLOAD_ID_LEN {
            return Err(crate::Error::InvalidUploadId(format!(
                "upload id must be 1..={MAX_UPLOAD_ID_LEN} characters"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(crate::Error::InvalidUploadId(format!(
                "upload id contains unsupported characters: {s}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Staging prefix holding every object of this session (with trailing slash).
    pub fn staging_prefix(&self) -> String {
        format!("{STAGING_PREFIX}/{}/", self.0)
    }

    /// Staging key for one chunk.
    pub fn chunk_key(&self, index: u32) -> String {
        format!("{STAGING_PREFIX}/{}/chunk-{index:08}", self.0)
    }

    /// Staging key for the reassembled artifact.
    pub fn assembled_key(&self) -> String {
        format!("{STAGING_PREFIX}/{}/assembled", self.0)
    }

    /// Staging key holding the chunk count the session was started with.
    pub fn manifest_key(&self) -> String {
        format!("{STAGING_PREFIX}/{}/manifest", self.0)
    }

    /// Chunk index encoded in one of this session's chunk keys.
    pub fn chunk_index(&self, key: &str) -> Option<u32> {
        key.strip_prefix(&self.staging_prefix())?
            .strip_prefix("chunk-")?
            .parse()
            .ok()
    }

    /// Session owning a staging key, if the key lies in a session prefix.
    pub fn from_staging_key(key: &str) -> Option<Self> {
        let (session, _) = key
            .strip_prefix(STAGING_PREFIX)?
            .strip_prefix('/')?
            .split_once('/')?;
        Self::parse(session).ok()
    }
}

impl TryFrom<String> for UploadId {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UploadId> for String {
    fn from(value: UploadId) -> Self {
        value.0
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check that a chunk position is inside `[0, total)`.
pub fn validate_chunk_position(index: u32, total: u32) -> crate::Result<()> {
    if total == 0 || index >= total {
        return Err(crate::Error::InvalidChunkIndex { index, total });
    }
    Ok(())
}

/// Acknowledgement returned for an ingested chunk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkAck {
    pub success: bool,
    pub message: String,
}

impl ChunkAck {
    pub fn stored(upload_id: &UploadId, index: u32, total: u32) -> Self {
        Self {
            success: true,
            message: format!(
                "chunk {} of {} stored for upload {}",
                index + 1,
                total,
                upload_id
            ),
        }
    }
}

/// Request to finalize a chunked upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadRequest {
    pub upload_id: Option<String>,
    pub file_name: Option<String>,
    pub total_chunks: Option<u32>,
    pub wallet_address: Option<String>,
    /// Declared MIME type; defaults to `application/octet-stream`.
    #[serde(default)]
    pub file_type: Option<String>,
}

/// Response from a successful finalize.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalizeUploadResponse {
    pub success: bool,
    pub cid: String,
    pub name: String,
    pub size: u64,
}
