//! Stored file and folder identifiers, sizes, and listing entries.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Prefix of generated folder identifiers.
pub const FOLDER_CID_PREFIX: &str = "folder-";

/// MIME type used when the client does not declare one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// MIME type recorded on folder entries.
pub const FOLDER_MIME_TYPE: &str = "inode/directory";

/// Root folder path.
pub const ROOT_PATH: &str = "/";

const MAX_CID_LEN: usize = 256;

/// Globally unique content identifier.
///
/// Either issued by the content store for stored bytes or generated for
/// folders. Externally issued identifiers are accepted as opaque strings.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// Parse an identifier received from a client or the content store.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.len() > MAX_CID_LEN {
            return Err(crate::Error::InvalidContentId(format!(
                "content id must be 1..={MAX_CID_LEN} characters"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(crate::Error::InvalidContentId(format!(
                "content id contains unsupported characters: {s}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Identifier for content addressed by its SHA-256 digest.
    pub fn from_hash(hash: &ContentHash) -> Self {
        Self(format!("sha256-{}", hash.to_hex()))
    }

    /// Generate a fresh folder identifier.
    pub fn new_folder() -> Self {
        Self(format!("{FOLDER_CID_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    pub fn is_folder(&self) -> bool {
        self.0.starts_with(FOLDER_CID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentId {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentId> for String {
    fn from(value: ContentId) -> Self {
        value.0
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a decimal byte size as stored in the metadata tree.
pub fn parse_size(raw: &str) -> crate::Result<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(crate::Error::SizeParse("size is empty".to_string()));
    }
    trimmed
        .parse::<u64>()
        .map_err(|_| crate::Error::SizeParse(format!("'{trimmed}' is not a byte count")))
}

/// Render a byte count for display, e.g. `1.50 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Join a parent path and a child name into a materialized folder path.
pub fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    format!("{parent}/{}", name.trim_matches('/'))
}

/// Best-effort MIME type from a file name's extension.
pub fn mime_from_name(name: &str) -> &'static str {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return DEFAULT_MIME_TYPE;
    };
    match ext.to_ascii_lowercase().as_str() {
        "txt" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => DEFAULT_MIME_TYPE,
    }
}

/// One entry of a listing response.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Internal record id, referenced by children's `parent_folder`.
    pub id: String,
    pub cid: String,
    pub name: String,
    /// Decimal byte count.
    pub size: String,
    pub formatted_size: String,
    pub mime_type: String,
    pub wallet_address: String,
    pub is_folder: bool,
    pub parent_folder: Option<String>,
    pub folder_path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
