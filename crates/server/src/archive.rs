//! Archive expansion for direct uploads.
//!
//! An expander turns an uploaded archive into a list of file entries, each
//! keyed by its relative directory path inside the archive. Storing the
//! entries and recording the folder hierarchy is left to the file tree.

use crate::error::ApiError;
use async_trait::async_trait;
use bytes::Bytes;
use pinbox_core::config::{ArchiveConfig, ArchiveMode};
use std::io::{Cursor, Read};
use std::path::Component;
use std::sync::Arc;
use zip::ZipArchive;

/// Errors raised while expanding an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("invalid archive: {0}")]
    Invalid(String),

    #[error("archive has more than {0} entries")]
    TooManyEntries(usize),

    #[error("archive entry {name} exceeds {limit} bytes")]
    EntryTooLarge { name: String, limit: u64 },

    #[error("archive expands beyond {0} bytes")]
    TooLarge(u64),

    #[error("archive entry has an unsafe path: {0}")]
    UnsafePath(String),
}

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

/// One extracted file.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Path components relative to the archive root; the last one is the
    /// file name.
    pub path: Vec<String>,
    pub data: Bytes,
}

impl ArchiveEntry {
    pub fn file_name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Directory components leading to the file.
    pub fn dirs(&self) -> &[String] {
        &self.path[..self.path.len().saturating_sub(1)]
    }
}

/// Pluggable archive expansion.
#[async_trait]
pub trait ArchiveExpander: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether an upload should be expanded rather than stored as-is.
    fn can_expand(&self, file_name: &str, mime_type: Option<&str>) -> bool;

    /// Extract every file entry. The combined size may not exceed `max_total`.
    async fn expand(&self, data: Bytes, max_total: u64) -> Result<Vec<ArchiveEntry>, ArchiveError>;
}

/// Build the configured expander.
pub fn expander_from_config(config: &ArchiveConfig) -> Arc<dyn ArchiveExpander> {
    match config.mode {
        ArchiveMode::Zip => Arc::new(ZipExpander::new(config.max_entries, config.max_entry_bytes)),
        ArchiveMode::Disabled => Arc::new(DisabledExpander),
    }
}

/// Zip extraction with bounded entry count and entry size.
pub struct ZipExpander {
    max_entries: usize,
    max_entry_bytes: u64,
}

impl ZipExpander {
    pub fn new(max_entries: usize, max_entry_bytes: u64) -> Self {
        Self {
            max_entries,
            max_entry_bytes,
        }
    }

    fn extract(
        data: Bytes,
        max_entries: usize,
        max_entry_bytes: u64,
        max_total: u64,
    ) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let mut archive =
            ZipArchive::new(Cursor::new(data)).map_err(|e| ArchiveError::Invalid(e.to_string()))?;

        let mut entries = Vec::new();
        let mut total: u64 = 0;
        for index in 0..archive.len() {
            let mut file = archive
                .by_index(index)
                .map_err(|e| ArchiveError::Invalid(e.to_string()))?;
            if file.is_dir() {
                continue;
            }

            let raw_name = file.name().to_string();
            let path = safe_components(&raw_name, file.enclosed_name())?;
            // Resource forks added by macOS archivers.
            if path.first().is_some_and(|first| first == "__MACOSX") {
                continue;
            }

            if entries.len() == max_entries {
                return Err(ArchiveError::TooManyEntries(max_entries));
            }

            let mut buffer = Vec::new();
            (&mut file)
                .take(max_entry_bytes + 1)
                .read_to_end(&mut buffer)
                .map_err(|e| ArchiveError::Invalid(format!("{raw_name}: {e}")))?;
            let size = buffer.len() as u64;
            if size > max_entry_bytes {
                return Err(ArchiveError::EntryTooLarge {
                    name: raw_name,
                    limit: max_entry_bytes,
                });
            }
            total += size;
            if total > max_total {
                return Err(ArchiveError::TooLarge(max_total));
            }

            entries.push(ArchiveEntry {
                path,
                data: Bytes::from(buffer),
            });
        }
        Ok(entries)
    }
}

/// Keep the normal components of an entry path, rejecting anything that
/// escapes the archive root.
fn safe_components(
    raw_name: &str,
    enclosed: Option<std::path::PathBuf>,
) -> Result<Vec<String>, ArchiveError> {
    let enclosed = enclosed.ok_or_else(|| ArchiveError::UnsafePath(raw_name.to_string()))?;
    let mut path = Vec::new();
    for component in enclosed.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| ArchiveError::UnsafePath(raw_name.to_string()))?;
                path.push(part.to_string());
            }
            Component::CurDir => {}
            _ => return Err(ArchiveError::UnsafePath(raw_name.to_string())),
        }
    }
    if path.is_empty() {
        return Err(ArchiveError::UnsafePath(raw_name.to_string()));
    }
    Ok(path)
}

#[async_trait]
impl ArchiveExpander for ZipExpander {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn can_expand(&self, file_name: &str, mime_type: Option<&str>) -> bool {
        let by_name = file_name
            .rsplit_once('.')
            .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("zip"));
        let by_mime = matches!(
            mime_type,
            Some("application/zip" | "application/x-zip-compressed")
        );
        by_name || by_mime
    }

    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    async fn expand(&self, data: Bytes, max_total: u64) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let max_entries = self.max_entries;
        let max_entry_bytes = self.max_entry_bytes;
        let entries = tokio::task::spawn_blocking(move || {
            Self::extract(data, max_entries, max_entry_bytes, max_total)
        })
        .await
        .map_err(|e| ArchiveError::Invalid(format!("extraction task failed: {e}")))??;
        tracing::debug!(entries = entries.len(), "archive expanded");
        Ok(entries)
    }
}

/// Stores every upload as a plain file.
pub struct DisabledExpander;

#[async_trait]
impl ArchiveExpander for DisabledExpander {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn can_expand(&self, _file_name: &str, _mime_type: Option<&str>) -> bool {
        false
    }

    async fn expand(&self, _data: Bytes, _max_total: u64) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        Err(ArchiveError::Invalid(
            "archive expansion is disabled".to_string(),
        ))
    }
}
