use pinbox_metadata::SqliteStore;
use pinbox_metadata::models::FileRow;
use std::time::Duration;
use tempfile::TempDir;
use time::OffsetDateTime;
use uuid::Uuid;

/// Fresh store in a temp directory. Keep the `TempDir` alive for the test.
pub async fn store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::new(dir.path().join("metadata.db"), Duration::from_secs(5))
        .await
        .unwrap();
    (dir, store)
}

pub fn file(owner: &str, cid: &str, size: u64, parent: Option<&FileRow>) -> FileRow {
    record(owner, cid, size, false, parent)
}

#[allow(dead_code)]
pub fn folder(owner: &str, cid: &str, parent: Option<&FileRow>) -> FileRow {
    record(owner, cid, 0, true, parent)
}

fn record(owner: &str, cid: &str, size: u64, is_folder: bool, parent: Option<&FileRow>) -> FileRow {
    let now = OffsetDateTime::now_utc();
    let folder_path = match parent {
        Some(p) => pinbox_core::file::join_path(&p.folder_path, &p.name),
        None => "/".to_string(),
    };
    FileRow {
        file_id: Uuid::new_v4(),
        cid: cid.to_string(),
        name: format!("{cid}-name"),
        size: size.to_string(),
        mime_type: if is_folder {
            "inode/directory".to_string()
        } else {
            "application/octet-stream".to_string()
        },
        owner: owner.to_string(),
        is_folder,
        parent_id: parent.map(|p| p.file_id),
        folder_path,
        created_at: now,
        updated_at: now,
    }
}
