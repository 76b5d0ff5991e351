//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult, to_db_bytes};
use crate::repos::{AccountRepo, FileRepo, FinalizeRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FileRepo + AccountRepo + FinalizeRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) a SQLite store and run migrations.
    pub async fn new(path: impl AsRef<Path>, busy_timeout: Duration) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(busy_timeout);

        // A single connection serializes writers; counters rely on it together
        // with their single-statement updates.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "metadata store opened");
        Ok(store)
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Descendants of a record (inclusive) with their depth.
const SUBTREE_CTE: &str = r#"
WITH RECURSIVE subtree(file_id, depth) AS (
    SELECT file_id, 0 FROM files WHERE file_id = ?
    UNION
    SELECT f.file_id, s.depth + 1 FROM files f JOIN subtree s ON f.parent_id = s.file_id
)
"#;

async fn insert_file(
    conn: &mut SqliteConnection,
    file: &crate::models::FileRow,
) -> MetadataResult<()> {
    sqlx::query(
        r#"
        INSERT INTO files (
            file_id, cid, name, size, mime_type, owner, is_folder,
            parent_id, folder_path, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(file.file_id)
    .bind(&file.cid)
    .bind(&file.name)
    .bind(&file.size)
    .bind(&file.mime_type)
    .bind(&file.owner)
    .bind(file.is_folder)
    .bind(file.parent_id)
    .bind(&file.folder_path)
    .bind(file.created_at)
    .bind(file.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| MetadataError::from_insert(e, format!("cid {}", file.cid)))?;
    Ok(())
}

/// Move `charge` bytes from reserved to used.
async fn commit_reservation(
    conn: &mut SqliteConnection,
    owner: &str,
    charge: u64,
    now: time::OffsetDateTime,
) -> MetadataResult<()> {
    if charge == 0 {
        return Ok(());
    }
    let charge = to_db_bytes(charge)?;
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET used_bytes = used_bytes + ?,
            reserved_bytes = MAX(reserved_bytes - ?, 0),
            updated_at = ?
        WHERE identity = ?
        "#,
    )
    .bind(charge)
    .bind(charge)
    .bind(now)
    .bind(owner)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(MetadataError::Constraint(format!(
            "no account holds a reservation for {owner}"
        )));
    }
    Ok(())
}

/// Upsert the account and add `delta` to used bytes, clamped at zero.
async fn apply_used_delta(
    conn: &mut SqliteConnection,
    identity: &str,
    delta: i64,
    now: time::OffsetDateTime,
) -> MetadataResult<u64> {
    let used: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO accounts (identity, used_bytes, purchased_bytes, reserved_bytes, created_at, updated_at)
        VALUES (?, MAX(?, 0), 0, 0, ?, ?)
        ON CONFLICT(identity) DO UPDATE SET
            used_bytes = MAX(accounts.used_bytes + ?, 0),
            updated_at = excluded.updated_at
        RETURNING used_bytes
        "#,
    )
    .bind(identity)
    .bind(delta)
    .bind(now)
    .bind(now)
    .bind(delta)
    .fetch_one(&mut *conn)
    .await?;
    Ok(used.max(0) as u64)
}

/// Total size and non-folder count of `(size, is_folder)` rows.
fn sum_usage(rows: &[(String, bool)]) -> MetadataResult<(u64, u64)> {
    let mut total: u64 = 0;
    let mut files: u64 = 0;
    for (size, is_folder) in rows {
        total = total.saturating_add(pinbox_core::parse_size(size)?);
        if !is_folder {
            files += 1;
        }
    }
    Ok((total, files))
}

// Implement the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use pinbox_core::file::join_path;
    use pinbox_core::parse_size;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn create_file(&self, file: &FileRow) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            insert_file(&mut tx, file).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn create_files_charged(
            &self,
            files: &[FileRow],
            owner: &str,
            charge: u64,
            now: OffsetDateTime,
        ) -> MetadataResult<()> {
            // All records and the charge succeed or fail together
            let mut tx = self.pool.begin().await?;
            for file in files {
                insert_file(&mut tx, file).await?;
            }
            commit_reservation(&mut tx, owner, charge, now).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn get_file_by_cid(&self, cid: &str) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE cid = ?")
                .bind(cid)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_files(&self, owner: &str) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE owner = ? ORDER BY created_at DESC, cid",
            )
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_children(&self, parent_id: Uuid) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE parent_id = ? ORDER BY is_folder DESC, name",
            )
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_tree(
            &self,
            cid: &str,
            owner: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<DeletedTree> {
            let mut tx = self.pool.begin().await?;

            let root: Option<(Uuid,)> =
                sqlx::query_as("SELECT file_id FROM files WHERE cid = ? AND owner = ?")
                    .bind(cid)
                    .bind(owner)
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some((root_id,)) = root else {
                return Err(MetadataError::NotFound(format!("cid {cid}")));
            };

            let members: Vec<(String, String)> = sqlx::query_as(&format!(
                "{SUBTREE_CTE} SELECT f.cid, f.size FROM files f \
                 JOIN subtree s ON f.file_id = s.file_id ORDER BY s.depth, f.cid"
            ))
            .bind(root_id)
            .fetch_all(&mut *tx)
            .await?;

            let mut freed_bytes: u64 = 0;
            for (_, size) in &members {
                freed_bytes = freed_bytes.checked_add(parse_size(size)?).ok_or_else(|| {
                    MetadataError::Constraint("subtree size overflows u64".to_string())
                })?;
            }

            let deleted = sqlx::query(&format!(
                "{SUBTREE_CTE} DELETE FROM files WHERE file_id IN (SELECT file_id FROM subtree)"
            ))
            .bind(root_id)
            .execute(&mut *tx)
            .await?;

            if deleted.rows_affected() != members.len() as u64 {
                return Err(MetadataError::Internal(format!(
                    "deleted {} records, expected {}",
                    deleted.rows_affected(),
                    members.len()
                )));
            }

            // One ledger update for the whole subtree
            let used_after =
                apply_used_delta(&mut tx, owner, -to_db_bytes(freed_bytes)?, now).await?;

            tx.commit().await?;

            Ok(DeletedTree {
                removed_cids: members.into_iter().map(|(cid, _)| cid).collect(),
                freed_bytes,
                used_after,
            })
        }

        async fn update_file_meta(
            &self,
            cid: &str,
            owner: &str,
            patch: &FilePatch,
            now: OffsetDateTime,
        ) -> MetadataResult<FileRow> {
            let mut tx = self.pool.begin().await?;

            let existing = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE cid = ? AND owner = ?",
            )
            .bind(cid)
            .bind(owner)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("cid {cid}")))?;

            sqlx::query(
                r#"
                UPDATE files
                SET name = COALESCE(?, name),
                    mime_type = COALESCE(?, mime_type),
                    updated_at = ?
                WHERE file_id = ?
                "#,
            )
            .bind(patch.name.as_deref())
            .bind(patch.mime_type.as_deref())
            .bind(now)
            .bind(existing.file_id)
            .execute(&mut *tx)
            .await?;

            if existing.is_folder
                && let Some(new_name) = patch.name.as_deref()
                && new_name != existing.name
            {
                let old_prefix = join_path(&existing.folder_path, &existing.name);
                let new_prefix = join_path(&existing.folder_path, new_name);
                let tail_start = old_prefix.chars().count() as i64 + 1;

                sqlx::query(&format!(
                    "{SUBTREE_CTE} UPDATE files SET folder_path = ? || substr(folder_path, ?), \
                     updated_at = ? \
                     WHERE file_id IN (SELECT file_id FROM subtree WHERE depth > 0)"
                ))
                .bind(existing.file_id)
                .bind(&new_prefix)
                .bind(tail_start)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            let updated = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE file_id = ?")
                .bind(existing.file_id)
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(updated)
        }

        async fn owner_usage(&self, owner: &str) -> MetadataResult<(u64, u64)> {
            let rows: Vec<(String, bool)> =
                sqlx::query_as("SELECT size, is_folder FROM files WHERE owner = ?")
                    .bind(owner)
                    .fetch_all(&self.pool)
                    .await?;

            sum_usage(&rows)
        }
    }

    #[async_trait]
    impl AccountRepo for SqliteStore {
        async fn ensure_account(
            &self,
            identity: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<AccountRow> {
            sqlx::query(
                r#"
                INSERT INTO accounts (identity, used_bytes, purchased_bytes, reserved_bytes, created_at, updated_at)
                VALUES (?, 0, 0, 0, ?, ?)
                ON CONFLICT(identity) DO NOTHING
                "#,
            )
            .bind(identity)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE identity = ?")
                .bind(identity)
                .fetch_one(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_account(&self, identity: &str) -> MetadataResult<Option<AccountRow>> {
            let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE identity = ?")
                .bind(identity)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn apply_delta(
            &self,
            identity: &str,
            delta: i64,
            now: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let mut conn = self.pool.acquire().await?;
            apply_used_delta(&mut conn, identity, delta, now).await
        }

        async fn recompute_used(
            &self,
            identity: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<UsageRecount> {
            let mut tx = self.pool.begin().await?;

            let rows: Vec<(String, bool)> =
                sqlx::query_as("SELECT size, is_folder FROM files WHERE owner = ?")
                    .bind(identity)
                    .fetch_all(&mut *tx)
                    .await?;
            let (used, files) = sum_usage(&rows)?;

            let previous: Option<i64> =
                sqlx::query_scalar("SELECT used_bytes FROM accounts WHERE identity = ?")
                    .bind(identity)
                    .fetch_optional(&mut *tx)
                    .await?;

            sqlx::query(
                r#"
                INSERT INTO accounts (identity, used_bytes, purchased_bytes, reserved_bytes, last_checked_at, created_at, updated_at)
                VALUES (?, ?, 0, 0, ?, ?, ?)
                ON CONFLICT(identity) DO UPDATE SET
                    used_bytes = excluded.used_bytes,
                    last_checked_at = excluded.last_checked_at,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(identity)
            .bind(to_db_bytes(used)?)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            Ok(UsageRecount {
                previous: previous.unwrap_or(0).max(0) as u64,
                used,
                files,
            })
        }

        async fn reserve(
            &self,
            identity: &str,
            bytes: u64,
            free_tier_bytes: u64,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            self.ensure_account(identity, now).await?;

            let bytes = to_db_bytes(bytes)?;
            let result = sqlx::query(
                r#"
                UPDATE accounts
                SET reserved_bytes = reserved_bytes + ?, updated_at = ?
                WHERE identity = ?
                  AND used_bytes + reserved_bytes + ? <= ? + purchased_bytes
                "#,
            )
            .bind(bytes)
            .bind(now)
            .bind(identity)
            .bind(bytes)
            .bind(to_db_bytes(free_tier_bytes)?)
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected() == 1)
        }

        async fn release(
            &self,
            identity: &str,
            bytes: u64,
            now: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE accounts SET reserved_bytes = MAX(reserved_bytes - ?, 0), updated_at = ? WHERE identity = ?",
            )
            .bind(to_db_bytes(bytes)?)
            .bind(now)
            .bind(identity)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn record_purchase(&self, purchase: &PurchaseRow) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO purchases (transaction_hash, identity, bytes, created_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(transaction_hash) DO NOTHING
                "#,
            )
            .bind(&purchase.transaction_hash)
            .bind(&purchase.identity)
            .bind(purchase.bytes)
            .bind(purchase.created_at)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                return Ok(false);
            }

            sqlx::query(
                r#"
                INSERT INTO accounts (identity, used_bytes, purchased_bytes, reserved_bytes, created_at, updated_at)
                VALUES (?, 0, ?, 0, ?, ?)
                ON CONFLICT(identity) DO UPDATE SET
                    purchased_bytes = accounts.purchased_bytes + excluded.purchased_bytes,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&purchase.identity)
            .bind(purchase.bytes)
            .bind(purchase.created_at)
            .bind(purchase.created_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(true)
        }
    }

    #[async_trait]
    impl FinalizeRepo for SqliteStore {
        async fn claim_finalize(
            &self,
            upload_id: &str,
            owner: &str,
            now: OffsetDateTime,
            stale_before: OffsetDateTime,
        ) -> MetadataResult<ClaimOutcome> {
            let mut tx = self.pool.begin().await?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO finalize_claims (upload_id, owner, state, claimed_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(upload_id) DO NOTHING
                "#,
            )
            .bind(upload_id)
            .bind(owner)
            .bind(CLAIM_STATE_CLAIMED)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 1 {
                tx.commit().await?;
                return Ok(ClaimOutcome::Claimed);
            }

            let existing = sqlx::query_as::<_, FinalizeClaimRow>(
                "SELECT * FROM finalize_claims WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_one(&mut *tx)
            .await?;

            if existing.is_completed() {
                return Ok(ClaimOutcome::Completed(existing));
            }

            if existing.claimed_at < stale_before {
                let taken = sqlx::query(
                    r#"
                    UPDATE finalize_claims SET owner = ?, claimed_at = ?
                    WHERE upload_id = ? AND state = ?
                    "#,
                )
                .bind(owner)
                .bind(now)
                .bind(upload_id)
                .bind(CLAIM_STATE_CLAIMED)
                .execute(&mut *tx)
                .await?;

                if taken.rows_affected() == 1 {
                    tx.commit().await?;
                    tracing::warn!(upload_id, "took over stale finalize claim");
                    return Ok(ClaimOutcome::Claimed);
                }
            }

            Ok(ClaimOutcome::InProgress)
        }

        async fn complete_finalize(
            &self,
            upload_id: &str,
            file: &FileRow,
            charge: u64,
            now: OffsetDateTime,
        ) -> MetadataResult<()> {
            let size = to_db_bytes(parse_size(&file.size)?)?;
            let mut tx = self.pool.begin().await?;

            insert_file(&mut tx, file).await?;
            commit_reservation(&mut tx, &file.owner, charge, now).await?;

            let completed = sqlx::query(
                r#"
                UPDATE finalize_claims
                SET state = ?, cid = ?, name = ?, size = ?, completed_at = ?
                WHERE upload_id = ? AND state = ?
                "#,
            )
            .bind(CLAIM_STATE_COMPLETED)
            .bind(&file.cid)
            .bind(&file.name)
            .bind(size)
            .bind(now)
            .bind(upload_id)
            .bind(CLAIM_STATE_CLAIMED)
            .execute(&mut *tx)
            .await?;

            if completed.rows_affected() == 0 {
                return Err(MetadataError::Constraint(format!(
                    "finalize claim for upload {upload_id} is no longer held"
                )));
            }

            tx.commit().await?;
            Ok(())
        }

        async fn release_finalize(&self, upload_id: &str) -> MetadataResult<()> {
            sqlx::query("DELETE FROM finalize_claims WHERE upload_id = ? AND state = ?")
                .bind(upload_id)
                .bind(CLAIM_STATE_CLAIMED)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn get_finalize_claim(
            &self,
            upload_id: &str,
        ) -> MetadataResult<Option<FinalizeClaimRow>> {
            let row = sqlx::query_as::<_, FinalizeClaimRow>(
                "SELECT * FROM finalize_claims WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn purge_finalize_claims(&self, before: OffsetDateTime) -> MetadataResult<u64> {
            let result = sqlx::query(
                r#"
                DELETE FROM finalize_claims
                WHERE (state = ? AND completed_at < ?)
                   OR (state = ? AND claimed_at < ?)
                "#,
            )
            .bind(CLAIM_STATE_COMPLETED)
            .bind(before)
            .bind(CLAIM_STATE_CLAIMED)
            .bind(before)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Files and folders
CREATE TABLE IF NOT EXISTS files (
    file_id BLOB PRIMARY KEY,
    cid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    -- Decimal string; parsed to an unsigned integer for arithmetic
    size TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    owner TEXT NOT NULL,
    is_folder INTEGER NOT NULL DEFAULT 0,
    -- Deferred so a whole subtree can be removed in one statement
    parent_id BLOB REFERENCES files(file_id) DEFERRABLE INITIALLY DEFERRED,
    folder_path TEXT NOT NULL DEFAULT '/',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner, created_at);
CREATE INDEX IF NOT EXISTS idx_files_parent ON files(parent_id);

-- Quota accounts
CREATE TABLE IF NOT EXISTS accounts (
    identity TEXT PRIMARY KEY,
    used_bytes INTEGER NOT NULL DEFAULT 0,
    purchased_bytes INTEGER NOT NULL DEFAULT 0,
    reserved_bytes INTEGER NOT NULL DEFAULT 0,
    last_checked_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Purchases (credited once per transaction hash)
CREATE TABLE IF NOT EXISTS purchases (
    transaction_hash TEXT PRIMARY KEY,
    identity TEXT NOT NULL,
    bytes INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_purchases_identity ON purchases(identity);

-- Finalize claims
CREATE TABLE IF NOT EXISTS finalize_claims (
    upload_id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'claimed',
    cid TEXT,
    name TEXT,
    size INTEGER,
    claimed_at TEXT NOT NULL,
    completed_at TEXT
);
"#;
