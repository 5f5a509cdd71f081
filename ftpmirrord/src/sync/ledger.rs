use std::fs;
use std::path::{Path, PathBuf};

use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;
use time::OffsetDateTime;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("scope row missing after upsert")]
    MissingScope,
}

/// What the ledger knows about one (scope, relative path) key, compared
/// against the currently observed file metadata. `exists == false` leaves
/// every other field at its default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStatus {
    pub exists: bool,
    pub processed: bool,
    pub size_changed: bool,
    pub mod_time_changed: bool,
    pub retry_count: i64,
}

/// Persisted transfer state, keyed by scope and relative path. Owns all
/// idempotency and retry bookkeeping; rows are updated in place and never
/// deleted, so a vanished source file leaves a stale record behind.
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(db_path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let ledger = Self { pool };
        ledger.init().await?;
        Ok(ledger)
    }

    pub async fn open_default() -> Result<Self, LedgerError> {
        Self::open(&default_db_path()?).await
    }

    pub async fn init(&self) -> Result<(), LedgerError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Returns the stable id for a (source folder, target folder) mapping,
    /// creating the scope row on first use. The insert races through the
    /// uniqueness constraint, so concurrent callers observe one id.
    pub async fn resolve_or_create_scope(
        &self,
        source_folder: &str,
        target_folder: &str,
    ) -> Result<i64, LedgerError> {
        sqlx::query(
            "INSERT INTO scopes (source_folder, target_folder, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(source_folder, target_folder) DO NOTHING",
        )
        .bind(source_folder)
        .bind(target_folder)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id FROM scopes WHERE source_folder = ?1 AND target_folder = ?2",
        )
        .bind(source_folder)
        .bind(target_folder)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(LedgerError::MissingScope)?
            .try_get("id")
            .map_err(LedgerError::from)
    }

    /// Read-only: compares the stored record against the observed size and
    /// modification time (UTC unix seconds). Never mutates.
    pub async fn file_status(
        &self,
        scope_id: i64,
        rel_path: &str,
        file_size: i64,
        last_modified: i64,
    ) -> Result<FileStatus, LedgerError> {
        let row = sqlx::query(
            "SELECT file_size, last_modified, processed, retry_count
             FROM file_records WHERE scope_id = ?1 AND rel_path = ?2",
        )
        .bind(scope_id)
        .bind(rel_path)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(FileStatus::default());
        };

        let stored_size: i64 = row.try_get("file_size")?;
        let stored_modified: i64 = row.try_get("last_modified")?;
        let processed: i64 = row.try_get("processed")?;

        Ok(FileStatus {
            exists: true,
            processed: processed != 0,
            size_changed: stored_size != file_size,
            mod_time_changed: stored_modified != last_modified,
            retry_count: row.try_get("retry_count")?,
        })
    }

    /// Records the outcome of one transfer attempt in a single upsert.
    /// Size and modification time are always refreshed to the observed
    /// values. The retry count becomes 0 after a success, 1 on a failure
    /// following a size/modtime change (or first observation), and grows
    /// by one on a repeated failure of an unchanged file.
    pub async fn record_outcome(
        &self,
        scope_id: i64,
        rel_path: &str,
        file_size: i64,
        last_modified: i64,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO file_records (
                scope_id, rel_path, file_size, last_modified,
                processed, retry_count, last_error, updated_at
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(scope_id, rel_path) DO UPDATE SET
                retry_count = CASE
                    WHEN excluded.processed = 1 THEN 0
                    WHEN file_records.file_size != excluded.file_size
                         OR file_records.last_modified != excluded.last_modified THEN 1
                    ELSE file_records.retry_count + 1
                END,
                file_size = excluded.file_size,
                last_modified = excluded.last_modified,
                processed = excluded.processed,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at",
        )
        .bind(scope_id)
        .bind(rel_path)
        .bind(file_size)
        .bind(last_modified)
        .bind(if success { 1 } else { 0 })
        .bind(if success { 0 } else { 1 })
        .bind(error)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_setting(&self, name: &str) -> Result<Option<String>, LedgerError> {
        let row = sqlx::query("SELECT value FROM settings WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(row.try_get("value")?))
    }

    pub async fn set_setting(&self, name: &str, value: &str) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO settings (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn default_db_path() -> Result<PathBuf, LedgerError> {
    let mut path = dirs::data_dir().ok_or(LedgerError::MissingDataDir)?;
    path.push("ftpmirrord");
    path.push("ledger.db");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_ledger() -> Ledger {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let ledger = Ledger::from_pool(pool);
        ledger.init().await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn scope_resolution_is_idempotent() {
        let ledger = make_ledger().await;
        let first = ledger
            .resolve_or_create_scope("/data/out", "/remote/in")
            .await
            .unwrap();
        let second = ledger
            .resolve_or_create_scope("/data/out", "/remote/in")
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn distinct_folder_pairs_get_distinct_scopes() {
        let ledger = make_ledger().await;
        let a = ledger
            .resolve_or_create_scope("/data/out", "/remote/in")
            .await
            .unwrap();
        let b = ledger
            .resolve_or_create_scope("/data/out", "/remote/other")
            .await
            .unwrap();
        let c = ledger
            .resolve_or_create_scope("/Data/out", "/remote/in")
            .await
            .unwrap();
        assert_ne!(a, b);
        // Folder identity is case-sensitive.
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn status_is_absent_before_first_outcome() {
        let ledger = make_ledger().await;
        let scope = ledger.resolve_or_create_scope("/s", "/t").await.unwrap();
        let status = ledger
            .file_status(scope, "report.csv", 1000, 1_700_000_000)
            .await
            .unwrap();
        assert!(!status.exists);
        assert_eq!(status.retry_count, 0);
    }

    #[tokio::test]
    async fn successful_outcome_marks_processed() {
        let ledger = make_ledger().await;
        let scope = ledger.resolve_or_create_scope("/s", "/t").await.unwrap();
        ledger
            .record_outcome(scope, "report.csv", 1000, 1_700_000_000, true, None)
            .await
            .unwrap();

        let status = ledger
            .file_status(scope, "report.csv", 1000, 1_700_000_000)
            .await
            .unwrap();
        assert!(status.exists);
        assert!(status.processed);
        assert!(!status.size_changed);
        assert!(!status.mod_time_changed);
        assert_eq!(status.retry_count, 0);
    }

    #[tokio::test]
    async fn size_and_mod_time_changes_are_detected() {
        let ledger = make_ledger().await;
        let scope = ledger.resolve_or_create_scope("/s", "/t").await.unwrap();
        ledger
            .record_outcome(scope, "report.csv", 1000, 1_700_000_000, true, None)
            .await
            .unwrap();

        let grown = ledger
            .file_status(scope, "report.csv", 1200, 1_700_000_000)
            .await
            .unwrap();
        assert!(grown.size_changed);
        assert!(!grown.mod_time_changed);

        let touched = ledger
            .file_status(scope, "report.csv", 1000, 1_700_000_001)
            .await
            .unwrap();
        assert!(!touched.size_changed);
        assert!(touched.mod_time_changed);
    }

    #[tokio::test]
    async fn consecutive_failures_count_up() {
        let ledger = make_ledger().await;
        let scope = ledger.resolve_or_create_scope("/s", "/t").await.unwrap();

        for expected in 1..=4i64 {
            ledger
                .record_outcome(
                    scope,
                    "flaky.bin",
                    10,
                    1_700_000_000,
                    false,
                    Some("connection reset"),
                )
                .await
                .unwrap();
            let status = ledger
                .file_status(scope, "flaky.bin", 10, 1_700_000_000)
                .await
                .unwrap();
            assert_eq!(status.retry_count, expected);
            assert!(!status.processed);
        }
    }

    #[tokio::test]
    async fn success_resets_retry_count() {
        let ledger = make_ledger().await;
        let scope = ledger.resolve_or_create_scope("/s", "/t").await.unwrap();

        ledger
            .record_outcome(scope, "f.bin", 10, 1, false, Some("boom"))
            .await
            .unwrap();
        ledger
            .record_outcome(scope, "f.bin", 10, 1, false, Some("boom"))
            .await
            .unwrap();
        ledger
            .record_outcome(scope, "f.bin", 10, 1, true, None)
            .await
            .unwrap();

        let status = ledger.file_status(scope, "f.bin", 10, 1).await.unwrap();
        assert!(status.processed);
        assert_eq!(status.retry_count, 0);
    }

    #[tokio::test]
    async fn failure_after_structural_change_restarts_counting() {
        let ledger = make_ledger().await;
        let scope = ledger.resolve_or_create_scope("/s", "/t").await.unwrap();

        for _ in 0..5 {
            ledger
                .record_outcome(scope, "f.bin", 10, 1, false, Some("boom"))
                .await
                .unwrap();
        }

        // The file changed size; the next failure is attempt one of a new
        // problem, not attempt six of the old one.
        ledger
            .record_outcome(scope, "f.bin", 20, 1, false, Some("boom"))
            .await
            .unwrap();
        let status = ledger.file_status(scope, "f.bin", 20, 1).await.unwrap();
        assert_eq!(status.retry_count, 1);
    }

    #[tokio::test]
    async fn outcome_refreshes_size_and_mod_time() {
        let ledger = make_ledger().await;
        let scope = ledger.resolve_or_create_scope("/s", "/t").await.unwrap();

        ledger
            .record_outcome(scope, "f.bin", 10, 1, true, None)
            .await
            .unwrap();
        ledger
            .record_outcome(scope, "f.bin", 20, 2, false, Some("boom"))
            .await
            .unwrap();

        // Stored metadata now matches the newest observation even though
        // the attempt failed.
        let status = ledger.file_status(scope, "f.bin", 20, 2).await.unwrap();
        assert!(!status.size_changed);
        assert!(!status.mod_time_changed);
        assert!(!status.processed);
    }

    #[tokio::test]
    async fn records_are_namespaced_by_scope() {
        let ledger = make_ledger().await;
        let scope_a = ledger.resolve_or_create_scope("/a", "/t").await.unwrap();
        let scope_b = ledger.resolve_or_create_scope("/b", "/t").await.unwrap();

        ledger
            .record_outcome(scope_a, "same.txt", 10, 1, true, None)
            .await
            .unwrap();

        let other = ledger.file_status(scope_b, "same.txt", 10, 1).await.unwrap();
        assert!(!other.exists);
    }

    #[tokio::test]
    async fn settings_round_trip_and_overwrite() {
        let ledger = make_ledger().await;
        assert!(ledger.get_setting("remote_address").await.unwrap().is_none());

        ledger.set_setting("remote_address", "enc-1").await.unwrap();
        assert_eq!(
            ledger.get_setting("remote_address").await.unwrap().as_deref(),
            Some("enc-1")
        );

        ledger.set_setting("remote_address", "enc-2").await.unwrap();
        assert_eq!(
            ledger.get_setting("remote_address").await.unwrap().as_deref(),
            Some("enc-2")
        );
    }
}
