use std::path::Path;
use std::str::FromStr;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};

use crate::error::StoreError;
use crate::storage::{NotificationRecord, NotificationStore};

/// Notification history in a single-table SQLite database.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<StoreError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(StoreError::Open)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StoreError::Open)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(StoreError::Open)
            .attach_with(|| format!("database path: {}", path.display()))?;

        Self::with_pool(pool).await
    }

    /// Open an existing database for reading only. Nothing is created or
    /// migrated and the connection is made on first use, so a missing file
    /// surfaces as a `StoreError::Read` from `load`.
    pub fn open_read_only(path: &Path) -> Result<Self, Report<StoreError>> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StoreError::Open)?
            .read_only(true);

        Ok(Self {
            pool: SqlitePool::connect_lazy_with(opts),
        })
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, Report<StoreError>> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StoreError::Open)?;
        Ok(Self { pool })
    }

    /// Private in-memory database, mostly useful for tests.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, Report<StoreError>> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .change_context(StoreError::Open)?
            .create_if_missing(true);
        // Every connection to :memory: is a separate database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .change_context(StoreError::Open)?;
        Self::with_pool(pool).await
    }
}

impl NotificationStore for SqliteStore {
    fn load(&self) -> BoxFuture<'_, Result<NotificationRecord, Report<StoreError>>> {
        Box::pin(async move {
            let rows: Vec<(String, f64)> =
                sqlx::query_as("SELECT key, notified_at FROM notifications")
                    .fetch_all(&self.pool)
                    .await
                    .change_context(StoreError::Read)?;

            Ok(rows.into_iter().collect())
        })
    }

    fn save(&self, record: &NotificationRecord) -> BoxFuture<'_, Result<(), Report<StoreError>>> {
        let record = record.clone();
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .change_context(StoreError::Write)?;

            sqlx::query("DELETE FROM notifications")
                .execute(&mut *tx)
                .await
                .change_context(StoreError::Write)?;

            for (key, notified_at) in &record {
                sqlx::query("INSERT INTO notifications (key, notified_at) VALUES (?, ?)")
                    .bind(key)
                    .bind(*notified_at)
                    .execute(&mut *tx)
                    .await
                    .change_context(StoreError::Write)?;
            }

            tx.commit().await.change_context(StoreError::Write)?;
            Ok(())
        })
    }
}
