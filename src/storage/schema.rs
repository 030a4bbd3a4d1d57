use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;
use crate::settings::DEFAULT_SETTINGS;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database (used by tests).
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema could not be applied.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() {
                // Create with 0600 up front; SQLite reports any failure at connect time.
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok();
            }
        }

        // busy_timeout=5000: wait up to 5 seconds for competing writers
        // (parallel source ingestion) before returning SQLITE_BUSY.
        let mut options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // The in-memory database lives in one connection; sharing it across a
        // pool would need shared-cache mode and its table-level locking.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS` / `INSERT OR IGNORE`, so re-running
    /// on an existing database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                url TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                config TEXT,
                last_fetched TEXT,
                created_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // url UNIQUE is the dedup serialization point for concurrent ingestion
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                content TEXT,
                author TEXT,
                url TEXT UNIQUE NOT NULL,
                published_date TEXT,
                source_id INTEGER REFERENCES sources(id) ON DELETE SET NULL,
                collected_at TEXT NOT NULL,
                category TEXT,
                exported INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS summaries (
                id INTEGER PRIMARY KEY,
                article_ids TEXT NOT NULL,
                category TEXT,
                output_format TEXT NOT NULL,
                summary_text TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exports (
                id INTEGER PRIMARY KEY,
                articles_count INTEGER NOT NULL,
                export_date TEXT NOT NULL,
                filename TEXT UNIQUE NOT NULL,
                export_type TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_category ON articles(category)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_collected ON articles(collected_at DESC, id DESC)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_exported ON articles(exported)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_source ON articles(source_id)")
            .execute(&mut *tx)
            .await?;

        // Seed recognised settings without clobbering operator edits
        for (key, value) in DEFAULT_SETTINGS {
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(())
    }
}
