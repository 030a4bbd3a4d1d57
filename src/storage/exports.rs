use chrono::{DateTime, Utc};
use std::future::Future;
use sqlx::{QueryBuilder, Sqlite};

use super::schema::Database;
use super::types::{DatabaseError, ExportRecord};

/// Everything one finished export writes to the database.
#[derive(Debug, Clone)]
pub struct ExportCommit<'a> {
    pub filename: &'a str,
    pub export_type: &'a str,
    pub article_ids: &'a [i64],
    pub mark_exported: bool,
    pub export_date: DateTime<Utc>,
}

/// Keeps `IN (...)` lists well under SQLite's bound-parameter limit
const MARK_BATCH_SIZE: usize = 500;

impl Database {
    // ========================================================================
    // Export History
    // ========================================================================

    /// Record a written export file and, when asked, flip `exported` on its
    /// articles. Both happen in one transaction: either the history row and
    /// every flag land, or nothing does.
    pub async fn commit_export(
        &self,
        commit: &ExportCommit<'_>,
    ) -> Result<ExportRecord, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let record = sqlx::query_as::<_, ExportRecord>(
            r#"
            INSERT INTO exports (articles_count, export_date, filename, export_type)
            VALUES (?, ?, ?, ?)
            RETURNING id, articles_count, export_date, filename, export_type
        "#,
        )
        .bind(commit.article_ids.len() as i64)
        .bind(commit.export_date)
        .bind(commit.filename)
        .bind(commit.export_type)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if commit.mark_exported {
            for chunk in commit.article_ids.chunks(MARK_BATCH_SIZE) {
                let mut builder =
                    QueryBuilder::<Sqlite>::new("UPDATE articles SET exported = 1 WHERE id IN (");
                let mut ids = builder.separated(", ");
                for id in chunk {
                    ids.push_bind(*id);
                }
                ids.push_unseparated(")");
                builder
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(DatabaseError::from_sqlx)?;
            }
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(record)
    }

    /// Full export history, newest first.
    pub async fn list_export_records(&self) -> Result<Vec<ExportRecord>, DatabaseError> {
        sqlx::query_as::<_, ExportRecord>(
            r#"
            SELECT id, articles_count, export_date, filename, export_type
            FROM exports
            ORDER BY export_date DESC, id DESC
        "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Remove the history row for a file together with the file itself.
    ///
    /// The row is deleted inside a transaction, then `remove_file` runs. The
    /// deletion commits when the file is gone afterwards (removed now, or
    /// already missing) and rolls back on any other I/O failure, so the row
    /// never outlives its file and never disappears while the file stays.
    /// Returns whether a row existed and the outcome of `remove_file`.
    pub async fn delete_export_with<F>(
        &self,
        filename: &str,
        remove_file: F,
    ) -> Result<(bool, std::io::Result<()>), DatabaseError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let result = sqlx::query("DELETE FROM exports WHERE filename = ?")
            .bind(filename)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let had_record = result.rows_affected() > 0;

        let removed = remove_file.await;
        match &removed {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            }
            _ => tx.commit().await.map_err(DatabaseError::from_sqlx)?,
        }
        Ok((had_record, removed))
    }
}
