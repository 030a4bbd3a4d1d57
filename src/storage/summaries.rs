use chrono::Utc;

use super::schema::Database;
use super::types::{DatabaseError, Summary, SummaryDbRow};

/// How many summaries the history listing returns
const SUMMARY_HISTORY_LIMIT: i64 = 50;

impl Database {
    // ========================================================================
    // Summary Operations (append-only)
    // ========================================================================

    pub async fn insert_summary(
        &self,
        article_ids: &[i64],
        category: Option<&str>,
        output_format: &str,
        summary_text: &str,
    ) -> Result<Summary, DatabaseError> {
        let ids_json = serde_json::to_string(article_ids)
            .map_err(|e| DatabaseError::CorruptRow(e.to_string()))?;

        let row = sqlx::query_as::<_, SummaryDbRow>(
            r#"
            INSERT INTO summaries (article_ids, category, output_format, summary_text, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, article_ids, category, output_format, summary_text, created_at
        "#,
        )
        .bind(ids_json)
        .bind(category)
        .bind(output_format)
        .bind(summary_text)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.into_summary()
    }

    /// Newest summaries first.
    pub async fn list_summaries(&self) -> Result<Vec<Summary>, DatabaseError> {
        let rows = sqlx::query_as::<_, SummaryDbRow>(
            r#"
            SELECT id, article_ids, category, output_format, summary_text, created_at
            FROM summaries
            ORDER BY created_at DESC, id DESC
            LIMIT ?
        "#,
        )
        .bind(SUMMARY_HISTORY_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(SummaryDbRow::into_summary).collect()
    }
}
