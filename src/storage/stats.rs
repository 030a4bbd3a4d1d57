use std::collections::BTreeMap;

use super::schema::Database;
use super::types::{DatabaseError, DayCount, Stats};

/// Number of most recent collection days reported in `articles_by_day`
const DAYS_REPORTED: i64 = 7;

impl Database {
    // ========================================================================
    // Aggregates
    // ========================================================================

    /// Counts over the current store. Nothing is cached; every call re-reads.
    pub async fn stats(&self) -> Result<Stats, DatabaseError> {
        let (total_articles, exported_articles): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(exported), 0) FROM articles",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let (active_sources,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sources WHERE enabled = 1")
                .fetch_one(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        let (total_summaries,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM summaries")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let by_category: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT category, COUNT(*) FROM articles
            WHERE category IS NOT NULL AND category != ''
            GROUP BY category
        "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        // collected_at is RFC 3339 text, so its first 10 chars are the UTC day
        let articles_by_day = sqlx::query_as::<_, DayCount>(
            r#"
            SELECT substr(collected_at, 1, 10) AS date, COUNT(*) AS count
            FROM articles
            GROUP BY date
            ORDER BY date DESC
            LIMIT ?
        "#,
        )
        .bind(DAYS_REPORTED)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(Stats {
            total_articles,
            exported_articles,
            active_sources,
            total_summaries,
            by_category: by_category.into_iter().collect::<BTreeMap<_, _>>(),
            articles_by_day,
        })
    }
}
