use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{DatabaseError, NewSource, Source, SourceDbRow, SourceUpdate};

const SOURCE_COLUMNS: &str = "id, name, kind, url, enabled, config, last_fetched, created_at";

fn config_text(config: &Option<serde_json::Value>) -> Option<String> {
    config.as_ref().map(serde_json::Value::to_string)
}

impl Database {
    // ========================================================================
    // Source Registry
    // ========================================================================

    /// All sources, oldest first.
    pub async fn list_sources(&self) -> Result<Vec<Source>, DatabaseError> {
        let rows = sqlx::query_as::<_, SourceDbRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(SourceDbRow::into_source).collect()
    }

    /// Sources a collection pass should visit.
    pub async fn enabled_sources(&self) -> Result<Vec<Source>, DatabaseError> {
        let rows = sqlx::query_as::<_, SourceDbRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE enabled = 1 ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(SourceDbRow::into_source).collect()
    }

    pub async fn get_source(&self, id: i64) -> Result<Option<Source>, DatabaseError> {
        let row = sqlx::query_as::<_, SourceDbRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(SourceDbRow::into_source).transpose()
    }

    /// Insert a source. Callers validate the URL and config first.
    pub async fn create_source(&self, new: &NewSource) -> Result<Source, DatabaseError> {
        let row = sqlx::query_as::<_, SourceDbRow>(&format!(
            r#"
            INSERT INTO sources (name, kind, url, enabled, config, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {SOURCE_COLUMNS}
        "#
        ))
        .bind(new.name.trim())
        .bind(new.kind.as_str())
        .bind(new.url.trim())
        .bind(new.enabled)
        .bind(config_text(&new.config))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.into_source()
    }

    /// Apply a partial update. Returns `None` when the id does not exist.
    pub async fn update_source(
        &self,
        id: i64,
        update: &SourceUpdate,
    ) -> Result<Option<Source>, DatabaseError> {
        // COALESCE keeps the stored value for every field left as NULL
        let row = sqlx::query_as::<_, SourceDbRow>(&format!(
            r#"
            UPDATE sources SET
                name = COALESCE(?, name),
                url = COALESCE(?, url),
                enabled = COALESCE(?, enabled),
                config = COALESCE(?, config)
            WHERE id = ?
            RETURNING {SOURCE_COLUMNS}
        "#
        ))
        .bind(update.name.as_deref().map(str::trim))
        .bind(update.url.as_deref().map(str::trim))
        .bind(update.enabled)
        .bind(config_text(&update.config))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(SourceDbRow::into_source).transpose()
    }

    /// Delete a source. Its articles stay, detached (`source_id = NULL`).
    ///
    /// Returns `false` when nothing was deleted.
    pub async fn delete_source(&self, id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Record that a fetch against this source finished (success or failure).
    pub async fn mark_source_fetched(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE sources SET last_fetched = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }

    /// Insert `defaults` only when the registry is empty. Returns how many were added.
    pub async fn seed_sources_if_empty(
        &self,
        defaults: &[NewSource],
    ) -> Result<usize, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sources")
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        if count > 0 {
            return Ok(0);
        }

        let now = Utc::now();
        for source in defaults {
            sqlx::query(
                "INSERT INTO sources (name, kind, url, enabled, config, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&source.name)
            .bind(source.kind.as_str())
            .bind(&source.url)
            .bind(source.enabled)
            .bind(config_text(&source.config))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(defaults.len())
    }
}
