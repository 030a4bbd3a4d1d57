use std::collections::BTreeMap;

use super::schema::Database;
use super::types::DatabaseError;

impl Database {
    // ========================================================================
    // Settings Operations
    // ========================================================================

    /// Full settings map, recognised and unknown keys alike.
    pub async fn get_settings(&self) -> Result<BTreeMap<String, String>, DatabaseError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(rows.into_iter().collect())
    }

    /// Replace the whole map in one transaction.
    ///
    /// Keys absent from `values` are removed; a reader never observes a
    /// half-written map.
    pub async fn replace_settings(
        &self,
        values: &BTreeMap<String, String>,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        sqlx::query("DELETE FROM settings")
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        for (key, value) in values {
            sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
