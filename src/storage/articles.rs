use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};

use super::schema::Database;
use super::types::{Article, ArticleQuery, DatabaseError, Ingested, NormalizedArticle};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Upper bound on page size for article listings (OOM protection)
pub const MAX_PAGE_SIZE: i64 = 500;

/// Page size when the caller gives none
pub const DEFAULT_PAGE_SIZE: i64 = 50;

const ARTICLE_SELECT: &str = r#"
    SELECT a.id, a.title, a.description, a.content, a.author, a.url,
           a.published_date, a.source_id, s.name AS source_name,
           a.collected_at, a.category, a.exported
    FROM articles a
    LEFT JOIN sources s ON s.id = a.source_id
"#;

const RECENT_FIRST: &str = " ORDER BY a.collected_at DESC, a.id DESC";

/// Ids per `IN (...)` list, well under SQLite's bound-parameter limit
const ID_BATCH_SIZE: usize = 500;

/// Escape LIKE wildcards so a search for `100%` matches literally.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &ArticleQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(category) = query.category.as_deref().filter(|c| !c.is_empty()) {
        builder.push(" AND a.category = ").push_bind(category.to_owned());
    }
    if let Some(source_id) = query.source_id {
        builder.push(" AND a.source_id = ").push_bind(source_id);
    }
    if let Some(exported) = query.exported {
        builder.push(" AND a.exported = ").push_bind(exported);
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        builder
            .push(" AND (a.title LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR a.description LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

impl Database {
    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Store a normalized article unless its url is already known.
    ///
    /// The `UNIQUE(url)` constraint is the serialization point: concurrent
    /// ingests of the same url race inside SQLite, exactly one `INSERT` wins
    /// and the loser falls through to the lookup and reports `created = false`.
    pub async fn ingest_article(
        &self,
        article: &NormalizedArticle,
        source_id: Option<i64>,
    ) -> Result<Ingested, DatabaseError> {
        let inserted: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO articles
                (title, description, content, author, url, published_date,
                 source_id, collected_at, category, exported)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, 0)
            ON CONFLICT(url) DO NOTHING
            RETURNING id
        "#,
        )
        .bind(&article.title)
        .bind(&article.description)
        .bind(&article.content)
        .bind(&article.author)
        .bind(&article.url)
        .bind(article.published_date)
        .bind(source_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some((article_id,)) = inserted {
            return Ok(Ingested {
                created: true,
                article_id,
            });
        }

        let (article_id,): (i64,) = sqlx::query_as("SELECT id FROM articles WHERE url = ?")
            .bind(&article.url)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        tracing::debug!(url = %article.url, article_id, "Duplicate url, skipped");
        Ok(Ingested {
            created: false,
            article_id,
        })
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Filtered page of articles plus the total match count (ignoring paging).
    pub async fn query_articles(
        &self,
        query: &ArticleQuery,
    ) -> Result<(Vec<Article>, i64), DatabaseError> {
        let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
        let offset = query.offset.max(0);

        let mut select = QueryBuilder::<Sqlite>::new(ARTICLE_SELECT);
        push_filters(&mut select, query);
        select.push(RECENT_FIRST);
        select.push(" LIMIT ").push_bind(limit);
        select.push(" OFFSET ").push_bind(offset);

        let articles = select
            .build_query_as::<Article>()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM articles a");
        push_filters(&mut count, query);
        let (total,): (i64,) = count
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok((articles, total))
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>, DatabaseError> {
        sqlx::query_as::<_, Article>(&format!("{ARTICLE_SELECT} WHERE a.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    /// Distinct non-empty category labels in use, alphabetical.
    pub async fn article_categories(&self) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT category FROM articles WHERE category IS NOT NULL AND category != '' ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(rows.into_iter().map(|(c,)| c).collect())
    }

    /// Most recent articles, optionally restricted to one category.
    pub async fn recent_articles(
        &self,
        category: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Article>, DatabaseError> {
        self.query_articles(&ArticleQuery {
            category: category.map(str::to_owned),
            limit,
            ..Default::default()
        })
        .await
        .map(|(articles, _)| articles)
    }

    /// Most recent articles for an export selection.
    pub async fn articles_for_export(
        &self,
        unexported_only: bool,
        limit: i64,
    ) -> Result<Vec<Article>, DatabaseError> {
        let mut builder = QueryBuilder::<Sqlite>::new(ARTICLE_SELECT);
        if unexported_only {
            builder.push(" WHERE a.exported = 0");
        }
        builder.push(RECENT_FIRST);
        builder.push(" LIMIT ").push_bind(limit.max(1));

        builder
            .build_query_as::<Article>()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    /// Articles among `ids`, most recent first; unknown ids are ignored.
    /// With `unexported_only` already-exported rows are dropped too.
    ///
    /// Long id lists are queried in batches so the `IN (...)` list stays
    /// under SQLite's bound-parameter limit.
    pub async fn articles_by_ids(
        &self,
        ids: &[i64],
        unexported_only: bool,
        limit: i64,
    ) -> Result<Vec<Article>, DatabaseError> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let limit = limit.max(1);

        let mut articles = Vec::new();
        for chunk in ids.chunks(ID_BATCH_SIZE) {
            let mut builder = QueryBuilder::<Sqlite>::new(ARTICLE_SELECT);
            builder.push(" WHERE a.id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            if unexported_only {
                builder.push(" AND a.exported = 0");
            }
            builder.push(RECENT_FIRST);
            builder.push(" LIMIT ").push_bind(limit);

            let batch = builder
                .build_query_as::<Article>()
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            articles.extend(batch);
        }

        // Same order as RECENT_FIRST, across batches
        articles.sort_by(|a, b| {
            b.collected_at
                .cmp(&a.collected_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        articles.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(articles)
    }

    // ========================================================================
    // Categorization
    // ========================================================================

    /// Articles awaiting a category (or all articles when `include_categorized`).
    pub async fn articles_to_categorize(
        &self,
        include_categorized: bool,
        limit: i64,
    ) -> Result<Vec<Article>, DatabaseError> {
        let mut builder = QueryBuilder::<Sqlite>::new(ARTICLE_SELECT);
        if !include_categorized {
            builder.push(" WHERE a.category IS NULL");
        }
        builder.push(RECENT_FIRST);
        builder.push(" LIMIT ").push_bind(limit.max(1));

        builder
            .build_query_as::<Article>()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    /// Assign a category.
    ///
    /// Without `force` the write only lands on an uncategorized row, so a
    /// second categorizer racing on the same article is a no-op. Returns
    /// whether the row changed.
    pub async fn set_article_category(
        &self,
        id: i64,
        category: &str,
        force: bool,
    ) -> Result<bool, DatabaseError> {
        let sql = if force {
            "UPDATE articles SET category = ? WHERE id = ?"
        } else {
            "UPDATE articles SET category = ? WHERE id = ? AND category IS NULL"
        };
        let result = sqlx::query(sql)
            .bind(category)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}
