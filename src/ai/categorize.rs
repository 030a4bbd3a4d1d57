use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::{AiError, LlmClient};
use crate::settings::{Settings, FALLBACK_CATEGORY};
use crate::storage::{Article, Database, DatabaseError};
use crate::util::truncate_chars;

/// Classifier calls in flight at once during a categorization run
const CATEGORIZE_CONCURRENCY: usize = 4;

/// Description chars sent to the classifier
const PROMPT_DESCRIPTION_CHARS: usize = 600;

/// Outcome counts for one categorization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategorizeReport {
    /// Articles that received a category
    pub categorized: usize,
    /// Classifier or storage failures; the article stays uncategorized
    pub failed: usize,
    /// Articles already categorized by someone else when the answer came back
    pub skipped: usize,
}

fn system_prompt(vocabulary: &[String]) -> String {
    let mut prompt = String::from(
        "You are a tech news categorizer. Categorize the given article into ONE of these categories:\n",
    );
    for name in vocabulary {
        prompt.push_str("- ");
        prompt.push_str(name);
        prompt.push('\n');
    }
    prompt.push_str("- ");
    prompt.push_str(FALLBACK_CATEGORY);
    prompt.push_str("\n\nRespond with ONLY the category name, nothing else.");
    prompt
}

/// Map a classifier reply onto the vocabulary.
///
/// Matching ignores case, surrounding quotes, markdown emphasis and a
/// trailing period. Anything else becomes the fallback category.
pub fn match_category(reply: &str, vocabulary: &[String]) -> String {
    let cleaned = reply
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*'))
        .trim_end_matches('.')
        .trim();

    vocabulary
        .iter()
        .find(|name| name.eq_ignore_ascii_case(cleaned))
        .cloned()
        .unwrap_or_else(|| FALLBACK_CATEGORY.to_owned())
}

/// Ask the classifier for one article's category.
pub async fn classify(
    client: &LlmClient,
    model: &str,
    vocabulary: &[String],
    article: &Article,
) -> Result<String, AiError> {
    let user = format!(
        "Title: {}\nDescription: {}",
        article.title,
        truncate_chars(
            article.description.as_deref().unwrap_or_default(),
            PROMPT_DESCRIPTION_CHARS
        )
    );
    let reply = client.complete(model, &system_prompt(vocabulary), &user).await?;
    Ok(match_category(&reply, vocabulary))
}

/// Categorize `articles`, writing each result as it arrives.
///
/// A classifier failure leaves that article's category NULL and is counted,
/// never propagated. With `force` an existing category is overwritten,
/// otherwise the write only lands on rows that are still uncategorized.
pub async fn categorize_articles(
    db: &Database,
    client: &LlmClient,
    settings: &Settings,
    articles: Vec<Article>,
    force: bool,
) -> CategorizeReport {
    if articles.is_empty() {
        return CategorizeReport::default();
    }
    let vocabulary = settings.categories();
    let model = settings.llm_model();

    let outcomes: Vec<Result<bool, ()>> = stream::iter(articles)
        .map(|article| {
            let vocabulary = &vocabulary;
            async move {
                let category = match classify(client, model, vocabulary, &article).await {
                    Ok(category) => category,
                    Err(e) => {
                        tracing::warn!(article_id = article.id, error = %e, "Categorization failed");
                        return Err(());
                    }
                };
                match db.set_article_category(article.id, &category, force).await {
                    Ok(changed) => {
                        tracing::debug!(article_id = article.id, category = %category, changed, "Categorized");
                        Ok(changed)
                    }
                    Err(e) => {
                        tracing::warn!(article_id = article.id, error = %e, "Failed to store category");
                        Err(())
                    }
                }
            }
        })
        .buffer_unordered(CATEGORIZE_CONCURRENCY)
        .collect()
        .await;

    let mut report = CategorizeReport::default();
    for outcome in outcomes {
        match outcome {
            Ok(true) => report.categorized += 1,
            Ok(false) => report.skipped += 1,
            Err(()) => report.failed += 1,
        }
    }
    report
}

/// Categorize up to `limit` stored articles: pending ones, or all with `force`.
pub async fn categorize_pending(
    db: &Database,
    client: &LlmClient,
    force: bool,
    limit: i64,
) -> Result<CategorizeReport, DatabaseError> {
    let settings = Settings::load(db).await?;
    let articles = db.articles_to_categorize(force, limit).await?;
    let report = categorize_articles(db, client, &settings, articles, force).await;
    tracing::info!(
        categorized = report.categorized,
        failed = report.failed,
        skipped = report.skipped,
        force,
        "Categorization run finished"
    );
    Ok(report)
}
