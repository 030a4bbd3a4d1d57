use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{AiError, LlmClient};
use crate::settings::Settings;
use crate::storage::{Article, Database, DatabaseError, Summary};
use crate::util::truncate_chars;

pub const DEFAULT_SUMMARY_LIMIT: i64 = 20;

/// Upper bound on articles in one prompt
pub const MAX_SUMMARY_LIMIT: i64 = 50;

const PROMPT_DESCRIPTION_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("No articles to summarize")]
    NoArticles,
    #[error("AI service is not configured")]
    NotConfigured,
    #[error(transparent)]
    Ai(#[from] AiError),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

/// Encoding requested from the model; stored verbatim on the summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            OutputFormat::Markdown => {
                "Format your response as clean markdown with:\n\
                 ## Summary\nA brief overview paragraph\n\n\
                 ## Key Trends\n- Trend 1\n- Trend 2\n\n\
                 ## Top Stories\n1. **Story Title** - Brief significance\n\n\
                 ## By Category\n### <category>\n- Headlines...\n\
                 (repeat for each relevant category)"
            }
            OutputFormat::Json => {
                "Output your response as valid JSON with this structure:\n\
                 {\n  \"summary\": \"Overall summary paragraph\",\n  \
                 \"key_trends\": [\"trend1\", \"trend2\"],\n  \
                 \"top_stories\": [{\"title\": \"...\", \"significance\": \"...\", \"index\": 1}],\n  \
                 \"categories\": {\"<category>\": [\"headline1\"]}\n}"
            }
        }
    }
}

/// Which articles to summarize and how.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SummarizeRequest {
    pub output_format: OutputFormat,
    pub category: Option<String>,
    pub limit: Option<i64>,
    /// Explicit selection; replaces the category/recency query when non-empty
    pub article_ids: Option<Vec<i64>>,
}

impl SummarizeRequest {
    fn category(&self) -> Option<&str> {
        self.category.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_SUMMARY_LIMIT)
            .clamp(1, MAX_SUMMARY_LIMIT)
    }
}

async fn select_articles(
    db: &Database,
    request: &SummarizeRequest,
) -> Result<Vec<Article>, DatabaseError> {
    match request.article_ids.as_deref() {
        Some(ids) if !ids.is_empty() => db.articles_by_ids(ids, false, request.limit()).await,
        _ => db.recent_articles(request.category(), request.limit()).await,
    }
}

fn system_prompt(vocabulary: &[String], format: OutputFormat, category: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are a tech news analyst. Analyze the following tech news articles \
         and provide an insightful summary.\n\nFilter and focus on these topics:\n",
    );
    for name in vocabulary {
        prompt.push_str("- ");
        prompt.push_str(name);
        prompt.push('\n');
    }
    prompt.push_str("\nIgnore irrelevant or low-quality content.\n\n");
    prompt.push_str(format.instruction());
    if let Some(category) = category {
        prompt.push_str("\n\nFocus specifically on articles related to: ");
        prompt.push_str(category);
    }
    prompt
}

fn articles_prompt(articles: &[Article]) -> String {
    let mut text = String::from("Here are the articles to analyze:\n");
    for (i, article) in articles.iter().enumerate() {
        text.push_str(&format!(
            "\n---\n{}. **{}**\nSource: {}\nDescription: {}\n",
            i + 1,
            article.title,
            article.source_name.as_deref().unwrap_or("Unknown"),
            truncate_chars(
                article.description.as_deref().unwrap_or_default(),
                PROMPT_DESCRIPTION_CHARS
            )
        ));
    }
    text
}

/// Summarize a selection of stored articles and record exactly one Summary.
///
/// The selection is resolved before the client is consulted, so an empty
/// selection reports `NoArticles` even when no AI backend is configured.
/// Nothing is stored when the model call fails.
pub async fn summarize(
    db: &Database,
    client: Option<&LlmClient>,
    request: &SummarizeRequest,
) -> Result<Summary, SummarizeError> {
    let articles = select_articles(db, request).await?;
    if articles.is_empty() {
        return Err(SummarizeError::NoArticles);
    }
    let client = client.ok_or(SummarizeError::NotConfigured)?;

    let settings = Settings::load(db).await?;
    let category = request.category();
    let system = system_prompt(&settings.categories(), request.output_format, category);
    let body = client
        .complete(settings.llm_model(), &system, &articles_prompt(&articles))
        .await?;

    let ids: Vec<i64> = articles.iter().map(|a| a.id).collect();
    let summary = db
        .insert_summary(&ids, category, request.output_format.as_str(), &body)
        .await?;

    tracing::info!(
        summary_id = summary.id,
        articles = ids.len(),
        format = request.output_format.as_str(),
        "Summary created"
    );
    Ok(summary)
}

/// Parse a structured summary body, tolerating a fenced code block around it.
pub fn parse_structured(body: &str) -> Option<serde_json::Value> {
    let trimmed = body.trim();
    let inner = match trimmed.find("```") {
        Some(start) => {
            let after = &trimmed[start + 3..];
            let after = after.strip_prefix("json").unwrap_or(after);
            after.split("```").next().unwrap_or(after)
        }
        None => trimmed,
    };
    serde_json::from_str(inner.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::test_support::{client_for, reply};
    use crate::storage::NormalizedArticle;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{any, body_string_contains};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn seeded() -> (Database, Vec<i64>) {
        let db = Database::open(":memory:").await.unwrap();
        let mut ids = Vec::new();
        for (slug, cat) in [("a", "AI/ML"), ("b", "Cybersecurity"), ("c", "AI/ML")] {
            let article = NormalizedArticle::new(
                &format!("Story {}", slug),
                "Details",
                "",
                "",
                &format!("https://example.com/{}", slug),
                None,
            )
            .unwrap();
            let id = db.ingest_article(&article, None).await.unwrap().article_id;
            db.set_article_category(id, cat, false).await.unwrap();
            ids.push(id);
        }
        (db, ids)
    }

    fn request(category: Option<&str>, limit: i64) -> SummarizeRequest {
        SummarizeRequest {
            category: category.map(str::to_owned),
            limit: Some(limit),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_no_matching_articles_creates_nothing() {
        let (db, _) = seeded().await;
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(reply("unused"))
            .expect(0)
            .mount(&server)
            .await;

        let err = summarize(&db, Some(&client_for(&server)), &request(Some("Security"), 5))
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizeError::NoArticles));
        assert!(db.list_summaries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_selection_reported_before_missing_client() {
        let (db, _) = seeded().await;
        let err = summarize(&db, None, &request(Some("Nothing"), 5)).await.unwrap_err();
        assert!(matches!(err, SummarizeError::NoArticles));

        let err = summarize(&db, None, &request(None, 5)).await.unwrap_err();
        assert!(matches!(err, SummarizeError::NotConfigured));
    }

    #[tokio::test]
    async fn test_summary_records_selection_and_category() {
        let (db, ids) = seeded().await;
        let server = MockServer::start().await;
        Mock::given(body_string_contains("Focus specifically on articles related to: AI/ML"))
            .respond_with(reply("## Summary\nModels everywhere"))
            .expect(1)
            .mount(&server)
            .await;

        let summary = summarize(&db, Some(&client_for(&server)), &request(Some("AI/ML"), 5))
            .await
            .unwrap();

        assert_eq!(summary.article_ids, vec![ids[2], ids[0]]);
        assert_eq!(summary.category.as_deref(), Some("AI/ML"));
        assert_eq!(summary.output_format, "markdown");
        assert_eq!(summary.summary_text, "## Summary\nModels everywhere");
        assert_eq!(db.list_summaries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_explicit_article_ids() {
        let (db, ids) = seeded().await;
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(reply("{\"summary\": \"x\"}"))
            .mount(&server)
            .await;

        let req = SummarizeRequest {
            output_format: OutputFormat::Json,
            article_ids: Some(vec![ids[1], 4242]),
            ..Default::default()
        };
        let summary = summarize(&db, Some(&client_for(&server)), &req).await.unwrap();
        assert_eq!(summary.article_ids, vec![ids[1]]);
        assert_eq!(summary.output_format, "json");
    }

    #[tokio::test]
    async fn test_ai_failure_stores_nothing() {
        let (db, _) = seeded().await;
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = summarize(&db, Some(&client_for(&server)), &request(None, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizeError::Ai(AiError::HttpStatus { status: 401, .. })));
        assert!(db.list_summaries().await.unwrap().is_empty());
    }

    #[test]
    fn test_parse_structured_plain_and_fenced() {
        assert_eq!(
            parse_structured("{\"summary\": \"a\"}"),
            Some(serde_json::json!({"summary": "a"}))
        );
        assert_eq!(
            parse_structured("Here you go:\n```json\n{\"k\": [1, 2]}\n```\nDone"),
            Some(serde_json::json!({"k": [1, 2]}))
        );
        assert_eq!(parse_structured("```\n[1]\n```"), Some(serde_json::json!([1])));
        assert_eq!(parse_structured("## Not json"), None);
    }

    #[test]
    fn test_limit_defaults_and_clamps() {
        assert_eq!(SummarizeRequest::default().limit(), DEFAULT_SUMMARY_LIMIT);
        assert_eq!(request(None, 0).limit(), 1);
        assert_eq!(request(None, 1000).limit(), MAX_SUMMARY_LIMIT);
    }
}
