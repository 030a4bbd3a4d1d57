use feed_rs::parser;

use super::{html_to_text, Fetcher, FetchError};
use crate::storage::{NormalizedArticle, Source};
use crate::util::{strip_control_chars, truncate_chars};

/// Feed summaries are cut to this before the stored-field cap applies
const DESCRIPTION_CHARS: usize = 500;

pub(super) async fn collect(
    fetcher: &Fetcher,
    source: &Source,
    cap: usize,
) -> Result<Vec<NormalizedArticle>, FetchError> {
    let bytes = fetcher.get_bytes(&source.url, &[]).await?;
    let articles = parse_feed(&bytes, cap)?;
    tracing::debug!(source = %source.name, items = articles.len(), "Parsed feed");
    Ok(articles)
}

/// Parse RSS or Atom bytes into normalized articles.
///
/// Entries without a title or link are skipped; at most `cap` entries are
/// examined, in feed order.
pub fn parse_feed(bytes: &[u8], cap: usize) -> Result<Vec<NormalizedArticle>, FetchError> {
    let feed = parser::parse(bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

    let mut skipped = 0usize;
    let articles: Vec<NormalizedArticle> = feed
        .entries
        .into_iter()
        .take(cap)
        .filter_map(|entry| {
            let title = entry.title.map(|t| t.content).unwrap_or_default();
            let url = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let summary = entry.summary.map(|s| html_to_text(&s.content)).unwrap_or_default();
            let content = entry
                .content
                .and_then(|c| c.body)
                .map(|body| html_to_text(&body))
                .unwrap_or_else(|| summary.clone());
            let author = entry.authors.first().map(|a| a.name.clone()).unwrap_or_default();
            let published = entry.published.or(entry.updated);

            let normalized = NormalizedArticle::new(
                &strip_control_chars(&html_to_text(&title)),
                &truncate_chars(&strip_control_chars(&summary), DESCRIPTION_CHARS),
                &strip_control_chars(&content),
                &strip_control_chars(&author),
                &url,
                published,
            );
            if normalized.is_none() {
                skipped += 1;
            }
            normalized
        })
        .collect();

    if skipped > 0 {
        tracing::debug!(skipped, "Feed entries without title or link skipped");
    }

    Ok(articles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::RetryPolicy;
    use crate::storage::SourceKind;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title>
  <item>
    <title>First &amp; best</title>
    <link>https://example.com/1</link>
    <description>&lt;p&gt;Summary &lt;b&gt;one&lt;/b&gt;&lt;/p&gt;</description>
    <author>ada@example.com (Ada)</author>
    <pubDate>Mon, 01 Jan 2024 12:00:00 GMT</pubDate>
  </item>
  <item>
    <title>No link here</title>
  </item>
  <item>
    <title>Second</title>
    <link>https://example.com/2</link>
  </item>
</channel></rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom</title>
  <id>urn:feed</id>
  <updated>2024-02-01T00:00:00Z</updated>
  <entry>
    <title>Atom entry</title>
    <id>urn:1</id>
    <link href="https://example.org/a"/>
    <updated>2024-02-01T08:30:00Z</updated>
    <content type="html">&lt;p&gt;Full body&lt;/p&gt;</content>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_items() {
        let articles = parse_feed(RSS.as_bytes(), 50).unwrap();
        assert_eq!(articles.len(), 2);

        let first = &articles[0];
        assert_eq!(first.title, "First & best");
        assert_eq!(first.url, "https://example.com/1");
        assert_eq!(first.description, "Summary one");
        assert_eq!(
            first.published_date.map(|d| d.to_rfc3339()),
            Some("2024-01-01T12:00:00+00:00".to_string())
        );
        assert_eq!(articles[1].title, "Second");
    }

    #[test]
    fn test_parse_atom_uses_updated_and_content() {
        let articles = parse_feed(ATOM.as_bytes(), 50).unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].url, "https://example.org/a");
        assert_eq!(articles[0].content, "Full body");
        assert!(articles[0].published_date.is_some());
    }

    #[test]
    fn test_parse_respects_cap() {
        let articles = parse_feed(RSS.as_bytes(), 1).unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].url, "https://example.com/1");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_feed(b"<not valid xml", 50),
            Err(FetchError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_collect_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(RSS)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&server)
            .await;

        let source = Source {
            id: 1,
            name: "Mock".into(),
            kind: SourceKind::Rss,
            url: format!("{}/rss", server.uri()),
            enabled: true,
            config: serde_json::json!({}),
            last_fetched: None,
            created_at: chrono::Utc::now(),
        };
        let fetcher = Fetcher::new(Duration::from_secs(5))
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
            });

        let articles = collect(&fetcher, &source, 50).await.unwrap();
        assert_eq!(articles.len(), 2);
    }
}
