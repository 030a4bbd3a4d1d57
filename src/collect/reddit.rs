use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use super::{Fetcher, FetchError};
use crate::storage::{NormalizedArticle, Source};
use crate::util::{strip_control_chars, truncate_chars};

/// Reddit's listing endpoint refuses larger pages
const MAX_LISTING_LIMIT: usize = 100;
const DESCRIPTION_CHARS: usize = 500;
const REDDIT_USER_AGENT: &str = "newsdesk/0.1 (tech news monitor)";

// ============================================================================
// Listing JSON
// ============================================================================

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Post {
    title: String,
    selftext: String,
    url: Option<String>,
    permalink: String,
    author: String,
    created_utc: f64,
    stickied: bool,
    score: i64,
    num_comments: i64,
}

// ============================================================================
// Adapter
// ============================================================================

/// Subreddit name for a source: `config.subreddit` wins, else the `/r/<name>`
/// segment of the source URL.
pub fn subreddit_for(url: &str, config: &serde_json::Value) -> Result<String, FetchError> {
    let configured = config
        .get("subreddit")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().trim_start_matches("r/").to_owned())
        .filter(|s| !s.is_empty());

    let name = match configured {
        Some(name) => name,
        None => url
            .split("/r/")
            .nth(1)
            .and_then(|rest| rest.split(['/', '?', '#']).next())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| FetchError::InvalidSource("no subreddit configured".into()))?,
    };

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(FetchError::InvalidSource(format!(
            "invalid subreddit name '{}'",
            name
        )));
    }
    Ok(name)
}

/// `hot.json` listing URL on the same origin as the source URL.
fn listing_url(source_url: &str, subreddit: &str, cap: usize) -> Result<String, FetchError> {
    let base = Url::parse(source_url)
        .map_err(|e| FetchError::InvalidSource(format!("bad url: {}", e)))?;
    Ok(format!(
        "{}/r/{}/hot.json?limit={}",
        base.origin().ascii_serialization(),
        subreddit,
        cap.clamp(1, MAX_LISTING_LIMIT)
    ))
}

pub(super) async fn collect(
    fetcher: &Fetcher,
    source: &Source,
    cap: usize,
) -> Result<Vec<NormalizedArticle>, FetchError> {
    let subreddit = subreddit_for(&source.url, &source.config)?;
    let endpoint = listing_url(&source.url, &subreddit, cap)?;

    let bytes = fetcher
        .get_bytes(&endpoint, &[("user-agent", REDDIT_USER_AGENT)])
        .await?;
    let articles = parse_listing(&bytes, cap)?;
    tracing::debug!(subreddit = %subreddit, items = articles.len(), "Parsed subreddit listing");
    Ok(articles)
}

/// Convert a listing payload into normalized articles, skipping stickied posts.
pub fn parse_listing(bytes: &[u8], cap: usize) -> Result<Vec<NormalizedArticle>, FetchError> {
    let listing: Listing =
        serde_json::from_slice(bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

    Ok(listing
        .data
        .children
        .into_iter()
        .map(|child| child.data)
        .filter(|post| !post.stickied)
        .filter_map(|post| {
            let selftext = strip_control_chars(&post.selftext).into_owned();
            let description = if selftext.trim().is_empty() {
                format!("Score: {} | Comments: {}", post.score, post.num_comments)
            } else {
                truncate_chars(&selftext, DESCRIPTION_CHARS).into_owned()
            };
            let url = post
                .url
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| format!("https://reddit.com{}", post.permalink));
            let published = (post.created_utc > 0.0)
                .then(|| DateTime::<Utc>::from_timestamp(post.created_utc as i64, 0))
                .flatten();

            NormalizedArticle::new(
                &strip_control_chars(&post.title),
                &description,
                &selftext,
                &post.author,
                &url,
                published,
            )
        })
        .take(cap)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::RetryPolicy;
    use crate::storage::SourceKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing() -> serde_json::Value {
        json!({
            "data": {
                "children": [
                    {"data": {"title": "Weekly thread", "stickied": true,
                              "url": "https://reddit.com/r/rust/weekly", "created_utc": 1704067200.0}},
                    {"data": {"title": "Link post", "url": "https://blog.example.com/post",
                              "selftext": "", "score": 42, "num_comments": 7,
                              "author": "ferris", "created_utc": 1704067200.0}},
                    {"data": {"title": "Self post", "url": "",
                              "permalink": "/r/rust/comments/abc/self_post/",
                              "selftext": "Body text", "created_utc": 0}}
                ]
            }
        })
    }

    #[test]
    fn test_subreddit_from_config_wins() {
        let name = subreddit_for(
            "https://www.reddit.com/r/other",
            &json!({"subreddit": "r/rust"}),
        )
        .unwrap();
        assert_eq!(name, "rust");
    }

    #[test]
    fn test_subreddit_from_url() {
        assert_eq!(
            subreddit_for("https://www.reddit.com/r/programming/", &json!({})).unwrap(),
            "programming"
        );
        assert_eq!(
            subreddit_for("https://www.reddit.com/r/MachineLearning?sort=hot", &json!({})).unwrap(),
            "MachineLearning"
        );
    }

    #[test]
    fn test_subreddit_missing_or_invalid() {
        assert!(subreddit_for("https://www.reddit.com/", &json!({})).is_err());
        assert!(subreddit_for("https://www.reddit.com/", &json!({"subreddit": "a/b"})).is_err());
    }

    #[test]
    fn test_parse_listing_skips_stickied_and_falls_back() {
        let bytes = serde_json::to_vec(&listing()).unwrap();
        let articles = parse_listing(&bytes, 50).unwrap();
        assert_eq!(articles.len(), 2);

        assert_eq!(articles[0].title, "Link post");
        assert_eq!(articles[0].description, "Score: 42 | Comments: 7");
        assert_eq!(articles[0].author, "ferris");
        assert!(articles[0].published_date.is_some());

        assert_eq!(
            articles[1].url,
            "https://reddit.com/r/rust/comments/abc/self_post/"
        );
        assert_eq!(articles[1].description, "Body text");
        assert_eq!(articles[1].published_date, None);
    }

    #[test]
    fn test_parse_listing_rejects_non_listing() {
        assert!(matches!(
            parse_listing(b"<html>blocked</html>", 50),
            Err(FetchError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_collect_hits_hot_json_with_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/rust/hot.json"))
            .and(query_param("limit", "25"))
            .and(header("user-agent", REDDIT_USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
            .expect(1)
            .mount(&server)
            .await;

        let source = Source {
            id: 7,
            name: "r/rust".into(),
            kind: SourceKind::Reddit,
            url: format!("{}/r/rust", server.uri()),
            enabled: true,
            config: json!({}),
            last_fetched: None,
            created_at: Utc::now(),
        };
        let fetcher = Fetcher::new(Duration::from_secs(5))
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
            });

        let articles = collect(&fetcher, &source, 25).await.unwrap();
        assert_eq!(articles.len(), 2);
    }
}
