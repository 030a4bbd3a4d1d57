//! Fetch engine: one HTTP layer shared by three source adapters.
//!
//! A source's `kind` picks the adapter; every adapter turns the remote
//! payload into [`NormalizedArticle`]s and never touches the database.
//! Dedup and persistence happen one level up in [`crate::monitor`].
mod http;
pub mod reddit;
pub mod rss;
pub mod scrape;

pub use http::{Fetcher, RetryPolicy, MAX_RESPONSE_SIZE};

use serde_json::json;
use thiserror::Error;

use crate::storage::{NewSource, NormalizedArticle, Source, SourceKind};
use crate::util::{validate_url, UrlValidationError};

/// Errors that can occur while fetching and parsing one source.
///
/// All of these are per-source: the collection pass records them in the
/// result for that source and carries on with the rest.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[source] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request plus body exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server kept answering 429 after every retry
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Received fewer bytes than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Payload could not be parsed (bad XML, JSON or HTML)
    #[error("Parse error: {0}")]
    Parse(String),
    /// Source configuration cannot be used (no subreddit, bad selector)
    #[error("Invalid source configuration: {0}")]
    InvalidSource(String),
}

impl FetchError {
    /// Transient failures that deserve another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout | FetchError::IncompleteResponse { .. } => {
                true
            }
            FetchError::HttpStatus(status) => *status == 429 || *status >= 500,
            FetchError::RateLimited(_)
            | FetchError::ResponseTooLarge
            | FetchError::Parse(_)
            | FetchError::InvalidSource(_) => false,
        }
    }
}

/// Rejections raised when a source is created or edited.
#[derive(Debug, Error)]
pub enum SourceValidationError {
    #[error("Source name must not be empty")]
    EmptyName,
    #[error(transparent)]
    Url(#[from] UrlValidationError),
    #[error("config must be a JSON object")]
    ConfigNotObject,
    #[error("{0}")]
    Adapter(String),
}

/// Fetch one source and normalize its items, taking at most `cap` of them.
pub async fn fetch_source(
    fetcher: &Fetcher,
    source: &Source,
    cap: usize,
) -> Result<Vec<NormalizedArticle>, FetchError> {
    match source.kind {
        SourceKind::Rss => rss::collect(fetcher, source, cap).await,
        SourceKind::Reddit => reddit::collect(fetcher, source, cap).await,
        SourceKind::Scraper => scrape::collect(fetcher, source, cap).await,
    }
}

/// Check a source definition before it reaches the registry.
///
/// URL rules depend on the kind: every kind needs a public http(s) endpoint,
/// Reddit additionally needs a resolvable subreddit and the scraper needs
/// selectors that parse.
pub fn validate_source(
    name: &str,
    kind: SourceKind,
    url: &str,
    config: Option<&serde_json::Value>,
) -> Result<(), SourceValidationError> {
    if name.trim().is_empty() {
        return Err(SourceValidationError::EmptyName);
    }
    validate_url(url)?;

    let empty = json!({});
    let config = config.unwrap_or(&empty);
    if !config.is_object() {
        return Err(SourceValidationError::ConfigNotObject);
    }

    match kind {
        SourceKind::Rss => Ok(()),
        SourceKind::Reddit => reddit::subreddit_for(url, config)
            .map(|_| ())
            .map_err(|e| SourceValidationError::Adapter(e.to_string())),
        SourceKind::Scraper => scrape::Selectors::from_config(config)
            .map(|_| ())
            .map_err(|e| SourceValidationError::Adapter(e.to_string())),
    }
}

/// Sources registered on first start when the registry is empty.
pub fn default_sources() -> Vec<NewSource> {
    let feed = |name: &str, url: &str| NewSource {
        name: name.to_owned(),
        kind: SourceKind::Rss,
        url: url.to_owned(),
        enabled: true,
        config: None,
    };
    let subreddit = |name: &str| NewSource {
        name: format!("r/{}", name),
        kind: SourceKind::Reddit,
        url: format!("https://www.reddit.com/r/{}", name),
        enabled: true,
        config: Some(json!({ "subreddit": name })),
    };

    vec![
        feed("Hacker News", "https://news.ycombinator.com/rss"),
        feed("TechCrunch", "https://techcrunch.com/feed/"),
        feed("Wired", "https://www.wired.com/feed/rss"),
        feed("Ars Technica", "https://feeds.arstechnica.com/arstechnica/index"),
        feed("MIT Tech Review", "https://www.technologyreview.com/feed/"),
        feed("The Verge", "https://www.theverge.com/rss/index.xml"),
        feed("AI News (VentureBeat)", "https://venturebeat.com/category/ai/feed/"),
        feed("Dev.to", "https://dev.to/feed"),
        subreddit("MachineLearning"),
        subreddit("technology"),
        subreddit("programming"),
    ]
}

/// Flatten an HTML fragment to its visible text.
///
/// Feed summaries routinely carry markup (`<p>`, comment links); articles
/// are stored as plain text so exports and prompts stay readable.
pub(crate) fn html_to_text(fragment: &str) -> String {
    if !fragment.contains('<') {
        return crate::util::collapse_whitespace(fragment);
    }
    let parsed = scraper::Html::parse_fragment(fragment);
    let text: String = parsed.root_element().text().collect::<Vec<_>>().join(" ");
    crate::util::collapse_whitespace(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sources_are_valid() {
        let defaults = default_sources();
        assert_eq!(defaults.len(), 11);
        for source in &defaults {
            validate_source(&source.name, source.kind, &source.url, source.config.as_ref())
                .unwrap_or_else(|e| panic!("{} invalid: {}", source.name, e));
        }
    }

    #[test]
    fn test_validate_source_rejects_private_url() {
        let err = validate_source("Intranet", SourceKind::Rss, "http://10.0.0.5/rss", None)
            .unwrap_err();
        assert!(matches!(err, SourceValidationError::Url(_)));
    }

    #[test]
    fn test_validate_source_rejects_blank_name() {
        let err = validate_source("  ", SourceKind::Rss, "https://example.com/rss", None)
            .unwrap_err();
        assert!(matches!(err, SourceValidationError::EmptyName));
    }

    #[test]
    fn test_validate_source_config_must_be_object() {
        let err = validate_source(
            "Feed",
            SourceKind::Rss,
            "https://example.com/rss",
            Some(&json!(["not", "an", "object"])),
        )
        .unwrap_err();
        assert!(matches!(err, SourceValidationError::ConfigNotObject));
    }

    #[test]
    fn test_validate_reddit_needs_subreddit() {
        assert!(validate_source(
            "Reddit",
            SourceKind::Reddit,
            "https://www.reddit.com/",
            None
        )
        .is_err());
        assert!(validate_source(
            "Reddit",
            SourceKind::Reddit,
            "https://www.reddit.com/r/rust/",
            None
        )
        .is_ok());
    }

    #[test]
    fn test_validate_scraper_rejects_bad_selector() {
        let err = validate_source(
            "Blog",
            SourceKind::Scraper,
            "https://blog.example.com/",
            Some(&json!({"selectors": {"title": "h2 >>> a"}})),
        )
        .unwrap_err();
        assert!(matches!(err, SourceValidationError::Adapter(_)));
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(
            html_to_text("<p>Hello <b>world</b></p>\n<a href=\"x\">Comments</a>"),
            "Hello world Comments"
        );
        assert_eq!(html_to_text("  plain   text "), "plain text");
    }

    #[test]
    fn test_fetch_error_retryable() {
        assert!(FetchError::HttpStatus(503).is_retryable());
        assert!(FetchError::HttpStatus(429).is_retryable());
        assert!(!FetchError::HttpStatus(404).is_retryable());
        assert!(FetchError::Timeout.is_retryable());
        assert!(!FetchError::Parse("bad".into()).is_retryable());
    }
}
