use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{Fetcher, FetchError};
use crate::storage::{NormalizedArticle, Source};
use crate::util::{collapse_whitespace, resolve_link, strip_control_chars, truncate_chars};

/// Containers examined per page, whatever the fetch cap
const MAX_CONTAINERS: usize = 30;
const DESCRIPTION_CHARS: usize = 500;
const FALLBACK_CONTAINERS: &str = "article, .post, .entry, .item";

const DEFAULT_ARTICLE: &str = "article";
const DEFAULT_TITLE: &str = "h2 a, h3 a, .title a";
const DEFAULT_DESCRIPTION: &str = "p, .summary, .excerpt";
const DEFAULT_LINK: &str = "a";

/// Some sites serve a stub page to non-browser agents
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// CSS selectors from `config.selectors`, with defaults for missing keys.
#[derive(Debug)]
pub struct Selectors {
    article: Selector,
    title: Selector,
    description: Selector,
    /// `None` when the link selector equals the title selector: the title
    /// element doubles as the link.
    link: Option<Selector>,
    fallback: Selector,
    any_link: Selector,
}

fn parse_selector(field: &str, css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css)
        .map_err(|e| FetchError::InvalidSource(format!("selectors.{} '{}': {}", field, css, e)))
}

impl Selectors {
    pub fn from_config(config: &serde_json::Value) -> Result<Self, FetchError> {
        let configured = config.get("selectors");
        if configured.is_some_and(|s| !s.is_object()) {
            return Err(FetchError::InvalidSource("selectors must be an object".into()));
        }
        let pick = |key: &str, default: &'static str| -> Result<String, FetchError> {
            match configured.and_then(|s| s.get(key)) {
                None => Ok(default.to_owned()),
                Some(serde_json::Value::String(css)) if !css.trim().is_empty() => {
                    Ok(css.trim().to_owned())
                }
                Some(_) => Err(FetchError::InvalidSource(format!(
                    "selectors.{} must be a non-empty string",
                    key
                ))),
            }
        };

        let article = pick("article", DEFAULT_ARTICLE)?;
        let title = pick("title", DEFAULT_TITLE)?;
        let description = pick("description", DEFAULT_DESCRIPTION)?;
        let link = pick("link", DEFAULT_LINK)?;

        Ok(Self {
            article: parse_selector("article", &article)?,
            title: parse_selector("title", &title)?,
            description: parse_selector("description", &description)?,
            link: if link == title {
                None
            } else {
                Some(parse_selector("link", &link)?)
            },
            fallback: parse_selector("fallback", FALLBACK_CONTAINERS)?,
            any_link: parse_selector("link", DEFAULT_LINK)?,
        })
    }
}

pub(super) async fn collect(
    fetcher: &Fetcher,
    source: &Source,
    cap: usize,
) -> Result<Vec<NormalizedArticle>, FetchError> {
    let base = Url::parse(&source.url)
        .map_err(|e| FetchError::InvalidSource(format!("bad url: {}", e)))?;

    let bytes = fetcher
        .get_bytes(&source.url, &[("user-agent", BROWSER_USER_AGENT)])
        .await?;
    let html = String::from_utf8_lossy(&bytes);

    // Parsed after the await: the DOM types are not Send
    let selectors = Selectors::from_config(&source.config)?;

    let articles = parse_page(&html, &base, &selectors, cap);
    tracing::debug!(source = %source.name, items = articles.len(), "Scraped page");
    Ok(articles)
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&strip_control_chars(&el.text().collect::<String>()))
}

/// Extract article cards from a page.
///
/// Uses the configured container selector, or the common fallback set when it
/// matches nothing. Scraped items carry no publication date.
pub fn parse_page(
    html: &str,
    base: &Url,
    selectors: &Selectors,
    cap: usize,
) -> Vec<NormalizedArticle> {
    let document = Html::parse_document(html);

    let mut containers: Vec<ElementRef<'_>> =
        document.select(&selectors.article).take(MAX_CONTAINERS).collect();
    if containers.is_empty() {
        containers = document.select(&selectors.fallback).take(MAX_CONTAINERS).collect();
    }

    containers
        .into_iter()
        .filter_map(|container| {
            let title_el = container.select(&selectors.title).next();
            let title = title_el.map(element_text).unwrap_or_default();

            let link_el = match &selectors.link {
                None => title_el,
                Some(link) => container.select(link).next(),
            }
            .or_else(|| container.select(&selectors.any_link).next());
            let href = link_el.and_then(|el| el.value().attr("href"))?;
            let url = resolve_link(base, href)?;

            let description = container
                .select(&selectors.description)
                .next()
                .map(element_text)
                .unwrap_or_default();

            NormalizedArticle::new(
                &title,
                &truncate_chars(&description, DESCRIPTION_CHARS),
                "",
                "",
                &url,
                None,
            )
        })
        .take(cap)
        .collect()
}
