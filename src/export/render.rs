use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ExportType;
use crate::storage::Article;
use crate::util::{is_http_url, truncate_chars};

/// Body text included per article in the interchange document
const INTERCHANGE_CONTENT_CHARS: usize = 2000;
const URL_TITLE_CHARS: usize = 80;
const UNCATEGORIZED: &str = "Uncategorized";

pub fn render(kind: ExportType, articles: &[Article], vocabulary: &[String]) -> String {
    match kind {
        ExportType::Notebooklm => interchange(articles, vocabulary),
        ExportType::Jsonl => json_lines(articles),
        ExportType::Urls => url_list(articles),
    }
}

/// Static analysis instructions handed to the downstream notebook tool.
pub fn analysis_prompt(vocabulary: &[String]) -> String {
    let mut prompt = String::from(
        "# Tech News Analysis Instructions\n\n\
         Please analyze the uploaded news content with the following criteria:\n\n\
         ## Focus Areas\n",
    );
    for (i, name) in vocabulary.iter().enumerate() {
        prompt.push_str(&format!("{}. **{}**\n", i + 1, name));
    }
    prompt.push_str(
        "\n## Analysis Tasks\n\
         1. Categorize each article into the focus areas above\n\
         2. Identify key trends across the articles\n\
         3. Highlight the most significant developments\n\
         4. Note any potential implications or predictions\n\
         5. Flag any duplicate or low-quality content\n\n\
         ## Output Format\n\
         Provide a structured summary with:\n\
         - Executive Summary (2-3 sentences)\n\
         - Key Trends (bullet points)\n\
         - Top Stories by Category\n\
         - Potential Implications\n\
         - Recommended Deep Dives\n\n---\n\n",
    );
    prompt
}

// ============================================================================
// Interchange document
// ============================================================================

fn interchange_header(vocabulary: &[String]) -> String {
    let mut header = String::from(
        "# Tech News Collection for Analysis\n\n\
         This document contains curated tech news articles for analysis.\n\n\
         ## Analysis Instructions\n\
         Please analyze these articles focusing on:\n",
    );
    for name in vocabulary {
        header.push_str("- ");
        header.push_str(name);
        header.push('\n');
    }
    header.push_str(
        "\nProvide insights on key trends, significant developments, \
         and potential implications.\n\n---\n\n",
    );
    header
}

/// Articles grouped by category, groups in order of first appearance.
fn group_by_category(articles: &[Article]) -> Vec<(&str, Vec<&Article>)> {
    let mut groups: Vec<(&str, Vec<&Article>)> = Vec::new();
    for article in articles {
        let category = article
            .category
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(UNCATEGORIZED);
        match groups.iter_mut().find(|(name, _)| *name == category) {
            Some((_, members)) => members.push(article),
            None => groups.push((category, vec![article])),
        }
    }
    groups
}

fn interchange(articles: &[Article], vocabulary: &[String]) -> String {
    let mut out = interchange_header(vocabulary);

    for (category, members) in group_by_category(articles) {
        out.push_str(&format!("\n## {}\n\n", category));

        for (i, article) in members.iter().enumerate() {
            out.push_str(&format!("### {}. {}\n\n", i + 1, article.title));
            if let Some(source) = article.source_name.as_deref().filter(|s| !s.is_empty()) {
                out.push_str(&format!("**Source:** {}\n", source));
            }
            if let Some(date) = article.published_date {
                out.push_str(&format!("**Date:** {}\n", date.format("%Y-%m-%d")));
            }
            out.push_str(&format!("**URL:** {}\n\n", article.url));

            let description = article.description.as_deref().unwrap_or_default();
            if !description.is_empty() {
                out.push_str(description);
                out.push_str("\n\n");
            }
            // Full text only when it adds something beyond the description
            let content = article.content.as_deref().unwrap_or_default();
            if content.chars().count() > description.chars().count() {
                out.push_str(&truncate_chars(content, INTERCHANGE_CONTENT_CHARS));
                out.push_str("\n\n");
            }
            out.push_str("---\n\n");
        }
    }
    out
}

// ============================================================================
// JSON lines
// ============================================================================

#[derive(Serialize)]
struct ExportLine<'a> {
    title: &'a str,
    description: &'a str,
    content: &'a str,
    author: &'a str,
    url: &'a str,
    published_date: Option<DateTime<Utc>>,
    source: &'a str,
    category: Option<&'a str>,
    collected_at: DateTime<Utc>,
}

impl<'a> From<&'a Article> for ExportLine<'a> {
    fn from(article: &'a Article) -> Self {
        Self {
            title: &article.title,
            description: article.description.as_deref().unwrap_or_default(),
            content: article.content.as_deref().unwrap_or_default(),
            author: article.author.as_deref().unwrap_or_default(),
            url: &article.url,
            published_date: article.published_date,
            source: article.source_name.as_deref().unwrap_or_default(),
            category: article.category.as_deref(),
            collected_at: article.collected_at,
        }
    }
}

fn json_lines(articles: &[Article]) -> String {
    let mut out = String::new();
    for article in articles {
        // Serializing borrowed strings and timestamps cannot fail
        if let Ok(line) = serde_json::to_string(&ExportLine::from(article)) {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

// ============================================================================
// URL list
// ============================================================================

fn url_list(articles: &[Article]) -> String {
    let mut out = String::from(
        "# Article URLs for NotebookLM Import\n\n\
         # You can add these URLs directly to NotebookLM as web sources\n\n",
    );
    for article in articles.iter().filter(|a| is_http_url(&a.url)) {
        out.push_str(&format!(
            "# {}\n{}\n\n",
            truncate_chars(&article.title, URL_TITLE_CHARS),
            article.url
        ));
    }
    out
}
