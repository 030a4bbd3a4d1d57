//! Remote language-model features: article categorization and
//! multi-article summaries over an OpenAI-compatible endpoint.

mod client;
pub mod categorize;
pub mod summarize;

pub use categorize::{categorize_articles, categorize_pending, CategorizeReport};
pub use client::{AiError, LlmClient};
pub use summarize::{parse_structured, summarize, OutputFormat, SummarizeError, SummarizeRequest};

#[cfg(test)]
pub(crate) use client::test_support as client_test_support;
