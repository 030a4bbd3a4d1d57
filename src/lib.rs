//! Tech news monitor.
//!
//! Collects articles from RSS/Atom feeds, Reddit listings and scraped
//! pages, deduplicates them by URL into SQLite, and layers LLM
//! categorization, digests and file exports on top. The HTTP API in
//! [`api`] is the only outer surface.

pub mod ai;
pub mod api;
pub mod collect;
pub mod config;
pub mod export;
pub mod monitor;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod util;
