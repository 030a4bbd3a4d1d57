mod articles;
mod exports;
mod schema;
mod settings;
mod sources;
mod stats;
mod summaries;
mod types;

pub use articles::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use exports::ExportCommit;
pub use schema::Database;
pub use types::{
    Article, ArticleQuery, DatabaseError, DayCount, ExportRecord, Ingested, NewSource,
    NormalizedArticle, Source, SourceKind, SourceUpdate, Stats, Summary,
};
