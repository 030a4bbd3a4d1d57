//! Integration tests for the export lifecycle: export, mark, re-export, delete.
//!
//! Each test gets its own in-memory database and scratch export directory.

use newsdesk::export::{ExportError, ExportRequest, ExportType, Exporter};
use newsdesk::storage::{ArticleQuery, Database, NormalizedArticle};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

async fn seeded(count: usize) -> Database {
    let db = Database::open(":memory:").await.unwrap();
    for i in 0..count {
        let article = NormalizedArticle::new(
            &format!("Story {}", i),
            "A short description",
            "",
            "",
            &format!("https://news.example/{}", i),
            None,
        )
        .unwrap();
        db.ingest_article(&article, None).await.unwrap();
    }
    db
}

fn exported_query(exported: bool) -> ArticleQuery {
    ArticleQuery {
        search: None,
        category: None,
        source_id: None,
        exported: Some(exported),
        limit: 100,
        offset: 0,
    }
}

#[tokio::test]
async fn test_mark_then_unexported_only_selects_the_rest() {
    let db = seeded(5).await;
    let dir = TempDir::new().unwrap();
    let exporter = Exporter::new(dir.path()).unwrap();

    let first = exporter
        .export(
            &db,
            &ExportRequest {
                limit: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(first.articles_count, 3);
    let (_, marked) = db.query_articles(&exported_query(true)).await.unwrap();
    assert_eq!(marked, 3);

    let second = exporter
        .export(
            &db,
            &ExportRequest {
                export_type: ExportType::Jsonl,
                unexported_only: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(second.articles_count, 2);
    assert!(second
        .article_ids
        .iter()
        .all(|id| !first.article_ids.contains(id)));

    // Everything is exported now
    let third = exporter
        .export(
            &db,
            &ExportRequest {
                unexported_only: true,
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(third, Err(ExportError::NothingToExport)));

    let files = exporter.list_files().await.unwrap();
    assert_eq!(files.len(), 2);
    let history = exporter.history(&db).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_export_without_marking_leaves_flags_alone() {
    let db = seeded(2).await;
    let dir = TempDir::new().unwrap();
    let exporter = Exporter::new(dir.path()).unwrap();

    let outcome = exporter
        .export(
            &db,
            &ExportRequest {
                export_type: ExportType::Urls,
                mark_exported: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.articles_count, 2);

    let (_, marked) = db.query_articles(&exported_query(true)).await.unwrap();
    assert_eq!(marked, 0);

    let body = String::from_utf8(exporter.read(&outcome.filename).await.unwrap()).unwrap();
    assert!(body.contains("https://news.example/0"));
    assert!(body.contains("https://news.example/1"));
}

#[tokio::test]
async fn test_delete_removes_file_and_history() {
    let db = seeded(1).await;
    let dir = TempDir::new().unwrap();
    let exporter = Exporter::new(dir.path()).unwrap();

    let outcome = exporter
        .export(&db, &ExportRequest::default())
        .await
        .unwrap();
    assert!(outcome.filename.starts_with("notebooklm_export_"));
    assert!(dir.path().join(&outcome.filename).exists());

    exporter.delete(&db, &outcome.filename).await.unwrap();
    assert!(!dir.path().join(&outcome.filename).exists());
    assert!(exporter.history(&db).await.unwrap().is_empty());

    let again = exporter.delete(&db, &outcome.filename).await;
    assert!(matches!(again, Err(ExportError::NotFound(_))));
    let read = exporter.read(&outcome.filename).await;
    assert!(matches!(read, Err(ExportError::NotFound(_))));
}

#[tokio::test]
async fn test_traversal_names_are_rejected() {
    let db = seeded(0).await;
    let dir = TempDir::new().unwrap();
    let exporter = Exporter::new(dir.path().join("exports")).unwrap();

    for name in ["../news.db", ".hidden", "a/b.txt"] {
        assert!(matches!(
            exporter.read(name).await,
            Err(ExportError::InvalidFilename(_))
        ));
        assert!(matches!(
            exporter.delete(&db, name).await,
            Err(ExportError::InvalidFilename(_))
        ));
    }
}
