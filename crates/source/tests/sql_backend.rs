//! Relational searches against a scratch SQLite database.

use serde_json::json;
use sorsync_config::{BackendKind, SorConfig, SqlSorConfig};
use sorsync_source::error::ErrorKind;
use sorsync_source::sql::SqlSearchExecutor;
use sorsync_source::{HashEntryContent, QueryEntryContent, SearchExecutor};
use sqlx::{AnyConnection, Connection};
use tempfile::TempDir;
use time::OffsetDateTime;
use time::macros::datetime;

const REFERENCE: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);
const SELECT: &str = "SELECT payload AS QUERY_CONTENT, changed AS TIME_MARKER FROM people";

fn payload(key: &str, name: &str) -> String {
    json!({"QUERY": {
        "SORNAME": "hr",
        "QUERYTIME": "2024-05-01 00:00:00.000 Z",
        "SOROBJKEY": key,
        "hr": {"name": name},
    }})
    .to_string()
}

fn sor(last_changed: bool) -> SorConfig {
    let statement = |clause: &str| format!("{SELECT} {clause}");
    SorConfig::new("hr", BackendKind::Sql, "warehouse")
        .with_timestamps(last_changed, last_changed)
        .with_sql(SqlSorConfig {
            content_column: "QUERY_CONTENT".to_string(),
            time_marker_column: "TIME_MARKER".to_string(),
            hash_full: statement("ORDER BY id"),
            hash_individual: statement("WHERE id = ?"),
            hash_last_changed: last_changed.then(|| statement("WHERE changed >= ? ORDER BY id")),
            query_full: statement("ORDER BY id"),
            query_individual: statement("WHERE id = ?"),
            query_last_changed: last_changed.then(|| statement("WHERE changed >= ? ORDER BY id")),
        })
}

async fn source() -> (TempDir, SqlSearchExecutor) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("source.sqlite").display());
    sqlx::any::install_default_drivers();
    let mut conn = AnyConnection::connect(&url).await.unwrap();
    sqlx::query("CREATE TABLE people (id TEXT PRIMARY KEY, payload TEXT, changed TEXT)")
        .execute(&mut conn)
        .await
        .unwrap();
    let rows = [
        ("1", Some(payload("1", "Ada")), "2024-01-01T00:00:00Z"),
        ("2", Some(payload("2", "Grace")), "2024-03-01T00:00:00Z"),
        ("3", Some("{not json".to_string()), "2024-03-02T00:00:00Z"),
        ("4", None, "2024-03-03T00:00:00Z"),
    ];
    for (id, payload, changed) in rows {
        sqlx::query("INSERT INTO people (id, payload, changed) VALUES (?, ?, ?)")
            .bind(id)
            .bind(payload)
            .bind(changed)
            .execute(&mut conn)
            .await
            .unwrap();
    }
    conn.close().await.unwrap();
    (dir, SqlSearchExecutor::new(url))
}

#[tokio::test]
async fn test_hash_full_counts_bad_rows() {
    let (_dir, executor) = source().await;
    let sor = sor(true);
    let mut context = executor.create_context(&sor).await.unwrap();
    let mut entries: Vec<HashEntryContent<_>> = Vec::new();
    let counter = executor.search_hash_full(&sor, &mut context, REFERENCE, &mut entries).await.unwrap();
    executor.close_context(context).await;

    assert_eq!(counter.success_count(), 2);
    assert_eq!(counter.fail_count(), 2);
    assert_eq!(entries[0].sor_obj_key(), "1");
    assert_eq!(entries[0].time_marker, Some(datetime!(2024-01-01 00:00 UTC)));
    assert_ne!(entries[0].hash, entries[1].hash);
}

#[tokio::test]
async fn test_individual_and_last_changed() {
    let (_dir, executor) = source().await;
    let sor = sor(true);
    let mut context = executor.create_context(&sor).await.unwrap();

    let mut found: Vec<QueryEntryContent<_>> = Vec::new();
    let counter = executor.search_query_individual(&sor, &mut context, REFERENCE, "2", &mut found).await.unwrap();
    assert_eq!(counter.success_count(), 1);
    assert_eq!(found[0].native_content()["name"], "Grace");

    let mut missing: Vec<QueryEntryContent<_>> = Vec::new();
    let counter = executor.search_query_individual(&sor, &mut context, REFERENCE, "9", &mut missing).await.unwrap();
    assert_eq!(counter.total(), 0);

    let mut changed: Vec<HashEntryContent<_>> = Vec::new();
    let since = datetime!(2024-02-01 00:00 UTC);
    let counter = executor.search_hash_last_changed(&sor, &mut context, REFERENCE, since, &mut changed).await.unwrap();
    assert_eq!(changed.iter().map(|c| c.sor_obj_key()).collect::<Vec<_>>(), ["2"]);
    assert_eq!(counter.fail_count(), 2);

    executor.close_context(context).await;
}

#[tokio::test]
async fn test_missing_last_changed_statement() {
    let (_dir, executor) = source().await;
    let sor = sor(false);
    let mut context = executor.create_context(&sor).await.unwrap();
    let mut changed: Vec<QueryEntryContent<_>> = Vec::new();
    let err = executor
        .search_query_last_changed(&sor, &mut context, REFERENCE, REFERENCE, &mut changed)
        .await
        .unwrap_err();
    assert!(matches!(&*err, ErrorKind::Configuration(_)));
    executor.close_context(context).await;
}

#[tokio::test]
async fn test_broken_statement_is_fatal() {
    let (_dir, executor) = source().await;
    let mut sor = sor(false);
    if let Some(sql) = sor.sql.as_mut() {
        sql.query_full = "SELECT nope FROM nowhere".to_string();
    }
    let mut context = executor.create_context(&sor).await.unwrap();
    let mut entries: Vec<QueryEntryContent<_>> = Vec::new();
    let err = executor.search_query_full(&sor, &mut context, REFERENCE, &mut entries).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Search);
    executor.close_context(context).await;
}

#[tokio::test]
async fn test_unreachable_source() {
    let executor = SqlSearchExecutor::new("sqlite:///nonexistent/dir/source.sqlite");
    let err = match executor.create_context(&sor(false)).await {
        Ok(_) => panic!("connected to a missing database"),
        Err(err) => err,
    };
    assert_eq!(*err, ErrorKind::Context);
}
