//! End-to-end passes through configuration and a relational source.

use serde_json::json;
use sorsync_config::{BackendKind, Config, ConnectionConfig, LdapSorConfig, SorConfig, SqlSorConfig};
use sorsync_reconcile::error::ErrorKind;
use sorsync_reconcile::{HashMode, QueryMode, Reconciler, SorHashExecutor, TriggerRequest};
use sorsync_registry::Database;
use sorsync_source::sql::SqlSearchExecutor;
use sqlx::SqlitePool;
use tempfile::TempDir;

const SELECT: &str = "SELECT payload AS QUERY_CONTENT, changed AS TIME_MARKER FROM people";

fn payload(key: &str, name: &str) -> String {
    json!({"QUERY": {
        "SORNAME": "hr",
        "QUERYTIME": "2024-05-01 00:00:00.000 +02:00",
        "SOROBJKEY": key,
        "hr": {"name": name},
    }})
    .to_string()
}

fn config(url: &str) -> Config {
    let statement = |clause: &str| format!("{SELECT} {clause}");
    let sor = SorConfig::new("hr", BackendKind::Sql, "warehouse").with_sql(SqlSorConfig {
        content_column: "QUERY_CONTENT".to_string(),
        time_marker_column: "TIME_MARKER".to_string(),
        hash_full: statement("ORDER BY id"),
        hash_individual: statement("WHERE id = ?"),
        hash_last_changed: None,
        query_full: statement("ORDER BY id"),
        query_individual: statement("WHERE id = ?"),
        query_last_changed: None,
    });
    let mut config = Config::default();
    config.connections.insert("warehouse".to_string(), ConnectionConfig::Sql { url: url.to_string() });
    config.sors.insert("hr".to_string(), sor);
    config
}

struct Source {
    _dir: TempDir,
    url: String,
    pool: SqlitePool,
}

impl Source {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("source.sqlite").display());
        let pool = SqlitePool::connect(&url).await.unwrap();
        sqlx::query("CREATE TABLE people (id TEXT PRIMARY KEY, payload TEXT, changed TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        Self { _dir: dir, url, pool }
    }

    async fn put(&self, id: &str, name: &str) {
        sqlx::query("INSERT OR REPLACE INTO people (id, payload, changed) VALUES (?, ?, '2024-05-01T00:00:00Z')")
            .bind(id)
            .bind(payload(id, name))
            .execute(&self.pool)
            .await
            .unwrap();
    }

    async fn remove(&self, id: &str) {
        sqlx::query("DELETE FROM people WHERE id = ?").bind(id).execute(&self.pool).await.unwrap();
    }
}

#[tokio::test]
async fn test_sync_against_relational_source() {
    let source = Source::new().await;
    source.put("1", "Ada").await;
    source.put("2", "Grace").await;
    let database = Database::connect_in_memory().await.unwrap();
    let reconciler = Reconciler::new(config(&source.url), database.clone());
    let request = TriggerRequest::new("hr");

    let first = reconciler.sync(&request).await.unwrap();
    assert_eq!(first.hash.mode, HashMode::Full);
    assert_eq!(first.hash.success_count, 2);
    assert_eq!(first.query.mode, QueryMode::Full);
    assert_eq!(first.query.successful_query_count, 2);

    source.put("2", "Grace Hopper").await;
    source.remove("1").await;
    let second = reconciler.sync(&request).await.unwrap();
    assert_eq!(second.query.mode, QueryMode::Individual);
    assert_eq!(second.query.successful_query_count, 1);
    assert_eq!(second.query.deleted_count, 1);

    let sor_id = database.sors().find("hr").await.unwrap().unwrap();
    let stored = database.objects().get(sor_id, "2").await.unwrap().unwrap();
    assert_eq!(stored.obj_json, r#"{"name":"Grace Hopper"}"#);
    assert!(database.objects().get(sor_id, "1").await.unwrap().unwrap().is_deleted);

    let third = reconciler.sync(&request.clone().full(true)).await.unwrap();
    assert_eq!(third.query.mode, QueryMode::Full);
    assert_eq!(third.query.deleted_count, 0);
}

#[tokio::test]
async fn test_unknown_sor() {
    let database = Database::connect_in_memory().await.unwrap();
    let reconciler = Reconciler::new(Config::default(), database);
    let err = reconciler.hash(&TriggerRequest::new("nope")).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Configuration("nope".to_string()));
}

#[tokio::test]
async fn test_backend_must_match_connection() {
    let mut config = config("sqlite::memory:");
    config.sors.insert(
        "people".to_string(),
        SorConfig::new("people", BackendKind::Ldap, "warehouse").with_ldap(LdapSorConfig::new("dc=example")),
    );
    let database = Database::connect_in_memory().await.unwrap();
    let reconciler = Reconciler::new(config, database);
    let err = reconciler.query(&TriggerRequest::new("people")).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Configuration("people".to_string()));
}

#[tokio::test]
async fn test_unreachable_source() {
    let database = Database::connect_in_memory().await.unwrap();
    let reconciler = Reconciler::new(config("sqlite:///nonexistent/dir/source.sqlite"), database);
    let err = reconciler.hash(&TriggerRequest::new("hr")).await.unwrap_err();
    assert_eq!(*err, ErrorKind::ContextCreation("hr".to_string()));
}

#[tokio::test]
async fn test_timestamps_without_statement_fail_before_io() {
    let source = Source::new().await;
    let mut config = config(&source.url);
    if let Some(hr) = config.sors.get_mut("hr") {
        hr.hash_timestamp_supported = true;
        hr.query_timestamp_supported = true;
    }
    let database = Database::connect_in_memory().await.unwrap();
    let reconciler = Reconciler::new(config, database.clone());

    let err = reconciler.sync(&TriggerRequest::new("hr")).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Configuration("hr".to_string()));
    assert_eq!(database.sors().find("hr").await.unwrap(), None);
}

#[tokio::test]
async fn test_missing_statement_mid_pass_is_a_configuration_error() {
    let source = Source::new().await;
    source.put("1", "Ada").await;
    let database = Database::connect_in_memory().await.unwrap();
    let executor = SqlSearchExecutor::new(source.url.as_str());
    let mut sor = config(&source.url).sors.remove("hr").unwrap();
    sor.hash_timestamp_supported = true;
    let hash = SorHashExecutor::new(&executor, &database);

    let first = hash.execute(&sor, false).await.unwrap();
    assert_eq!(first.mode, HashMode::Full);
    let err = hash.execute(&sor, false).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Configuration("hr".to_string()));
}
