#![allow(dead_code)]

use serde_json::{Value, json};
use sorsync_config::{BackendKind, SorConfig};
use sorsync_reconcile::{HashPassResult, QueryPassResult, SorHashExecutor, SorQueryExecutor};
use sorsync_registry::Database;
use sorsync_source::MockSearchExecutor;
use time::OffsetDateTime;
use time::macros::datetime;

pub const T0: OffsetDateTime = datetime!(2024-01-01 00:00 UTC);
pub const T1: OffsetDateTime = datetime!(2024-02-01 00:00 UTC);
pub const T2: OffsetDateTime = datetime!(2024-03-01 00:00 UTC);

/// The `hr` SOR; `timestamps` enables both changed-since searches.
pub fn sor(timestamps: bool) -> SorConfig {
    SorConfig::new("hr", BackendKind::Sql, "mock").with_timestamps(timestamps, timestamps)
}

pub fn person(key: &str, name: &str) -> Value {
    json!({"id": key, "name": name})
}

pub fn put(source: &MockSearchExecutor, key: &str, name: &str, modified: OffsetDateTime) {
    source.put("hr", key, person(key, name), modified);
}

pub async fn registry() -> (Database, i64) {
    let db = Database::connect_in_memory().await.unwrap();
    let sor_id = db.sors().resolve_or_register("hr").await.unwrap();
    (db, sor_id)
}

pub async fn hash(source: &MockSearchExecutor, db: &Database, sor: &SorConfig, full: bool) -> HashPassResult {
    SorHashExecutor::new(source, db).execute(sor, full).await.unwrap()
}

pub async fn query(source: &MockSearchExecutor, db: &Database, sor: &SorConfig, full: bool) -> QueryPassResult {
    SorQueryExecutor::new(source, db).execute(sor, full).await.unwrap()
}

/// Stored JSON of `key`, if an active object exists.
pub async fn active(db: &Database, sor_id: i64, key: &str) -> Option<Value> {
    let object = db.objects().get(sor_id, key).await.unwrap()?;
    (!object.is_deleted).then(|| serde_json::from_str(&object.obj_json).unwrap())
}
