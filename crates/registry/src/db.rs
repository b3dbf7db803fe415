//! Registry connection and pool management.

use crate::checksum::ChecksumRepository;
use crate::error::{ErrorKind, Result};
use crate::object::ObjectRepository;
use crate::sor::SorRepository;
use exn::ResultExt;
use sorsync_config::{BulkLoad, RegistryConfig};
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// Passes for different SORs may run at the same time; one writer, a few readers.
const MAX_CONNECTIONS: u32 = 5;

/// Connection pool for the registry database.
///
/// Hands out the three repositories, all sharing the pool and the dry-run
/// flag the database was opened with.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    dry_run: bool,
    bulk_load: BulkLoad,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Query-based PRAGMAs must run on every pooled connection, not
            // only the first one handed out.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self {
            pool,
            dry_run: false,
            bulk_load: BulkLoad::default(),
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Connect to the registry at `path`, creating it if needed, and run
    /// migrations.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::base_options().filename(path.as_ref()).create_if_missing(true);
        Self::new(options, None).await
    }

    /// Open the registry described by `config`.
    #[instrument(skip(config), fields(path = %config.path.display(), dry_run = config.dry_run))]
    pub async fn open(config: &RegistryConfig) -> Result<Self> {
        Ok(Self::connect(&config.path)
            .await?
            .with_dry_run(config.dry_run)
            .with_bulk_load(config.bulk_load))
    }

    /// Connect to an in-memory registry.
    ///
    /// Not `#[cfg(test)]`: other crates use it in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // Every connection to ":memory:" is its own database.
        Self::new(options, Some(1)).await
    }

    /// Log writes instead of performing them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_bulk_load(mut self, bulk_load: BulkLoad) -> Self {
        self.bulk_load = bulk_load;
        self
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            // A bulk replace holds the write lock for the whole load; other
            // writers wait rather than fail.
            .busy_timeout(Duration::from_secs(30))
            .auto_vacuum(SqliteAutoVacuum::None)
    }

    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA wal_autocheckpoint = 1000;
                PRAGMA cache_size = -16384;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    #[instrument("performing registry migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn sors(&self) -> SorRepository {
        SorRepository::from(self)
    }

    pub fn checksums(&self) -> ChecksumRepository {
        ChecksumRepository::from(self).with_bulk_load(self.bulk_load)
    }

    pub fn objects(&self) -> ObjectRepository {
        ObjectRepository::from(self)
    }

    /// Close the pool after letting SQLite refresh its planner statistics.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Checksum;

    #[tokio::test]
    async fn test_open_applies_registry_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig {
            path: dir.path().join("nested.sqlite"),
            bulk_load: BulkLoad::RowByRow,
            dry_run: true,
        };
        let db = Database::open(&config).await.unwrap();
        assert!(config.path.exists());
        assert!(db.is_dry_run());
        assert_eq!(db.checksums().batch_rows(), 1);
        db.close().await;

        let config = RegistryConfig {
            bulk_load: BulkLoad::Batched { rows: 250 },
            dry_run: false,
            ..config
        };
        let db = Database::open(&config).await.unwrap();
        assert!(!db.is_dry_run());
        assert_eq!(db.checksums().batch_rows(), 250);
        db.close().await;
    }

    #[tokio::test]
    async fn test_accessors_share_one_registry() {
        let db = Database::connect_in_memory().await.unwrap();
        let sor_id = db.sors().resolve_or_register("hr").await.unwrap();
        db.checksums().upsert(sor_id, &Checksum::new("jdoe", 7, None, 0)).await.unwrap();

        assert_eq!(db.sors().find("hr").await.unwrap(), Some(sor_id));
        let differences = db.objects().hash_differences(sor_id).await.unwrap();
        let new: Vec<_> = differences.new_keys().map(|d| d.sor_obj_key.as_str()).collect();
        assert_eq!(new, ["jdoe"]);
        assert!(db.objects().is_empty(sor_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_dry_run_reads_but_does_not_write() {
        let db = Database::connect_in_memory().await.unwrap();
        let sor_id = db.sors().resolve_or_register("hr").await.unwrap();
        db.checksums().upsert(sor_id, &Checksum::new("kept", 1, None, 0)).await.unwrap();

        let dry = db.clone().with_dry_run(true);
        dry.checksums().upsert(sor_id, &Checksum::new("skipped", 2, None, 0)).await.unwrap();
        assert!(dry.objects().delete_checksum(sor_id, "kept").await.unwrap());
        assert!(!dry.objects().delete_checksum(sor_id, "skipped").await.unwrap());

        assert_eq!(dry.checksums().count(sor_id).await.unwrap(), 1);
        assert_eq!(dry.checksums().delta_count(sor_id).await.unwrap(), 1);
        assert!(db.checksums().get(sor_id, "kept").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_removing_a_sor_cascades() {
        let db = Database::connect_in_memory().await.unwrap();
        let hr = db.sors().resolve_or_register("hr").await.unwrap();
        let payroll = db.sors().resolve_or_register("payroll").await.unwrap();
        for sor_id in [hr, payroll] {
            db.checksums().upsert(sor_id, &Checksum::new("jdoe", 1, None, 0)).await.unwrap();
        }

        sqlx::query("DELETE FROM sors WHERE id = ?").bind(hr).execute(db.pool()).await.unwrap();
        assert_eq!(db.checksums().count(hr).await.unwrap(), 0);
        assert_eq!(db.checksums().count(payroll).await.unwrap(), 1);
        db.close().await;
    }
}
