//! Registry rows for Systems of Record.

use crate::Database;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

/// Maps SOR names to the numeric ids the other tables are keyed by.
#[derive(Debug, Clone)]
pub struct SorRepository {
    pool: SqlitePool,
}

impl From<&Database> for SorRepository {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}

impl SorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Id of `name`, registering the SOR on first use.
    ///
    /// Registration is metadata and happens in dry-run mode as well.
    #[instrument(skip(self))]
    pub async fn resolve_or_register(&self, name: &str) -> Result<i64> {
        if name.is_empty() {
            exn::bail!(ErrorKind::Validation("empty SOR name".to_string()));
        }
        let inserted = sqlx::query(include_str!("../queries/register_sor.sql"))
            .bind(name)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        if inserted > 0 {
            debug!("registered new system of record");
        }
        self.find(name)
            .await?
            .ok_or_raise(|| ErrorKind::SorNotFound(name.to_string()))
    }

    pub async fn find(&self, name: &str) -> Result<Option<i64>> {
        sqlx::query_scalar(include_str!("../queries/find_sor.sql"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }
}
