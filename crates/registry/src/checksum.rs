//! The checksum table: the hash side of change detection.
//!
//! A FULL hash pass replaces a SOR's checksums wholesale from a delimited
//! buffer file inside one transaction; a LAST_CHANGED pass upserts single
//! rows and records each change in the delta table.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{Checksum, ChecksumRow};
use exn::{OptionExt, ResultExt};
use sorsync_config::BulkLoad;
use sorsync_source::{from_numeric_marker, numeric_marker};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::path::Path;
use time::OffsetDateTime;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, instrument, warn};

/// SQLite's default maximum number of bound parameters per statement.
const BIND_LIMIT: usize = 32_766;
const COLUMNS: usize = 6;
const BATCH_INSERT: &str =
    "INSERT INTO checksums (sor_id, sor_obj_key, hash, hash_version, time_marker, numeric_marker) ";
// A key repeated in the buffer keeps its last row.
const BATCH_CONFLICT: &str = " ON CONFLICT (sor_id, sor_obj_key) DO UPDATE SET \
    hash = excluded.hash, hash_version = excluded.hash_version, \
    time_marker = excluded.time_marker, numeric_marker = excluded.numeric_marker";

#[derive(Debug, Clone)]
pub struct ChecksumRepository {
    pool: SqlitePool,
    dry_run: bool,
    bulk_load: BulkLoad,
}

impl From<&Database> for ChecksumRepository {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone(), db.is_dry_run())
    }
}

impl ChecksumRepository {
    pub fn new(pool: SqlitePool, dry_run: bool) -> Self {
        Self {
            pool,
            dry_run,
            bulk_load: BulkLoad::default(),
        }
    }

    pub fn with_bulk_load(mut self, bulk_load: BulkLoad) -> Self {
        self.bulk_load = bulk_load;
        self
    }

    /// Rows per INSERT statement; `1` means row by row.
    pub(crate) fn batch_rows(&self) -> usize {
        match self.bulk_load {
            BulkLoad::RowByRow => 1,
            BulkLoad::Batched { rows } => match rows.checked_mul(COLUMNS) {
                Some(params) if rows > 1 && params <= BIND_LIMIT => rows,
                _ => {
                    warn!(rows, "batch size unusable with SQLite's bind limit; loading row by row");
                    1
                },
            },
        }
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Latest time marker recorded for the SOR, the LAST_CHANGED watermark.
    pub async fn last_time_marker(&self, sor_id: i64) -> Result<Option<OffsetDateTime>> {
        let micros: Option<i64> = sqlx::query_scalar(include_str!("../queries/last_time_marker.sql"))
            .bind(sor_id)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        micros
            .map(|micros| from_numeric_marker(micros).ok_or_raise(|| ErrorKind::InvalidData("time marker")))
            .transpose()
    }

    pub async fn get(&self, sor_id: i64, key: &str) -> Result<Option<Checksum>> {
        let row: Option<ChecksumRow> = sqlx::query_as(include_str!("../queries/get_checksum.sql"))
            .bind(sor_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Checksum::try_from).transpose()
    }

    pub async fn count(&self, sor_id: i64) -> Result<u64> {
        self.scalar_count(include_str!("../queries/count_checksums.sql"), sor_id).await
    }

    /// Delta rows recorded since the last bulk replace.
    pub async fn delta_count(&self, sor_id: i64) -> Result<u64> {
        self.scalar_count(include_str!("../queries/count_checksum_deltas.sql"), sor_id).await
    }

    async fn scalar_count(&self, sql: &'static str, sor_id: i64) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(sql)
            .bind(sor_id)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("row count"))
    }

    // =========================================================================
    // Write
    // =========================================================================

    /// Insert or replace one checksum and record the change as a delta.
    #[instrument(skip(self, checksum), fields(key = %checksum.sor_obj_key))]
    pub async fn upsert(&self, sor_id: i64, checksum: &Checksum) -> Result<()> {
        if self.dry_run {
            debug!(hash = checksum.hash, "dry run: skipping checksum upsert");
            return Ok(());
        }
        let row = ChecksumRow::from(checksum);
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/upsert_checksum.sql"))
            .bind(sor_id)
            .bind(&row.sor_obj_key)
            .bind(row.hash)
            .bind(row.hash_version)
            .bind(row.time_marker)
            .bind(row.numeric_marker)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/insert_checksum_delta.sql"))
            .bind(sor_id)
            .bind(&row.sor_obj_key)
            .bind(row.hash)
            .bind(row.time_marker)
            .bind(numeric_marker(OffsetDateTime::now_utc()))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    /// Replace every checksum of the SOR with the lines of the buffer file at
    /// `path`, and clear its delta rows.
    ///
    /// Everything happens in one transaction: a malformed line, a line for
    /// another SOR or a database failure rolls back to the previous table.
    /// Returns the number of lines loaded.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn bulk_replace(&self, sor_id: i64, path: impl AsRef<Path>) -> Result<u64> {
        let file = File::open(path.as_ref()).await.or_raise(|| ErrorKind::BulkLoad)?;
        let mut lines = BufReader::new(file).lines();
        let batch_rows = self.batch_rows();

        if self.dry_run {
            let mut loaded = 0;
            while let Some(line) = lines.next_line().await.or_raise(|| ErrorKind::BulkLoad)? {
                if !line.is_empty() {
                    parse_line(&line, sor_id).or_raise(|| ErrorKind::BulkLoad)?;
                    loaded += 1;
                }
            }
            info!(rows = loaded, "dry run: checksum table left unchanged");
            return Ok(loaded);
        }

        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::BulkLoad)?;
        sqlx::query(include_str!("../queries/delete_checksums.sql"))
            .bind(sor_id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::BulkLoad)?;
        sqlx::query(include_str!("../queries/delete_checksum_deltas.sql"))
            .bind(sor_id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::BulkLoad)?;

        let mut batch = Vec::with_capacity(batch_rows);
        let mut loaded = 0;
        while let Some(line) = lines.next_line().await.or_raise(|| ErrorKind::BulkLoad)? {
            if line.is_empty() {
                continue;
            }
            batch.push(parse_line(&line, sor_id).or_raise(|| ErrorKind::BulkLoad)?);
            if batch.len() >= batch_rows {
                loaded += insert(&mut *tx, sor_id, &mut batch).await?;
            }
        }
        if !batch.is_empty() {
            loaded += insert(&mut *tx, sor_id, &mut batch).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::BulkLoad)?;
        info!(rows = loaded, batch_rows, "replaced checksum table");
        Ok(loaded)
    }
}

fn parse_line(line: &str, sor_id: i64) -> Result<ChecksumRow> {
    let (line_sor, checksum) = Checksum::from_line(line)?;
    if line_sor != sor_id {
        exn::bail!(ErrorKind::InvalidData("buffer line belongs to another SOR"));
    }
    Ok(ChecksumRow::from(&checksum))
}

/// Drain `batch` into the checksum table, as one statement when it holds
/// more than one row.
async fn insert(conn: &mut SqliteConnection, sor_id: i64, batch: &mut Vec<ChecksumRow>) -> Result<u64> {
    let rows = batch.len() as u64;
    if rows == 1 {
        for row in batch.drain(..) {
            sqlx::query(include_str!("../queries/upsert_checksum.sql"))
                .bind(sor_id)
                .bind(row.sor_obj_key)
                .bind(row.hash)
                .bind(row.hash_version)
                .bind(row.time_marker)
                .bind(row.numeric_marker)
                .execute(&mut *conn)
                .await
                .or_raise(|| ErrorKind::BulkLoad)?;
        }
        return Ok(rows);
    }
    let mut builder = QueryBuilder::<Sqlite>::new(BATCH_INSERT);
    builder.push_values(batch.drain(..), |mut values, row| {
        values
            .push_bind(sor_id)
            .push_bind(row.sor_obj_key)
            .push_bind(row.hash)
            .push_bind(row.hash_version)
            .push_bind(row.time_marker)
            .push_bind(row.numeric_marker);
    });
    builder.push(BATCH_CONFLICT);
    builder.build().execute(&mut *conn).await.or_raise(|| ErrorKind::BulkLoad)?;
    Ok(rows)
}
