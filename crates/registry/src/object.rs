//! The object table: mirrored content per source key, and its comparison
//! with the checksum table.

use crate::error::{ErrorKind, Result};
use crate::models::{DifferenceRow, ExistingKeys, ObjectRow, StoredObject};
use crate::{Database, HASH_VERSION, JSON_VERSION};
use exn::{OptionExt, ResultExt};
use sorsync_config::SorConfig;
use sorsync_source::{HashDifference, HashDifferences, QueryEntryContent, from_numeric_marker, numeric_marker};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct ObjectRepository {
    pool: SqlitePool,
    dry_run: bool,
}

impl From<&Database> for ObjectRepository {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone(), db.is_dry_run())
    }
}

/// Content checked and converted for storage.
struct Validated<'a> {
    json: &'a str,
    query_time: i64,
}

fn validate<'a, N>(sor: &SorConfig, key: &str, content: &'a QueryEntryContent<N>) -> Result<Validated<'a>> {
    if content.sor_name() != sor.name {
        exn::bail!(ErrorKind::Validation(format!(
            "content for {} offered to {}",
            content.sor_name(),
            sor.name
        )));
    }
    if key.is_empty() || content.sor_obj_key() != key {
        exn::bail!(ErrorKind::Validation(format!(
            "content key {:?} does not match {key:?}",
            content.sor_obj_key()
        )));
    }
    let json = content
        .json()
        .or_raise(|| ErrorKind::Validation(format!("content for {key:?} cannot be serialized")))?;
    if json == "null" {
        exn::bail!(ErrorKind::Validation(format!("content for {key:?} is null")));
    }
    Ok(Validated {
        json,
        query_time: numeric_marker(content.query_time()),
    })
}

impl ObjectRepository {
    pub fn new(pool: SqlitePool, dry_run: bool) -> Self {
        Self { pool, dry_run }
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Every key on which the checksum and object tables disagree.
    ///
    /// NEW and CHANGED keys come first, ordered by key; deletion candidates
    /// (active objects without a checksum) follow.
    #[instrument(skip(self))]
    pub async fn hash_differences(&self, sor_id: i64) -> Result<HashDifferences> {
        let rows: Vec<DifferenceRow> = sqlx::query_as(include_str!("../queries/hash_differences.sql"))
            .bind(sor_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let mut differences = HashDifferences::new();
        for row in rows {
            if row.is_deletion_candidate {
                differences.add_deletion_candidate(row.sor_obj_key);
                continue;
            }
            let hash_time_marker = match row.hash_time_marker {
                Some(micros) => Some(from_numeric_marker(micros).ok_or_raise(|| ErrorKind::InvalidData("time marker"))?),
                None => None,
            };
            differences.add(HashDifference {
                sor_obj_key: row.sor_obj_key,
                hash: row.hash.ok_or_raise(|| ErrorKind::InvalidData("checksum hash"))?,
                is_new: row.is_new,
                hash_time_marker,
            });
        }
        debug!(
            differences = differences.differences().len(),
            deletion_candidates = differences.deletion_candidates().len(),
            "computed hash differences"
        );
        Ok(differences)
    }

    /// Keys of every object row, split by deletion state, plus the checksum
    /// hash of every key, read in one transaction.
    #[instrument(skip(self))]
    pub async fn existing_keys_snapshot(&self, sor_id: i64) -> Result<ExistingKeys> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let objects: Vec<(String, bool)> = sqlx::query_as(include_str!("../queries/snapshot_objects.sql"))
            .bind(sor_id)
            .fetch_all(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let hashes: Vec<(String, i64)> = sqlx::query_as(include_str!("../queries/snapshot_checksums.sql"))
            .bind(sor_id)
            .fetch_all(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;

        let mut snapshot = ExistingKeys {
            key_to_hash: hashes.into_iter().collect(),
            ..ExistingKeys::default()
        };
        for (key, is_deleted) in objects {
            if is_deleted {
                snapshot.soft_deleted.insert(key);
            } else {
                snapshot.active.insert(key);
            }
        }
        Ok(snapshot)
    }

    pub async fn get(&self, sor_id: i64, key: &str) -> Result<Option<StoredObject>> {
        let row: Option<ObjectRow> = sqlx::query_as(include_str!("../queries/get_object.sql"))
            .bind(sor_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(StoredObject::try_from).transpose()
    }

    /// Object rows for the SOR, soft-deleted ones included.
    pub async fn count(&self, sor_id: i64) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(include_str!("../queries/count_objects.sql"))
            .bind(sor_id)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("row count"))
    }

    pub async fn is_empty(&self, sor_id: i64) -> Result<bool> {
        Ok(self.count(sor_id).await? == 0)
    }

    // =========================================================================
    // Write
    // =========================================================================

    /// Insert the first row for `key`.
    #[instrument(skip(self, sor, content), fields(sor = %sor.name))]
    pub async fn create<N>(
        &self,
        sor: &SorConfig,
        sor_id: i64,
        key: &str,
        hash: Option<i64>,
        content: &QueryEntryContent<N>,
    ) -> Result<()> {
        let validated = validate(sor, key, content)?;
        if self.dry_run {
            debug!("dry run: skipping object create");
            return Ok(());
        }
        sqlx::query(include_str!("../queries/insert_object.sql"))
            .bind(sor_id)
            .bind(key)
            .bind(validated.query_time)
            .bind(hash)
            .bind(HASH_VERSION)
            .bind(JSON_VERSION)
            .bind(validated.json)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Replace the stored content of `key`, clearing any soft delete.
    ///
    /// Fails with [`ErrorKind::ObjectVanished`] when no row exists.
    #[instrument(skip(self, sor, content), fields(sor = %sor.name))]
    pub async fn update<N>(
        &self,
        sor: &SorConfig,
        sor_id: i64,
        key: &str,
        hash: Option<i64>,
        content: &QueryEntryContent<N>,
    ) -> Result<()> {
        let validated = validate(sor, key, content)?;
        if self.dry_run {
            debug!("dry run: skipping object update");
            return Ok(());
        }
        let updated = sqlx::query(include_str!("../queries/update_object.sql"))
            .bind(validated.query_time)
            .bind(hash)
            .bind(HASH_VERSION)
            .bind(JSON_VERSION)
            .bind(validated.json)
            .bind(sor_id)
            .bind(key)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        if updated == 0 {
            exn::bail!(ErrorKind::ObjectVanished(key.to_string()));
        }
        Ok(())
    }

    /// Mark `key` deleted. Returns `false`, without failing, when there is
    /// no active row.
    #[instrument(skip(self))]
    pub async fn soft_delete(&self, sor_id: i64, key: &str) -> Result<bool> {
        let found = if self.dry_run {
            debug!("dry run: skipping soft delete");
            self.get(sor_id, key).await?.is_some_and(|object| !object.is_deleted)
        } else {
            sqlx::query(include_str!("../queries/soft_delete_object.sql"))
                .bind(sor_id)
                .bind(key)
                .execute(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected()
                > 0
        };
        if !found {
            debug!("no active object to soft delete");
        }
        Ok(found)
    }

    /// Hard-delete the checksum row of `key`. Returns whether one existed.
    #[instrument(skip(self))]
    pub async fn delete_checksum(&self, sor_id: i64, key: &str) -> Result<bool> {
        if self.dry_run {
            debug!("dry run: skipping checksum delete");
            let exists: Option<String> = sqlx::query_scalar(include_str!("../queries/get_checksum.sql"))
                .bind(sor_id)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
            return Ok(exists.is_some());
        }
        let deleted = sqlx::query(include_str!("../queries/delete_checksum.sql"))
            .bind(sor_id)
            .bind(key)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        Ok(deleted > 0)
    }
}
