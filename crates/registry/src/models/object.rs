use crate::error::{Error, ErrorKind};
use exn::OptionExt;
use serde::Serialize;
use sorsync_source::from_numeric_marker;
use std::collections::{HashMap, HashSet};
use time::OffsetDateTime;

/// A mirrored object as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub sor_obj_key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub sor_query_time: OffsetDateTime,
    pub hash: Option<i64>,
    pub hash_version: i64,
    pub json_version: i64,
    pub obj_json: String,
    pub is_deleted: bool,
}

/// Point-in-time view of one SOR's object keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingKeys {
    pub soft_deleted: HashSet<String>,
    pub active: HashSet<String>,
    /// Checksum hash per key, for keys that have one.
    pub key_to_hash: HashMap<String, i64>,
}

impl ExistingKeys {
    /// `true` if an object row exists for `key`, deleted or not.
    pub fn contains(&self, key: &str) -> bool {
        self.active.contains(key) || self.soft_deleted.contains(key)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ObjectRow {
    pub sor_obj_key: String,
    pub sor_query_time: i64,
    pub hash: Option<i64>,
    pub hash_version: i64,
    pub json_version: i64,
    pub obj_json: String,
    pub is_deleted: bool,
}

impl TryFrom<ObjectRow> for StoredObject {
    type Error = Error;
    fn try_from(row: ObjectRow) -> Result<Self, Self::Error> {
        Ok(Self {
            sor_obj_key: row.sor_obj_key,
            sor_query_time: from_numeric_marker(row.sor_query_time).ok_or_raise(|| ErrorKind::InvalidData("query time"))?,
            hash: row.hash,
            hash_version: row.hash_version,
            json_version: row.json_version,
            obj_json: row.obj_json,
            is_deleted: row.is_deleted,
        })
    }
}

/// One row of the `hash_differences` view.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DifferenceRow {
    pub sor_obj_key: String,
    pub hash: Option<i64>,
    pub is_new: bool,
    pub hash_time_marker: Option<i64>,
    pub is_deletion_candidate: bool,
}
