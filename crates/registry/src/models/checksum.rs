use crate::HASH_VERSION;
use crate::error::{Error, ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use sorsync_source::{from_numeric_marker, numeric_marker};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// The latest hash recorded for one source key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub sor_obj_key: String,
    pub hash: i64,
    pub hash_version: i64,
    pub time_marker: Option<OffsetDateTime>,
    pub numeric_marker: i64,
}

impl Checksum {
    pub fn new(sor_obj_key: impl Into<String>, hash: i64, time_marker: Option<OffsetDateTime>, numeric_marker: i64) -> Self {
        Self {
            sor_obj_key: sor_obj_key.into(),
            hash,
            hash_version: HASH_VERSION,
            time_marker,
            numeric_marker,
        }
    }

    /// Encode as one bulk-load buffer line (without the newline):
    /// `sorId|key|hash|hashVersion|timeMarker|numericMarker`.
    ///
    /// Keys containing the delimiter or a line break cannot be represented
    /// and are rejected with [`ErrorKind::Validation`].
    pub fn to_line(&self, sor_id: i64) -> Result<String> {
        if self.sor_obj_key.is_empty() || self.sor_obj_key.contains(['|', '\r', '\n']) {
            exn::bail!(ErrorKind::Validation(format!("key {:?} cannot be buffered", self.sor_obj_key)));
        }
        let marker = match self.time_marker {
            Some(marker) => marker.format(&Rfc3339).or_raise(|| ErrorKind::InvalidData("time marker"))?,
            None => String::new(),
        };
        Ok(format!(
            "{sor_id}|{}|{}|{}|{marker}|{}",
            self.sor_obj_key, self.hash, self.hash_version, self.numeric_marker
        ))
    }

    /// Decode a bulk-load buffer line into its SOR id and checksum.
    pub fn from_line(line: &str) -> Result<(i64, Self)> {
        let fields: Vec<&str> = line.split('|').collect();
        let [sor_id, key, hash, hash_version, marker, numeric] = fields[..] else {
            exn::bail!(ErrorKind::InvalidData("buffer line field count"));
        };
        if key.is_empty() {
            exn::bail!(ErrorKind::InvalidData("buffer line key"));
        }
        let time_marker = if marker.is_empty() {
            None
        } else {
            Some(OffsetDateTime::parse(marker, &Rfc3339).or_raise(|| ErrorKind::InvalidData("buffer line time marker"))?)
        };
        let checksum = Self {
            sor_obj_key: key.to_string(),
            hash: hash.parse::<i64>().or_raise(|| ErrorKind::InvalidData("buffer line hash"))?,
            hash_version: hash_version.parse::<i64>().or_raise(|| ErrorKind::InvalidData("buffer line hash version"))?,
            time_marker,
            numeric_marker: numeric.parse::<i64>().or_raise(|| ErrorKind::InvalidData("buffer line numeric marker"))?,
        };
        let sor_id = sor_id.parse::<i64>().or_raise(|| ErrorKind::InvalidData("buffer line sor id"))?;
        Ok((sor_id, checksum))
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ChecksumRow {
    pub sor_obj_key: String,
    pub hash: i64,
    pub hash_version: i64,
    pub time_marker: Option<i64>,
    pub numeric_marker: i64,
}

impl From<&Checksum> for ChecksumRow {
    fn from(checksum: &Checksum) -> Self {
        Self {
            sor_obj_key: checksum.sor_obj_key.clone(),
            hash: checksum.hash,
            hash_version: checksum.hash_version,
            time_marker: checksum.time_marker.map(numeric_marker),
            numeric_marker: checksum.numeric_marker,
        }
    }
}

impl TryFrom<ChecksumRow> for Checksum {
    type Error = Error;
    fn try_from(row: ChecksumRow) -> std::result::Result<Self, Self::Error> {
        let time_marker = match row.time_marker {
            Some(micros) => Some(from_numeric_marker(micros).ok_or_raise(|| ErrorKind::InvalidData("time marker"))?),
            None => None,
        };
        Ok(Self {
            sor_obj_key: row.sor_obj_key,
            hash: row.hash,
            hash_version: row.hash_version,
            time_marker,
            numeric_marker: row.numeric_marker,
        })
    }
}
