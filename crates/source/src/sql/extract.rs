//! Extraction of the `QUERY` payload convention.
//!
//! Every row carries one text column holding
//!
//! ```json
//! {"QUERY": {
//!     "SORNAME": "hr",
//!     "QUERYTIME": "2024-05-06 07:08:09.123 Z",
//!     "SOROBJKEY": "1001",
//!     "hr": {"givenName": "Ada", "dept": "ENG"}
//! }}
//! ```
//!
//! where the nested object is named after the System of Record and holds the
//! entry's opaque fields.

use crate::content::{HashEntryContent, QueryEntryContent};
use crate::error::{ExtractErrorKind, ExtractResult};
use crate::executor::EntryContentExtractor;
use crate::hash::ContentHasher;
use crate::timestamp::{numeric_marker, parse_query_time, parse_time_marker};
use exn::{OptionExt, ResultExt};
use serde_json::{Map, Value};
use sorsync_config::SorConfig;
use time::OffsetDateTime;

const ROOT_TAG: &str = "QUERY";
const SOR_NAME_TAG: &str = "SORNAME";
const QUERY_TIME_TAG: &str = "QUERYTIME";
const KEY_TAG: &str = "SOROBJKEY";

/// Native content of a relational entry: the fields nested under the SOR tag.
pub type RelationalContent = Map<String, Value>;

/// The two columns read from every relational row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationalRow {
    pub content: Option<String>,
    pub time_marker: Option<String>,
}

/// Full-content extractor for relational rows.
#[derive(Debug, Clone)]
pub struct SqlQueryExtractor {
    sor_name: String,
}

impl SqlQueryExtractor {
    pub fn new(sor: &SorConfig) -> Self {
        Self { sor_name: sor.name.clone() }
    }
}

impl EntryContentExtractor<RelationalRow> for SqlQueryExtractor {
    type Output = QueryEntryContent<RelationalContent>;

    fn extract(&self, raw: RelationalRow, _reference_time: OffsetDateTime) -> ExtractResult<Self::Output> {
        let text = raw.content.ok_or_raise(|| ExtractErrorKind::MissingContent)?;
        let mut query = root(&text)?;

        let sor_name = take_scalar(&mut query, SOR_NAME_TAG)?;
        if sor_name != self.sor_name {
            exn::bail!(ExtractErrorKind::SorNameMismatch {
                expected: self.sor_name.clone(),
                found: sor_name,
            });
        }
        let query_time = take_scalar(&mut query, QUERY_TIME_TAG)?;
        let query_time = parse_query_time(&query_time).ok_or_raise(|| ExtractErrorKind::InvalidTimestamp {
            field: QUERY_TIME_TAG.to_string(),
            value: query_time.clone(),
        })?;
        let key = take_scalar(&mut query, KEY_TAG)?;
        let native = match query.remove(&sor_name) {
            Some(Value::Object(fields)) => fields,
            _ => exn::bail!(ExtractErrorKind::MissingTag(sor_name)),
        };

        Ok(QueryEntryContent::new(sor_name, key.clone(), query_time, native, key))
    }
}

/// Hash extractor for relational rows.
#[derive(Debug, Clone)]
pub struct SqlHashExtractor {
    query: SqlQueryExtractor,
    hasher: ContentHasher,
    native_timestamps: bool,
}

impl SqlHashExtractor {
    pub fn new(sor: &SorConfig) -> Self {
        Self {
            query: SqlQueryExtractor::new(sor),
            hasher: ContentHasher::for_sor(sor),
            native_timestamps: sor.hash_timestamp_supported,
        }
    }
}

impl EntryContentExtractor<RelationalRow> for SqlHashExtractor {
    type Output = HashEntryContent<RelationalContent>;

    fn extract(&self, raw: RelationalRow, reference_time: OffsetDateTime) -> ExtractResult<Self::Output> {
        let marker = raw.time_marker.clone();
        let content = self.query.extract(raw, reference_time)?;
        let time_marker = match marker.filter(|_| self.native_timestamps) {
            Some(marker) => parse_time_marker(&marker).ok_or_raise(|| ExtractErrorKind::InvalidTimestamp {
                field: "time marker".to_string(),
                value: marker.clone(),
            })?,
            None => reference_time,
        };
        let hash = self.hasher.hash_json(&Value::Object(content.native_content().clone()));
        Ok(HashEntryContent::new(content, Some(time_marker), numeric_marker(time_marker), hash))
    }
}

fn root(text: &str) -> ExtractResult<Map<String, Value>> {
    let value: Value = serde_json::from_str(text).or_raise(|| ExtractErrorKind::MalformedPayload)?;
    let Value::Object(mut root) = value else {
        exn::bail!(ExtractErrorKind::MalformedPayload);
    };
    match root.remove(ROOT_TAG) {
        Some(Value::Object(query)) => Ok(query),
        _ => exn::bail!(ExtractErrorKind::MissingTag(ROOT_TAG.to_string())),
    }
}

/// Remove a non-empty string (or number) tag.
fn take_scalar(query: &mut Map<String, Value>, tag: &str) -> ExtractResult<String> {
    let value = match query.remove(tag) {
        Some(Value::String(value)) => value,
        Some(Value::Number(value)) => value.to_string(),
        _ => String::new(),
    };
    if value.trim().is_empty() {
        exn::bail!(ExtractErrorKind::MissingTag(tag.to_string()));
    }
    Ok(value)
}

/// Build a payload following the `QUERY` convention.
#[cfg(any(test, feature = "mock"))]
pub fn encode_payload(sor_name: &str, key: &str, query_time: OffsetDateTime, fields: &RelationalContent) -> String {
    let query_time = crate::timestamp::format_query_time(query_time).unwrap_or_default();
    serde_json::json!({
        ROOT_TAG: {
            SOR_NAME_TAG: sor_name,
            QUERY_TIME_TAG: query_time,
            KEY_TAG: key,
            sor_name: fields,
        }
    })
    .to_string()
}
