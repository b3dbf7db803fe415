//! Backend-agnostic carriers for extracted entries and computed differences.

use serde::Serialize;
use std::ops::Deref;
use std::sync::OnceLock;
use time::OffsetDateTime;

/// Turns native content into the JSON text stored in the object table.
pub type Converter<N> = fn(&N) -> serde_json::Result<String>;

/// One entry read from a System of Record, with its full native content.
#[derive(Debug, Clone)]
pub struct QueryEntryContent<N> {
    sor_name: String,
    sor_obj_key: String,
    query_time: OffsetDateTime,
    native_content: N,
    full_identifier: String,
    converter: Converter<N>,
    json: OnceLock<String>,
}

impl<N: Serialize> QueryEntryContent<N> {
    pub fn new(
        sor_name: impl Into<String>,
        sor_obj_key: impl Into<String>,
        query_time: OffsetDateTime,
        native_content: N,
        full_identifier: impl Into<String>,
    ) -> Self {
        Self {
            sor_name: sor_name.into(),
            sor_obj_key: sor_obj_key.into(),
            query_time,
            native_content,
            full_identifier: full_identifier.into(),
            converter: serde_json::to_string::<N>,
            json: OnceLock::new(),
        }
    }
}

impl<N> QueryEntryContent<N> {
    /// Replace the serializer used by [`json()`](Self::json).
    pub fn with_converter(mut self, converter: Converter<N>) -> Self {
        self.converter = converter;
        self.json = OnceLock::new();
        self
    }

    pub fn sor_name(&self) -> &str {
        &self.sor_name
    }

    pub fn sor_obj_key(&self) -> &str {
        &self.sor_obj_key
    }

    pub fn query_time(&self) -> OffsetDateTime {
        self.query_time
    }

    pub fn native_content(&self) -> &N {
        &self.native_content
    }

    /// The backend's own identifier for the entry (a DN for directories).
    /// Equal to the key for relational sources.
    pub fn full_identifier(&self) -> &str {
        &self.full_identifier
    }

    /// Serialized form of the native content, derived on first access.
    pub fn json(&self) -> serde_json::Result<&str> {
        if let Some(json) = self.json.get() {
            return Ok(json);
        }
        let json = (self.converter)(&self.native_content)?;
        Ok(self.json.get_or_init(|| json))
    }

    pub fn into_native(self) -> N {
        self.native_content
    }
}

/// An entry produced by a hash scan: the content plus its change-detection
/// markers.
#[derive(Debug, Clone)]
pub struct HashEntryContent<N> {
    content: QueryEntryContent<N>,
    pub time_marker: Option<OffsetDateTime>,
    pub numeric_marker: i64,
    pub hash: i64,
}

impl<N> HashEntryContent<N> {
    pub fn new(content: QueryEntryContent<N>, time_marker: Option<OffsetDateTime>, numeric_marker: i64, hash: i64) -> Self {
        Self {
            content,
            time_marker,
            numeric_marker,
            hash,
        }
    }

    pub fn content(&self) -> &QueryEntryContent<N> {
        &self.content
    }

    pub fn into_content(self) -> QueryEntryContent<N> {
        self.content
    }
}

impl<N> Deref for HashEntryContent<N> {
    type Target = QueryEntryContent<N>;
    fn deref(&self) -> &QueryEntryContent<N> {
        &self.content
    }
}

/// A key whose checksum disagrees with the stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashDifference {
    pub sor_obj_key: String,
    /// Hash from the checksum table.
    pub hash: i64,
    /// `true` when no object row exists for the key yet.
    pub is_new: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub hash_time_marker: Option<OffsetDateTime>,
}

/// Ordered differences between the checksum and object tables of one SOR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HashDifferences {
    differences: Vec<HashDifference>,
    #[serde(with = "time::serde::rfc3339::option")]
    minimum_hash_time_marker: Option<OffsetDateTime>,
    deletion_candidates: Vec<String>,
}

impl HashDifferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a NEW or CHANGED key, keeping the minimum marker current.
    pub fn add(&mut self, difference: HashDifference) {
        if let Some(marker) = difference.hash_time_marker {
            self.minimum_hash_time_marker = Some(match self.minimum_hash_time_marker {
                Some(current) if current <= marker => current,
                _ => marker,
            });
        }
        self.differences.push(difference);
    }

    /// Record an active object whose key has no checksum row.
    pub fn add_deletion_candidate(&mut self, sor_obj_key: impl Into<String>) {
        self.deletion_candidates.push(sor_obj_key.into());
    }

    pub fn differences(&self) -> &[HashDifference] {
        &self.differences
    }

    pub fn new_keys(&self) -> impl Iterator<Item = &HashDifference> {
        self.differences.iter().filter(|d| d.is_new)
    }

    pub fn changed_keys(&self) -> impl Iterator<Item = &HashDifference> {
        self.differences.iter().filter(|d| !d.is_new)
    }

    /// Earliest time marker among the differences; `None` while empty.
    pub fn minimum_hash_time_marker(&self) -> Option<OffsetDateTime> {
        self.minimum_hash_time_marker
    }

    pub fn deletion_candidates(&self) -> &[String] {
        &self.deletion_candidates
    }

    pub fn is_empty(&self) -> bool {
        self.differences.is_empty() && self.deletion_candidates.is_empty()
    }
}
