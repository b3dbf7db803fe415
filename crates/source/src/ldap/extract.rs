use super::dn::DefinitiveId;
use super::filter::{CREATE_TIMESTAMP, MODIFY_TIMESTAMP};
use crate::content::{HashEntryContent, QueryEntryContent};
use crate::error::{ExtractErrorKind, ExtractResult};
use crate::executor::EntryContentExtractor;
use crate::hash::ContentHasher;
use crate::timestamp::{numeric_marker, parse_generalized_time};
use exn::OptionExt;
use ldap3::SearchEntry;
use sorsync_config::SorConfig;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Native content of a directory entry: attribute name to values.
pub type DirectoryContent = BTreeMap<String, Vec<String>>;

/// One entry returned by a directory search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: DirectoryContent,
}

impl DirectoryEntry {
    /// Values of `name`, matched case-insensitively.
    pub fn values(&self, name: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(attribute, _)| attribute.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }
}

impl From<SearchEntry> for DirectoryEntry {
    fn from(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attributes: entry.attrs.into_iter().collect(),
        }
    }
}

/// Full-content extractor for directory entries.
#[derive(Debug, Clone)]
pub struct LdapQueryExtractor {
    sor_name: String,
    key_attribute: String,
}

impl LdapQueryExtractor {
    pub fn new(sor: &SorConfig) -> Self {
        let key_attribute = sor.ldap.as_ref().map(|l| l.key_attribute.clone()).unwrap_or_else(|| "uid".to_string());
        Self {
            sor_name: sor.name.clone(),
            key_attribute,
        }
    }
}

impl EntryContentExtractor<DirectoryEntry> for LdapQueryExtractor {
    type Output = QueryEntryContent<DirectoryContent>;

    fn extract(&self, raw: DirectoryEntry, reference_time: OffsetDateTime) -> ExtractResult<Self::Output> {
        let key = match DefinitiveId::resolve(&raw.dn, &self.key_attribute, raw.values(&self.key_attribute)) {
            DefinitiveId::Found(key) => key,
            unresolved => exn::bail!(ExtractErrorKind::AmbiguousId {
                dn: raw.dn,
                resolution: unresolved.to_string(),
            }),
        };
        Ok(QueryEntryContent::new(self.sor_name.clone(), key, reference_time, raw.attributes, raw.dn))
    }
}

/// Hash extractor for directory entries.
#[derive(Debug, Clone)]
pub struct LdapHashExtractor {
    query: LdapQueryExtractor,
    hasher: ContentHasher,
    native_timestamps: bool,
}

impl LdapHashExtractor {
    pub fn new(sor: &SorConfig) -> Self {
        Self {
            query: LdapQueryExtractor::new(sor),
            hasher: ContentHasher::for_sor(sor),
            native_timestamps: sor.hash_timestamp_supported,
        }
    }

    /// `modifyTimestamp`, falling back to `createTimestamp`.
    fn native_marker(&self, entry: &DirectoryEntry) -> ExtractResult<Option<OffsetDateTime>> {
        let Some((attribute, value)) = [MODIFY_TIMESTAMP, CREATE_TIMESTAMP]
            .into_iter()
            .find_map(|attribute| entry.values(attribute).first().map(|value| (attribute, value)))
        else {
            return Ok(None);
        };
        parse_generalized_time(value)
            .ok_or_raise(|| ExtractErrorKind::InvalidTimestamp {
                field: attribute.to_string(),
                value: value.clone(),
            })
            .map(Some)
    }
}

impl EntryContentExtractor<DirectoryEntry> for LdapHashExtractor {
    type Output = HashEntryContent<DirectoryContent>;

    fn extract(&self, raw: DirectoryEntry, reference_time: OffsetDateTime) -> ExtractResult<Self::Output> {
        let native = if self.native_timestamps {
            self.native_marker(&raw)?
        } else {
            None
        };
        let time_marker = native.unwrap_or(reference_time);
        let content = self.query.extract(raw, reference_time)?;
        let hash = self.hasher.hash_attributes(content.native_content());
        Ok(HashEntryContent::new(content, Some(time_marker), numeric_marker(time_marker), hash))
    }
}
