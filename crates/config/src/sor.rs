use derive_more::Display;
use serde::{Deserialize, Serialize};

/// The kind of search backend a System of Record is read through.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[display("sql")]
    Sql,
    #[display("ldap")]
    Ldap,
}

/// Configuration for a single System of Record.
///
/// The name is taken from the key of the `sors` table in the configuration
/// file and must be unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SorConfig {
    #[serde(default)]
    pub name: String,
    pub backend: BackendKind,
    /// Name of the entry in the `connections` table.
    pub connection: String,
    /// The backend can answer "changed since" queries for full content.
    #[serde(default)]
    pub query_timestamp_supported: bool,
    /// The backend exposes a native modification timestamp for hashing.
    #[serde(default)]
    pub hash_timestamp_supported: bool,
    /// Extra field names (case-insensitive) excluded from content hashes, on
    /// top of the built-in bookkeeping fields.
    #[serde(default)]
    pub volatile_fields: Vec<String>,
    #[serde(default)]
    pub sql: Option<SqlSorConfig>,
    #[serde(default)]
    pub ldap: Option<LdapSorConfig>,
}

impl SorConfig {
    pub fn new(name: impl Into<String>, backend: BackendKind, connection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend,
            connection: connection.into(),
            query_timestamp_supported: false,
            hash_timestamp_supported: false,
            volatile_fields: Vec::new(),
            sql: None,
            ldap: None,
        }
    }

    pub fn with_timestamps(mut self, query: bool, hash: bool) -> Self {
        self.query_timestamp_supported = query;
        self.hash_timestamp_supported = hash;
        self
    }

    pub fn with_sql(mut self, sql: SqlSorConfig) -> Self {
        self.sql = Some(sql);
        self
    }

    pub fn with_ldap(mut self, ldap: LdapSorConfig) -> Self {
        self.ldap = Some(ldap);
        self
    }

    pub fn with_volatile_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.volatile_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// Statements and column conventions for a relational System of Record.
///
/// Every statement returns one row per object with the structured payload in
/// [`content_column`](Self::content_column). Individual statements bind the
/// object key as their only parameter; last-changed statements bind an
/// RFC 3339 UTC timestamp. Placeholder syntax is whatever the target database
/// expects (`?` for SQLite, `$1` for PostgreSQL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlSorConfig {
    #[serde(default = "default_content_column")]
    pub content_column: String,
    #[serde(default = "default_time_marker_column")]
    pub time_marker_column: String,
    pub hash_full: String,
    pub hash_individual: String,
    #[serde(default)]
    pub hash_last_changed: Option<String>,
    pub query_full: String,
    pub query_individual: String,
    #[serde(default)]
    pub query_last_changed: Option<String>,
}

fn default_content_column() -> String {
    "QUERY_CONTENT".to_string()
}

fn default_time_marker_column() -> String {
    "TIME_MARKER".to_string()
}

/// Search settings for a directory System of Record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapSorConfig {
    pub base_dn: String,
    #[serde(default = "default_key_attribute")]
    pub key_attribute: String,
    /// Attributes to return; empty means all user attributes.
    #[serde(default)]
    pub attributes: Vec<String>,
    /// Full directory scans routinely take minutes.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl LdapSorConfig {
    pub fn new(base_dn: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            key_attribute: default_key_attribute(),
            attributes: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_key_attribute() -> String {
    "uid".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}
