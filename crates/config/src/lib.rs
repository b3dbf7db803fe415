//! Configuration loading and validation.
//!
//! Configuration is layered with [`figment`]: built-in defaults, then an
//! optional TOML/YAML/JSON file, then environment variables prefixed with
//! `SORSYNC_` (nested keys separated by `__`, e.g. `SORSYNC_REGISTRY__PATH`).
//!
//! ```toml
//! [registry]
//! path = "/var/lib/sorsync/registry.sqlite"
//!
//! [connections.warehouse]
//! kind = "sql"
//! url = "postgres://sorsync@warehouse/hr"
//!
//! [sors.hr]
//! backend = "sql"
//! connection = "warehouse"
//! query_timestamp_supported = true
//! hash_timestamp_supported = true
//!
//! [sors.hr.sql]
//! hash_full = "SELECT QUERY_CONTENT, TIME_MARKER FROM hr_people"
//! # ...
//! ```

mod connection;
pub mod error;
mod registry;
mod sor;

pub use crate::connection::ConnectionConfig;
pub use crate::registry::{BulkLoad, RegistryConfig};
pub use crate::sor::{BackendKind, LdapSorConfig, SorConfig, SqlSorConfig};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::instrument;

const ENV_PREFIX: &str = "SORSYNC_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    pub sors: BTreeMap<String, SorConfig>,
}

impl Config {
    /// Load configuration from `path` (or the platform default location, if it
    /// exists) merged over defaults and under environment overrides.
    #[instrument]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(default_path);
        Self::from_figment(Self::figment(path.as_deref()))
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        for (name, sor) in config.sors.iter_mut() {
            sor.name = name.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Check that every System of Record can be resolved with [`resolve()`](Self::resolve).
    pub fn validate(&self) -> Result<()> {
        for name in self.sors.keys() {
            self.resolve(name)?;
        }
        Ok(())
    }

    /// The System of Record and its connection, provided the connection is of
    /// the matching backend kind and the SOR carries every setting its
    /// timestamp flags rely on.
    pub fn resolve(&self, name: &str) -> Result<(&SorConfig, &ConnectionConfig)> {
        let sor = self.sor(name)?;
        let connection = self.connection(&sor.connection)?;
        if connection.kind() != sor.backend {
            exn::bail!(ErrorKind::Invalid(format!(
                "system of record {name} uses a {} backend but connection {} is {}",
                sor.backend,
                sor.connection,
                connection.kind()
            )));
        }
        match sor.backend {
            BackendKind::Sql => {
                let Some(sql) = &sor.sql else {
                    exn::bail!(ErrorKind::Invalid(format!("system of record {name} is missing its [sql] section")));
                };
                if sor.hash_timestamp_supported && sql.hash_last_changed.is_none() {
                    exn::bail!(ErrorKind::Invalid(format!(
                        "system of record {name} supports hash timestamps but has no hash_last_changed statement"
                    )));
                }
                if sor.query_timestamp_supported && sql.query_last_changed.is_none() {
                    exn::bail!(ErrorKind::Invalid(format!(
                        "system of record {name} supports query timestamps but has no query_last_changed statement"
                    )));
                }
            },
            BackendKind::Ldap if sor.ldap.is_none() => {
                exn::bail!(ErrorKind::Invalid(format!("system of record {name} is missing its [ldap] section")));
            },
            BackendKind::Ldap => {},
        }
        Ok((sor, connection))
    }

    pub fn sor(&self, name: &str) -> Result<&SorConfig> {
        self.sors.get(name).ok_or_raise(|| ErrorKind::UnknownSor(name.to_string()))
    }

    pub fn connection(&self, name: &str) -> Result<&ConnectionConfig> {
        self.connections.get(name).ok_or_raise(|| ErrorKind::UnknownConnection(name.to_string()))
    }
}

/// `config.toml` inside the platform configuration directory, if present.
fn default_path() -> Option<PathBuf> {
    let dirs = ProjectDirs::from("", "", "sorsync")?;
    let path = dirs.config_dir().join("config.toml");
    path.exists().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    const TOML: &str = r#"
        [registry]
        path = "registry.sqlite"

        [connections.warehouse]
        kind = "sql"
        url = "sqlite://warehouse.sqlite"

        [connections.directory]
        kind = "ldap"
        url = "ldap://localhost:389"
        bind_dn = "cn=admin,dc=example,dc=edu"

        [sors.hr]
        backend = "sql"
        connection = "warehouse"
        hash_timestamp_supported = true

        [sors.hr.sql]
        hash_full = "SELECT QUERY_CONTENT FROM hr"
        hash_individual = "SELECT QUERY_CONTENT FROM hr WHERE id = ?"
        hash_last_changed = "SELECT QUERY_CONTENT, TIME_MARKER FROM hr WHERE TIME_MARKER >= ?"
        query_full = "SELECT QUERY_CONTENT FROM hr"
        query_individual = "SELECT QUERY_CONTENT FROM hr WHERE id = ?"

        [sors.people]
        backend = "ldap"
        connection = "directory"

        [sors.people.ldap]
        base_dn = "ou=people,dc=example,dc=edu"
    "#;

    fn load_jailed(jail: &Jail, file: &str) -> std::result::Result<Config, figment::Error> {
        Config::load(Some(&jail.directory().join(file))).map_err(|e| figment::Error::from(format!("{e:?}")))
    }

    #[test]
    fn test_load_toml() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", TOML)?;
            let config = load_jailed(jail, "config.toml")?;
            let hr = config.sor("hr").unwrap();
            assert_eq!(hr.name, "hr");
            assert!(hr.hash_timestamp_supported);
            assert!(!hr.query_timestamp_supported);
            assert_eq!(hr.sql.as_ref().unwrap().content_column, "QUERY_CONTENT");
            let people = config.sor("people").unwrap();
            assert_eq!(people.ldap.as_ref().unwrap().key_attribute, "uid");
            assert_eq!(config.registry.bulk_load, BulkLoad::Batched { rows: 500 });
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", TOML)?;
            jail.set_env("SORSYNC_REGISTRY__PATH", "/tmp/elsewhere.sqlite");
            let config = load_jailed(jail, "config.toml")?;
            assert_eq!(config.registry.path, PathBuf::from("/tmp/elsewhere.sqlite"));
            Ok(())
        });
    }

    #[test]
    fn test_unknown_sor() {
        let config = Config::default();
        let err = config.sor("nope").unwrap_err();
        assert_eq!(*err, ErrorKind::UnknownSor("nope".to_string()));
    }

    #[test]
    fn test_validate_rejects_kind_mismatch() {
        let mut config = Config::default();
        config.connections.insert("warehouse".to_string(), ConnectionConfig::Sql { url: "sqlite::memory:".to_string() });
        config.sors.insert(
            "people".to_string(),
            SorConfig::new("people", BackendKind::Ldap, "warehouse").with_ldap(LdapSorConfig::new("dc=example")),
        );
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_validate_rejects_missing_section() {
        let mut config = Config::default();
        config.connections.insert("warehouse".to_string(), ConnectionConfig::Sql { url: "sqlite::memory:".to_string() });
        config.sors.insert("hr".to_string(), SorConfig::new("hr", BackendKind::Sql, "warehouse"));
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    fn statements(hash_last_changed: Option<&str>, query_last_changed: Option<&str>) -> SqlSorConfig {
        SqlSorConfig {
            content_column: "QUERY_CONTENT".to_string(),
            time_marker_column: "TIME_MARKER".to_string(),
            hash_full: "SELECT QUERY_CONTENT FROM hr".to_string(),
            hash_individual: "SELECT QUERY_CONTENT FROM hr WHERE id = ?".to_string(),
            hash_last_changed: hash_last_changed.map(str::to_string),
            query_full: "SELECT QUERY_CONTENT FROM hr".to_string(),
            query_individual: "SELECT QUERY_CONTENT FROM hr WHERE id = ?".to_string(),
            query_last_changed: query_last_changed.map(str::to_string),
        }
    }

    #[rstest]
    #[case::no_timestamps(false, false, None, None, true)]
    #[case::hash_statement_present(false, true, Some("SELECT 1"), None, true)]
    #[case::hash_statement_missing(false, true, None, Some("SELECT 1"), false)]
    #[case::query_statement_present(true, false, None, Some("SELECT 1"), true)]
    #[case::query_statement_missing(true, false, Some("SELECT 1"), None, false)]
    #[case::both_missing(true, true, None, None, false)]
    fn test_validate_last_changed_statements(
        #[case] query_timestamps: bool,
        #[case] hash_timestamps: bool,
        #[case] hash_last_changed: Option<&str>,
        #[case] query_last_changed: Option<&str>,
        #[case] valid: bool,
    ) {
        let mut config = Config::default();
        config.connections.insert("warehouse".to_string(), ConnectionConfig::Sql { url: "sqlite::memory:".to_string() });
        config.sors.insert(
            "hr".to_string(),
            SorConfig::new("hr", BackendKind::Sql, "warehouse")
                .with_timestamps(query_timestamps, hash_timestamps)
                .with_sql(statements(hash_last_changed, query_last_changed)),
        );
        match config.validate() {
            Ok(()) => assert!(valid, "accepted a SOR without its last-changed statement"),
            Err(err) => {
                assert!(!valid, "rejected a complete SOR: {err:?}");
                assert!(matches!(&*err, ErrorKind::Invalid(_)));
            },
        }
        assert_eq!(config.resolve("hr").is_ok(), valid);
    }

    #[test]
    fn test_validate_rejects_unknown_connection() {
        let mut config = Config::default();
        config.sors.insert("hr".to_string(), SorConfig::new("hr", BackendKind::Sql, "missing"));
        let err = config.validate().unwrap_err();
        assert_eq!(*err, ErrorKind::UnknownConnection("missing".to_string()));
    }
}
