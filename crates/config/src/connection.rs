use crate::sor::BackendKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection settings for a single named connection.
///
/// Several Systems of Record may share one connection (for example, multiple
/// views living in the same database).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// A relational database reachable through an `sqlx` connection URL
    /// (`sqlite://...`, `postgres://...`).
    Sql { url: String },
    /// A directory server reachable through an `ldap://` or `ldaps://` URL.
    Ldap {
        url: String,
        #[serde(default)]
        bind_dn: Option<String>,
        #[serde(default)]
        bind_password: Option<String>,
    },
}

impl ConnectionConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Sql { .. } => BackendKind::Sql,
            Self::Ldap { .. } => BackendKind::Ldap,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Sql { url } | Self::Ldap { url, .. } => url,
        }
    }
}

// Connection URLs and bind passwords carry credentials; keep them out of logs.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql { .. } => f.debug_struct("Sql").field("url", &"<redacted>").finish(),
            Self::Ldap { url, bind_dn, bind_password } => f
                .debug_struct("Ldap")
                .field("url", url)
                .field("bind_dn", bind_dn)
                .field("bind_password", &bind_password.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let sql = ConnectionConfig::Sql { url: "postgres://user:hunter2@db/hr".to_string() };
        let ldap = ConnectionConfig::Ldap {
            url: "ldaps://ldap.example.edu".to_string(),
            bind_dn: Some("cn=admin".to_string()),
            bind_password: Some("hunter2".to_string()),
        };
        assert!(!format!("{sql:?}").contains("hunter2"));
        assert!(!format!("{ldap:?}").contains("hunter2"));
        assert!(format!("{ldap:?}").contains("ldap.example.edu"));
    }

    #[test]
    fn test_kind() {
        assert_eq!(ConnectionConfig::Sql { url: String::new() }.kind(), BackendKind::Sql);
    }
}
