//! Resolving a trigger request to a configured SOR and its backend.

use crate::error::{ErrorKind, Result};
use crate::hash::SorHashExecutor;
use crate::query::SorQueryExecutor;
use crate::result::{HashPassResult, QueryPassResult, SyncResult};
use exn::ResultExt;
use sorsync_config::{Config, ConnectionConfig, SorConfig};
use sorsync_registry::Database;
use sorsync_source::ldap::LdapSearchExecutor;
use sorsync_source::sql::SqlSearchExecutor;
use tracing::instrument;

/// A request to run passes for one SOR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    pub sor_name: String,
    /// Force FULL mode.
    pub full: bool,
}

impl TriggerRequest {
    pub fn new(sor_name: impl Into<String>) -> Self {
        Self {
            sor_name: sor_name.into(),
            full: false,
        }
    }

    pub fn full(mut self, full: bool) -> Self {
        self.full = full;
        self
    }
}

/// The configured backend for one connection.
enum Backend {
    Sql(SqlSearchExecutor),
    Ldap(LdapSearchExecutor),
}

impl From<&ConnectionConfig> for Backend {
    fn from(connection: &ConnectionConfig) -> Self {
        match connection {
            ConnectionConfig::Sql { url } => Self::Sql(SqlSearchExecutor::new(url.as_str())),
            ConnectionConfig::Ldap { url, bind_dn, bind_password } => {
                let executor = LdapSearchExecutor::new(url.as_str());
                Self::Ldap(match bind_dn {
                    Some(dn) => executor.with_bind(dn.as_str(), bind_password.as_deref().unwrap_or_default()),
                    None => executor,
                })
            },
        }
    }
}

/// Runs hash and query passes against configured SORs and one registry.
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: Config,
    database: Database,
}

impl Reconciler {
    pub fn new(config: Config, database: Database) -> Self {
        Self { config, database }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Look up the SOR and its connection, failing before any I/O.
    fn resolve(&self, sor_name: &str) -> Result<(&SorConfig, &ConnectionConfig)> {
        self.config
            .resolve(sor_name)
            .or_raise(|| ErrorKind::Configuration(sor_name.to_string()))
    }

    #[instrument(skip(self), fields(sor = %request.sor_name, full = request.full))]
    pub async fn hash(&self, request: &TriggerRequest) -> Result<HashPassResult> {
        let (sor, connection) = self.resolve(&request.sor_name)?;
        match Backend::from(connection) {
            Backend::Sql(executor) => SorHashExecutor::new(&executor, &self.database).execute(sor, request.full).await,
            Backend::Ldap(executor) => SorHashExecutor::new(&executor, &self.database).execute(sor, request.full).await,
        }
    }

    #[instrument(skip(self), fields(sor = %request.sor_name, full = request.full))]
    pub async fn query(&self, request: &TriggerRequest) -> Result<QueryPassResult> {
        let (sor, connection) = self.resolve(&request.sor_name)?;
        match Backend::from(connection) {
            Backend::Sql(executor) => SorQueryExecutor::new(&executor, &self.database).execute(sor, request.full).await,
            Backend::Ldap(executor) => SorQueryExecutor::new(&executor, &self.database).execute(sor, request.full).await,
        }
    }

    /// Hash pass, then query pass, for the same SOR.
    pub async fn sync(&self, request: &TriggerRequest) -> Result<SyncResult> {
        let hash = self.hash(request).await?;
        let query = self.query(request).await?;
        Ok(SyncResult { hash, query })
    }
}
