//! Directory Systems of Record, read through `ldap3`.
//!
//! Entries are person objects under the configured base DN. An entry's key
//! is only accepted when the key attribute and the DN's leading RDN agree
//! (see [`DefinitiveId`]).

mod dn;
mod extract;
mod filter;

pub use self::dn::{DefinitiveId, dn_value};
pub use self::extract::{DirectoryContent, DirectoryEntry, LdapHashExtractor, LdapQueryExtractor};
use crate::Counter;
use crate::content::{HashEntryContent, QueryEntryContent};
use crate::error::{ErrorKind, Result};
use crate::executor::{EntryHandler, SearchExecutor, drive};
use async_stream::try_stream;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use futures::Stream;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use sorsync_config::{LdapSorConfig, SorConfig};
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound directory session held for one pass.
pub struct LdapContext {
    ldap: Ldap,
    settings: LdapSorConfig,
    with_timestamps: bool,
}

/// Search executor for directory sources.
#[derive(Clone)]
pub struct LdapSearchExecutor {
    url: String,
    bind: Option<(String, String)>,
}

impl LdapSearchExecutor {
    /// Anonymous access to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bind: None,
        }
    }

    /// Simple bind as `dn` before searching.
    pub fn with_bind(mut self, dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.bind = Some((dn.into(), password.into()));
        self
    }
}

impl fmt::Debug for LdapSearchExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapSearchExecutor")
            .field("url", &self.url)
            .field("bind_dn", &self.bind.as_ref().map(|(dn, _)| dn))
            .finish()
    }
}

fn entries<'a>(context: &'a mut LdapContext, filter: String) -> impl Stream<Item = Result<DirectoryEntry>> + Send + 'a {
    try_stream! {
        let attributes = filter::attributes(&context.settings, context.with_timestamps);
        let timeout = Duration::from_secs(context.settings.timeout_secs);
        debug!(base = %context.settings.base_dn, %filter, "searching directory");
        let mut search = context
            .ldap
            .with_timeout(timeout)
            .streaming_search(&context.settings.base_dn, Scope::Subtree, &filter, attributes)
            .await
            .or_raise(|| ErrorKind::Search)?;
        while let Some(entry) = search.next().await.or_raise(|| ErrorKind::Search)? {
            if entry.is_ref() || entry.is_intermediate() {
                continue;
            }
            yield DirectoryEntry::from(SearchEntry::construct(entry));
        }
        search.finish().await.success().or_raise(|| ErrorKind::Search)?;
    }
}

fn since_filter(context: &LdapContext, since: OffsetDateTime) -> Result<String> {
    filter::last_changed(&context.settings.key_attribute, since)
        .ok_or_raise(|| ErrorKind::Configuration(format!("cannot format timestamp {since}")))
}

#[async_trait]
impl SearchExecutor for LdapSearchExecutor {
    type Native = DirectoryContent;
    type Context = LdapContext;

    #[instrument(skip(self, sor), fields(sor = %sor.name, url = %self.url))]
    async fn create_context(&self, sor: &SorConfig) -> Result<LdapContext> {
        let settings = sor
            .ldap
            .clone()
            .ok_or_raise(|| ErrorKind::Configuration(format!("{} has no ldap section", sor.name)))?;
        let connection = LdapConnSettings::new().set_conn_timeout(CONNECT_TIMEOUT);
        let (conn, mut ldap) =
            LdapConnAsync::with_settings(connection, &self.url).await.or_raise(|| ErrorKind::Context)?;
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "directory connection driver failed");
            }
        });
        if let Some((dn, password)) = &self.bind {
            ldap.simple_bind(dn, password)
                .await
                .or_raise(|| ErrorKind::Context)?
                .success()
                .or_raise(|| ErrorKind::Context)?;
            debug!(bind_dn = %dn, "bound to directory");
        }
        Ok(LdapContext {
            ldap,
            settings,
            with_timestamps: sor.hash_timestamp_supported || sor.query_timestamp_supported,
        })
    }

    async fn close_context(&self, mut context: LdapContext) {
        if let Err(e) = context.ldap.unbind().await {
            warn!(error = %e, "could not unbind from directory cleanly");
        }
    }

    async fn search_hash_full(
        &self,
        sor: &SorConfig,
        context: &mut LdapContext,
        reference_time: OffsetDateTime,
        handler: &mut dyn EntryHandler<HashEntryContent<DirectoryContent>>,
    ) -> Result<Counter> {
        let filter = filter::full(&context.settings.key_attribute);
        drive(&sor.name, entries(context, filter), &LdapHashExtractor::new(sor), reference_time, handler).await
    }

    async fn search_hash_individual(
        &self,
        sor: &SorConfig,
        context: &mut LdapContext,
        reference_time: OffsetDateTime,
        key: &str,
        handler: &mut dyn EntryHandler<HashEntryContent<DirectoryContent>>,
    ) -> Result<Counter> {
        let filter = filter::individual(&context.settings.key_attribute, key);
        drive(&sor.name, entries(context, filter), &LdapHashExtractor::new(sor), reference_time, handler).await
    }

    async fn search_hash_last_changed(
        &self,
        sor: &SorConfig,
        context: &mut LdapContext,
        reference_time: OffsetDateTime,
        since: OffsetDateTime,
        handler: &mut dyn EntryHandler<HashEntryContent<DirectoryContent>>,
    ) -> Result<Counter> {
        let filter = since_filter(context, since)?;
        drive(&sor.name, entries(context, filter), &LdapHashExtractor::new(sor), reference_time, handler).await
    }

    async fn search_query_full(
        &self,
        sor: &SorConfig,
        context: &mut LdapContext,
        reference_time: OffsetDateTime,
        handler: &mut dyn EntryHandler<QueryEntryContent<DirectoryContent>>,
    ) -> Result<Counter> {
        let filter = filter::full(&context.settings.key_attribute);
        drive(&sor.name, entries(context, filter), &LdapQueryExtractor::new(sor), reference_time, handler).await
    }

    async fn search_query_individual(
        &self,
        sor: &SorConfig,
        context: &mut LdapContext,
        reference_time: OffsetDateTime,
        key: &str,
        handler: &mut dyn EntryHandler<QueryEntryContent<DirectoryContent>>,
    ) -> Result<Counter> {
        let filter = filter::individual(&context.settings.key_attribute, key);
        drive(&sor.name, entries(context, filter), &LdapQueryExtractor::new(sor), reference_time, handler).await
    }

    async fn search_query_last_changed(
        &self,
        sor: &SorConfig,
        context: &mut LdapContext,
        reference_time: OffsetDateTime,
        since: OffsetDateTime,
        handler: &mut dyn EntryHandler<QueryEntryContent<DirectoryContent>>,
    ) -> Result<Counter> {
        let filter = since_filter(context, since)?;
        drive(&sor.name, entries(context, filter), &LdapQueryExtractor::new(sor), reference_time, handler).await
    }
}
