//! Relational Systems of Record, read through `sqlx`'s `Any` driver.

mod extract;

#[cfg(any(test, feature = "mock"))]
pub use self::extract::encode_payload;
pub use self::extract::{RelationalContent, RelationalRow, SqlHashExtractor, SqlQueryExtractor};
use crate::Counter;
use crate::content::{HashEntryContent, QueryEntryContent};
use crate::error::{ErrorKind, Result};
use crate::executor::{EntryHandler, SearchExecutor, drive};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use futures::{Stream, StreamExt};
use sorsync_config::{SorConfig, SqlSorConfig};
use sqlx::any::AnyRow;
use sqlx::{Any, AnyConnection, Connection, Row};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, instrument, warn};

impl RelationalRow {
    /// Read the content and time-marker columns. A statement without a
    /// time-marker column yields rows without markers.
    pub fn from_any_row(row: &AnyRow, settings: &SqlSorConfig) -> Result<Self> {
        let content = row
            .try_get::<Option<String>, _>(settings.content_column.as_str())
            .or_raise(|| ErrorKind::Search)?;
        let time_marker = match row.try_get::<Option<String>, _>(settings.time_marker_column.as_str()) {
            Ok(marker) => marker,
            Err(sqlx::Error::ColumnNotFound(_)) => None,
            Err(e) => return Err(e).or_raise(|| ErrorKind::Search),
        };
        Ok(Self { content, time_marker })
    }
}

/// Connection held for one pass.
pub struct SqlContext {
    connection: AnyConnection,
    settings: SqlSorConfig,
}

/// Search executor for relational sources.
///
/// Every search runs one of the SOR's configured statements; see
/// [`SqlSorConfig`] for the parameter conventions.
#[derive(Debug, Clone)]
pub struct SqlSearchExecutor {
    url: String,
}

impl SqlSearchExecutor {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Parameter bound to a statement.
enum Bind {
    None,
    Key(String),
    Since(OffsetDateTime),
}

fn rows<'c>(
    context: &'c mut SqlContext,
    statement: &'c str,
    bind: Bind,
) -> Result<impl Stream<Item = Result<RelationalRow>> + Send + 'c> {
    let mut query = sqlx::query::<Any>(statement);
    match bind {
        Bind::None => {},
        Bind::Key(key) => query = query.bind(key),
        Bind::Since(since) => query = query.bind(since.format(&Rfc3339).or_raise(|| ErrorKind::Search)?),
    }
    let settings = &context.settings;
    Ok(query.fetch(&mut context.connection).map(move |row| {
        let row = row.or_raise(|| ErrorKind::Search)?;
        RelationalRow::from_any_row(&row, settings)
    }))
}

fn last_changed(statement: &Option<String>, pass: &str) -> Result<String> {
    statement
        .clone()
        .ok_or_raise(|| ErrorKind::Configuration(format!("no {pass}_last_changed statement configured")))
}

#[async_trait]
impl SearchExecutor for SqlSearchExecutor {
    type Native = RelationalContent;
    type Context = SqlContext;

    #[instrument(skip(self, sor), fields(sor = %sor.name))]
    async fn create_context(&self, sor: &SorConfig) -> Result<SqlContext> {
        let settings = sor
            .sql
            .clone()
            .ok_or_raise(|| ErrorKind::Configuration(format!("{} has no sql section", sor.name)))?;
        sqlx::any::install_default_drivers();
        let connection = AnyConnection::connect(&self.url).await.or_raise(|| ErrorKind::Context)?;
        debug!("connected to relational source");
        Ok(SqlContext { connection, settings })
    }

    async fn close_context(&self, context: SqlContext) {
        if let Err(e) = context.connection.close().await {
            warn!(error = %e, "could not close relational connection cleanly");
        }
    }

    async fn search_hash_full(
        &self,
        sor: &SorConfig,
        context: &mut SqlContext,
        reference_time: OffsetDateTime,
        handler: &mut dyn EntryHandler<HashEntryContent<RelationalContent>>,
    ) -> Result<Counter> {
        let statement = context.settings.hash_full.clone();
        let rows = rows(context, &statement, Bind::None)?;
        drive(&sor.name, rows, &SqlHashExtractor::new(sor), reference_time, handler).await
    }

    async fn search_hash_individual(
        &self,
        sor: &SorConfig,
        context: &mut SqlContext,
        reference_time: OffsetDateTime,
        key: &str,
        handler: &mut dyn EntryHandler<HashEntryContent<RelationalContent>>,
    ) -> Result<Counter> {
        let statement = context.settings.hash_individual.clone();
        let rows = rows(context, &statement, Bind::Key(key.to_string()))?;
        drive(&sor.name, rows, &SqlHashExtractor::new(sor), reference_time, handler).await
    }

    async fn search_hash_last_changed(
        &self,
        sor: &SorConfig,
        context: &mut SqlContext,
        reference_time: OffsetDateTime,
        since: OffsetDateTime,
        handler: &mut dyn EntryHandler<HashEntryContent<RelationalContent>>,
    ) -> Result<Counter> {
        let statement = last_changed(&context.settings.hash_last_changed, "hash")?;
        let rows = rows(context, &statement, Bind::Since(since))?;
        drive(&sor.name, rows, &SqlHashExtractor::new(sor), reference_time, handler).await
    }

    async fn search_query_full(
        &self,
        sor: &SorConfig,
        context: &mut SqlContext,
        reference_time: OffsetDateTime,
        handler: &mut dyn EntryHandler<QueryEntryContent<RelationalContent>>,
    ) -> Result<Counter> {
        let statement = context.settings.query_full.clone();
        let rows = rows(context, &statement, Bind::None)?;
        drive(&sor.name, rows, &SqlQueryExtractor::new(sor), reference_time, handler).await
    }

    async fn search_query_individual(
        &self,
        sor: &SorConfig,
        context: &mut SqlContext,
        reference_time: OffsetDateTime,
        key: &str,
        handler: &mut dyn EntryHandler<QueryEntryContent<RelationalContent>>,
    ) -> Result<Counter> {
        let statement = context.settings.query_individual.clone();
        let rows = rows(context, &statement, Bind::Key(key.to_string()))?;
        drive(&sor.name, rows, &SqlQueryExtractor::new(sor), reference_time, handler).await
    }

    async fn search_query_last_changed(
        &self,
        sor: &SorConfig,
        context: &mut SqlContext,
        reference_time: OffsetDateTime,
        since: OffsetDateTime,
        handler: &mut dyn EntryHandler<QueryEntryContent<RelationalContent>>,
    ) -> Result<Counter> {
        let statement = last_changed(&context.settings.query_last_changed, "query")?;
        let rows = rows(context, &statement, Bind::Since(since))?;
        drive(&sor.name, rows, &SqlQueryExtractor::new(sor), reference_time, handler).await
    }
}
