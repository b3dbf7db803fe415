//! The backend adapter contract and the scan loop shared by every backend.

use crate::Counter;
use crate::content::{HashEntryContent, QueryEntryContent};
use crate::error::{ErrorKind, ExtractResult, Result};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use serde::Serialize;
use sorsync_config::SorConfig;
use std::pin::pin;
use time::OffsetDateTime;
use tracing::{trace, warn};

/// Converts one raw backend row or entry into typed content.
pub trait EntryContentExtractor<R> {
    type Output;

    /// `reference_time` is the start of the pass, used wherever the backend
    /// has no timestamp of its own.
    fn extract(&self, raw: R, reference_time: OffsetDateTime) -> ExtractResult<Self::Output>;
}

/// What a handler did with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The entry was processed; counted as a success.
    Persisted,
    /// The entry was deliberately ignored; not counted.
    Skipped,
}

/// Per-entry callback invoked by a search for every extracted entry.
///
/// Returning an error counts the entry as a failure and the scan continues,
/// unless the error is [`ErrorKind::Aborted`], which ends the scan.
#[async_trait]
pub trait EntryHandler<C>: Send {
    async fn handle(&mut self, content: C) -> Result<Disposition>;
}

/// Collects every entry.
#[async_trait]
impl<C: Send + 'static> EntryHandler<C> for Vec<C> {
    async fn handle(&mut self, content: C) -> Result<Disposition> {
        self.push(content);
        Ok(Disposition::Persisted)
    }
}

/// A backend able to answer the six searches reconciliation needs.
///
/// Each search streams native rows, maps them through the backend's
/// extractors and hands every extracted entry to `handler`. Entries that fail
/// extraction or handling are tallied in the returned [`Counter`]; only
/// failures of the search itself are returned as errors.
#[async_trait]
pub trait SearchExecutor: Send + Sync {
    /// The backend's native content representation.
    type Native: Serialize + Send + Sync + 'static;
    /// Connection state held for the duration of one pass.
    type Context: Send;

    async fn create_context(&self, sor: &SorConfig) -> Result<Self::Context>;

    /// Release the context. Failures are logged, never returned: a pass result
    /// must not be lost to a failed disconnect.
    async fn close_context(&self, context: Self::Context);

    async fn search_hash_full(
        &self,
        sor: &SorConfig,
        context: &mut Self::Context,
        reference_time: OffsetDateTime,
        handler: &mut dyn EntryHandler<HashEntryContent<Self::Native>>,
    ) -> Result<Counter>;

    async fn search_hash_individual(
        &self,
        sor: &SorConfig,
        context: &mut Self::Context,
        reference_time: OffsetDateTime,
        key: &str,
        handler: &mut dyn EntryHandler<HashEntryContent<Self::Native>>,
    ) -> Result<Counter>;

    async fn search_hash_last_changed(
        &self,
        sor: &SorConfig,
        context: &mut Self::Context,
        reference_time: OffsetDateTime,
        since: OffsetDateTime,
        handler: &mut dyn EntryHandler<HashEntryContent<Self::Native>>,
    ) -> Result<Counter>;

    async fn search_query_full(
        &self,
        sor: &SorConfig,
        context: &mut Self::Context,
        reference_time: OffsetDateTime,
        handler: &mut dyn EntryHandler<QueryEntryContent<Self::Native>>,
    ) -> Result<Counter>;

    async fn search_query_individual(
        &self,
        sor: &SorConfig,
        context: &mut Self::Context,
        reference_time: OffsetDateTime,
        key: &str,
        handler: &mut dyn EntryHandler<QueryEntryContent<Self::Native>>,
    ) -> Result<Counter>;

    async fn search_query_last_changed(
        &self,
        sor: &SorConfig,
        context: &mut Self::Context,
        reference_time: OffsetDateTime,
        since: OffsetDateTime,
        handler: &mut dyn EntryHandler<QueryEntryContent<Self::Native>>,
    ) -> Result<Counter>;
}

/// Pull every raw row from `rows`, extract it and pass it to `handler`.
///
/// A failing row never ends the scan; an error from the stream itself or an
/// [`ErrorKind::Aborted`] handler error does.
pub async fn drive<R, X>(
    sor_name: &str,
    rows: impl Stream<Item = Result<R>> + Send,
    extractor: &X,
    reference_time: OffsetDateTime,
    handler: &mut dyn EntryHandler<X::Output>,
) -> Result<Counter>
where
    R: Send,
    X: EntryContentExtractor<R> + Sync,
    X::Output: Send,
{
    let mut rows = pin!(rows);
    let mut counter = Counter::new();
    while let Some(raw) = rows.try_next().await? {
        let content = match extractor.extract(raw, reference_time) {
            Ok(content) => content,
            Err(err) => {
                warn!(sor = sor_name, error = ?err, "could not extract entry");
                counter.increment_fail();
                continue;
            },
        };
        match handler.handle(content).await {
            Ok(Disposition::Persisted) => counter.increment_success(),
            Ok(Disposition::Skipped) => trace!(sor = sor_name, "entry skipped by handler"),
            Err(err) if matches!(&*err, ErrorKind::Aborted) => return Err(err),
            Err(err) => {
                warn!(sor = sor_name, error = ?err, "could not handle entry");
                counter.increment_fail();
            },
        }
    }
    Ok(counter)
}
