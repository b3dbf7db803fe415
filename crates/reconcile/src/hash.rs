//! The hash pass: refresh a SOR's checksum table.

use crate::error::{ErrorKind, Result, raise_source};
use crate::result::{HashMode, HashPassResult};
use async_trait::async_trait;
use exn::ResultExt;
use sorsync_config::SorConfig;
use sorsync_registry::{Checksum, ChecksumRepository, Database, SorRepository};
use sorsync_source::error::{ErrorKind as SourceErrorKind, ExtractErrorKind, Result as SourceResult};
use sorsync_source::{Counter, Disposition, EntryHandler, HashEntryContent, SearchExecutor};
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

/// Writes one buffer line per hashed entry.
struct ScratchWriter {
    sor_id: i64,
    out: BufWriter<tokio::fs::File>,
}

#[async_trait]
impl<N: Send + 'static> EntryHandler<HashEntryContent<N>> for ScratchWriter {
    async fn handle(&mut self, entry: HashEntryContent<N>) -> SourceResult<Disposition> {
        let checksum = Checksum::new(entry.sor_obj_key(), entry.hash, entry.time_marker, entry.numeric_marker);
        let Ok(line) = checksum.to_line(self.sor_id) else {
            let key = checksum.sor_obj_key;
            return Err(exn::Exn::from(ExtractErrorKind::UnrepresentableKey(key))).or_raise(|| SourceErrorKind::Handler);
        };
        self.out.write_all(line.as_bytes()).await.or_raise(|| SourceErrorKind::Aborted)?;
        self.out.write_all(b"\n").await.or_raise(|| SourceErrorKind::Aborted)?;
        Ok(Disposition::Persisted)
    }
}

/// Upserts every changed entry straight into the checksum table.
struct Upserter<'a> {
    checksums: &'a ChecksumRepository,
    sor_id: i64,
}

#[async_trait]
impl<N: Send + 'static> EntryHandler<HashEntryContent<N>> for Upserter<'_> {
    async fn handle(&mut self, entry: HashEntryContent<N>) -> SourceResult<Disposition> {
        let checksum = Checksum::new(entry.sor_obj_key(), entry.hash, entry.time_marker, entry.numeric_marker);
        self.checksums.upsert(self.sor_id, &checksum).await.or_raise(|| SourceErrorKind::Handler)?;
        Ok(Disposition::Persisted)
    }
}

/// Runs hash passes for one backend.
///
/// FULL streams every entry into a scratch buffer and swaps the SOR's
/// checksum table for it in one transaction. LAST_CHANGED upserts only the
/// entries changed since the newest recorded time marker.
pub struct SorHashExecutor<'a, E> {
    executor: &'a E,
    sors: SorRepository,
    checksums: ChecksumRepository,
}

impl<'a, E: SearchExecutor> SorHashExecutor<'a, E> {
    pub fn new(executor: &'a E, database: &Database) -> Self {
        Self {
            executor,
            sors: database.sors(),
            checksums: database.checksums(),
        }
    }

    /// Run one pass. `force_full` skips the watermark look-up.
    #[instrument(skip(self, sor), fields(sor = %sor.name))]
    pub async fn execute(&self, sor: &SorConfig, force_full: bool) -> Result<HashPassResult> {
        let registry = || ErrorKind::Registry(sor.name.clone());
        let sor_id = self.sors.resolve_or_register(&sor.name).await.or_raise(registry)?;
        let watermark = if sor.hash_timestamp_supported && !force_full {
            self.checksums.last_time_marker(sor_id).await.or_raise(registry)?
        } else {
            None
        };
        let mode = match watermark {
            Some(_) => HashMode::LastChanged,
            None => HashMode::Full,
        };
        let reference_time = OffsetDateTime::now_utc();
        debug!(%mode, ?watermark, "starting hash pass");

        let mut context = raise_source(self.executor.create_context(sor).await, &sor.name, ErrorKind::ContextCreation)?;
        let outcome = match watermark {
            None => self.full(sor, sor_id, &mut context, reference_time).await,
            Some(since) => self.last_changed(sor, sor_id, &mut context, reference_time, since).await,
        };
        self.executor.close_context(context).await;

        let result = HashPassResult::new(&sor.name, mode, outcome?);
        info!(success = result.success_count, failed = result.fail_count, %mode, "hash pass complete");
        Ok(result)
    }

    async fn full(
        &self,
        sor: &SorConfig,
        sor_id: i64,
        context: &mut E::Context,
        reference_time: OffsetDateTime,
    ) -> Result<Counter> {
        let scratch_error = || ErrorKind::ScratchBuffer(sor.name.clone());
        // Removed from disk when dropped, on every path out of here.
        let scratch = NamedTempFile::new().or_raise(scratch_error)?;
        let file = scratch.reopen().or_raise(scratch_error)?;
        let mut writer = ScratchWriter {
            sor_id,
            out: BufWriter::new(tokio::fs::File::from_std(file)),
        };

        let counter = match self.executor.search_hash_full(sor, context, reference_time, &mut writer).await {
            Err(err) if matches!(&*err, SourceErrorKind::Aborted) => return Err(err).or_raise(scratch_error),
            result => raise_source(result, &sor.name, ErrorKind::Search)?,
        };
        writer.out.flush().await.or_raise(scratch_error)?;
        drop(writer);

        let loaded = self
            .checksums
            .bulk_replace(sor_id, scratch.path())
            .await
            .or_raise(|| ErrorKind::BulkLoad(sor.name.clone()))?;
        if loaded != counter.success_count() {
            warn!(loaded, hashed = counter.success_count(), "buffer line count differs from hashed entries");
        }
        Ok(counter)
    }

    async fn last_changed(
        &self,
        sor: &SorConfig,
        sor_id: i64,
        context: &mut E::Context,
        reference_time: OffsetDateTime,
        since: OffsetDateTime,
    ) -> Result<Counter> {
        let mut upserter = Upserter {
            checksums: &self.checksums,
            sor_id,
        };
        let result = self
            .executor
            .search_hash_last_changed(sor, context, reference_time, since, &mut upserter)
            .await;
        raise_source(result, &sor.name, ErrorKind::Search)
    }
}
