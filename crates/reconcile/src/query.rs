//! The query pass: bring a SOR's mirrored objects in line with its source.

use crate::error::{ErrorKind, Result, raise_source};
use crate::result::{QueryMode, QueryPassResult};
use async_trait::async_trait;
use exn::ResultExt;
use serde::Serialize;
use sorsync_config::SorConfig;
use sorsync_registry::{ChecksumRepository, Database, ExistingKeys, ObjectRepository, SorRepository};
use sorsync_source::error::{ErrorKind as SourceErrorKind, Result as SourceResult};
use sorsync_source::{Counter, Disposition, EntryHandler, HashDifference, QueryEntryContent, SearchExecutor};
use std::collections::{BTreeMap, HashSet};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, trace, warn};

/// Counts accumulated over one pass.
#[derive(Debug, Default)]
struct Tally {
    counter: Counter,
    deleted: u64,
}

impl Tally {
    fn merge(self, other: Tally) -> Tally {
        Tally {
            counter: self.counter.merge(other.counter),
            deleted: self.deleted + other.deleted,
        }
    }
}

/// Create or update one object, depending on whether a row already exists.
async fn store<N: Sync>(
    objects: &ObjectRepository,
    sor: &SorConfig,
    sor_id: i64,
    exists: bool,
    hash: Option<i64>,
    content: &QueryEntryContent<N>,
) -> sorsync_registry::error::Result<()> {
    let key = content.sor_obj_key();
    if exists {
        objects.update(sor, sor_id, key, hash, content).await
    } else {
        objects.create(sor, sor_id, key, hash, content).await
    }
}

/// FULL mode: store every entry and remember which keys the source returned.
struct FullScan<'a> {
    objects: &'a ObjectRepository,
    sor: &'a SorConfig,
    sor_id: i64,
    snapshot: &'a ExistingKeys,
    seen: HashSet<String>,
}

#[async_trait]
impl<N: Serialize + Send + Sync + 'static> EntryHandler<QueryEntryContent<N>> for FullScan<'_> {
    async fn handle(&mut self, content: QueryEntryContent<N>) -> SourceResult<Disposition> {
        let key = content.sor_obj_key();
        let exists = self.snapshot.contains(key) || self.seen.contains(key);
        let hash = self.snapshot.key_to_hash.get(key).copied();
        // Seen even if the write fails: the key is still in the source.
        self.seen.insert(key.to_string());
        store(self.objects, self.sor, self.sor_id, exists, hash, &content)
            .await
            .or_raise(|| SourceErrorKind::Handler)?;
        Ok(Disposition::Persisted)
    }
}

/// LAST_CHANGED mode: store entries whose key is awaiting reconciliation and
/// ignore the rest.
struct ChangedScan<'a> {
    objects: &'a ObjectRepository,
    sor: &'a SorConfig,
    sor_id: i64,
    pending: &'a mut BTreeMap<String, HashDifference>,
}

#[async_trait]
impl<N: Serialize + Send + Sync + 'static> EntryHandler<QueryEntryContent<N>> for ChangedScan<'_> {
    async fn handle(&mut self, content: QueryEntryContent<N>) -> SourceResult<Disposition> {
        let Some(difference) = self.pending.remove(content.sor_obj_key()) else {
            trace!(key = content.sor_obj_key(), "changed entry has no hash difference; ignoring");
            return Ok(Disposition::Skipped);
        };
        store(self.objects, self.sor, self.sor_id, !difference.is_new, Some(difference.hash), &content)
            .await
            .or_raise(|| SourceErrorKind::Handler)?;
        Ok(Disposition::Persisted)
    }
}

/// INDIVIDUAL mode: capture the entry returned for one requested key.
struct Lookup<'k, N> {
    key: &'k str,
    found: Option<QueryEntryContent<N>>,
}

#[async_trait]
impl<N: Send + 'static> EntryHandler<QueryEntryContent<N>> for Lookup<'_, N> {
    async fn handle(&mut self, content: QueryEntryContent<N>) -> SourceResult<Disposition> {
        if content.sor_obj_key() != self.key {
            warn!(requested = self.key, returned = content.sor_obj_key(), "lookup returned another key; dropping row");
            return Ok(Disposition::Skipped);
        }
        if self.found.is_none() {
            self.found = Some(content);
        }
        Ok(Disposition::Persisted)
    }
}

/// Runs query passes for one backend.
///
/// The mode follows from the registry and the SOR's capabilities: an empty
/// object table (or a SOR that was never hashed) gets a FULL pass, SORs that
/// can filter by timestamp get LAST_CHANGED followed by individual lookups,
/// and the rest get individual lookups only.
pub struct SorQueryExecutor<'a, E> {
    executor: &'a E,
    sors: SorRepository,
    checksums: ChecksumRepository,
    objects: ObjectRepository,
}

impl<'a, E: SearchExecutor> SorQueryExecutor<'a, E> {
    pub fn new(executor: &'a E, database: &Database) -> Self {
        Self {
            executor,
            sors: database.sors(),
            checksums: database.checksums(),
            objects: database.objects(),
        }
    }

    /// Run one pass. `force_full` requests FULL mode regardless of state.
    #[instrument(skip(self, sor), fields(sor = %sor.name))]
    pub async fn execute(&self, sor: &SorConfig, force_full: bool) -> Result<QueryPassResult> {
        let registry = || ErrorKind::Registry(sor.name.clone());
        let sor_id = self.sors.resolve_or_register(&sor.name).await.or_raise(registry)?;
        let bootstrap = self.objects.is_empty(sor_id).await.or_raise(registry)?;
        let never_hashed = self.checksums.count(sor_id).await.or_raise(registry)? == 0;
        let mode = if force_full || bootstrap || never_hashed {
            QueryMode::Full
        } else if sor.query_timestamp_supported {
            QueryMode::LastChanged
        } else {
            QueryMode::Individual
        };
        let reference_time = OffsetDateTime::now_utc();
        debug!(%mode, bootstrap, never_hashed, "starting query pass");

        let mut context = raise_source(self.executor.create_context(sor).await, &sor.name, ErrorKind::ContextCreation)?;
        let outcome = match mode {
            QueryMode::Full => self.full(sor, sor_id, &mut context, reference_time).await,
            QueryMode::Individual | QueryMode::LastChanged => {
                self.differences(sor, sor_id, &mut context, reference_time, mode == QueryMode::LastChanged)
                    .await
            },
        };
        self.executor.close_context(context).await;

        let tally = outcome?;
        let result = QueryPassResult {
            sor_name: sor.name.clone(),
            mode,
            successful_query_count: tally.counter.success_count(),
            failed_query_count: tally.counter.fail_count(),
            deleted_count: tally.deleted,
        };
        info!(
            success = result.successful_query_count,
            failed = result.failed_query_count,
            deleted = result.deleted_count,
            %mode,
            "query pass complete"
        );
        Ok(result)
    }

    async fn full(
        &self,
        sor: &SorConfig,
        sor_id: i64,
        context: &mut E::Context,
        reference_time: OffsetDateTime,
    ) -> Result<Tally> {
        let snapshot = self
            .objects
            .existing_keys_snapshot(sor_id)
            .await
            .or_raise(|| ErrorKind::Registry(sor.name.clone()))?;
        let mut scan = FullScan {
            objects: &self.objects,
            sor,
            sor_id,
            snapshot: &snapshot,
            seen: HashSet::new(),
        };
        let result = self.executor.search_query_full(sor, context, reference_time, &mut scan).await;
        let counter = raise_source(result, &sor.name, ErrorKind::Search)?;
        let seen = scan.seen;

        let mut tally = Tally { counter, deleted: 0 };
        let mut vanished: Vec<&String> = snapshot.active.iter().filter(|key| !seen.contains(*key)).collect();
        vanished.sort();
        for key in vanished {
            self.soft_delete(sor_id, key, &mut tally).await;
        }
        Ok(tally)
    }

    /// INDIVIDUAL, optionally preceded by one LAST_CHANGED search covering
    /// as many differences as possible.
    async fn differences(
        &self,
        sor: &SorConfig,
        sor_id: i64,
        context: &mut E::Context,
        reference_time: OffsetDateTime,
        last_changed: bool,
    ) -> Result<Tally> {
        let differences = self
            .objects
            .hash_differences(sor_id)
            .await
            .or_raise(|| ErrorKind::Registry(sor.name.clone()))?;
        let mut pending: BTreeMap<String, HashDifference> = differences
            .differences()
            .iter()
            .map(|difference| (difference.sor_obj_key.clone(), difference.clone()))
            .collect();

        let mut tally = Tally::default();
        if last_changed && let Some(since) = differences.minimum_hash_time_marker() {
            let mut scan = ChangedScan {
                objects: &self.objects,
                sor,
                sor_id,
                pending: &mut pending,
            };
            let result = self
                .executor
                .search_query_last_changed(sor, context, reference_time, since, &mut scan)
                .await;
            let counter = raise_source(result, &sor.name, ErrorKind::Search)?;
            debug!(%counter, remaining = pending.len(), "changed-since search done");
            tally = tally.merge(Tally { counter, deleted: 0 });
        }

        for difference in pending.values() {
            self.individual(sor, sor_id, context, reference_time, difference, &mut tally).await?;
        }
        for key in differences.deletion_candidates() {
            self.soft_delete(sor_id, key, &mut tally).await;
        }
        Ok(tally)
    }

    /// Look up one key and store it, or retire it when the source no longer
    /// has it.
    async fn individual(
        &self,
        sor: &SorConfig,
        sor_id: i64,
        context: &mut E::Context,
        reference_time: OffsetDateTime,
        difference: &HashDifference,
        tally: &mut Tally,
    ) -> Result<()> {
        let key = difference.sor_obj_key.as_str();
        let mut lookup = Lookup { key, found: None };
        let result = self.executor.search_query_individual(sor, context, reference_time, key, &mut lookup).await;
        let counter = raise_source(result, &sor.name, ErrorKind::Search)?;

        match lookup.found {
            Some(content) => {
                let stored = store(&self.objects, sor, sor_id, !difference.is_new, Some(difference.hash), &content).await;
                match stored {
                    Ok(()) => tally.counter.increment_success(),
                    Err(err) => {
                        warn!(key, error = ?err, "could not store object");
                        tally.counter.increment_fail();
                    },
                }
            },
            // The source has the key but it could not be read; keep what we have.
            None if counter.fail_count() > 0 => tally.counter.increment_fail(),
            None => {
                debug!(key, "key no longer in source");
                self.soft_delete(sor_id, key, tally).await;
                if let Err(err) = self.objects.delete_checksum(sor_id, key).await {
                    warn!(key, error = ?err, "could not delete checksum");
                    tally.counter.increment_fail();
                }
            },
        }
        Ok(())
    }

    async fn soft_delete(&self, sor_id: i64, key: &str, tally: &mut Tally) {
        match self.objects.soft_delete(sor_id, key).await {
            Ok(true) => tally.deleted += 1,
            Ok(false) => {},
            Err(err) => {
                warn!(key, error = ?err, "could not soft delete object");
                tally.counter.increment_fail();
            },
        }
    }
}
