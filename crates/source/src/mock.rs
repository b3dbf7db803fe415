//! In-memory search executor for testing.

use crate::Counter;
use crate::content::{HashEntryContent, QueryEntryContent};
use crate::error::{ErrorKind, Result};
use crate::executor::{EntryHandler, SearchExecutor, drive};
use crate::sql::{RelationalContent, RelationalRow, SqlHashExtractor, SqlQueryExtractor, encode_payload};
use async_trait::async_trait;
use serde_json::Value;
use sorsync_config::SorConfig;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone)]
struct MockEntry {
    payload: Option<String>,
    modified: OffsetDateTime,
}

#[derive(Debug, Default)]
struct MockState {
    entries: BTreeMap<String, MockEntry>,
    misroutes: HashMap<String, String>,
    fail_context: bool,
    fail_search_after: Option<usize>,
    open_contexts: usize,
}

/// In-memory search executor for testing.
///
/// Entries are stored as relational `QUERY` payloads and run through the
/// relational extractors, so malformed entries can be planted with
/// [`put_raw()`](Self::put_raw). All methods take `&self`; tests can change
/// the source between passes.
///
/// # Examples
///
/// ```
/// use sorsync_source::MockSearchExecutor;
/// use serde_json::json;
/// use time::OffsetDateTime;
///
/// let source = MockSearchExecutor::default();
/// source.put("hr", "1001", json!({"name": "Ada"}), OffsetDateTime::UNIX_EPOCH);
/// assert_eq!(source.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockSearchExecutor {
    state: Mutex<MockState>,
}

impl MockSearchExecutor {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a well-formed entry. `fields` must be a JSON object.
    pub fn put(&self, sor_name: &str, key: &str, fields: Value, modified: OffsetDateTime) {
        let Value::Object(fields) = fields else {
            // Test setup is wrong; the test should not pass.
            panic!("MockSearchExecutor::put: fields for {key} must be an object");
        };
        let payload = encode_payload(sor_name, key, modified, &fields);
        self.put_raw(key, Some(payload), modified);
    }

    /// Insert or replace an entry with an arbitrary (possibly malformed) payload.
    pub fn put_raw(&self, key: &str, payload: Option<String>, modified: OffsetDateTime) {
        self.state().entries.insert(key.to_string(), MockEntry { payload, modified });
    }

    pub fn remove(&self, key: &str) {
        self.state().entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Answer individual searches for `requested` with the entry stored
    /// under `returned`.
    pub fn misroute(&self, requested: &str, returned: &str) {
        self.state().misroutes.insert(requested.to_string(), returned.to_string());
    }

    /// Make [`create_context()`](SearchExecutor::create_context) fail.
    pub fn fail_context(&self, fail: bool) {
        self.state().fail_context = fail;
    }

    /// Make every search fail after yielding `rows` rows.
    pub fn fail_search_after(&self, rows: Option<usize>) {
        self.state().fail_search_after = rows;
    }

    /// Contexts created and not yet closed.
    pub fn open_contexts(&self) -> usize {
        self.state().open_contexts
    }

    fn select(&self, filter: impl Fn(&str, &MockEntry) -> bool) -> Vec<Result<RelationalRow>> {
        let state = self.state();
        let mut rows: Vec<Result<RelationalRow>> = state
            .entries
            .iter()
            .filter(|(key, entry)| filter(key, entry))
            .map(|(_, entry)| {
                Ok(RelationalRow {
                    content: entry.payload.clone(),
                    time_marker: entry.modified.format(&Rfc3339).ok(),
                })
            })
            .collect();
        if let Some(limit) = state.fail_search_after {
            rows.truncate(limit);
            rows.push(Err(exn::Exn::from(ErrorKind::Search)));
        }
        rows
    }

    fn all(&self) -> Vec<Result<RelationalRow>> {
        self.select(|_, _| true)
    }

    fn individual(&self, key: &str) -> Vec<Result<RelationalRow>> {
        let target = self.state().misroutes.get(key).cloned().unwrap_or_else(|| key.to_string());
        self.select(|candidate, _| candidate == target)
    }

    fn since(&self, since: OffsetDateTime) -> Vec<Result<RelationalRow>> {
        self.select(|_, entry| entry.modified >= since)
    }
}

#[async_trait]
impl SearchExecutor for MockSearchExecutor {
    type Native = RelationalContent;
    type Context = ();

    async fn create_context(&self, _sor: &SorConfig) -> Result<()> {
        let mut state = self.state();
        if state.fail_context {
            exn::bail!(ErrorKind::Context);
        }
        state.open_contexts += 1;
        Ok(())
    }

    async fn close_context(&self, _context: ()) {
        let mut state = self.state();
        state.open_contexts = state.open_contexts.saturating_sub(1);
    }

    async fn search_hash_full(
        &self,
        sor: &SorConfig,
        _context: &mut (),
        reference_time: OffsetDateTime,
        handler: &mut dyn EntryHandler<HashEntryContent<RelationalContent>>,
    ) -> Result<Counter> {
        let rows = futures::stream::iter(self.all());
        drive(&sor.name, rows, &SqlHashExtractor::new(sor), reference_time, handler).await
    }

    async fn search_hash_individual(
        &self,
        sor: &SorConfig,
        _context: &mut (),
        reference_time: OffsetDateTime,
        key: &str,
        handler: &mut dyn EntryHandler<HashEntryContent<RelationalContent>>,
    ) -> Result<Counter> {
        let rows = futures::stream::iter(self.individual(key));
        drive(&sor.name, rows, &SqlHashExtractor::new(sor), reference_time, handler).await
    }

    async fn search_hash_last_changed(
        &self,
        sor: &SorConfig,
        _context: &mut (),
        reference_time: OffsetDateTime,
        since: OffsetDateTime,
        handler: &mut dyn EntryHandler<HashEntryContent<RelationalContent>>,
    ) -> Result<Counter> {
        let rows = futures::stream::iter(self.since(since));
        drive(&sor.name, rows, &SqlHashExtractor::new(sor), reference_time, handler).await
    }

    async fn search_query_full(
        &self,
        sor: &SorConfig,
        _context: &mut (),
        reference_time: OffsetDateTime,
        handler: &mut dyn EntryHandler<QueryEntryContent<RelationalContent>>,
    ) -> Result<Counter> {
        let rows = futures::stream::iter(self.all());
        drive(&sor.name, rows, &SqlQueryExtractor::new(sor), reference_time, handler).await
    }

    async fn search_query_individual(
        &self,
        sor: &SorConfig,
        _context: &mut (),
        reference_time: OffsetDateTime,
        key: &str,
        handler: &mut dyn EntryHandler<QueryEntryContent<RelationalContent>>,
    ) -> Result<Counter> {
        let rows = futures::stream::iter(self.individual(key));
        drive(&sor.name, rows, &SqlQueryExtractor::new(sor), reference_time, handler).await
    }

    async fn search_query_last_changed(
        &self,
        sor: &SorConfig,
        _context: &mut (),
        reference_time: OffsetDateTime,
        since: OffsetDateTime,
        handler: &mut dyn EntryHandler<QueryEntryContent<RelationalContent>>,
    ) -> Result<Counter> {
        let rows = futures::stream::iter(self.since(since));
        drive(&sor.name, rows, &SqlQueryExtractor::new(sor), reference_time, handler).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sorsync_config::BackendKind;
    use time::macros::datetime;

    const REFERENCE: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

    fn sor() -> SorConfig {
        SorConfig::new("hr", BackendKind::Sql, "mock").with_timestamps(true, true)
    }

    #[tokio::test]
    async fn test_full_and_last_changed() {
        let source = MockSearchExecutor::default();
        source.put("hr", "1", json!({"name": "Ada"}), datetime!(2024-01-01 00:00 UTC));
        source.put("hr", "2", json!({"name": "Grace"}), datetime!(2024-03-01 00:00 UTC));
        source.put_raw("3", Some("garbage".to_string()), datetime!(2024-03-01 00:00 UTC));

        let mut context = source.create_context(&sor()).await.unwrap();
        let mut hashed = Vec::new();
        let counter = source.search_hash_full(&sor(), &mut context, REFERENCE, &mut hashed).await.unwrap();
        assert_eq!((counter.success_count(), counter.fail_count()), (2, 1));
        assert_eq!(hashed[0].time_marker, Some(datetime!(2024-01-01 00:00 UTC)));

        let mut changed = Vec::new();
        let since = datetime!(2024-02-01 00:00 UTC);
        source.search_query_last_changed(&sor(), &mut context, REFERENCE, since, &mut changed).await.unwrap();
        assert_eq!(changed.iter().map(|c| c.sor_obj_key()).collect::<Vec<_>>(), ["2"]);

        assert_eq!(source.open_contexts(), 1);
        source.close_context(context).await;
        assert_eq!(source.open_contexts(), 0);
    }

    #[tokio::test]
    async fn test_misroute_and_failures() {
        let source = MockSearchExecutor::default();
        source.put("hr", "1", json!({}), REFERENCE);
        source.put("hr", "2", json!({}), REFERENCE);
        source.misroute("1", "2");

        let mut found = Vec::new();
        source.search_query_individual(&sor(), &mut (), REFERENCE, "1", &mut found).await.unwrap();
        assert_eq!(found[0].sor_obj_key(), "2");

        source.fail_search_after(Some(1));
        let mut found = Vec::new();
        let err = source.search_query_full(&sor(), &mut (), REFERENCE, &mut found).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Search);
        assert_eq!(found.len(), 1);

        source.fail_context(true);
        assert!(source.create_context(&sor()).await.is_err());
        assert_eq!(source.open_contexts(), 0);
    }
}
