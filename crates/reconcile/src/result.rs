use derive_more::Display;
use serde::Serialize;
use sorsync_source::Counter;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HashMode {
    #[display("FULL")]
    Full,
    #[display("LAST_CHANGED")]
    LastChanged,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryMode {
    #[display("FULL")]
    Full,
    #[display("INDIVIDUAL")]
    Individual,
    /// A changed-since search followed by individual lookups of the rest.
    #[display("LAST_CHANGED")]
    LastChanged,
}

/// Outcome of one hash pass.
#[derive(Debug, Display, Clone, PartialEq, Eq, Serialize)]
#[display("{sor_name}: {mode} hash pass, {success_count} hashed, {fail_count} failed")]
pub struct HashPassResult {
    pub sor_name: String,
    pub mode: HashMode,
    pub success_count: u64,
    pub fail_count: u64,
}

impl HashPassResult {
    pub(crate) fn new(sor_name: &str, mode: HashMode, counter: Counter) -> Self {
        Self {
            sor_name: sor_name.to_string(),
            mode,
            success_count: counter.success_count(),
            fail_count: counter.fail_count(),
        }
    }
}

/// Outcome of one query pass.
#[derive(Debug, Display, Clone, PartialEq, Eq, Serialize)]
#[display(
    "{sor_name}: {mode} query pass, {successful_query_count} stored, {failed_query_count} failed, {deleted_count} deleted"
)]
pub struct QueryPassResult {
    pub sor_name: String,
    pub mode: QueryMode,
    pub successful_query_count: u64,
    pub failed_query_count: u64,
    pub deleted_count: u64,
}

/// Both passes of a sync, in the order they ran.
#[derive(Debug, Display, Clone, PartialEq, Eq, Serialize)]
#[display("{hash}\n{query}")]
pub struct SyncResult {
    pub hash: HashPassResult,
    pub query: QueryPassResult,
}
