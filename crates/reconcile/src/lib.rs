//! Hash and query passes over Systems of Record.
//!
//! A hash pass records one content hash per source key in the registry's
//! checksum table. A query pass compares checksums with the stored objects
//! and fetches full content only for keys that differ, soft-deleting objects
//! whose keys have left the source. Both passes are generic over the
//! [`SearchExecutor`](sorsync_source::SearchExecutor) backend; the
//! [`Reconciler`] picks the backend from configuration.

pub mod error;
mod hash;
mod query;
mod reconciler;
mod result;

pub use crate::hash::SorHashExecutor;
pub use crate::query::SorQueryExecutor;
pub use crate::reconciler::{Reconciler, TriggerRequest};
pub use crate::result::{HashMode, HashPassResult, QueryMode, QueryPassResult, SyncResult};
