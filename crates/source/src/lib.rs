//! Reading entries out of Systems of Record.
//!
//! A [`SearchExecutor`] owns a backend's connection context and answers six
//! searches (hash or full content, each over every entry, one key, or
//! entries changed since a timestamp). Raw rows are turned into
//! [`QueryEntryContent`] / [`HashEntryContent`] by per-backend
//! [`EntryContentExtractor`]s and handed to a caller-supplied
//! [`EntryHandler`]; the search returns a [`Counter`] of how many entries
//! were handled and how many failed.

mod content;
mod counter;
pub mod error;
mod executor;
mod hash;
pub mod ldap;
#[cfg(feature = "mock")]
mod mock;
pub mod sql;
mod timestamp;

pub use crate::content::{Converter, HashDifference, HashDifferences, HashEntryContent, QueryEntryContent};
pub use crate::counter::Counter;
pub use crate::executor::{Disposition, EntryContentExtractor, EntryHandler, SearchExecutor, drive};
pub use crate::hash::{ContentHasher, DEFAULT_VOLATILE_FIELDS};
#[cfg(feature = "mock")]
pub use crate::mock::MockSearchExecutor;
pub use crate::timestamp::{from_numeric_marker, numeric_marker};
