//! Local registry of what each System of Record last looked like.
//!
//! Two tables per SOR evolve independently: checksums (written by hash
//! passes, one cheap hash per key) and objects (written by query passes, the
//! full mirrored content). The `hash_differences` view compares them and
//! tells a query pass which keys it actually needs to fetch.
//!
//! Object rows are never removed; a key that disappears from its source is
//! soft-deleted and comes back to life if the key reappears.

mod checksum;
mod db;
pub mod error;
mod models;
mod object;
mod sor;

pub use crate::checksum::ChecksumRepository;
pub use crate::db::Database;
pub use crate::models::{Checksum, ExistingKeys, StoredObject};
pub use crate::object::ObjectRepository;
pub use crate::sor::SorRepository;

/// Version of the hashing scheme recorded with every hash.
pub const HASH_VERSION: i64 = 1;
/// Version of the JSON layout recorded with every object.
pub const JSON_VERSION: i64 = 1;
