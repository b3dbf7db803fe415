//! Registry Error Types
//!
//! Row-level failures ([`ErrorKind::Validation`], [`ErrorKind::ObjectVanished`]
//! and plain [`ErrorKind::Database`] errors from single-row writes) are
//! recovered by the passes: logged, counted and skipped. A failed
//! [`ErrorKind::BulkLoad`] is fatal for the pass and leaves the checksum
//! table as it was.

use derive_more::{Display, Error};

/// A registry error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// No registry row exists for the named SOR.
    #[display("unknown system of record: {_0}")]
    SorNotFound(#[error(not(source))] String),
    /// Content was rejected before it reached the object table.
    #[display("invalid content: {_0}")]
    Validation(#[error(not(source))] String),
    /// An update matched no row; the object disappeared since the snapshot.
    #[display("object vanished before update: {_0}")]
    ObjectVanished(#[error(not(source))] String),
    /// Replacing the checksum table failed and was rolled back.
    #[display("checksum bulk load failed")]
    BulkLoad,
    /// A stored value could not be converted.
    #[display("invalid registry data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}
