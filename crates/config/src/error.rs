//! Configuration Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Every variant is fatal: a pass must never start against a configuration
/// that cannot be resolved.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The configuration sources could not be read or deserialized.
    #[display("could not load configuration")]
    Load,
    /// The configuration was loaded but is internally inconsistent.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
    /// No System of Record is configured under the requested name.
    #[display("unknown system of record: {_0}")]
    UnknownSor(#[error(not(source))] String),
    /// A System of Record references a connection that does not exist.
    #[display("unknown connection: {_0}")]
    UnknownConnection(#[error(not(source))] String),
}
