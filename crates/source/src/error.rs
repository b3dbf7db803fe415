//! Source Error Types
//!
//! Two families of errors live here. [`ErrorKind`] describes failures of a
//! whole search (the backend context could not be opened, the connection
//! dropped mid-scan) and is fatal for the pass. [`ExtractErrorKind`]
//! describes a single entry that could not be turned into content; those are
//! counted and the scan moves on.

use derive_more::{Display, Error};

/// A search error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An extraction error for one entry.
pub type ExtractError = exn::Exn<ExtractErrorKind>;
/// Result type alias for extraction.
pub type ExtractResult<T> = std::result::Result<T, ExtractError>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The backend context (connection, bind, session) could not be opened.
    #[display("could not open backend context")]
    Context,
    /// The backend failed while executing or streaming a search.
    #[display("search failed")]
    Search,
    /// The System of Record is missing settings the backend needs.
    #[display("backend configuration error: {_0}")]
    Configuration(#[error(not(source))] String),
    /// A per-entry handler failed; the entry is counted as a failure.
    #[display("entry handler failed")]
    Handler,
    /// A per-entry handler hit a failure that must end the scan.
    #[display("scan aborted by entry handler")]
    Aborted,
}

/// Reasons a single entry was rejected during extraction.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ExtractErrorKind {
    /// The row has no payload.
    #[display("entry has no content")]
    MissingContent,
    /// The payload is not well-formed.
    #[display("malformed payload")]
    MalformedPayload,
    /// A required tag is absent or empty.
    #[display("missing tag: {_0}")]
    MissingTag(#[error(not(source))] String),
    /// The payload names a different System of Record.
    #[display("payload belongs to {found}, expected {expected}")]
    SorNameMismatch { expected: String, found: String },
    /// A timestamp could not be parsed.
    #[display("invalid timestamp in {field}: {value:?}")]
    InvalidTimestamp { field: String, value: String },
    /// A directory entry's identifier could not be resolved unambiguously.
    #[display("ambiguous identifier for {dn}: {resolution}")]
    AmbiguousId { dn: String, resolution: String },
    /// The key cannot be written to the bulk-load buffer.
    #[display("key cannot be represented in bulk-load buffer: {_0:?}")]
    UnrepresentableKey(#[error(not(source))] String),
}
