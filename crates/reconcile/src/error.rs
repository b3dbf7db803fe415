//! Reconciliation Error Types
//!
//! Every variant is fatal for the pass it occurred in and names the System of
//! Record. Per-entry problems never show up here: they are counted in the
//! pass result instead.

use derive_more::{Display, Error};
use exn::ResultExt;
use sorsync_source::error::{ErrorKind as SourceErrorKind, Result as SourceResult};

/// A reconciliation error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The SOR, its connection or its backend settings cannot be resolved.
    #[display("{_0}: configuration error")]
    Configuration(#[error(not(source))] String),
    /// The backend context could not be opened.
    #[display("{_0}: could not open backend context")]
    ContextCreation(#[error(not(source))] String),
    /// A backend search failed mid-pass.
    #[display("{_0}: search failed")]
    Search(#[error(not(source))] String),
    /// The registry could not be read or written outside per-entry work.
    #[display("{_0}: registry error")]
    Registry(#[error(not(source))] String),
    /// The checksum table could not be replaced; it was left unchanged.
    #[display("{_0}: checksum bulk load failed")]
    BulkLoad(#[error(not(source))] String),
    /// The scratch buffer for a full hash pass could not be written.
    #[display("{_0}: scratch buffer error")]
    ScratchBuffer(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ContextCreation(_) | Self::Search(_) | Self::Registry(_) | Self::BulkLoad(_))
    }

    /// The System of Record the pass was for.
    pub fn sor_name(&self) -> &str {
        match self {
            Self::Configuration(sor)
            | Self::ContextCreation(sor)
            | Self::Search(sor)
            | Self::Registry(sor)
            | Self::BulkLoad(sor)
            | Self::ScratchBuffer(sor) => sor,
        }
    }
}

/// Raise a failed backend call as `otherwise(sor)`, except that a backend
/// reporting missing settings is a configuration error.
pub(crate) fn raise_source<T>(result: SourceResult<T>, sor: &str, otherwise: fn(String) -> ErrorKind) -> Result<T> {
    match result {
        Err(err) if matches!(&*err, SourceErrorKind::Configuration(_)) => {
            Err(err).or_raise(|| ErrorKind::Configuration(sor.to_string()))
        },
        result => result.or_raise(|| otherwise(sor.to_string())),
    }
}
