use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open registry")]
    Registry,
    /// `retryable` when the failure was in the backend or the registry
    /// rather than in the configuration.
    #[display("pass failed")]
    Pass { retryable: bool },
    #[display("nothing stored for {sor}/{key}")]
    NotFound { sor: String, key: String },
    #[display("could not write output")]
    Output,
}
