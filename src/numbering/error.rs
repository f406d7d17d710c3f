//! Error type definition.

use thiserror::Error;

/// Error type for residue numbering.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid scheme position: {0}")]
    InvalidPosition(String),
    #[error("malformed numbering engine output: {0}")]
    MalformedOutput(String),
    #[error("numbering engine returned {0} records for {1} inputs")]
    RecordCountMismatch(usize, usize),
    #[error("numbering failed: {0}")]
    NumberingFailed(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("subprocess error")]
    Process(#[from] crate::process::Error),
    #[error("i/o error")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error must not trigger the IMGT fallback retry.
    pub(crate) fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Error::Cancelled | Error::Process(crate::process::Error::Cancelled)
        )
    }
}
