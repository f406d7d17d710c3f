//! Error type definition.

use thiserror::Error;

/// Error type for the annotation pipeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid sequence: {0}")]
    InvalidSequence(#[from] crate::sequences::Error),
    #[error("scheme table error")]
    Scheme(#[from] crate::schemes::Error),
    #[error("numbering failed: {0}")]
    Numbering(#[from] crate::numbering::Error),
    #[error("isotype scoring failed")]
    IsotypeScoring(#[from] crate::annotate::isotype::Error),
    #[error("request cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the underlying cause is a fired cancellation token.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Numbering(e) => e.is_cancellation(),
            Error::IsotypeScoring(e) => e.is_cancellation(),
            _ => false,
        }
    }
}
