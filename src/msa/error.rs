//! Error type definition.

use thiserror::Error;

use crate::msa::Method;

/// Error type for the MSA pipeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid sequence: {0}")]
    InvalidSequence(#[from] crate::sequences::Error),
    #[error("no sequences provided")]
    EmptyInput,
    #[error("alignment with {method} failed: {cause}")]
    AlignmentFailed { method: Method, cause: String },
    #[error("pairwise alignment requires exactly two sequences, got {0}")]
    PairwiseSequenceCount(usize),
    #[error("gap penalties must not be positive: open {0}, extend {1}")]
    InvalidGapPenalties(f64, f64),
    #[error("coordinate mapping failed")]
    Mapping(#[from] crate::msa::gapmap::Error),
    #[error("annotation failed: {0}")]
    Annotation(String),
    #[error("request cancelled")]
    Cancelled,
}
