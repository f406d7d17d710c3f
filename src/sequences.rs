//! Utility code for working with amino-acid sequences.

pub use crate::sequences::error::Error;
use ahash::AHashSet;
use std::sync::LazyLock;

mod error {
    /// Error type for sequence validation.
    #[derive(thiserror::Error, Debug, Clone)]
    pub enum Error {
        #[error("sequence is empty")]
        EmptySequence,
        #[error("invalid amino acid character {0:?} at position {1}")]
        InvalidCharacter(char, usize),
        #[error("sequence length {0} is below the minimum of {1}")]
        TooShort(usize, usize),
    }
}

/// The twenty standard IUPAC amino-acid letters.
pub const AMINO_ACIDS: &str = "ACDEFGHIKLMNPQRSTVWY";

/// Gap character used in alignments and in numbered domains.
pub const GAP: char = '-';

/// Minimum length for an antibody chain sequence submitted for annotation.
///
/// Anything shorter cannot contain a variable domain and is rejected before
/// the numbering engine is ever invoked.
pub const MIN_CHAIN_LENGTH: usize = 15;

static AMINO_ACID_SET: LazyLock<AHashSet<char>> =
    LazyLock::new(|| AMINO_ACIDS.chars().collect());

/// Whether `c` is one of the twenty standard amino-acid letters (upper case).
pub fn is_amino_acid(c: char) -> bool {
    AMINO_ACID_SET.contains(&c)
}

/// Normalize a raw sequence: trim surrounding whitespace, upper-case, and
/// verify that every character is a standard amino-acid letter.
pub fn clean_sequence(raw: &str) -> Result<String, Error> {
    let seq: String = raw.trim().to_uppercase();
    if seq.is_empty() {
        return Err(Error::EmptySequence);
    }
    for (i, c) in seq.chars().enumerate() {
        if !is_amino_acid(c) {
            return Err(Error::InvalidCharacter(c, i));
        }
    }
    Ok(seq)
}

/// Normalize a chain sequence for annotation, additionally enforcing the
/// [`MIN_CHAIN_LENGTH`] floor.
pub fn clean_chain_sequence(raw: &str) -> Result<String, Error> {
    let seq = clean_sequence(raw)?;
    if seq.len() < MIN_CHAIN_LENGTH {
        return Err(Error::TooShort(seq.len(), MIN_CHAIN_LENGTH));
    }
    Ok(seq)
}

/// Remove all gap characters from an aligned row.
pub fn strip_gaps(aligned: &str) -> String {
    aligned.chars().filter(|&c| c != GAP).collect()
}

/// Number of non-gap characters in an aligned row.
pub fn ungapped_length(aligned: &str) -> usize {
    aligned.chars().filter(|&c| c != GAP).count()
}

/// Render named sequences as FASTA text for handing to external tools.
pub fn to_fasta<'a>(records: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (name, seq) in records {
        out.push('>');
        out.push_str(name);
        out.push('\n');
        out.push_str(seq);
        out.push('\n');
    }
    out
}


// <LICENSE>
// Copyright 2026 abseq-rs Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
// </LICENSE>
