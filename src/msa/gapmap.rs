//! Mapping positions between an ungapped sequence and its aligned row.
//!
//! The two directions are inverse on non-gap columns: for every column `c`
//! with a letter, `ungapped_to_aligned(aligned_to_ungapped(c)) == c`.

use crate::sequences::GAP;

pub use self::error::Error;

mod error {
    /// Error type for coordinate mapping.
    ///
    /// Out-of-range lookups are programming errors in the caller and fatal
    /// for the current request.
    #[derive(thiserror::Error, Debug, Clone)]
    pub enum Error {
        #[error("ungapped position {0} out of range for row with {1} letters")]
        UngappedOutOfRange(usize, usize),
        #[error("column {0} out of range for row of length {1}")]
        ColumnOutOfRange(usize, usize),
    }
}

/// Column index of the `k`-th (0-based) non-gap letter of `aligned`.
pub fn ungapped_to_aligned(aligned: &str, k: usize) -> Result<usize, Error> {
    let mut seen = 0;
    for (column, c) in aligned.chars().enumerate() {
        if c != GAP {
            if seen == k {
                return Ok(column);
            }
            seen += 1;
        }
    }
    Err(Error::UngappedOutOfRange(k, seen))
}

/// 0-based ungapped index of the letter at `column`, or `None` when the
/// column holds a gap.
pub fn aligned_to_ungapped(aligned: &str, column: usize) -> Result<Option<usize>, Error> {
    let mut seen = 0;
    for (i, c) in aligned.chars().enumerate() {
        if i == column {
            return if c == GAP { Ok(None) } else { Ok(Some(seen)) };
        }
        if c != GAP {
            seen += 1;
        }
    }
    Err(Error::ColumnOutOfRange(column, aligned.chars().count()))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{aligned_to_ungapped, ungapped_to_aligned, Error};

    const ROW: &str = "AC--DE-F";

    #[test]
    fn maps_ungapped_to_columns() -> Result<(), anyhow::Error> {
        assert_eq!(ungapped_to_aligned(ROW, 0)?, 0);
        assert_eq!(ungapped_to_aligned(ROW, 1)?, 1);
        assert_eq!(ungapped_to_aligned(ROW, 2)?, 4);
        assert_eq!(ungapped_to_aligned(ROW, 4)?, 7);
        assert!(matches!(
            ungapped_to_aligned(ROW, 5),
            Err(Error::UngappedOutOfRange(5, 5))
        ));
        Ok(())
    }

    #[test]
    fn maps_columns_to_ungapped() -> Result<(), anyhow::Error> {
        assert_eq!(aligned_to_ungapped(ROW, 0)?, Some(0));
        assert_eq!(aligned_to_ungapped(ROW, 2)?, None);
        assert_eq!(aligned_to_ungapped(ROW, 4)?, Some(2));
        assert_eq!(aligned_to_ungapped(ROW, 7)?, Some(4));
        assert!(matches!(
            aligned_to_ungapped(ROW, 8),
            Err(Error::ColumnOutOfRange(8, 8))
        ));
        Ok(())
    }

    #[test]
    fn round_trip_on_letter_columns() -> Result<(), anyhow::Error> {
        for (column, c) in ROW.chars().enumerate() {
            if c == '-' {
                continue;
            }
            let k = aligned_to_ungapped(ROW, column)?.expect("letter column");
            assert_eq!(ungapped_to_aligned(ROW, k)?, column);
        }
        Ok(())
    }
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
