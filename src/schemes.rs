//! Static region definitions for the supported numbering schemes.
//!
//! Region boundary tables for IMGT, Kabat, Chothia and CGG, per chain type.
//! The tables are loaded once and treated as read-only for the process
//! lifetime; see <http://www.bioinf.org.uk/abs/info.html> for the Kabat and
//! Chothia boundaries.

use std::str::FromStr;
use std::sync::LazyLock;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::numbering::position::Position;

pub use self::error::Error;

mod error {
    use crate::schemes::{ChainType, Scheme};

    /// Error type for scheme table lookup.
    #[derive(thiserror::Error, Debug, Clone)]
    pub enum Error {
        #[error("no region table for scheme {0} and chain type {1}")]
        UnsupportedScheme(Scheme, ChainType),
        #[error("unknown numbering scheme: {0}")]
        UnknownScheme(String),
    }
}

/// A residue numbering scheme.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Imgt,
    Kabat,
    Chothia,
    /// Kabat-based scheme used in therapeutic antibody engineering.  Not
    /// supported natively by the numbering engine; sequences are numbered
    /// with Kabat and regions are taken from the CGG table.
    Cgg,
}

impl Scheme {
    /// The scheme the numbering engine is actually invoked with.
    pub fn engine_scheme(&self) -> Scheme {
        match self {
            Scheme::Cgg => Scheme::Kabat,
            _ => *self,
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Scheme::Imgt => "imgt",
            Scheme::Kabat => "kabat",
            Scheme::Chothia => "chothia",
            Scheme::Cgg => "cgg",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "imgt" => Ok(Scheme::Imgt),
            "kabat" => Ok(Scheme::Kabat),
            "chothia" => Ok(Scheme::Chothia),
            "cgg" => Ok(Scheme::Cgg),
            _ => Err(Error::UnknownScheme(s.to_string())),
        }
    }
}

/// Antibody chain type as reported by the numbering engine.
///
/// Kappa and lambda chains have separate rows in the tables; engine chain
/// types outside `{H, K, L}` (e.g. TCR beta) are treated as heavy.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub enum ChainType {
    H,
    K,
    L,
}

impl ChainType {
    /// Map an engine-reported chain type letter onto a table row.
    pub fn from_engine_letter(letter: &str) -> ChainType {
        match letter.to_uppercase().as_str() {
            "K" => ChainType::K,
            "L" => ChainType::L,
            _ => ChainType::H,
        }
    }
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChainType::H => "H",
            ChainType::K => "K",
            ChainType::L => "L",
        };
        write!(f, "{}", s)
    }
}

/// The seven canonical sub-regions of a variable domain, in order.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegionName {
    FR1,
    CDR1,
    FR2,
    CDR2,
    FR3,
    CDR3,
    FR4,
}

impl RegionName {
    /// All region names in canonical order.
    pub const ALL: [RegionName; 7] = [
        RegionName::FR1,
        RegionName::CDR1,
        RegionName::FR2,
        RegionName::CDR2,
        RegionName::FR3,
        RegionName::CDR3,
        RegionName::FR4,
    ];

    pub fn is_cdr(&self) -> bool {
        matches!(self, RegionName::CDR1 | RegionName::CDR2 | RegionName::CDR3)
    }
}

impl std::fmt::Display for RegionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RegionName::FR1 => "FR1",
            RegionName::CDR1 => "CDR1",
            RegionName::FR2 => "FR2",
            RegionName::CDR2 => "CDR2",
            RegionName::FR3 => "FR3",
            RegionName::CDR3 => "CDR3",
            RegionName::FR4 => "FR4",
        };
        write!(f, "{}", s)
    }
}

/// Region boundaries of one scheme/chain-type combination, in canonical
/// region order.  Boundary positions are inclusive on both ends.
pub type RegionMap = IndexMap<RegionName, (Position, Position)>;

fn region_map(rows: [(RegionName, (u32, Option<char>), (u32, Option<char>)); 7]) -> RegionMap {
    rows.into_iter()
        .map(|(name, (s_num, s_ins), (e_num, e_ins))| {
            (
                name,
                (
                    Position {
                        number: s_num,
                        insertion: s_ins,
                    },
                    Position {
                        number: e_num,
                        insertion: e_ins,
                    },
                ),
            )
        })
        .collect()
}

/// All region tables, keyed by scheme and chain type.
///
/// For schemes defined only for generic light chains (IMGT, Kabat, Chothia)
/// the L row is duplicated as the K row on load; CGG ships a dedicated K row.
static REGION_TABLES: LazyLock<IndexMap<(Scheme, ChainType), RegionMap>> = LazyLock::new(|| {
    use RegionName::*;

    let mut tables = IndexMap::new();

    tables.insert(
        (Scheme::Kabat, ChainType::H),
        region_map([
            (FR1, (1, None), (30, None)),
            (CDR1, (31, None), (35, Some('A'))),
            (FR2, (36, None), (49, None)),
            (CDR2, (50, None), (65, None)),
            (FR3, (66, None), (94, None)),
            (CDR3, (95, None), (102, None)),
            (FR4, (103, None), (113, None)),
        ]),
    );
    tables.insert(
        (Scheme::Kabat, ChainType::L),
        region_map([
            (FR1, (1, None), (23, None)),
            (CDR1, (24, None), (34, None)),
            (FR2, (35, None), (49, None)),
            (CDR2, (50, None), (56, None)),
            (FR3, (57, None), (88, None)),
            (CDR3, (89, None), (97, None)),
            (FR4, (98, None), (107, None)),
        ]),
    );

    tables.insert(
        (Scheme::Chothia, ChainType::H),
        region_map([
            (FR1, (1, None), (26, None)),
            (CDR1, (27, None), (32, None)),
            (FR2, (33, None), (52, None)),
            (CDR2, (53, None), (56, None)),
            (FR3, (57, None), (95, None)),
            (CDR3, (96, None), (102, None)),
            (FR4, (103, None), (113, None)),
        ]),
    );
    tables.insert(
        (Scheme::Chothia, ChainType::L),
        region_map([
            (FR1, (1, None), (23, None)),
            (CDR1, (24, None), (34, None)),
            (FR2, (35, None), (50, None)),
            (CDR2, (51, None), (54, None)),
            (FR3, (55, None), (88, None)),
            (CDR3, (89, None), (97, None)),
            (FR4, (98, None), (107, None)),
        ]),
    );

    tables.insert(
        (Scheme::Imgt, ChainType::H),
        region_map([
            (FR1, (1, None), (26, None)),
            (CDR1, (27, None), (38, None)),
            (FR2, (39, None), (55, None)),
            (CDR2, (56, None), (65, None)),
            (FR3, (66, None), (104, None)),
            (CDR3, (105, None), (117, None)),
            (FR4, (118, None), (128, None)),
        ]),
    );
    tables.insert(
        (Scheme::Imgt, ChainType::L),
        region_map([
            (FR1, (1, None), (26, None)),
            (CDR1, (27, None), (38, None)),
            (FR2, (39, None), (55, None)),
            (CDR2, (56, None), (65, None)),
            (FR3, (66, None), (104, None)),
            (CDR3, (105, None), (117, None)),
            (FR4, (118, None), (129, None)),
        ]),
    );

    tables.insert(
        (Scheme::Cgg, ChainType::H),
        region_map([
            (FR1, (1, None), (24, None)),
            (CDR1, (25, None), (34, None)),
            (FR2, (35, None), (49, None)),
            (CDR2, (50, None), (65, None)),
            (FR3, (66, None), (94, None)),
            (CDR3, (95, None), (102, None)),
            (FR4, (103, None), (113, None)),
        ]),
    );
    tables.insert(
        (Scheme::Cgg, ChainType::K),
        region_map([
            (FR1, (1, None), (23, None)),
            (CDR1, (24, None), (34, None)),
            (FR2, (35, None), (49, None)),
            (CDR2, (50, None), (56, None)),
            (FR3, (57, None), (88, None)),
            (CDR3, (89, None), (97, None)),
            (FR4, (98, None), (107, None)),
        ]),
    );
    tables.insert(
        (Scheme::Cgg, ChainType::L),
        region_map([
            (FR1, (1, None), (23, None)),
            (CDR1, (24, None), (34, None)),
            (FR2, (35, None), (49, None)),
            (CDR2, (50, None), (56, None)),
            (FR3, (57, None), (88, None)),
            (CDR3, (89, None), (97, None)),
            (FR4, (98, None), (107, None)),
        ]),
    );

    // Duplicate L as K where no dedicated K row exists.
    for scheme in [Scheme::Imgt, Scheme::Kabat, Scheme::Chothia] {
        let l_row = tables
            .get(&(scheme, ChainType::L))
            .expect("L row missing from builtin table")
            .clone();
        tables.insert((scheme, ChainType::K), l_row);
    }

    tables
});

/// Look up the region boundary table for a scheme/chain-type combination.
pub fn regions_for(scheme: Scheme, chain_type: ChainType) -> Result<&'static RegionMap, Error> {
    REGION_TABLES
        .get(&(scheme, chain_type))
        .ok_or(Error::UnsupportedScheme(scheme, chain_type))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn smoke() {
        // 4 schemes x 3 chain types
        assert_eq!(REGION_TABLES.len(), 12);
        for regions in REGION_TABLES.values() {
            assert_eq!(regions.len(), 7);
            let names: Vec<_> = regions.keys().copied().collect();
            assert_eq!(names, RegionName::ALL);
        }
    }

    #[rstest]
    #[case(Scheme::Imgt)]
    #[case(Scheme::Kabat)]
    #[case(Scheme::Chothia)]
    fn kappa_duplicates_lambda(#[case] scheme: Scheme) -> Result<(), anyhow::Error> {
        assert_eq!(
            regions_for(scheme, ChainType::K)?,
            regions_for(scheme, ChainType::L)?
        );
        Ok(())
    }

    #[test]
    fn cgg_has_distinct_kappa_row() -> Result<(), anyhow::Error> {
        // CGG K and L happen to agree, but H differs from both.
        assert_ne!(
            regions_for(Scheme::Cgg, ChainType::H)?,
            regions_for(Scheme::Cgg, ChainType::K)?
        );
        Ok(())
    }

    #[test]
    fn boundaries_are_contiguous_for_imgt_heavy() -> Result<(), anyhow::Error> {
        let regions = regions_for(Scheme::Imgt, ChainType::H)?;
        let mut expected_start = 1;
        for (start, stop) in regions.values() {
            assert_eq!(start.number, expected_start);
            expected_start = stop.number + 1;
        }
        Ok(())
    }

    #[test]
    fn kabat_heavy_cdr1_stop_carries_insertion() -> Result<(), anyhow::Error> {
        let regions = regions_for(Scheme::Kabat, ChainType::H)?;
        let (_, stop) = &regions[&RegionName::CDR1];
        assert_eq!(stop.to_string(), "35A");
        Ok(())
    }

    #[test]
    fn engine_letters_outside_hkl_map_to_heavy() {
        // TCR chains (A/B/G/D) are annotated against the heavy-chain rows.
        assert_eq!(ChainType::from_engine_letter("B"), ChainType::H);
        assert_eq!(ChainType::from_engine_letter("A"), ChainType::H);
        assert_eq!(ChainType::from_engine_letter("k"), ChainType::K);
        assert_eq!(ChainType::from_engine_letter("L"), ChainType::L);
    }

    #[test]
    fn engine_scheme_mapping() {
        assert_eq!(Scheme::Cgg.engine_scheme(), Scheme::Kabat);
        assert_eq!(Scheme::Imgt.engine_scheme(), Scheme::Imgt);
    }

    #[test]
    fn scheme_round_trips_via_str() -> Result<(), anyhow::Error> {
        for scheme in [Scheme::Imgt, Scheme::Kabat, Scheme::Chothia, Scheme::Cgg] {
            assert_eq!(scheme.to_string().parse::<Scheme>()?, scheme);
        }
        assert!("martin".parse::<Scheme>().is_err());
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
