//! Partitioning numbered variable domains into framework and CDR regions.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::annotate::Region;
use crate::numbering::{NumberedDomain, Position};
use crate::schemes::{regions_for, ChainType, Error, RegionName, Scheme};

/// Compute the FR/CDR regions of a numbered domain under `scheme`.
///
/// Region coordinates are domain-local, 1-based and inclusive, referring to
/// the actual letters of the domain slice (gap residues in the numbering do
/// not occupy an index).  Boundaries that cannot be resolved against the
/// numbering yield a region with empty letters and no span; the canonical
/// scheme boundaries are preserved either way.
pub fn annotate_variable(
    domain: &NumberedDomain,
    scheme: Scheme,
    chain_type: ChainType,
) -> Result<IndexMap<RegionName, Region>, Error> {
    let mut regions = IndexMap::new();
    if domain.residues.is_empty() {
        return Ok(regions);
    }
    let table = regions_for(scheme, chain_type)?;

    // Index actual letters only; scheme positions occupied by a gap must not
    // shift the letter coordinates.
    let letters: Vec<(Position, char)> = domain
        .residues
        .iter()
        .filter(|r| !r.is_gap())
        .map(|r| (r.pos, r.letter))
        .collect();
    let pos_to_idx: AHashMap<Position, usize> = letters
        .iter()
        .enumerate()
        .map(|(idx, (pos, _))| (*pos, idx))
        .collect();

    for (name, (scheme_start, scheme_stop)) in table {
        let start_idx = resolve_boundary(&pos_to_idx, *scheme_start);
        let stop_idx = resolve_boundary(&pos_to_idx, *scheme_stop)
            .map(|idx| absorb_insertions(&letters, idx, scheme_stop.number));

        let region = match (start_idx, stop_idx) {
            (Some(start), Some(stop)) if start <= stop => Region {
                name: *name,
                start: Some(start + 1),
                stop: Some(stop + 1),
                letters: letters[start..=stop].iter().map(|(_, c)| c).collect(),
                scheme_start: *scheme_start,
                scheme_stop: *scheme_stop,
            },
            _ => Region {
                name: *name,
                start: None,
                stop: None,
                letters: String::new(),
                scheme_start: *scheme_start,
                scheme_stop: *scheme_stop,
            },
        };
        regions.insert(*name, region);
    }

    Ok(regions)
}

/// Look a boundary up in the position index.  A boundary with an insertion
/// code (Kabat heavy CDR1 stops at `35A`) falls back to its canonical base
/// position when the exact key is absent.
fn resolve_boundary(pos_to_idx: &AHashMap<Position, usize>, pos: Position) -> Option<usize> {
    pos_to_idx.get(&pos).copied().or_else(|| {
        if pos.insertion.is_some() {
            pos_to_idx.get(&pos.canonical()).copied()
        } else {
            None
        }
    })
}

/// Extend a stop index across trailing insertion codes of the stop's
/// canonical number, so inserted letters inherit their canonical position's
/// region membership.
fn absorb_insertions(letters: &[(Position, char)], mut idx: usize, number: u32) -> usize {
    while idx + 1 < letters.len() && letters[idx + 1].0.number == number {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::annotate_variable;
    use crate::numbering::{NumberedDomain, NumberedResidue, Position, Species};
    use crate::schemes::{ChainType, RegionName, Scheme};

    /// Build a numbered domain from `(number, insertion, letter)` triples.
    fn domain(triples: &[(u32, Option<char>, char)]) -> NumberedDomain {
        let residues: Vec<NumberedResidue> = triples
            .iter()
            .map(|&(number, insertion, letter)| NumberedResidue {
                pos: Position { number, insertion },
                letter,
            })
            .collect();
        let len = residues.iter().filter(|r| !r.is_gap()).count();
        NumberedDomain {
            residues,
            query_start: 0,
            query_end: len,
            chain_type: ChainType::H,
            species: Species::Human,
            evalue: 1e-50,
            score: 150.0,
            germlines: None,
        }
    }

    /// A contiguous run of plain positions `from..=to` with letter `letter`.
    fn run(from: u32, to: u32, letter: char) -> Vec<(u32, Option<char>, char)> {
        (from..=to).map(|n| (n, None, letter)).collect()
    }

    #[test]
    fn empty_numbering_yields_empty_map() -> Result<(), anyhow::Error> {
        let dom = domain(&[]);
        let regions = annotate_variable(&dom, Scheme::Imgt, ChainType::H)?;
        assert!(regions.is_empty());
        Ok(())
    }

    #[test]
    fn full_imgt_heavy_domain_resolves_all_regions() -> Result<(), anyhow::Error> {
        // Plain 1..=128 numbering: FR1 1-26, CDR1 27-38, ..., FR4 118-128.
        let mut triples = Vec::new();
        triples.extend(run(1, 26, 'F'));
        triples.extend(run(27, 38, 'A'));
        triples.extend(run(39, 55, 'F'));
        triples.extend(run(56, 65, 'B'));
        triples.extend(run(66, 104, 'F'));
        triples.extend(run(105, 117, 'C'));
        triples.extend(run(118, 128, 'F'));
        let dom = domain(&triples);

        let regions = annotate_variable(&dom, Scheme::Imgt, ChainType::H)?;
        assert_eq!(regions.len(), 7);
        for region in regions.values() {
            assert!(!region.letters.is_empty(), "empty {:?}", region.name);
        }
        let cdr1 = &regions[&RegionName::CDR1];
        assert_eq!(cdr1.start, Some(27));
        assert_eq!(cdr1.stop, Some(38));
        assert_eq!(cdr1.letters, "AAAAAAAAAAAA");
        let fr4 = &regions[&RegionName::FR4];
        assert_eq!(fr4.stop, Some(128));
        Ok(())
    }

    #[test]
    fn gap_residues_do_not_occupy_letter_indices() -> Result<(), anyhow::Error> {
        // IMGT numbering with gaps inside CDR1 (a short loop): positions
        // 30-35 are unoccupied.
        let mut triples = Vec::new();
        triples.extend(run(1, 26, 'F'));
        triples.extend(run(27, 29, 'A'));
        triples.extend((30..=35).map(|n| (n, None, '-')).collect::<Vec<_>>());
        triples.extend(run(36, 38, 'A'));
        triples.extend(run(39, 55, 'F'));
        triples.extend(run(56, 65, 'B'));
        triples.extend(run(66, 104, 'F'));
        triples.extend(run(105, 117, 'C'));
        triples.extend(run(118, 128, 'F'));
        let dom = domain(&triples);

        let regions = annotate_variable(&dom, Scheme::Imgt, ChainType::H)?;
        let cdr1 = &regions[&RegionName::CDR1];
        assert_eq!(cdr1.letters, "AAAAAA");
        assert_eq!(cdr1.start, Some(27));
        assert_eq!(cdr1.stop, Some(32));
        // FR2 starts right after the six actual CDR1 letters.
        let fr2 = &regions[&RegionName::FR2];
        assert_eq!(fr2.start, Some(33));
        Ok(())
    }

    #[test]
    fn kabat_insertion_stop_falls_back_to_base_position() -> Result<(), anyhow::Error> {
        // Kabat heavy CDR1 is 31..=35A; without a 35A residue the stop must
        // resolve to 35.
        let mut triples = Vec::new();
        triples.extend(run(1, 30, 'F'));
        triples.extend(run(31, 35, 'A'));
        triples.extend(run(36, 49, 'F'));
        triples.extend(run(50, 65, 'B'));
        triples.extend(run(66, 94, 'F'));
        triples.extend(run(95, 102, 'C'));
        triples.extend(run(103, 113, 'F'));
        let dom = domain(&triples);

        let regions = annotate_variable(&dom, Scheme::Kabat, ChainType::H)?;
        let cdr1 = &regions[&RegionName::CDR1];
        assert_eq!(cdr1.letters, "AAAAA");
        assert_eq!(cdr1.start, Some(31));
        assert_eq!(cdr1.stop, Some(35));
        Ok(())
    }

    #[test]
    fn insertion_codes_inherit_region_membership() -> Result<(), anyhow::Error> {
        // CDR2 stop is 65; inserted residues 65A and 65B belong to CDR2 and
        // FR3 starts at the same letter it would without them.
        let mut triples = Vec::new();
        triples.extend(run(1, 30, 'F'));
        triples.extend(run(31, 35, 'A'));
        triples.extend(run(36, 49, 'F'));
        triples.extend(run(50, 65, 'B'));
        triples.push((65, Some('A'), 'X'));
        triples.push((65, Some('B'), 'Y'));
        triples.extend(run(66, 94, 'F'));
        triples.extend(run(95, 102, 'C'));
        triples.extend(run(103, 113, 'F'));
        let dom = domain(&triples);

        let regions = annotate_variable(&dom, Scheme::Kabat, ChainType::H)?;
        let cdr2 = &regions[&RegionName::CDR2];
        assert!(cdr2.letters.ends_with("BXY"));
        assert_eq!(cdr2.letters.len(), 18);
        let fr3 = &regions[&RegionName::FR3];
        assert_eq!(fr3.letters, "F".repeat(29));
        Ok(())
    }

    #[test]
    fn truncated_domain_yields_empty_fr4() -> Result<(), anyhow::Error> {
        // Numbering stops at 110: CDR3 stop (117) and FR4 are unresolved.
        let mut triples = Vec::new();
        triples.extend(run(1, 26, 'F'));
        triples.extend(run(27, 38, 'A'));
        triples.extend(run(39, 55, 'F'));
        triples.extend(run(56, 65, 'B'));
        triples.extend(run(66, 104, 'F'));
        triples.extend(run(105, 110, 'C'));
        let dom = domain(&triples);

        let regions = annotate_variable(&dom, Scheme::Imgt, ChainType::H)?;
        let cdr3 = &regions[&RegionName::CDR3];
        assert_eq!(cdr3.letters, "");
        assert_eq!(cdr3.start, None);
        assert_eq!(cdr3.scheme_stop.to_string(), "117");
        let fr4 = &regions[&RegionName::FR4];
        assert_eq!(fr4.letters, "");
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
