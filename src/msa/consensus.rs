//! Per-column consensus and conservation over an alignment matrix.

use std::collections::BTreeMap;

use crate::sequences::GAP;

/// Consensus letter per column: the most frequent non-gap letter, ties
/// broken towards the lexicographically smaller letter, `-` for all-gap
/// columns.
pub fn consensus(matrix: &[Vec<char>]) -> String {
    columns(matrix)
        .map(|counts| {
            let mut best: Option<(char, usize)> = None;
            for (letter, count) in counts {
                match best {
                    // BTreeMap iterates in letter order, so a strictly
                    // greater count is required to displace the incumbent.
                    Some((_, best_count)) if count <= best_count => {}
                    _ => best = Some((letter, count)),
                }
            }
            best.map(|(letter, _)| letter).unwrap_or(GAP)
        })
        .collect()
}

/// Conservation score per column: `1.0` when every sequence present in the
/// column agrees, otherwise `1 / |unique letters|`.  Columns covered by
/// fewer than two sequences (all-gap columns included) carry no agreement
/// signal and score `0.0`.
pub fn conservation(matrix: &[Vec<char>]) -> Vec<f64> {
    columns(matrix)
        .map(|counts| {
            let total: usize = counts.values().sum();
            if total < 2 {
                return 0.0;
            }
            match counts.len() {
                1 => 1.0,
                unique => 1.0 / unique as f64,
            }
        })
        .collect()
}

/// Optional per-column stability metric in `[0, 1]`, derived from the
/// Shannon entropy of the non-gap letter distribution: `1.0` for a fully
/// conserved column, approaching `0.0` for a uniform spread over the
/// twenty letters.  All-gap columns score `0.0`.
pub fn column_qualities(matrix: &[Vec<char>]) -> Vec<f64> {
    let max_entropy = (crate::sequences::AMINO_ACIDS.len() as f64).ln();
    columns(matrix)
        .map(|counts| {
            let total: usize = counts.values().sum();
            if total == 0 {
                return 0.0;
            }
            let entropy: f64 = counts
                .values()
                .map(|&count| {
                    let p = count as f64 / total as f64;
                    -p * p.ln()
                })
                .sum();
            1.0 - (entropy / max_entropy).min(1.0)
        })
        .collect()
}

/// Iterate columns as non-gap letter counts.  Ragged rows contribute only
/// to the columns they reach; the engine guarantees uniform lengths for
/// its own matrices.
fn columns(matrix: &[Vec<char>]) -> impl Iterator<Item = BTreeMap<char, usize>> + '_ {
    let width = matrix.iter().map(Vec::len).max().unwrap_or(0);
    (0..width).map(move |col| {
        let mut counts = BTreeMap::new();
        for row in matrix {
            match row.get(col) {
                Some(&c) if c != GAP => *counts.entry(c).or_insert(0) += 1,
                _ => {}
            }
        }
        counts
    })
}
