//! Residue numbering of antibody variable domains.
//!
//! The actual numbering is performed by an external engine (an ANARCI-style
//! binary) behind the [`NumberingEngine`] trait; [`Numberer`] adds the
//! scheme-fallback policy on top and merges the engine's parallel output
//! lists into [`NumberedDomain`] values.

pub mod anarci;
mod error;
pub mod position;

use std::str::FromStr;
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};

pub use crate::numbering::error::Error;
pub use crate::numbering::position::Position;
use crate::process::CancelToken;
use crate::schemes::{ChainType, Scheme};
use crate::sequences::GAP;

/// One numbered residue: a scheme position plus the residue letter.
///
/// The letter is `-` for scheme positions not occupied by the query
/// sequence.
#[derive(Debug, PartialEq, Clone, Copy, Serialize)]
pub struct NumberedResidue {
    pub pos: Position,
    pub letter: char,
}

impl NumberedResidue {
    pub fn is_gap(&self) -> bool {
        self.letter == GAP
    }
}

/// Species assignment of a numbered domain.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Species {
    Human,
    Mouse,
    Rat,
    Rabbit,
    Rhesus,
    Pig,
    Alpaca,
    Unknown,
}

impl std::fmt::Display for Species {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Species::Human => "human",
            Species::Mouse => "mouse",
            Species::Rat => "rat",
            Species::Rabbit => "rabbit",
            Species::Rhesus => "rhesus",
            Species::Pig => "pig",
            Species::Alpaca => "alpaca",
            Species::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl Species {
    /// Parse an engine species label.  Unrecognized labels map to
    /// [`Species::Unknown`] rather than failing; the engine's species set
    /// grows over time.
    pub fn from_label(s: &str) -> Species {
        match s.to_lowercase().as_str() {
            "human" => Species::Human,
            "mouse" => Species::Mouse,
            "rat" => Species::Rat,
            "rabbit" => Species::Rabbit,
            "rhesus" | "rhesus_monkey" => Species::Rhesus,
            "pig" => Species::Pig,
            "alpaca" => Species::Alpaca,
            _ => Species::Unknown,
        }
    }
}

impl FromStr for Species {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Species::from_label(s))
    }
}

/// A single germline gene call with its identity fraction.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct GermlineCall {
    pub gene: String,
    pub identity: f64,
}

/// Best V- and J-gene calls for a numbered domain.
#[derive(Debug, PartialEq, Clone, Default, Serialize)]
pub struct GermlineAssignment {
    pub v_gene: Option<GermlineCall>,
    pub j_gene: Option<GermlineCall>,
}

/// Per-domain alignment metadata as reported by the engine.
///
/// ```text
/// chain_type  | H
/// species     | human
/// e-value     | 1.6e-54
/// score       | 174.2
/// query_start | 0
/// query_end   | 120
/// ```
#[derive(Debug, PartialEq, Clone)]
pub struct AlignmentDetail {
    /// Raw chain-type letter (`H`, `K`, `L`, TCR letters, ...).
    pub chain_type: String,
    pub species: String,
    /// 0-based start of the numbered slice in the query sequence.
    pub query_start: usize,
    /// 0-based end-exclusive end of the numbered slice.
    pub query_end: usize,
    pub evalue: f64,
    pub score: f64,
    pub germlines: Option<GermlineAssignment>,
}

/// Raw germline hit table: a header row plus data rows.
///
/// Rows carry at least an `id` column (`{species}_{chain_type}` prefixed)
/// and a `bitscore` column; consumers look columns up by header name.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct HitTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl HitTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// The row with the maximum bitscore among rows whose `id` starts with
    /// `key` (a `{species}_{chain_type}` group key).
    pub fn best_hit_for(&self, key: &str) -> Option<&Vec<String>> {
        let id_idx = self.column("id")?;
        let bitscore_idx = self.column("bitscore")?;
        self.rows
            .iter()
            .filter(|row| {
                row.get(id_idx)
                    .map(|id| group_key(id) == key)
                    .unwrap_or(false)
            })
            .max_by(|a, b| {
                let score = |row: &&Vec<String>| {
                    row.get(bitscore_idx)
                        .and_then(|s| s.parse::<f64>().ok())
                        .unwrap_or(0.0)
                };
                score(a)
                    .partial_cmp(&score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

/// First two `_`-separated components of a hit id, i.e. `species_chaintype`.
fn group_key(id: &str) -> String {
    let mut parts = id.split('_');
    match (parts.next(), parts.next()) {
        (Some(a), Some(b)) => format!("{}_{}", a, b),
        (Some(a), None) => a.to_string(),
        _ => String::new(),
    }
}

/// A numbered variable domain: the engine's residue list merged with its
/// alignment metadata.
#[derive(Debug, PartialEq, Clone)]
pub struct NumberedDomain {
    pub residues: Vec<NumberedResidue>,
    /// 0-based slice of the parent sequence covered by this domain.
    pub query_start: usize,
    /// End-exclusive; always greater than `query_start`.
    pub query_end: usize,
    pub chain_type: ChainType,
    pub species: Species,
    pub evalue: f64,
    pub score: f64,
    pub germlines: Option<GermlineAssignment>,
}

impl NumberedDomain {
    /// The non-gap residues, i.e. the actual letters of the domain slice.
    pub fn letters(&self) -> impl Iterator<Item = &NumberedResidue> {
        self.residues.iter().filter(|r| !r.is_gap())
    }

    /// Group key used for germline hit-table lookup.
    pub fn hit_key(&self) -> String {
        format!("{}_{}", self.species, self.chain_type)
    }
}

/// Raw engine output: four parallel lists indexed by input.
#[derive(Debug, Default)]
pub struct EngineOutput {
    /// Echo of the `(name, sequence)` inputs.
    pub sequences: Vec<(String, String)>,
    /// Per input, per domain: the numbered residues.
    pub numbered: Vec<Vec<Vec<NumberedResidue>>>,
    /// Per input, per domain: alignment metadata.
    pub alignment_details: Vec<Vec<AlignmentDetail>>,
    /// Per input: the raw germline hit table.
    pub hit_tables: Vec<HitTable>,
}

/// Interface to the external numbering engine.
pub trait NumberingEngine {
    /// Number a batch of sequences under `scheme`, restricted to
    /// `allowed_species`.  `scheme` is always one the engine supports
    /// natively (the CGG-to-Kabat mapping happens in [`Numberer`]).
    fn number(
        &self,
        inputs: &[(String, String)],
        scheme: Scheme,
        allowed_species: &[Species],
        cancel: &CancelToken,
    ) -> Result<EngineOutput, Error>;
}

/// Result of numbering one chain, with the scheme that was actually used.
#[derive(Debug)]
pub struct ChainNumbering {
    pub domains: Vec<NumberedDomain>,
    pub hit_table: HitTable,
    pub scheme_used: Scheme,
}

/// Drives the engine for a single chain and applies the fallback policy.
///
/// CGG is not supported natively: the engine is invoked with Kabat and the
/// result is stamped CGG so region extraction uses the CGG table.  If the
/// engine fails under a scheme other than IMGT, one retry with IMGT is
/// attempted and the effectively used scheme is reported.  This is the only
/// place fallback happens.
pub struct Numberer {
    engine: Arc<dyn NumberingEngine + Send + Sync>,
    allowed_species: Vec<Species>,
}

impl Numberer {
    pub fn new(engine: Arc<dyn NumberingEngine + Send + Sync>, allowed_species: Vec<Species>) -> Self {
        Self {
            engine,
            allowed_species,
        }
    }

    pub fn number_chain(
        &self,
        name: &str,
        sequence: &str,
        scheme: Scheme,
        cancel: &CancelToken,
    ) -> Result<ChainNumbering, Error> {
        let engine_scheme = scheme.engine_scheme();
        match self.run(name, sequence, engine_scheme, cancel) {
            Ok(output) => Ok(merge_output(output, scheme)?),
            Err(e) if e.is_cancellation() => Err(e),
            Err(e) if engine_scheme != Scheme::Imgt => {
                warn!(
                    "numbering failed with scheme '{}' ({}), retrying with 'imgt'",
                    engine_scheme, e
                );
                let output = self
                    .run(name, sequence, Scheme::Imgt, cancel)
                    .map_err(|retry| match retry {
                        Error::Cancelled | Error::Process(crate::process::Error::Cancelled) => {
                            retry
                        }
                        other => Error::NumberingFailed(other.to_string()),
                    })?;
                Ok(merge_output(output, Scheme::Imgt)?)
            }
            Err(e) => Err(Error::NumberingFailed(e.to_string())),
        }
    }

    fn run(
        &self,
        name: &str,
        sequence: &str,
        scheme: Scheme,
        cancel: &CancelToken,
    ) -> Result<EngineOutput, Error> {
        let inputs = vec![(name.to_string(), sequence.to_string())];
        let output = self
            .engine
            .number(&inputs, scheme, &self.allowed_species, cancel)?;
        if output.numbered.len() != inputs.len() {
            return Err(Error::RecordCountMismatch(output.numbered.len(), inputs.len()));
        }
        Ok(output)
    }
}

/// Zip the engine's parallel per-domain lists for the first (only) input
/// into [`NumberedDomain`] values.  Domains with missing metadata are
/// dropped, matching the engine contract that the two lists are parallel.
fn merge_output(mut output: EngineOutput, scheme_used: Scheme) -> Result<ChainNumbering, Error> {
    let numbered = output.numbered.pop().unwrap_or_default();
    let details = output.alignment_details.pop().unwrap_or_default();
    let hit_table = output.hit_tables.pop().unwrap_or_default();

    let domains = numbered
        .into_iter()
        .zip(details)
        .map(|(residues, detail)| {
            if detail.query_end <= detail.query_start {
                return Err(Error::MalformedOutput(format!(
                    "empty query span {}..{}",
                    detail.query_start, detail.query_end
                )));
            }
            Ok(NumberedDomain {
                residues,
                query_start: detail.query_start,
                query_end: detail.query_end,
                chain_type: ChainType::from_engine_letter(&detail.chain_type),
                species: Species::from_label(&detail.species),
                evalue: detail.evalue,
                score: detail.score,
                germlines: detail.germlines,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    Ok(ChainNumbering {
        domains,
        hit_table,
        scheme_used,
    })
}
