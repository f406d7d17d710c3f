//! Multiple sequence alignment of annotated sequences.
//!
//! External CPU-bound aligners (muscle, mafft, clustalo) are wrapped behind
//! subprocess adapters; for exactly two sequences a built-in affine-gap
//! pairwise aligner (global or local, BLOSUM/PAM-scored) is offered as an
//! alternative.  The produced [`MsaResult`] owns the aligned matrix plus
//! per-column consensus and conservation.

pub mod annotate;
pub mod consensus;
mod error;
pub mod gapmap;

use std::io::Write as _;
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;

use bio::alignment::pairwise::Aligner;
use bio::alignment::{Alignment, AlignmentOperation};
use bio::io::fasta;
use bio::scores::{blosum62, pam120, pam200, pam250, pam40};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::msa::annotate::RegionOverlay;
pub use crate::msa::error::Error;
use crate::process::{self, find_binary, run_with_timeout, CancelToken};
use crate::sequences::{self, GAP};

/// Supported alignment methods.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    PairwiseGlobal,
    PairwiseLocal,
    Muscle,
    Mafft,
    Clustalo,
}

impl Method {
    pub fn is_external(&self) -> bool {
        matches!(self, Method::Muscle | Method::Mafft | Method::Clustalo)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Method::PairwiseGlobal => "pairwise_global",
            Method::PairwiseLocal => "pairwise_local",
            Method::Muscle => "muscle",
            Method::Mafft => "mafft",
            Method::Clustalo => "clustalo",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pairwise_global" => Ok(Method::PairwiseGlobal),
            "pairwise_local" => Ok(Method::PairwiseLocal),
            "muscle" => Ok(Method::Muscle),
            "mafft" => Ok(Method::Mafft),
            "clustalo" => Ok(Method::Clustalo),
            _ => Err(format!("unknown alignment method: {}", s)),
        }
    }
}

/// Substitution matrices available to the pairwise aligner.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Matrix {
    Blosum62,
    Pam40,
    Pam120,
    Pam200,
    Pam250,
}

impl Matrix {
    fn score_fn(&self) -> fn(u8, u8) -> i32 {
        match self {
            Matrix::Blosum62 => blosum62,
            Matrix::Pam40 => pam40,
            Matrix::Pam120 => pam120,
            Matrix::Pam200 => pam200,
            Matrix::Pam250 => pam250,
        }
    }
}

impl FromStr for Matrix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BLOSUM62" => Ok(Matrix::Blosum62),
            "PAM40" => Ok(Matrix::Pam40),
            "PAM120" => Ok(Matrix::Pam120),
            "PAM200" => Ok(Matrix::Pam200),
            "PAM250" => Ok(Matrix::Pam250),
            _ => Err(format!("unknown substitution matrix: {}", s)),
        }
    }
}

/// Configuration for the `MsaEngine`.
#[derive(Debug, PartialEq, Clone)]
pub struct Config {
    /// Gap opening penalty for the pairwise aligner; rounded to the
    /// integer scores the dynamic program uses.
    pub gap_open: f64,
    /// Gap extension penalty, likewise rounded.
    pub gap_extend: f64,
    pub matrix: Matrix,
    /// Deadline for one external aligner invocation.
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gap_open: -10.0,
            gap_extend: -0.5,
            matrix: Matrix::Blosum62,
            timeout: Duration::from_secs(300),
        }
    }
}

/// One aligned row of an MSA.  Removing the gaps from `aligned` yields
/// `original` letter for letter.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct MsaSequence {
    pub name: String,
    #[serde(rename = "original_sequence")]
    pub original: String,
    #[serde(rename = "aligned_sequence")]
    pub aligned: String,
    /// Sorted aligned-column indices holding gaps.
    pub gaps: Vec<usize>,
    /// Region overlays in aligned coordinates; empty until the MSA
    /// annotator has run.
    pub annotations: Vec<RegionOverlay>,
}

impl MsaSequence {
    fn new(name: String, original: String, aligned: String) -> Self {
        let gaps = aligned
            .chars()
            .enumerate()
            .filter(|(_, c)| *c == GAP)
            .map(|(i, _)| i)
            .collect();
        Self {
            name,
            original,
            aligned,
            gaps,
            annotations: Vec::new(),
        }
    }
}

/// The produced alignment document.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct MsaResult {
    #[serde(rename = "msa_id")]
    pub id: Uuid,
    pub sequences: Vec<MsaSequence>,
    #[serde(rename = "alignment_matrix")]
    pub matrix: Vec<Vec<char>>,
    pub consensus: String,
    pub conservation: Vec<f64>,
    pub method: Method,
}

impl MsaResult {
    fn new(sequences: Vec<MsaSequence>, method: Method) -> Self {
        let matrix: Vec<Vec<char>> = sequences
            .iter()
            .map(|s| s.aligned.chars().collect())
            .collect();
        let consensus = consensus::consensus(&matrix);
        let conservation = consensus::conservation(&matrix);
        Self {
            id: Uuid::new_v4(),
            sequences,
            matrix,
            consensus,
            conservation,
            method,
        }
    }

    /// Alignment width; every row has this length.
    pub fn width(&self) -> usize {
        self.matrix.first().map(Vec::len).unwrap_or(0)
    }

    /// Render the produced alignment document.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Wraps the external aligners and the built-in pairwise DP.
pub struct MsaEngine {
    config: Config,
}

impl MsaEngine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Align `inputs` with `method`.  Row order follows input order; on any
    /// tool failure no partial matrix is materialized.
    pub fn align(
        &self,
        inputs: &[(String, String)],
        method: Method,
        cancel: &CancelToken,
    ) -> Result<MsaResult, Error> {
        if inputs.is_empty() {
            return Err(Error::EmptyInput);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let cleaned: Vec<(String, String)> = inputs
            .iter()
            .map(|(name, seq)| Ok((name.clone(), sequences::clean_sequence(seq)?)))
            .collect::<Result<_, Error>>()?;

        let aligned = if method.is_external() {
            self.align_external(&cleaned, method, cancel)?
        } else {
            self.align_pairwise(&cleaned, method)?
        };

        let width = aligned.first().map(String::len).unwrap_or(0);
        if aligned.iter().any(|row| row.len() != width) {
            return Err(Error::AlignmentFailed {
                method,
                cause: "aligner produced rows of differing length".to_string(),
            });
        }
        for ((name, original), row) in cleaned.iter().zip(&aligned) {
            if sequences::strip_gaps(row) != *original {
                return Err(Error::AlignmentFailed {
                    method,
                    cause: format!("aligned row for {} does not match its input", name),
                });
            }
        }

        let rows = cleaned
            .into_iter()
            .zip(aligned)
            .map(|((name, original), row)| MsaSequence::new(name, original, row))
            .collect();
        Ok(MsaResult::new(rows, method))
    }

    fn align_external(
        &self,
        inputs: &[(String, String)],
        method: Method,
        cancel: &CancelToken,
    ) -> Result<Vec<String>, Error> {
        let tool = match method {
            Method::Muscle => "muscle",
            Method::Mafft => "mafft",
            Method::Clustalo => "clustalo",
            _ => unreachable!("not an external method"),
        };
        let binary = find_binary(tool).map_err(|e| external_error(method, e))?;

        // Positional FASTA names; aligners reorder rows, we restore input
        // order from the index afterwards.
        let names: Vec<String> = (0..inputs.len()).map(|i| format!("seq_{}", i)).collect();
        let fasta_text = sequences::to_fasta(
            names
                .iter()
                .map(String::as_str)
                .zip(inputs.iter().map(|(_, seq)| seq.as_str())),
        );
        let mut fasta_in = tempfile::Builder::new()
            .prefix("msa-in-")
            .suffix(".fasta")
            .tempfile()
            .map_err(|e| external_error(method, process::Error::Io(e)))?;
        fasta_in
            .write_all(fasta_text.as_bytes())
            .and_then(|_| fasta_in.flush())
            .map_err(|e| external_error(method, process::Error::Io(e)))?;

        let fasta_out = tempfile::Builder::new()
            .prefix("msa-out-")
            .suffix(".fasta")
            .tempfile()
            .map_err(|e| external_error(method, process::Error::Io(e)))?;

        let mut cmd = Command::new(binary);
        match method {
            Method::Muscle => {
                cmd.arg("-align")
                    .arg(fasta_in.path())
                    .arg("-output")
                    .arg(fasta_out.path());
            }
            Method::Mafft => {
                cmd.arg("--auto").arg(fasta_in.path());
            }
            Method::Clustalo => {
                cmd.arg("-i")
                    .arg(fasta_in.path())
                    .arg("-o")
                    .arg(fasta_out.path())
                    .arg("--outfmt=fasta")
                    .arg("--force");
            }
            _ => unreachable!(),
        }

        debug!("aligning {} sequences with {}", inputs.len(), method);
        let output =
            run_with_timeout(&mut cmd, self.config.timeout, cancel).map_err(|e| match e {
                process::Error::Cancelled => Error::Cancelled,
                other => external_error(method, other),
            })?;

        // mafft writes the alignment to stdout, the others to the out file.
        let aligned_text = match method {
            Method::Mafft => output.stdout,
            _ => std::fs::read_to_string(fasta_out.path())
                .map_err(|e| external_error(method, process::Error::Io(e)))?,
        };

        parse_aligned_fasta(&aligned_text, inputs.len(), method)
    }

    fn align_pairwise(
        &self,
        inputs: &[(String, String)],
        method: Method,
    ) -> Result<Vec<String>, Error> {
        if inputs.len() != 2 {
            return Err(Error::PairwiseSequenceCount(inputs.len()));
        }
        if self.config.gap_open > 0.0 || self.config.gap_extend > 0.0 {
            return Err(Error::InvalidGapPenalties(
                self.config.gap_open,
                self.config.gap_extend,
            ));
        }
        let x = inputs[0].1.as_bytes();
        let y = inputs[1].1.as_bytes();
        let gap_open = self.config.gap_open.round() as i32;
        let gap_extend = self.config.gap_extend.round() as i32;

        let mut aligner =
            Aligner::with_capacity(x.len(), y.len(), gap_open, gap_extend, self.config.matrix.score_fn());
        let alignment = match method {
            Method::PairwiseGlobal => aligner.global(x, y),
            Method::PairwiseLocal => aligner.local(x, y),
            _ => unreachable!("not a pairwise method"),
        };

        let (row_x, row_y) = aligned_strings(x, y, &alignment);
        Ok(vec![row_x, row_y])
    }
}

fn external_error(method: Method, e: process::Error) -> Error {
    Error::AlignmentFailed {
        method,
        cause: e.to_string(),
    }
}

/// Rebuild both gapped rows from a pairwise alignment.  Regions outside the
/// aligned core (local mode) are emitted staggered against gaps so the
/// full-length row invariant holds.
fn aligned_strings(x: &[u8], y: &[u8], alignment: &Alignment) -> (String, String) {
    let mut row_x = String::new();
    let mut row_y = String::new();

    for &b in &x[..alignment.xstart] {
        row_x.push(b as char);
        row_y.push(GAP);
    }
    for &b in &y[..alignment.ystart] {
        row_x.push(GAP);
        row_y.push(b as char);
    }

    let mut xi = alignment.xstart;
    let mut yi = alignment.ystart;
    for op in &alignment.operations {
        match op {
            AlignmentOperation::Match | AlignmentOperation::Subst => {
                row_x.push(x[xi] as char);
                row_y.push(y[yi] as char);
                xi += 1;
                yi += 1;
            }
            AlignmentOperation::Del => {
                row_x.push(GAP);
                row_y.push(y[yi] as char);
                yi += 1;
            }
            AlignmentOperation::Ins => {
                row_x.push(x[xi] as char);
                row_y.push(GAP);
                xi += 1;
            }
            // Clip operations only occur in custom alignment modes, which
            // the engine does not use.
            AlignmentOperation::Xclip(_) | AlignmentOperation::Yclip(_) => {}
        }
    }

    for &b in &x[xi..] {
        row_x.push(b as char);
        row_y.push(GAP);
    }
    for &b in &y[yi..] {
        row_x.push(GAP);
        row_y.push(b as char);
    }

    (row_x, row_y)
}

/// Parse the aligner's FASTA output and restore input row order from the
/// positional `seq_{i}` names.
fn parse_aligned_fasta(text: &str, expected: usize, method: Method) -> Result<Vec<String>, Error> {
    let reader = fasta::Reader::new(text.as_bytes());
    let mut rows: Vec<Option<String>> = vec![None; expected];
    for record in reader.records() {
        let record = record.map_err(|e| Error::AlignmentFailed {
            method,
            cause: format!("unreadable alignment output: {}", e),
        })?;
        let index: usize = record
            .id()
            .strip_prefix("seq_")
            .and_then(|i| i.parse().ok())
            .ok_or_else(|| Error::AlignmentFailed {
                method,
                cause: format!("unexpected record name in output: {}", record.id()),
            })?;
        if index >= expected {
            return Err(Error::AlignmentFailed {
                method,
                cause: format!("record index {} out of range", index),
            });
        }
        rows[index] = Some(String::from_utf8_lossy(record.seq()).to_uppercase());
    }
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            row.ok_or_else(|| Error::AlignmentFailed {
                method,
                cause: format!("missing aligned row for input {}", i),
            })
        })
        .collect()
}
