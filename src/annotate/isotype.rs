//! Isotype classification of constant regions via profile HMMs.
//!
//! The tail of a chain after the last variable domain is scored against one
//! `.hmm` artifact per isotype with `hmmsearch`; the best full-sequence
//! score wins.  Artifacts live in a configured directory and carry the
//! isotype label in their file name (`IGHG1.hmm`, ...).

use std::io::Write as _;
use std::path::PathBuf;
use std::process::Command;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::process::{self, find_binary, run_with_timeout, CancelToken};

pub use self::error::Error;

mod error {
    use std::path::PathBuf;

    /// Error type for isotype detection.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("no isotype HMM artifacts found in {0}")]
        NoArtifacts(PathBuf),
        #[error("subprocess error")]
        Process(#[from] crate::process::Error),
        #[error("i/o error")]
        Io(#[from] std::io::Error),
    }

    impl Error {
        pub fn is_cancellation(&self) -> bool {
            matches!(self, Error::Process(crate::process::Error::Cancelled))
        }
    }
}

/// Antibody heavy-chain isotypes with a shipped profile HMM.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Isotype {
    Ighg1,
    Ighg2,
    Ighg3,
    Ighg4,
    Igha1,
    Igha2,
    Ighd,
    Ighe,
    Ighm,
}

impl std::fmt::Display for Isotype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Isotype::Ighg1 => "IGHG1",
            Isotype::Ighg2 => "IGHG2",
            Isotype::Ighg3 => "IGHG3",
            Isotype::Ighg4 => "IGHG4",
            Isotype::Igha1 => "IGHA1",
            Isotype::Igha2 => "IGHA2",
            Isotype::Ighd => "IGHD",
            Isotype::Ighe => "IGHE",
            Isotype::Ighm => "IGHM",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Isotype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IGHG1" => Ok(Isotype::Ighg1),
            "IGHG2" => Ok(Isotype::Ighg2),
            "IGHG3" => Ok(Isotype::Ighg3),
            "IGHG4" => Ok(Isotype::Ighg4),
            "IGHA1" => Ok(Isotype::Igha1),
            "IGHA2" => Ok(Isotype::Igha2),
            "IGHD" => Ok(Isotype::Ighd),
            "IGHE" => Ok(Isotype::Ighe),
            "IGHM" => Ok(Isotype::Ighm),
            _ => Err(format!("unknown isotype label: {}", s)),
        }
    }
}

/// Constant-region subsequences shorter than this are rejected without
/// scoring; they cannot span a constant domain.
pub const MIN_TAIL_LENGTH: usize = 50;

/// Configuration for the `IsotypeDetector`.
#[derive(Debug, PartialEq, Clone)]
pub struct Config {
    /// Directory holding one `.hmm` artifact per isotype.
    pub hmm_dir: PathBuf,
    /// Name of the scorer binary looked up on `$PATH`.
    pub binary: String,
    /// Per-HMM deadline; a timed-out HMM is skipped, not fatal.
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hmm_dir: PathBuf::from("/usr/share/abseq/isotype-hmms"),
            binary: "hmmsearch".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// The winning isotype for a scored subsequence.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct IsotypeHit {
    pub isotype: Isotype,
    pub score: f64,
    pub evalue: f64,
}

/// Interface for constant-region detection, so the assembler can be driven
/// without the external scorer.
pub trait ConstantRegionDetector {
    fn detect(&self, tail: &str, cancel: &CancelToken) -> Result<Option<IsotypeHit>, Error>;
}

/// Scores candidate constant regions against the isotype HMM set.
///
/// Stateless per invocation; the artifact list is scanned once at
/// construction and the files are opened read-only by the scorer.
pub struct IsotypeDetector {
    config: Config,
    binary: PathBuf,
    artifacts: Vec<(Isotype, PathBuf)>,
}

impl IsotypeDetector {
    pub fn new(config: Config) -> Result<Self, Error> {
        let binary = find_binary(&config.binary)?;

        let mut artifacts = Vec::new();
        for entry in std::fs::read_dir(&config.hmm_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("hmm") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            match stem.parse::<Isotype>() {
                Ok(isotype) => artifacts.push((isotype, path)),
                Err(e) => warn!("skipping HMM artifact {}: {}", path.display(), e),
            }
        }
        if artifacts.is_empty() {
            return Err(Error::NoArtifacts(config.hmm_dir.clone()));
        }
        artifacts.sort();

        Ok(Self {
            config,
            binary,
            artifacts,
        })
    }

    /// Score `tail` against every isotype HMM and return the best hit, if
    /// any.  Best means strictly highest score, ties broken by strictly
    /// lower e-value.
    pub fn detect(&self, tail: &str, cancel: &CancelToken) -> Result<Option<IsotypeHit>, Error> {
        if tail.len() < MIN_TAIL_LENGTH {
            debug!(
                "constant-region candidate of length {} below floor {}, skipping",
                tail.len(),
                MIN_TAIL_LENGTH
            );
            return Ok(None);
        }

        let mut fasta = tempfile::Builder::new()
            .prefix("isotype-")
            .suffix(".fasta")
            .tempfile()?;
        writeln!(fasta, ">query\n{}", tail)?;
        fasta.flush()?;

        let mut best: Option<IsotypeHit> = None;
        for (isotype, hmm_path) in &self.artifacts {
            cancel.check()?;

            let mut cmd = Command::new(&self.binary);
            cmd.arg("--noali").arg(hmm_path).arg(fasta.path());
            let output = match run_with_timeout(&mut cmd, self.config.timeout, cancel) {
                Ok(output) => output,
                Err(process::Error::TimedOut(name, t)) => {
                    warn!("{} timed out after {:?} for {}, skipping", name, t, isotype);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if let Some((score, evalue)) = parse_best_score(&output.stdout) {
                let better = match &best {
                    None => true,
                    Some(b) => score > b.score || (score == b.score && evalue < b.evalue),
                };
                if better {
                    best = Some(IsotypeHit {
                        isotype: *isotype,
                        score,
                        evalue,
                    });
                }
            }
        }
        Ok(best)
    }
}

impl ConstantRegionDetector for IsotypeDetector {
    fn detect(&self, tail: &str, cancel: &CancelToken) -> Result<Option<IsotypeHit>, Error> {
        IsotypeDetector::detect(self, tail, cancel)
    }
}

static FLOAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?$").unwrap());

fn parse_float(field: &str) -> Option<f64> {
    if FLOAT_RE.is_match(field) {
        field.parse().ok()
    } else {
        None
    }
}

/// Extract the best `(score, evalue)` from the scorer's per-hit table.
///
/// Hit rows carry the full-sequence e-value and score as their first two
/// columns; everything else in the report (headers, rules, domain tables,
/// pipeline statistics) fails the numeric check and is ignored.
pub fn parse_best_score(stdout: &str) -> Option<(f64, f64)> {
    let mut best: Option<(f64, f64)> = None;
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            continue;
        }
        let (Some(evalue), Some(score)) = (parse_float(fields[0]), parse_float(fields[1]))
        else {
            continue;
        };
        let better = match best {
            None => true,
            Some((best_score, best_evalue)) => {
                score > best_score || (score == best_score && evalue < best_evalue)
            }
        };
        if better {
            best = Some((score, evalue));
        }
    }
    best
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{parse_best_score, Isotype};

    const HMMSEARCH_HIT: &str = "\
# hmmsearch :: search profile(s) against a sequence database
# HMMER 3.3.2 (Nov 2020); http://hmmer.org/
Query:       IGHG1.aln  [M=330]
Scores for complete sequences (all hits):
  --- full sequence ---   --- best 1 domain ---    -#dom-
    E-value  score  bias    E-value  score  bias    exp  N  Sequence Description
    ------- ------ -----    ------- ------ -----   ---- --  -------- -----------
    2.2e-78  250.1   0.0    2.5e-78  249.9   0.0    1.0  1  query

Domain annotation for each sequence (and alignments):
>> query
   #    score  bias  c-Evalue  i-Evalue hmmfrom  hmm to    alifrom  ali to    envfrom  env to     acc
 ---   ------ ----- --------- --------- ------- -------    ------- -------    ------- -------    ----
   1 !  249.9   0.0   2.5e-78   2.5e-78       2     327 ..       4     329 ..       3     330 .. 0.98

Internal pipeline statistics summary:
-------------------------------------
Query model(s):                            1  (330 nodes)
Target sequences:                          1  (451 residues searched)
";

    const HMMSEARCH_NO_HIT: &str = "\
# hmmsearch :: search profile(s) against a sequence database
Query:       IGHE.aln  [M=420]
Scores for complete sequences (all hits):
  --- full sequence ---   --- best 1 domain ---    -#dom-
    E-value  score  bias    E-value  score  bias    exp  N  Sequence Description
    ------- ------ -----    ------- ------ -----   ---- --  -------- -----------

   [No hits detected that satisfy reporting thresholds]
";

    #[test]
    fn parses_full_sequence_score() {
        assert_eq!(parse_best_score(HMMSEARCH_HIT), Some((250.1, 2.2e-78)));
    }

    #[test]
    fn no_hits_yields_none() {
        assert_eq!(parse_best_score(HMMSEARCH_NO_HIT), None);
    }

    #[test]
    fn isotype_labels_round_trip() {
        for isotype in [
            Isotype::Ighg1,
            Isotype::Ighg2,
            Isotype::Ighg3,
            Isotype::Ighg4,
            Isotype::Igha1,
            Isotype::Igha2,
            Isotype::Ighd,
            Isotype::Ighe,
            Isotype::Ighm,
        ] {
            assert_eq!(isotype.to_string().parse::<Isotype>(), Ok(isotype));
        }
        assert!("IGG".parse::<Isotype>().is_err());
        assert_eq!("ighm".parse::<Isotype>(), Ok(Isotype::Ighm));
    }
}
