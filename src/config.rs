//! Crate-level configuration surface.

use serde::{Deserialize, Serialize};

use crate::msa::Method;
use crate::numbering::Species;
use crate::schemes::Scheme;

/// User-facing pipeline options, with the documented defaults.
///
/// Component-specific knobs (binary names, timeouts, the HMM artifact
/// directory) live in the per-component `Config` structs
/// ([`crate::numbering::anarci::Config`], [`crate::annotate::isotype::Config`],
/// [`crate::msa::Config`], [`crate::jobs::Config`]).
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Numbering scheme driving region extraction.
    pub scheme: Scheme,
    /// Alignment method for MSA requests.
    pub method: Method,
    /// Gap opening penalty for the built-in pairwise aligner.
    pub gap_open: f64,
    /// Gap extension penalty for the built-in pairwise aligner.
    pub gap_extend: f64,
    /// Substitution matrix name (`BLOSUM62`, `PAM120`, ...).
    pub matrix: String,
    /// Species the numbering engine may assign.
    pub allowed_species: Vec<Species>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            scheme: Scheme::Imgt,
            method: Method::Muscle,
            gap_open: -10.0,
            gap_extend: -0.5,
            matrix: "BLOSUM62".to_string(),
            allowed_species: vec![Species::Human, Species::Mouse, Species::Rat],
        }
    }
}

impl Options {
    /// Derive the MSA engine configuration from these options.
    pub fn msa_config(&self) -> Result<crate::msa::Config, String> {
        Ok(crate::msa::Config {
            gap_open: self.gap_open,
            gap_extend: self.gap_extend,
            matrix: self.matrix.parse()?,
            ..crate::msa::Config::default()
        })
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::Options;
    use crate::msa::{Matrix, Method};
    use crate::schemes::Scheme;

    #[test]
    fn documented_defaults() {
        let options = Options::default();
        assert_eq!(options.scheme, Scheme::Imgt);
        assert_eq!(options.method, Method::Muscle);
        assert_eq!(options.gap_open, -10.0);
        assert_eq!(options.gap_extend, -0.5);
        assert_eq!(options.matrix, "BLOSUM62");
    }

    #[test]
    fn msa_config_parses_matrix() -> Result<(), anyhow::Error> {
        let config = Options::default().msa_config().unwrap();
        assert_eq!(config.matrix, Matrix::Blosum62);
        assert!(Options {
            matrix: "BLOSUM99".to_string(),
            ..Options::default()
        }
        .msa_config()
        .is_err());
        Ok(())
    }

    #[test]
    fn options_deserialize_with_defaults() -> Result<(), anyhow::Error> {
        let options: Options = serde_json::from_str(r#"{"scheme": "cgg"}"#)?;
        assert_eq!(options.scheme, Scheme::Cgg);
        assert_eq!(options.method, Method::Muscle);
        Ok(())
    }
}
