//! The annotation pipeline: numbering, domain assembly, region annotation
//! and isotype tagging, driven per input chain.
//!
//! [`Annotator`] is the top-level entry point.  For every chain of every
//! biologic it runs numbering (with scheme fallback), feeds the result to
//! the domain assembler and collects a [`Chain`]; chain-scoped failures are
//! recorded in `per_chain_errors` while the remaining chains still return.

pub mod assembler;
mod error;
pub mod isotype;
pub mod regions;

use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;
use serde::Serialize;

pub use crate::annotate::error::Error;
use crate::annotate::isotype::{ConstantRegionDetector, Isotype};
use crate::numbering::{
    GermlineAssignment, NumberedDomain, Numberer, NumberingEngine, Position, Species,
};
use crate::process::CancelToken;
use crate::schemes::{ChainType, RegionName, Scheme};
use crate::sequences;

/// One FR/CDR region of a variable domain.
///
/// `start`/`stop` are 1-based inclusive; domain-local as produced by
/// [`regions::annotate_variable`], absolute after the assembler has shifted
/// them.  Both are `None` when a scheme boundary could not be resolved
/// against the numbering; the canonical boundaries are kept regardless.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct Region {
    pub name: RegionName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<usize>,
    #[serde(rename = "sequence")]
    pub letters: String,
    pub scheme_start: Position,
    pub scheme_stop: Position,
}

/// Best germline hit from the engine's hit table for a domain's
/// species/chain-type group.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct BestHit {
    pub id: String,
    pub bitscore: f64,
}

/// A numbered variable domain with its annotated regions.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct VariableDomain {
    /// Absolute 1-based inclusive span in the chain sequence.
    pub start: usize,
    pub stop: usize,
    pub sequence: String,
    #[serde(serialize_with = "serialize_region_values")]
    pub regions: IndexMap<RegionName, Region>,
    pub scheme: Scheme,
    pub chain_type: ChainType,
    pub species: Species,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub germline: Option<GermlineAssignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_hit: Option<BestHit>,
    #[serde(skip)]
    pub numbering: NumberedDomain,
}

fn serialize_region_values<S>(
    regions: &IndexMap<RegionName, Region>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(regions.values())
}

/// A constant region detected downstream of the last variable domain.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct ConstantDomain {
    pub start: usize,
    pub stop: usize,
    pub sequence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isotype: Option<Isotype>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evalue: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub species: Option<Species>,
}

/// An unnumbered stretch joining two variable domains.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct LinkerDomain {
    pub start: usize,
    pub stop: usize,
    pub sequence: String,
}

/// A domain record of a chain; consumers pattern-match on the kind.
#[derive(Debug, PartialEq, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DomainRecord {
    Variable(VariableDomain),
    Constant(ConstantDomain),
    Linker(LinkerDomain),
}

impl DomainRecord {
    pub fn start(&self) -> usize {
        match self {
            DomainRecord::Variable(d) => d.start,
            DomainRecord::Constant(d) => d.start,
            DomainRecord::Linker(d) => d.start,
        }
    }

    pub fn stop(&self) -> usize {
        match self {
            DomainRecord::Variable(d) => d.stop,
            DomainRecord::Constant(d) => d.stop,
            DomainRecord::Linker(d) => d.stop,
        }
    }

    pub fn as_variable(&self) -> Option<&VariableDomain> {
        match self {
            DomainRecord::Variable(d) => Some(d),
            _ => None,
        }
    }
}

/// An annotated chain: the original sequence plus its ordered domains.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct Chain {
    pub name: String,
    pub sequence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_type: Option<ChainType>,
    pub scheme_used: Scheme,
    pub domains: Vec<DomainRecord>,
}

impl Chain {
    /// The first variable domain, used for chain-level statistics and for
    /// region overlays on alignments.
    pub fn primary_variable(&self) -> Option<&VariableDomain> {
        self.domains.iter().find_map(DomainRecord::as_variable)
    }

    /// An scFv is any chain with at least two variable domains joined by a
    /// linker.
    pub fn is_scfv(&self) -> bool {
        let variables = self
            .domains
            .iter()
            .filter(|d| matches!(d, DomainRecord::Variable(_)))
            .count();
        let linkers = self
            .domains
            .iter()
            .filter(|d| matches!(d, DomainRecord::Linker(_)))
            .count();
        variables >= 2 && linkers >= 1
    }
}

/// All chains of one named biologic.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct BiologicAnnotation {
    pub name: String,
    pub chains: Vec<Chain>,
}

/// A chain-scoped failure that did not abort the rest of the request.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct ChainError {
    pub biologic: String,
    pub chain: String,
    pub message: String,
}

/// The produced annotation document.
#[derive(Debug, PartialEq, Clone, Serialize, Default)]
pub struct AnnotationResult {
    pub sequences: Vec<BiologicAnnotation>,
    pub numbering_scheme: Option<Scheme>,
    pub total_sequences: usize,
    pub chain_types: IndexMap<String, usize>,
    pub isotypes: IndexMap<String, usize>,
    pub species: IndexMap<String, usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub per_chain_errors: Vec<ChainError>,
}

impl AnnotationResult {
    /// Render the produced annotation document.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Named chain sequences grouped by biologic, in input order.
pub type BiologicInput = IndexMap<String, IndexMap<String, String>>;

/// An annotation request: sequences plus the requested scheme.
#[derive(Debug, Clone)]
pub struct AnnotationRequest {
    pub biologics: BiologicInput,
    pub scheme: Scheme,
}

impl AnnotationRequest {
    /// A request for a single chain of a single biologic.
    pub fn single(biologic: &str, chain: &str, sequence: &str, scheme: Scheme) -> Self {
        let mut chains = IndexMap::new();
        chains.insert(chain.to_string(), sequence.to_string());
        let mut biologics = IndexMap::new();
        biologics.insert(biologic.to_string(), chains);
        Self { biologics, scheme }
    }
}

/// Top-level annotation pipeline driver.
pub struct Annotator {
    numberer: Numberer,
    detector: Option<Arc<dyn ConstantRegionDetector + Send + Sync>>,
}

impl Annotator {
    pub fn new(
        engine: Arc<dyn NumberingEngine + Send + Sync>,
        detector: Option<Arc<dyn ConstantRegionDetector + Send + Sync>>,
        allowed_species: Vec<Species>,
    ) -> Self {
        Self {
            numberer: Numberer::new(engine, allowed_species),
            detector,
        }
    }

    /// Annotate every chain of every biologic in the request.
    ///
    /// Chain-scoped failures are collected in `per_chain_errors`; the
    /// request as a whole fails only when nothing could be annotated at
    /// all, or on cancellation.
    pub fn annotate(
        &self,
        request: &AnnotationRequest,
        cancel: &CancelToken,
    ) -> Result<AnnotationResult, Error> {
        let mut result = AnnotationResult::default();
        let mut first_error: Option<Error> = None;

        for (biologic_name, chains) in &request.biologics {
            let mut annotated = BiologicAnnotation {
                name: biologic_name.clone(),
                chains: Vec::new(),
            };
            for (chain_name, raw_sequence) in chains {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                match self.annotate_chain(chain_name, raw_sequence, request.scheme, cancel) {
                    Ok(chain) => {
                        if result.numbering_scheme.is_none() {
                            result.numbering_scheme = Some(chain.scheme_used);
                        }
                        annotated.chains.push(chain);
                    }
                    Err(e) if e.is_cancellation() => return Err(Error::Cancelled),
                    Err(e) => {
                        debug!(
                            "annotation of {}/{} failed: {}",
                            biologic_name, chain_name, e
                        );
                        result.per_chain_errors.push(ChainError {
                            biologic: biologic_name.clone(),
                            chain: chain_name.clone(),
                            message: e.to_string(),
                        });
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
                result.total_sequences += 1;
            }
            result.sequences.push(annotated);
        }

        // Nothing annotated at all: surface the first failure directly.
        if result.sequences.iter().all(|b| b.chains.is_empty()) {
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        if result.numbering_scheme.is_none() {
            result.numbering_scheme = Some(request.scheme);
        }

        compute_stats(&mut result);
        Ok(result)
    }

    fn annotate_chain(
        &self,
        name: &str,
        raw_sequence: &str,
        scheme: Scheme,
        cancel: &CancelToken,
    ) -> Result<Chain, Error> {
        let sequence = sequences::clean_chain_sequence(raw_sequence)?;
        let numbering = self
            .numberer
            .number_chain(name, &sequence, scheme, cancel)?;
        assembler::assemble_chain(
            name,
            &sequence,
            numbering,
            self.detector.as_deref(),
            cancel,
        )
    }
}

/// Aggregate counts over the primary domain of each chain.
fn compute_stats(result: &mut AnnotationResult) {
    for biologic in &result.sequences {
        for chain in &biologic.chains {
            if let Some(primary) = chain.primary_variable() {
                *result
                    .chain_types
                    .entry(primary.chain_type.to_string())
                    .or_insert(0) += 1;
                *result
                    .species
                    .entry(primary.species.to_string())
                    .or_insert(0) += 1;
            }
            if let Some(isotype) = chain.domains.iter().find_map(|d| match d {
                DomainRecord::Constant(c) => c.isotype,
                _ => None,
            }) {
                *result.isotypes.entry(isotype.to_string()).or_insert(0) += 1;
            }
        }
    }
}
