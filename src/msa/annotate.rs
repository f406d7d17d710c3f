//! Region overlays on an alignment.
//!
//! Each row's original sequence is annotated through the annotation
//! pipeline; the primary variable domain's regions are then projected into
//! aligned-column coordinates via the gap mapper and aggregated across
//! sequences.

use indexmap::IndexMap;
use log::warn;
use serde::Serialize;
use uuid::Uuid;

use crate::annotate::{AnnotationRequest, Annotator};
use crate::msa::{gapmap, Error, MsaResult, MsaSequence};
use crate::process::CancelToken;
use crate::schemes::{RegionName, Scheme};

/// Stable palette entry for a canonical region.
pub fn region_color(name: RegionName) -> &'static str {
    match name {
        RegionName::FR1 => "#FF6B6B",
        RegionName::CDR1 => "#4ECDC4",
        RegionName::FR2 => "#45B7D1",
        RegionName::CDR2 => "#96CEB4",
        RegionName::FR3 => "#FFEAA7",
        RegionName::CDR3 => "#DDA0DD",
        RegionName::FR4 => "#98D8C8",
    }
}

/// A region projected onto the aligned row, 0-based inclusive columns.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct RegionOverlay {
    pub name: RegionName,
    pub aligned_start: usize,
    pub aligned_stop: usize,
    pub color: String,
}

/// One sequence's placement of a region, for the per-region aggregation.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct RegionPlacement {
    pub sequence_name: String,
    pub aligned_start: usize,
    pub aligned_stop: usize,
    pub color: String,
}

/// An alignment with per-row region overlays.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct AnnotatedMsa {
    pub msa_id: Uuid,
    pub sequences: Vec<MsaSequence>,
    pub numbering_scheme: Scheme,
    pub region_mappings: IndexMap<RegionName, Vec<RegionPlacement>>,
}

impl AnnotatedMsa {
    /// Placements of one region across all sequences.
    pub fn positions_of(&self, name: RegionName) -> &[RegionPlacement] {
        self.region_mappings
            .get(&name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Annotate every row of `msa` and project the primary variable domain's
/// regions onto the alignment.
///
/// Rows whose sequence cannot be annotated (no variable domain, below the
/// chain length floor, chain-scoped numbering failure) simply carry no
/// overlays; only cancellation aborts the whole call.
pub fn annotate_msa(
    annotator: &Annotator,
    msa: &MsaResult,
    scheme: Scheme,
    cancel: &CancelToken,
) -> Result<AnnotatedMsa, Error> {
    let mut sequences = msa.sequences.clone();
    let mut region_mappings: IndexMap<RegionName, Vec<RegionPlacement>> = IndexMap::new();
    let mut scheme_used = scheme;

    for row in &mut sequences {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let request = AnnotationRequest::single(&row.name, &row.name, &row.original, scheme);
        let result = match annotator.annotate(&request, cancel) {
            Ok(result) => result,
            Err(e) if e.is_cancellation() => return Err(Error::Cancelled),
            Err(e) => {
                warn!("row {} left unannotated: {}", row.name, e);
                continue;
            }
        };
        if let Some(used) = result.numbering_scheme {
            scheme_used = used;
        }

        let Some(variable) = result
            .sequences
            .first()
            .and_then(|b| b.chains.first())
            .and_then(|c| c.primary_variable())
        else {
            continue;
        };

        for region in variable.regions.values() {
            let (Some(start), Some(stop)) = (region.start, region.stop) else {
                continue;
            };
            let aligned_start = gapmap::ungapped_to_aligned(&row.aligned, start - 1)?;
            let aligned_stop = gapmap::ungapped_to_aligned(&row.aligned, stop - 1)?;
            let color = region_color(region.name).to_string();
            row.annotations.push(RegionOverlay {
                name: region.name,
                aligned_start,
                aligned_stop,
                color: color.clone(),
            });
            region_mappings
                .entry(region.name)
                .or_default()
                .push(RegionPlacement {
                    sequence_name: row.name.clone(),
                    aligned_start,
                    aligned_stop,
                    color,
                });
        }
    }

    Ok(AnnotatedMsa {
        msa_id: msa.id,
        sequences,
        numbering_scheme: scheme_used,
        region_mappings,
    })
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::{annotate_msa, region_color};
    use crate::annotate::Annotator;
    use crate::msa::{Config, Method, MsaEngine};
    use crate::numbering::{
        AlignmentDetail, EngineOutput, Error as NumberingError, HitTable, NumberedResidue,
        NumberingEngine, Position, Species,
    };
    use crate::process::CancelToken;
    use crate::schemes::{RegionName, Scheme};

    /// Stub engine numbering the whole sequence 1..n as a heavy domain.
    struct WholeSequenceEngine;

    impl NumberingEngine for WholeSequenceEngine {
        fn number(
            &self,
            inputs: &[(String, String)],
            _scheme: Scheme,
            _allowed_species: &[Species],
            _cancel: &CancelToken,
        ) -> Result<EngineOutput, NumberingError> {
            let mut output = EngineOutput {
                sequences: inputs.to_vec(),
                ..Default::default()
            };
            for (_, seq) in inputs {
                let residues: Vec<NumberedResidue> = seq
                    .chars()
                    .enumerate()
                    .map(|(i, letter)| NumberedResidue {
                        pos: Position::new(i as u32 + 1),
                        letter,
                    })
                    .collect();
                output.numbered.push(vec![residues]);
                output.alignment_details.push(vec![AlignmentDetail {
                    chain_type: "H".to_string(),
                    species: "human".to_string(),
                    query_start: 0,
                    query_end: seq.len(),
                    evalue: 1e-44,
                    score: 144.0,
                    germlines: None,
                }]);
                output.hit_tables.push(HitTable::default());
            }
            Ok(output)
        }
    }

    /// Engine counting invocations, to show one annotation pass per row.
    struct CountingEngine(Mutex<usize>);

    impl NumberingEngine for CountingEngine {
        fn number(
            &self,
            inputs: &[(String, String)],
            scheme: Scheme,
            allowed_species: &[Species],
            cancel: &CancelToken,
        ) -> Result<EngineOutput, NumberingError> {
            *self.0.lock().unwrap() += 1;
            WholeSequenceEngine.number(inputs, scheme, allowed_species, cancel)
        }
    }

    // Two 40-residue sequences differing by an internal deletion, so the
    // second row carries gaps and region projection has to cross them.
    const SEQ_A: &str = "EVQLVESAAPLVQPAASLRLSAAASFTFSYFAMSWVRQAP";
    const SEQ_B: &str = "EVQLVESAAPLVQPAASLRLSAAASFTFSYFAWVRQAP";

    fn aligned_fixture() -> crate::msa::MsaResult {
        let engine = MsaEngine::new(Config::default());
        engine
            .align(
                &[
                    ("a".to_string(), SEQ_A.to_string()),
                    ("b".to_string(), SEQ_B.to_string()),
                ],
                Method::PairwiseGlobal,
                &CancelToken::new(),
            )
            .expect("pairwise alignment")
    }

    #[test]
    fn overlays_follow_gapped_rows() -> Result<(), anyhow::Error> {
        let msa = aligned_fixture();
        let annotator = Annotator::new(Arc::new(WholeSequenceEngine), None, vec![Species::Human]);
        let annotated = annotate_msa(&annotator, &msa, Scheme::Imgt, &CancelToken::new())?;

        assert_eq!(annotated.msa_id, msa.id);
        assert_eq!(annotated.numbering_scheme, Scheme::Imgt);

        // Both rows resolve FR1 and CDR1 under IMGT with sequential
        // numbering; later regions are unresolved for 40-mers.
        for row in &annotated.sequences {
            let names: Vec<_> = row.annotations.iter().map(|o| o.name).collect();
            assert_eq!(names, vec![RegionName::FR1, RegionName::CDR1]);
            for overlay in &row.annotations {
                assert!(overlay.aligned_stop < msa.width());
                assert!(overlay.aligned_start <= overlay.aligned_stop);
                // The overlay column must hold a letter, not a gap.
                let chars: Vec<char> = row.aligned.chars().collect();
                assert_ne!(chars[overlay.aligned_start], '-');
                assert_ne!(chars[overlay.aligned_stop], '-');
            }
        }

        let fr1 = annotated.positions_of(RegionName::FR1);
        assert_eq!(fr1.len(), 2);
        assert_eq!(fr1[0].sequence_name, "a");
        assert_eq!(fr1[0].color, region_color(RegionName::FR1));
        assert!(annotated.positions_of(RegionName::FR4).is_empty());
        Ok(())
    }

    #[test]
    fn one_annotation_pass_per_row() -> Result<(), anyhow::Error> {
        let msa = aligned_fixture();
        let engine = Arc::new(CountingEngine(Mutex::new(0)));
        let annotator = Annotator::new(engine.clone(), None, vec![Species::Human]);
        annotate_msa(&annotator, &msa, Scheme::Imgt, &CancelToken::new())?;
        assert_eq!(*engine.0.lock().unwrap(), 2);
        Ok(())
    }

    #[test]
    fn unannotatable_rows_carry_no_overlays() -> Result<(), anyhow::Error> {
        // Short peptides fall below the chain length floor; the annotated
        // MSA still succeeds with empty overlays.
        let engine = MsaEngine::new(Config::default());
        let msa = engine.align(
            &[
                ("p".to_string(), "ACDEF".to_string()),
                ("q".to_string(), "ACEF".to_string()),
            ],
            Method::PairwiseGlobal,
            &CancelToken::new(),
        )?;
        let annotator = Annotator::new(Arc::new(WholeSequenceEngine), None, vec![Species::Human]);
        let annotated = annotate_msa(&annotator, &msa, Scheme::Imgt, &CancelToken::new())?;
        assert!(annotated.sequences.iter().all(|r| r.annotations.is_empty()));
        assert!(annotated.region_mappings.is_empty());
        Ok(())
    }
}
