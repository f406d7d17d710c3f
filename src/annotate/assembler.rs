//! Assembly of ordered domain records from a chain's numbering result.
//!
//! Numbered domains are sorted by query position; gaps between variable
//! domains become linker records, regions are re-projected to absolute
//! coordinates and the residual tail after the last variable domain is
//! offered to the isotype detector.

use log::warn;

use crate::annotate::isotype::ConstantRegionDetector;
use crate::annotate::{
    regions, BestHit, Chain, ConstantDomain, DomainRecord, Error, LinkerDomain, Region,
    VariableDomain,
};
use crate::numbering::{ChainNumbering, Error as NumberingError, HitTable, NumberedDomain};
use crate::process::CancelToken;

/// Assemble the ordered `domains` of a chain.
///
/// Postconditions: records are strictly sorted by start and non-overlapping;
/// no linker is emitted at position 0; at most one constant record per
/// chain; an empty numbering yields an empty domain list.
pub fn assemble_chain(
    name: &str,
    sequence: &str,
    numbering: ChainNumbering,
    detector: Option<&(dyn ConstantRegionDetector + Send + Sync)>,
    cancel: &CancelToken,
) -> Result<Chain, Error> {
    let ChainNumbering {
        mut domains,
        hit_table,
        scheme_used,
    } = numbering;

    // The engine may report domains out of query order (scFv).
    domains.sort_by_key(|d| d.query_start);

    let mut records: Vec<DomainRecord> = Vec::new();
    let mut cursor = 0usize;
    let n_domains = domains.len();

    for (index, domain) in domains.into_iter().enumerate() {
        if domain.query_end > sequence.len() || domain.query_start < cursor {
            return Err(Error::Numbering(NumberingError::MalformedOutput(format!(
                "domain span {}..{} conflicts with sequence of length {}",
                domain.query_start,
                domain.query_end,
                sequence.len()
            ))));
        }

        if domain.query_start > cursor && cursor > 0 {
            records.push(DomainRecord::Linker(LinkerDomain {
                start: cursor + 1,
                stop: domain.query_start,
                sequence: sequence[cursor..domain.query_start].to_string(),
            }));
        }
        cursor = domain.query_end;

        let is_last = index + 1 == n_domains;
        records.push(variable_record(sequence, domain, &hit_table, scheme_used)?);

        if is_last && cursor < sequence.len() {
            if let Some(constant) =
                detect_constant(sequence, cursor, detector, &records, cancel)?
            {
                records.push(constant);
                cursor = sequence.len();
            }
        }
    }

    let chain_type = records
        .iter()
        .find_map(DomainRecord::as_variable)
        .map(|d| d.chain_type);

    Ok(Chain {
        name: name.to_string(),
        sequence: sequence.to_string(),
        chain_type,
        scheme_used,
        domains: records,
    })
}

fn variable_record(
    sequence: &str,
    domain: NumberedDomain,
    hit_table: &HitTable,
    scheme: crate::schemes::Scheme,
) -> Result<DomainRecord, Error> {
    let local = regions::annotate_variable(&domain, scheme, domain.chain_type)?;

    // Shift domain-local coordinates to absolute ones; both stay 1-based.
    let regions = local
        .into_iter()
        .map(|(name, region)| {
            (
                name,
                Region {
                    start: region.start.map(|rel| domain.query_start + rel),
                    stop: region.stop.map(|rel| domain.query_start + rel),
                    ..region
                },
            )
        })
        .collect();

    let best_hit = hit_table.best_hit_for(&domain.hit_key()).and_then(|row| {
        let id_idx = hit_table.column("id")?;
        let bitscore_idx = hit_table.column("bitscore")?;
        Some(BestHit {
            id: row.get(id_idx)?.clone(),
            bitscore: row.get(bitscore_idx)?.parse().ok()?,
        })
    });

    Ok(DomainRecord::Variable(VariableDomain {
        start: domain.query_start + 1,
        stop: domain.query_end,
        sequence: sequence[domain.query_start..domain.query_end].to_string(),
        regions,
        scheme,
        chain_type: domain.chain_type,
        species: domain.species,
        germline: domain.germlines.clone(),
        best_hit,
        numbering: domain,
    }))
}

/// Offer the residual tail to the isotype detector.  Scoring failures are
/// downgraded to "no constant domain"; only cancellation aborts.
fn detect_constant(
    sequence: &str,
    tail_start: usize,
    detector: Option<&(dyn ConstantRegionDetector + Send + Sync)>,
    records: &[DomainRecord],
    cancel: &CancelToken,
) -> Result<Option<DomainRecord>, Error> {
    let Some(detector) = detector else {
        return Ok(None);
    };
    let tail = &sequence[tail_start..];
    let hit = match detector.detect(tail, cancel) {
        Ok(hit) => hit,
        Err(e) if e.is_cancellation() => return Err(Error::Cancelled),
        Err(e) => {
            warn!("isotype scoring failed, reporting no constant domain: {}", e);
            None
        }
    };
    Ok(hit.map(|hit| {
        // The constant region inherits the species of the preceding
        // variable domain.
        let species = records
            .iter()
            .rev()
            .find_map(DomainRecord::as_variable)
            .map(|d| d.species);
        DomainRecord::Constant(ConstantDomain {
            start: tail_start + 1,
            stop: sequence.len(),
            sequence: tail.to_string(),
            isotype: Some(hit.isotype),
            score: Some(hit.score),
            evalue: Some(hit.evalue),
            species,
        })
    }))
}
