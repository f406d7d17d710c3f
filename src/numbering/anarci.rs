//! Subprocess adapter for the ANARCI numbering engine.
//!
//! Writes the batch as FASTA, invokes the `ANARCI` binary and parses its
//! annotated text output back into the [`EngineOutput`] shape.  One record
//! per input sequence, records terminated by `//`:
//!
//! ```text
//! # seq_0
//! # ANARCI numbered
//! # Domain 1 of 1
//! # Most significant HMM hit
//! #|species|chain_type|e-value|score|seqstart_index|seqend_index|
//! #|human|H|1.6e-54|174.2|0|119|
//! # Most sensitive alignments
//! #|species|chain_type|e-value|score|seqstart_index|seqend_index|
//! #|human|H|1.6e-54|174.2|0|119|
//! # Germline details
//! #|species|v_gene|v_identity|j_gene|j_identity|
//! #|human|IGHV3-23*01|0.81|IGHJ4*01|0.86|
//! H 1       E
//! H 2       V
//! H 111 A   G
//! //
//! ```

use std::io::Write as _;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use log::debug;

use crate::numbering::{
    AlignmentDetail, EngineOutput, Error, GermlineAssignment, GermlineCall, HitTable,
    NumberedResidue, NumberingEngine, Position, Species,
};
use crate::process::{find_binary, run_with_timeout, CancelToken};
use crate::schemes::Scheme;
use crate::sequences::to_fasta;

/// Configuration for the `AnarciNumberer`.
#[derive(Debug, PartialEq, Clone)]
pub struct Config {
    /// Name of the engine binary looked up on `$PATH`.
    pub binary: String,
    /// Per-invocation deadline.
    pub timeout: Duration,
    /// Whether to request germline assignment.
    pub assign_germline: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binary: "ANARCI".to_string(),
            timeout: Duration::from_secs(120),
            assign_germline: true,
        }
    }
}

/// Numbering engine backed by the ANARCI command line tool.
pub struct AnarciNumberer {
    config: Config,
    binary: PathBuf,
}

impl AnarciNumberer {
    pub fn new(config: Config) -> Result<Self, Error> {
        let binary = find_binary(&config.binary)?;
        Ok(Self { config, binary })
    }

    pub fn with_defaults() -> Result<Self, Error> {
        Self::new(Config::default())
    }
}

impl NumberingEngine for AnarciNumberer {
    fn number(
        &self,
        inputs: &[(String, String)],
        scheme: Scheme,
        allowed_species: &[Species],
        cancel: &CancelToken,
    ) -> Result<EngineOutput, Error> {
        // The engine mangles arbitrary FASTA headers; hand it positional
        // names and match records back to inputs by order.
        let names: Vec<String> = (0..inputs.len()).map(|i| format!("seq_{}", i)).collect();
        let fasta = to_fasta(
            names
                .iter()
                .map(String::as_str)
                .zip(inputs.iter().map(|(_, seq)| seq.as_str())),
        );

        let mut fasta_file = tempfile::Builder::new()
            .prefix("numbering-in-")
            .suffix(".fasta")
            .tempfile()?;
        fasta_file.write_all(fasta.as_bytes())?;
        fasta_file.flush()?;

        let out_file = tempfile::Builder::new()
            .prefix("numbering-out-")
            .suffix(".txt")
            .tempfile()?;
        let out_path = out_file.path().to_path_buf();

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-i")
            .arg(fasta_file.path())
            .arg("-o")
            .arg(&out_path)
            .arg("--scheme")
            .arg(scheme.to_string());
        if self.config.assign_germline {
            cmd.arg("--assign_germline");
        }
        for species in allowed_species {
            cmd.arg("--use_species").arg(species.to_string());
        }

        debug!(
            "numbering {} sequence(s) with scheme '{}'",
            inputs.len(),
            scheme
        );
        run_with_timeout(&mut cmd, self.config.timeout, cancel)?;

        let text = std::fs::read_to_string(&out_path)?;
        parse_engine_output(&text, inputs)
    }
}

/// Parse the whole engine output file into the four parallel lists.
///
/// Records are matched to inputs by order; missing trailing records (the
/// engine drops sequences with no recognizable domain in some versions)
/// yield empty entries.
pub fn parse_engine_output(
    text: &str,
    inputs: &[(String, String)],
) -> Result<EngineOutput, Error> {
    let mut output = EngineOutput {
        sequences: inputs.to_vec(),
        ..Default::default()
    };

    for record_text in text.split("\n//").map(str::trim).filter(|t| !t.is_empty()) {
        let record = parse_record(record_text)?;
        output.numbered.push(record.0);
        output.alignment_details.push(record.1);
        output.hit_tables.push(record.2);
    }

    if output.numbered.len() > inputs.len() {
        return Err(Error::RecordCountMismatch(output.numbered.len(), inputs.len()));
    }
    while output.numbered.len() < inputs.len() {
        output.numbered.push(Vec::new());
        output.alignment_details.push(Vec::new());
        output.hit_tables.push(HitTable::default());
    }

    Ok(output)
}

/// Section of the comment metadata currently being read.
#[derive(Debug, PartialEq, Clone, Copy)]
enum MetaSection {
    None,
    SignificantHit,
    SensitiveAlignments,
    GermlineDetails,
}

type Record = (Vec<Vec<NumberedResidue>>, Vec<AlignmentDetail>, HitTable);

fn parse_record(text: &str) -> Result<Record, Error> {
    let mut numbered: Vec<Vec<NumberedResidue>> = Vec::new();
    let mut details: Vec<AlignmentDetail> = Vec::new();
    let mut hit_table = HitTable {
        header: vec![
            "id".to_string(),
            "evalue".to_string(),
            "bitscore".to_string(),
            "seqstart_index".to_string(),
            "seqend_index".to_string(),
        ],
        rows: Vec::new(),
    };

    let mut residues: Vec<NumberedResidue> = Vec::new();
    let mut section = MetaSection::None;
    let mut seen_domain_header = false;

    for line in text.lines().map(str::trim_end) {
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            let comment = comment.trim();
            if comment.starts_with("Domain") {
                // A new domain block; close the previous one.
                if seen_domain_header && !residues.is_empty() {
                    numbered.push(std::mem::take(&mut residues));
                }
                seen_domain_header = true;
                section = MetaSection::None;
            } else if comment.starts_with("Most significant HMM hit") {
                section = MetaSection::SignificantHit;
            } else if comment.starts_with("Most sensitive alignments") {
                section = MetaSection::SensitiveAlignments;
            } else if comment.starts_with("Germline details") {
                section = MetaSection::GermlineDetails;
            } else if let Some(fields) = parse_table_row(line) {
                apply_table_row(section, &fields, &mut details, &mut hit_table)?;
            }
            continue;
        }
        residues.push(parse_residue_line(line)?);
    }
    if !residues.is_empty() || seen_domain_header {
        numbered.push(residues);
    }

    // Drop empty domain blocks the engine sometimes emits for failed hits.
    let numbered: Vec<_> = numbered.into_iter().filter(|r| !r.is_empty()).collect();

    Ok((numbered, details, hit_table))
}

/// `#|a|b|c|` -> `["a", "b", "c"]`; `None` for header rows and non-table
/// comments.
fn parse_table_row(line: &str) -> Option<Vec<String>> {
    let body = line.strip_prefix("#|")?.strip_suffix('|')?;
    let fields: Vec<String> = body.split('|').map(|f| f.trim().to_string()).collect();
    // Header rows name their first column "species".
    if fields.first().map(String::as_str) == Some("species") {
        return None;
    }
    Some(fields)
}

fn apply_table_row(
    section: MetaSection,
    fields: &[String],
    details: &mut Vec<AlignmentDetail>,
    hit_table: &mut HitTable,
) -> Result<(), Error> {
    match section {
        MetaSection::SignificantHit => {
            if fields.len() < 6 {
                return Err(Error::MalformedOutput(format!(
                    "short alignment row: {:?}",
                    fields
                )));
            }
            let seqstart: usize = parse_field(&fields[4])?;
            // The engine reports an inclusive end index.
            let seqend: usize = parse_field::<usize>(&fields[5])? + 1;
            details.push(AlignmentDetail {
                chain_type: fields[1].clone(),
                species: fields[0].clone(),
                query_start: seqstart,
                query_end: seqend,
                evalue: parse_field(&fields[2])?,
                score: parse_field(&fields[3])?,
                germlines: None,
            });
        }
        MetaSection::SensitiveAlignments => {
            if fields.len() < 6 {
                return Err(Error::MalformedOutput(format!(
                    "short hit table row: {:?}",
                    fields
                )));
            }
            hit_table.rows.push(vec![
                format!("{}_{}", fields[0], fields[1]),
                fields[2].clone(),
                fields[3].clone(),
                fields[4].clone(),
                fields[5].clone(),
            ]);
        }
        MetaSection::GermlineDetails => {
            if fields.len() < 5 {
                return Err(Error::MalformedOutput(format!(
                    "short germline row: {:?}",
                    fields
                )));
            }
            let assignment = GermlineAssignment {
                v_gene: Some(GermlineCall {
                    gene: fields[1].clone(),
                    identity: parse_field(&fields[2])?,
                }),
                j_gene: Some(GermlineCall {
                    gene: fields[3].clone(),
                    identity: parse_field(&fields[4])?,
                }),
            };
            if let Some(detail) = details.last_mut() {
                detail.germlines = Some(assignment);
            }
        }
        MetaSection::None => {}
    }
    Ok(())
}

fn parse_field<T: std::str::FromStr>(field: &str) -> Result<T, Error> {
    field
        .parse::<T>()
        .map_err(|_| Error::MalformedOutput(format!("unparseable field: {:?}", field)))
}

/// Parse a residue line: `H 112 A G` (with insertion) or `H 112 G`.
fn parse_residue_line(line: &str) -> Result<NumberedResidue, Error> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (number, insertion, letter) = match tokens.as_slice() {
        [_, number, letter] => (*number, None, *letter),
        [_, number, insertion, letter] => (*number, Some(*insertion), *letter),
        _ => {
            return Err(Error::MalformedOutput(format!(
                "unrecognized residue line: {:?}",
                line
            )))
        }
    };

    let number: u32 = parse_field(number)?;
    let insertion = match insertion {
        None => None,
        Some(tok) => {
            let mut chars = tok.chars();
            let c = chars.next();
            match (c, chars.next()) {
                (Some(c), None) if c.is_ascii_uppercase() => Some(c),
                _ => {
                    return Err(Error::MalformedOutput(format!(
                        "invalid insertion code: {:?}",
                        tok
                    )))
                }
            }
        }
    };
    let mut letter_chars = letter.chars();
    let letter = match (letter_chars.next(), letter_chars.next()) {
        (Some(c), None) => c,
        _ => {
            return Err(Error::MalformedOutput(format!(
                "invalid residue letter: {:?}",
                letter
            )))
        }
    };

    Ok(NumberedResidue {
        pos: Position { number, insertion },
        letter,
    })
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{parse_engine_output, parse_residue_line};
    use crate::numbering::Position;

    const SINGLE_DOMAIN: &str = "\
# seq_0
# ANARCI numbered
# Domain 1 of 1
# Most significant HMM hit
#|species|chain_type|e-value|score|seqstart_index|seqend_index|
#|human|H|1.6e-54|174.2|0|9|
# Most sensitive alignments
#|species|chain_type|e-value|score|seqstart_index|seqend_index|
#|human|H|1.6e-54|174.2|0|9|
#|mouse|H|5.7e-50|159.4|0|9|
# Germline details
#|species|v_gene|v_identity|j_gene|j_identity|
#|human|IGHV3-23*01|0.81|IGHJ4*01|0.86|
H 1       E
H 2       V
H 3       Q
H 4       L
H 5       V
H 6       -
H 6 A     E
H 7       S
H 8       G
H 9       G
H 10      G
//
";

    #[test]
    fn parses_single_domain_record() -> Result<(), anyhow::Error> {
        let inputs = vec![("mab1".to_string(), "EVQLVESGGG".to_string())];
        let out = parse_engine_output(SINGLE_DOMAIN, &inputs)?;

        assert_eq!(out.numbered.len(), 1);
        assert_eq!(out.alignment_details.len(), 1);
        assert_eq!(out.hit_tables.len(), 1);

        let domain = &out.numbered[0][0];
        assert_eq!(domain.len(), 11);
        assert_eq!(domain[0].pos, Position::new(1));
        assert_eq!(domain[0].letter, 'E');
        assert!(domain[5].is_gap());
        assert_eq!(domain[6].pos, Position::with_insertion(6, 'A'));

        let detail = &out.alignment_details[0][0];
        assert_eq!(detail.species, "human");
        assert_eq!(detail.chain_type, "H");
        assert_eq!(detail.query_start, 0);
        assert_eq!(detail.query_end, 10);
        assert_eq!(detail.score, 174.2);
        let germlines = detail.germlines.as_ref().unwrap();
        assert_eq!(germlines.v_gene.as_ref().unwrap().gene, "IGHV3-23*01");
        assert_eq!(germlines.j_gene.as_ref().unwrap().identity, 0.86);

        let hits = &out.hit_tables[0];
        assert_eq!(hits.rows.len(), 2);
        assert_eq!(hits.rows[0][0], "human_H");
        assert_eq!(hits.best_hit_for("human_H").unwrap()[2], "174.2");
        Ok(())
    }

    const TWO_DOMAINS: &str = "\
# seq_0
# ANARCI numbered
# Domain 1 of 2
# Most significant HMM hit
#|species|chain_type|e-value|score|seqstart_index|seqend_index|
#|human|K|2.1e-40|140.0|0|6|
# Most sensitive alignments
#|species|chain_type|e-value|score|seqstart_index|seqend_index|
#|human|K|2.1e-40|140.0|0|6|
K 1       D
K 2       I
K 3       V
K 4       L
K 5       T
K 6       Q
K 7       S
# Domain 2 of 2
# Most significant HMM hit
#|species|chain_type|e-value|score|seqstart_index|seqend_index|
#|human|H|3.0e-45|150.0|12|18|
# Most sensitive alignments
#|species|chain_type|e-value|score|seqstart_index|seqend_index|
#|human|H|3.0e-45|150.0|12|18|
H 1       Q
H 2       V
H 3       Q
H 4       L
H 5       K
H 6       Q
H 7       S
//
";

    #[test]
    fn parses_two_domain_record() -> Result<(), anyhow::Error> {
        let inputs = vec![(
            "scfv".to_string(),
            "DIVLTQSGGGGSQVQLKQS".to_string(),
        )];
        let out = parse_engine_output(TWO_DOMAINS, &inputs)?;
        assert_eq!(out.numbered[0].len(), 2);
        assert_eq!(out.alignment_details[0].len(), 2);
        assert_eq!(out.alignment_details[0][0].chain_type, "K");
        assert_eq!(out.alignment_details[0][1].query_start, 12);
        assert_eq!(out.alignment_details[0][1].query_end, 19);
        Ok(())
    }

    #[test]
    fn pads_missing_records() -> Result<(), anyhow::Error> {
        let inputs = vec![
            ("mab1".to_string(), "EVQLVESGGG".to_string()),
            ("junk".to_string(), "GGGGGGGGGG".to_string()),
        ];
        let out = parse_engine_output(SINGLE_DOMAIN, &inputs)?;
        assert_eq!(out.numbered.len(), 2);
        assert!(out.numbered[1].is_empty());
        assert!(out.alignment_details[1].is_empty());
        Ok(())
    }

    #[test]
    fn residue_line_variants() -> Result<(), anyhow::Error> {
        let plain = parse_residue_line("H 112     G")?;
        assert_eq!(plain.pos, Position::new(112));
        assert_eq!(plain.letter, 'G');

        let inserted = parse_residue_line("L 95 B    W")?;
        assert_eq!(inserted.pos, Position::with_insertion(95, 'B'));
        assert_eq!(inserted.letter, 'W');

        assert!(parse_residue_line("H xyz G").is_err());
        assert!(parse_residue_line("H").is_err());
        Ok(())
    }
}
