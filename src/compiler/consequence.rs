//! Sequence Ontology consequence types.
//!
//! Consequence types are stored in the `A_SO` column as accession numbers.
//! Queries may use term names, `SO:` accessions, plain numbers, or one of the aliases for term sets.

use crate::{Error, Result};

//-----------------------------------------------------------------------------

/// Known consequence types and their accession numbers.
pub const SO_TERMS: [(&str, u32); 38] = [
    ("transcript_ablation", 1893),
    ("splice_acceptor_variant", 1574),
    ("splice_donor_variant", 1575),
    ("stop_gained", 1587),
    ("frameshift_variant", 1589),
    ("stop_lost", 1578),
    ("start_lost", 2012),
    ("transcript_amplification", 1889),
    ("inframe_insertion", 1821),
    ("inframe_deletion", 1822),
    ("missense_variant", 1583),
    ("protein_altering_variant", 1818),
    ("splice_region_variant", 1630),
    ("incomplete_terminal_codon_variant", 1626),
    ("stop_retained_variant", 1567),
    ("synonymous_variant", 1819),
    ("coding_sequence_variant", 1580),
    ("mature_miRNA_variant", 1620),
    ("5_prime_UTR_variant", 1623),
    ("3_prime_UTR_variant", 1624),
    ("non_coding_transcript_exon_variant", 1792),
    ("intron_variant", 1627),
    ("NMD_transcript_variant", 1621),
    ("non_coding_transcript_variant", 1619),
    ("upstream_gene_variant", 1631),
    ("downstream_gene_variant", 1632),
    ("TFBS_ablation", 1895),
    ("TFBS_amplification", 1892),
    ("TF_binding_site_variant", 1782),
    ("regulatory_region_ablation", 1894),
    ("regulatory_region_amplification", 1891),
    ("feature_elongation", 1907),
    ("regulatory_region_variant", 1566),
    ("feature_truncation", 1906),
    ("intergenic_variant", 1628),
    ("start_retained_variant", 2019),
    ("2KB_upstream_variant", 1636),
    ("2KB_downstream_variant", 2083),
];

/// Consequence types considered loss of function.
pub const LOSS_OF_FUNCTION: [&str; 9] = [
    "frameshift_variant",
    "incomplete_terminal_codon_variant",
    "start_lost",
    "stop_gained",
    "stop_lost",
    "splice_acceptor_variant",
    "splice_donor_variant",
    "feature_truncation",
    "transcript_ablation",
];

/// Consequence types that alter the protein: loss of function and in-frame changes.
pub const PROTEIN_ALTERING: [&str; 12] = [
    "frameshift_variant",
    "incomplete_terminal_codon_variant",
    "start_lost",
    "stop_gained",
    "stop_lost",
    "splice_acceptor_variant",
    "splice_donor_variant",
    "feature_truncation",
    "transcript_ablation",
    "inframe_deletion",
    "inframe_insertion",
    "missense_variant",
];

const ACCESSION_PREFIX: &str = "SO:";

/// Returns the term set for an alias (`lof`, `loss_of_function`, `pa`, `protein_altering`).
pub fn alias_set(term: &str) -> Option<&'static [&'static str]> {
    match term.trim().to_ascii_lowercase().as_str() {
        "lof" | "loss_of_function" => Some(&LOSS_OF_FUNCTION),
        "pa" | "protein_altering" => Some(&PROTEIN_ALTERING),
        _ => None,
    }
}

/// Returns the accession number of a consequence type.
///
/// Accepts term names (case-insensitive), `SO:0001583` accessions, and plain numbers.
///
/// # Errors
///
/// Returns [`Error::MalformedQueryParam`] for unknown terms.
///
/// # Examples
///
/// ```
/// use variant_store::compiler::consequence;
///
/// assert_eq!(consequence::accession("CONSEQUENCE_TYPE", "missense_variant").unwrap(), 1583);
/// assert_eq!(consequence::accession("CONSEQUENCE_TYPE", "SO:0001583").unwrap(), 1583);
/// assert!(consequence::accession("CONSEQUENCE_TYPE", "not_a_term").is_err());
/// ```
pub fn accession(param: &str, term: &str) -> Result<u32> {
    let term = term.trim();
    let number = term.strip_prefix(ACCESSION_PREFIX).unwrap_or(term);
    if let Ok(number) = number.parse::<u32>() {
        return Ok(number);
    }
    SO_TERMS.iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(term))
        .map(|(_, number)| *number)
        .ok_or_else(|| Error::malformed(param, term, "unknown consequence type"))
}

/// Returns the accession numbers for a term, expanding aliases to their sets.
pub fn expand(param: &str, term: &str) -> Result<Vec<u32>> {
    match alias_set(term) {
        Some(set) => set.iter().map(|name| accession(param, name)).collect(),
        None => Ok(vec![accession(param, term)?]),
    }
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
