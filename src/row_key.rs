//! Order-preserving row keys for variants.
//!
//! A row key is the byte string
//!
//! > `chromosome 0x00 position reference [0x00 alternate]`
//!
//! where the chromosome is normalized with [`normalize_chromosome`] and the position is a 4-byte big-endian unsigned integer.
//! The separator before the alternate allele is omitted when the alternate allele is empty.
//! Bytewise comparison of two keys is then the same as comparing the tuples (chromosome, position, reference, alternate).
//!
//! Alleles and chromosome names must not contain zero bytes.
//! That holds for nucleotide sequences and symbolic alleles such as `<DEL>`.

use crate::{Error, Result};

use std::fmt::{self, Display};
use std::str::FromStr;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// Separator between the fields of a row key.
pub const SEPARATOR: u8 = 0;

/// Width of the position field in bytes.
pub const POSITION_WIDTH: usize = 4;

// Prefixes stripped from chromosome names, longest first.
const CHROMOSOME_PREFIXES: [&str; 2] = ["chrom", "chr"];

/// Returns the canonical form of a chromosome name.
///
/// Strips surrounding whitespace and a leading `chrom` or `chr` prefix (case-insensitive) when something remains after the prefix.
/// The mitochondrial chromosome `M` becomes `MT`.
///
/// # Examples
///
/// ```
/// use variant_store::row_key::normalize_chromosome;
///
/// assert_eq!(normalize_chromosome("chr1"), "1");
/// assert_eq!(normalize_chromosome("CHRX"), "X");
/// assert_eq!(normalize_chromosome("chrM"), "MT");
/// assert_eq!(normalize_chromosome("GL000192.1"), "GL000192.1");
/// ```
pub fn normalize_chromosome(chromosome: &str) -> String {
    let trimmed = chromosome.trim();
    let mut result = trimmed;
    for prefix in CHROMOSOME_PREFIXES.iter() {
        if trimmed.len() > prefix.len() && trimmed.is_char_boundary(prefix.len()) && trimmed[..prefix.len()].eq_ignore_ascii_case(prefix) {
            result = &trimmed[prefix.len()..];
            break;
        }
    }
    if result.eq_ignore_ascii_case("M") {
        String::from("MT")
    } else {
        result.to_string()
    }
}

/// Encodes the variant coordinates as a row key.
///
/// The chromosome is normalized before encoding.
///
/// # Examples
///
/// ```
/// use variant_store::row_key;
///
/// let key = row_key::encode("chr1", 1000, "A", "C");
/// assert_eq!(key, b"1\x00\x00\x00\x03\xe8A\x00C");
/// let snv = row_key::encode("1", 1000, "A", "");
/// assert_eq!(snv, b"1\x00\x00\x00\x03\xe8A");
/// ```
pub fn encode(chromosome: &str, position: u32, reference: &str, alternate: &str) -> Vec<u8> {
    let chromosome = normalize_chromosome(chromosome);
    let mut result = Vec::with_capacity(chromosome.len() + 1 + POSITION_WIDTH + reference.len() + 1 + alternate.len());
    result.extend_from_slice(chromosome.as_bytes());
    result.push(SEPARATOR);
    result.extend_from_slice(&position.to_be_bytes());
    result.extend_from_slice(reference.as_bytes());
    if !alternate.is_empty() {
        result.push(SEPARATOR);
        result.extend_from_slice(alternate.as_bytes());
    }
    result
}

/// Decodes a row key into (chromosome, position, reference, alternate).
///
/// # Errors
///
/// Returns [`Error::Decoding`] with the raw bytes if the key is truncated or the fields are not valid UTF-8.
pub fn decode(bytes: &[u8]) -> Result<(String, u32, String, String)> {
    let chr_end = bytes.iter().position(|&b| b == SEPARATOR).ok_or_else(|| decoding_error("missing chromosome separator", bytes))?;
    let chromosome = utf8_field(&bytes[..chr_end], "chromosome", bytes)?;

    let pos_start = chr_end + 1;
    let pos_end = pos_start + POSITION_WIDTH;
    if bytes.len() < pos_end {
        return Err(decoding_error("truncated position", bytes));
    }
    let mut position = [0u8; POSITION_WIDTH];
    position.copy_from_slice(&bytes[pos_start..pos_end]);
    let position = u32::from_be_bytes(position);

    // The position may contain zero bytes, so we only scan the alleles.
    let alleles = &bytes[pos_end..];
    let (reference, alternate) = match alleles.iter().position(|&b| b == SEPARATOR) {
        Some(offset) => (&alleles[..offset], &alleles[offset + 1..]),
        None => (alleles, &alleles[alleles.len()..]),
    };
    let reference = utf8_field(reference, "reference", bytes)?;
    let alternate = utf8_field(alternate, "alternate", bytes)?;

    Ok((chromosome, position, reference, alternate))
}

fn decoding_error(reason: &str, bytes: &[u8]) -> Error {
    Error::Decoding {
        reason: reason.to_string(),
        bytes: bytes.to_vec(),
    }
}

fn utf8_field(field: &[u8], name: &str, bytes: &[u8]) -> Result<String> {
    String::from_utf8(field.to_vec()).map_err(|_| decoding_error(&format!("invalid UTF-8 in {}", name), bytes))
}

//-----------------------------------------------------------------------------

/// Variant coordinates that determine the row key.
///
/// The chromosome is always stored in normalized form.
/// Ordering is the tuple order (chromosome, position, reference, alternate), which is also the order of the encoded keys.
///
/// # Examples
///
/// ```
/// use variant_store::VariantKey;
///
/// let variant: VariantKey = "chr1:1000:A:C".parse().unwrap();
/// assert_eq!(variant.chromosome, "1");
/// assert_eq!(variant.to_string(), "1:1000:A:C");
///
/// let key = variant.encode();
/// assert_eq!(VariantKey::decode(&key).unwrap(), variant);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantKey {
    pub chromosome: String,
    pub position: u32,
    pub reference: String,
    pub alternate: String,
}

impl VariantKey {
    /// Creates new coordinates with a normalized chromosome.
    pub fn new(chromosome: &str, position: u32, reference: &str, alternate: &str) -> Self {
        VariantKey {
            chromosome: normalize_chromosome(chromosome),
            position,
            reference: reference.to_string(),
            alternate: alternate.to_string(),
        }
    }

    /// Returns the row key for the variant.
    pub fn encode(&self) -> Vec<u8> {
        encode(&self.chromosome, self.position, &self.reference, &self.alternate)
    }

    /// Decodes a row key.
    ///
    /// # Errors
    ///
    /// Passes through decoding errors from [`decode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (chromosome, position, reference, alternate) = decode(bytes)?;
        Ok(VariantKey { chromosome, position, reference, alternate })
    }

    /// Returns the row key as a lowercase hexadecimal string.
    pub fn to_hex(&self) -> String {
        self.encode().iter().map(|byte| format!("{:02x}", byte)).collect()
    }

    /// Decodes a row key given as a hexadecimal string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decoding`] if the string is not valid hexadecimal or the key cannot be decoded.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        if hex.len() % 2 != 0 {
            return Err(decoding_error("odd number of hex digits", hex.as_bytes()));
        }
        let mut bytes = Vec::with_capacity(hex.len() / 2);
        for i in (0..hex.len()).step_by(2) {
            let byte = hex.get(i..i + 2).and_then(|digits| u8::from_str_radix(digits, 16).ok());
            let byte = byte.ok_or_else(|| decoding_error("invalid hex digit", hex.as_bytes()))?;
            bytes.push(byte);
        }
        Self::decode(&bytes)
    }
}

impl Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.chromosome, self.position, allele_str(&self.reference), allele_str(&self.alternate))
    }
}

fn allele_str(allele: &str) -> &str {
    if allele.is_empty() { "-" } else { allele }
}

fn parse_allele(allele: &str) -> &str {
    if allele == "-" { "" } else { allele }
}

impl FromStr for VariantKey {
    type Err = Error;

    /// Parses `chr:pos:ref:alt`, where `-` or an empty field stands for an empty allele.
    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.trim().split(':').collect();
        if fields.len() < 3 || fields.len() > 4 {
            return Err(Error::malformed("variant", s, "expected chr:pos:ref:alt"));
        }
        let position = fields[1].parse::<u32>().map_err(|x| Error::malformed("variant", s, x.to_string()))?;
        if fields[0].is_empty() {
            return Err(Error::malformed("variant", s, "empty chromosome"));
        }
        let alternate = fields.get(3).copied().unwrap_or("");
        Ok(VariantKey::new(fields[0], position, parse_allele(fields[2]), parse_allele(alternate)))
    }
}

/// Returns `true` if the string looks like a variant identifier `chr:pos:ref:alt`.
pub fn is_variant_id(value: &str) -> bool {
    let fields: Vec<&str> = value.split(':').collect();
    fields.len() == 4 && !fields[0].is_empty() && fields[1].parse::<u32>().is_ok()
}

//-----------------------------------------------------------------------------

/// Variant type as stored in the `TYPE` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariantType {
    Snv,
    Snp,
    Mnv,
    Mnp,
    Indel,
    Insertion,
    Deletion,
    Sv,
    Inversion,
    Translocation,
    Cnv,
    CopyNumber,
    CopyNumberGain,
    CopyNumberLoss,
    Duplication,
    TandemDuplication,
    Breakend,
    NoVariation,
    Symbolic,
    Mixed,
}

impl VariantType {
    /// All variant types.
    pub const ALL: [VariantType; 20] = [
        VariantType::Snv, VariantType::Snp, VariantType::Mnv, VariantType::Mnp,
        VariantType::Indel, VariantType::Insertion, VariantType::Deletion, VariantType::Sv,
        VariantType::Inversion, VariantType::Translocation, VariantType::Cnv, VariantType::CopyNumber,
        VariantType::CopyNumberGain, VariantType::CopyNumberLoss, VariantType::Duplication, VariantType::TandemDuplication,
        VariantType::Breakend, VariantType::NoVariation, VariantType::Symbolic, VariantType::Mixed,
    ];

    /// Returns the stored name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantType::Snv => "SNV",
            VariantType::Snp => "SNP",
            VariantType::Mnv => "MNV",
            VariantType::Mnp => "MNP",
            VariantType::Indel => "INDEL",
            VariantType::Insertion => "INSERTION",
            VariantType::Deletion => "DELETION",
            VariantType::Sv => "SV",
            VariantType::Inversion => "INVERSION",
            VariantType::Translocation => "TRANSLOCATION",
            VariantType::Cnv => "CNV",
            VariantType::CopyNumber => "COPY_NUMBER",
            VariantType::CopyNumberGain => "COPY_NUMBER_GAIN",
            VariantType::CopyNumberLoss => "COPY_NUMBER_LOSS",
            VariantType::Duplication => "DUPLICATION",
            VariantType::TandemDuplication => "TANDEM_DUPLICATION",
            VariantType::Breakend => "BREAKEND",
            VariantType::NoVariation => "NO_VARIATION",
            VariantType::Symbolic => "SYMBOLIC",
            VariantType::Mixed => "MIXED",
        }
    }

    /// Returns the declared subtypes of the type.
    pub fn subtypes(&self) -> &'static [VariantType] {
        match self {
            VariantType::Snv => &[VariantType::Snp],
            VariantType::Mnv => &[VariantType::Mnp],
            VariantType::Cnv => &[VariantType::CopyNumber, VariantType::CopyNumberGain, VariantType::CopyNumberLoss],
            VariantType::CopyNumber => &[VariantType::CopyNumberGain, VariantType::CopyNumberLoss],
            VariantType::Duplication => &[VariantType::TandemDuplication],
            _ => &[],
        }
    }

    /// Returns the type followed by its subtypes.
    pub fn with_subtypes(&self) -> Vec<VariantType> {
        let mut result = vec![*self];
        result.extend_from_slice(self.subtypes());
        result
    }
}

impl Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VariantType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        VariantType::ALL.iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
            .copied()
            .ok_or_else(|| Error::malformed("TYPE", s, "unknown variant type"))
    }
}

//-----------------------------------------------------------------------------
