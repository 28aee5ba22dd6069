//! Column catalog: fixed columns, naming of dynamic columns, and catalog snapshots.
//!
//! The variant table has a fixed set of core and annotation columns, which are listed in [`FIXED_COLUMNS`].
//! Columns for studies, samples, files, and cohorts are created on demand.
//! Their names are pure functions of the owning entities, so no side table is needed for resolving them:
//!
//! * study presence: `{study}_presence`
//! * fill-missing marker: `_{study}_FM`
//! * sample genotypes: `{study}_{sample}_S`
//! * file attributes: `{study}_{file}_F`
//! * cohort statistics: `{study}_{cohort}_PB`, `_CF`, `_MAF`, `_MGF`, `_PSF`
//! * genotype categories: `{study}_{category}_GT`
//! * variant scores: `{study}_{score}_VS`
//! * releases: `R_{n}`
//! * population frequencies: `A_PF_{SOURCE}_{POPULATION}`
//!
//! [`ColumnCatalog`] tracks the dynamic columns and the registered studies.
//! It publishes immutable [`CatalogSnapshot`] values, and a new snapshot replaces the old one atomically.
//! Columns are never removed or redefined.

use crate::{Error, Result};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// Owner category of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Core,
    Annotation,
    Study,
    Sample,
    File,
    CohortStats,
}

/// Scalar or array storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageType {
    Scalar,
    Array,
}

/// Type of a scalar value or an array element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    Varchar,
    Integer,
    UnsignedInt,
    Float,
    Boolean,
    Binary,
}

impl ScalarKind {
    /// Returns the SQL name of the type.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ScalarKind::Varchar => "VARCHAR",
            ScalarKind::Integer => "INTEGER",
            ScalarKind::UnsignedInt => "UNSIGNED_INT",
            ScalarKind::Float => "FLOAT",
            ScalarKind::Boolean => "BOOLEAN",
            ScalarKind::Binary => "VARBINARY",
        }
    }

    /// Returns `true` for integer and floating point kinds.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ScalarKind::Integer | ScalarKind::UnsignedInt | ScalarKind::Float)
    }
}

/// SQL type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SqlType {
    pub kind: ScalarKind,
    pub storage: StorageType,
}

impl SqlType {
    pub const VARCHAR: SqlType = SqlType::scalar(ScalarKind::Varchar);
    pub const INTEGER: SqlType = SqlType::scalar(ScalarKind::Integer);
    pub const UNSIGNED_INT: SqlType = SqlType::scalar(ScalarKind::UnsignedInt);
    pub const FLOAT: SqlType = SqlType::scalar(ScalarKind::Float);
    pub const BOOLEAN: SqlType = SqlType::scalar(ScalarKind::Boolean);
    pub const BINARY: SqlType = SqlType::scalar(ScalarKind::Binary);
    pub const VARCHAR_ARRAY: SqlType = SqlType::array(ScalarKind::Varchar);
    pub const INTEGER_ARRAY: SqlType = SqlType::array(ScalarKind::Integer);
    pub const FLOAT_ARRAY: SqlType = SqlType::array(ScalarKind::Float);

    pub const fn scalar(kind: ScalarKind) -> Self {
        SqlType { kind, storage: StorageType::Scalar }
    }

    pub const fn array(kind: ScalarKind) -> Self {
        SqlType { kind, storage: StorageType::Array }
    }

    /// Returns `true` if the type is an array type.
    pub fn is_array(&self) -> bool {
        self.storage == StorageType::Array
    }

    /// Returns the scalar type of the elements.
    pub fn element(&self) -> SqlType {
        SqlType::scalar(self.kind)
    }

    /// Parses the SQL name of a type, such as `FLOAT ARRAY`.
    pub fn parse(name: &str) -> Option<SqlType> {
        let name = name.trim().to_ascii_uppercase();
        let (kind, storage) = match name.strip_suffix(" ARRAY") {
            Some(kind) => (kind.trim(), StorageType::Array),
            None => (name.as_str(), StorageType::Scalar),
        };
        let kind = match kind {
            "VARCHAR" => ScalarKind::Varchar,
            "INTEGER" => ScalarKind::Integer,
            "UNSIGNED_INT" => ScalarKind::UnsignedInt,
            "FLOAT" | "DOUBLE" => ScalarKind::Float,
            "BOOLEAN" => ScalarKind::Boolean,
            "VARBINARY" => ScalarKind::Binary,
            _ => return None,
        };
        Some(SqlType { kind, storage })
    }
}

impl Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.storage {
            StorageType::Scalar => write!(f, "{}", self.kind.sql_name()),
            StorageType::Array => write!(f, "{} ARRAY", self.kind.sql_name()),
        }
    }
}

//-----------------------------------------------------------------------------

/// A column declared at build time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FixedColumn {
    pub name: &'static str,
    pub category: Category,
    pub sql_type: SqlType,
}

impl FixedColumn {
    const fn core(name: &'static str, sql_type: SqlType) -> Self {
        FixedColumn { name, category: Category::Core, sql_type }
    }

    const fn annotation(name: &'static str, sql_type: SqlType) -> Self {
        FixedColumn { name, category: Category::Annotation, sql_type }
    }

    /// Returns an owned descriptor for the column.
    pub fn descriptor(&self) -> ColumnDescriptor {
        ColumnDescriptor::new(self.name, self.category, self.sql_type)
    }

    /// Returns the name in double quotes.
    pub fn quoted(&self) -> String {
        quote_identifier(self.name)
    }
}

impl Display for FixedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A column of the variant table.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnDescriptor {
    pub name: String,
    pub category: Category,
    pub sql_type: SqlType,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, category: Category, sql_type: SqlType) -> Self {
        ColumnDescriptor { name: name.into(), category, sql_type }
    }

    /// Returns the name in double quotes.
    pub fn quoted(&self) -> String {
        quote_identifier(&self.name)
    }

    pub fn storage_type(&self) -> StorageType {
        self.sql_type.storage
    }

    pub fn scalar_kind(&self) -> ScalarKind {
        self.sql_type.kind
    }

    pub fn is_array(&self) -> bool {
        self.sql_type.is_array()
    }
}

impl From<FixedColumn> for ColumnDescriptor {
    fn from(column: FixedColumn) -> Self {
        column.descriptor()
    }
}

impl Display for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Returns the identifier in double quotes, doubling any embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

//-----------------------------------------------------------------------------

// Core columns.

pub const CHROMOSOME: FixedColumn = FixedColumn::core("CHROMOSOME", SqlType::VARCHAR);
pub const POSITION: FixedColumn = FixedColumn::core("POSITION", SqlType::UNSIGNED_INT);
pub const REFERENCE: FixedColumn = FixedColumn::core("REFERENCE", SqlType::VARCHAR);
pub const ALTERNATE: FixedColumn = FixedColumn::core("ALTERNATE", SqlType::VARCHAR);
pub const CI_START_L: FixedColumn = FixedColumn::core("CI_START_L", SqlType::UNSIGNED_INT);
pub const CI_START_R: FixedColumn = FixedColumn::core("CI_START_R", SqlType::UNSIGNED_INT);
pub const CI_END_L: FixedColumn = FixedColumn::core("CI_END_L", SqlType::UNSIGNED_INT);
pub const CI_END_R: FixedColumn = FixedColumn::core("CI_END_R", SqlType::UNSIGNED_INT);
pub const TYPE: FixedColumn = FixedColumn::core("TYPE", SqlType::VARCHAR);
pub const INDEX_NOT_SYNC: FixedColumn = FixedColumn::core("_IDX_N", SqlType::BOOLEAN);
pub const INDEX_UNKNOWN: FixedColumn = FixedColumn::core("_IDX_U", SqlType::BOOLEAN);
pub const INDEX_STUDIES: FixedColumn = FixedColumn::core("_IDX_ST_", SqlType::INTEGER_ARRAY);

// Annotation columns.

pub const ANNOTATION_ID: FixedColumn = FixedColumn::annotation("A_ID", SqlType::INTEGER);
pub const SO: FixedColumn = FixedColumn::annotation("A_SO", SqlType::INTEGER_ARRAY);
pub const GENES: FixedColumn = FixedColumn::annotation("A_GENES", SqlType::VARCHAR_ARRAY);
pub const GENE_SO: FixedColumn = FixedColumn::annotation("A_GENE_SO", SqlType::VARCHAR_ARRAY);
pub const BIOTYPE_SO: FixedColumn = FixedColumn::annotation("A_BT_SO", SqlType::VARCHAR_ARRAY);
pub const GENE_BIOTYPE_SO: FixedColumn = FixedColumn::annotation("A_GENE_BT_SO", SqlType::VARCHAR_ARRAY);
pub const GENE_BIOTYPE: FixedColumn = FixedColumn::annotation("A_GENE_BT", SqlType::VARCHAR_ARRAY);
pub const GENE_SO_FLAG: FixedColumn = FixedColumn::annotation("A_GENE_SO_FLAG", SqlType::VARCHAR_ARRAY);
pub const SO_FLAG: FixedColumn = FixedColumn::annotation("A_SO_FLAG", SqlType::VARCHAR_ARRAY);
pub const BIOTYPE: FixedColumn = FixedColumn::annotation("A_BIOTYPE", SqlType::VARCHAR_ARRAY);
pub const TRANSCRIPTS: FixedColumn = FixedColumn::annotation("A_TRANSCRIPTS", SqlType::VARCHAR_ARRAY);
pub const TRANSCRIPT_FLAGS: FixedColumn = FixedColumn::annotation("A_FLAGS", SqlType::VARCHAR_ARRAY);
pub const GENE_TRAITS_NAME: FixedColumn = FixedColumn::annotation("A_GT_NAME", SqlType::VARCHAR_ARRAY);
pub const GENE_TRAITS_ID: FixedColumn = FixedColumn::annotation("A_GT_ID", SqlType::VARCHAR_ARRAY);
pub const CLINICAL: FixedColumn = FixedColumn::annotation("A_CLI", SqlType::VARCHAR_ARRAY);
pub const CLINICAL_SIGNIFICANCE: FixedColumn = FixedColumn::annotation("A_CLI_SIG", SqlType::VARCHAR_ARRAY);
pub const PROTEIN_KEYWORDS: FixedColumn = FixedColumn::annotation("A_PROT_KW", SqlType::VARCHAR_ARRAY);
pub const DRUG: FixedColumn = FixedColumn::annotation("A_DRUG", SqlType::VARCHAR_ARRAY);
pub const XREFS: FixedColumn = FixedColumn::annotation("A_XREFS", SqlType::VARCHAR_ARRAY);

/// PolyPhen scores as `[min, max]`.
pub const POLYPHEN: FixedColumn = FixedColumn::annotation("A_POLYPHEN", SqlType::FLOAT_ARRAY);
pub const POLYPHEN_DESC: FixedColumn = FixedColumn::annotation("A_POLYPHEN_DESC", SqlType::VARCHAR_ARRAY);
/// SIFT scores as `[min, max]`.
pub const SIFT: FixedColumn = FixedColumn::annotation("A_SIFT", SqlType::FLOAT_ARRAY);
pub const SIFT_DESC: FixedColumn = FixedColumn::annotation("A_SIFT_DESC", SqlType::VARCHAR_ARRAY);

pub const PHASTCONS: FixedColumn = FixedColumn::annotation("A_PHASTCONS", SqlType::FLOAT);
pub const PHYLOP: FixedColumn = FixedColumn::annotation("A_PHYLOP", SqlType::FLOAT);
pub const GERP: FixedColumn = FixedColumn::annotation("A_GERP", SqlType::FLOAT);

pub const CADD_SCALED: FixedColumn = FixedColumn::annotation("A_FS_CADD_SC", SqlType::FLOAT);
pub const CADD_RAW: FixedColumn = FixedColumn::annotation("A_FS_CADD_R", SqlType::FLOAT);

/// Serialized annotation.
pub const FULL_ANNOTATION: FixedColumn = FixedColumn::annotation("A_FULL", SqlType::VARCHAR);

/// All fixed columns in table creation order.
pub const FIXED_COLUMNS: &[FixedColumn] = &[
    CHROMOSOME, POSITION, REFERENCE, ALTERNATE,
    CI_START_L, CI_START_R, CI_END_L, CI_END_R,
    TYPE,
    ANNOTATION_ID, SO, GENES, GENE_SO, BIOTYPE_SO, GENE_BIOTYPE_SO, GENE_BIOTYPE, GENE_SO_FLAG, SO_FLAG,
    BIOTYPE, TRANSCRIPTS, TRANSCRIPT_FLAGS, GENE_TRAITS_NAME, GENE_TRAITS_ID, CLINICAL, CLINICAL_SIGNIFICANCE,
    PROTEIN_KEYWORDS, DRUG, XREFS,
    POLYPHEN, POLYPHEN_DESC, SIFT, SIFT_DESC,
    PHASTCONS, PHYLOP, GERP,
    CADD_SCALED, CADD_RAW,
    FULL_ANNOTATION,
    INDEX_NOT_SYNC, INDEX_UNKNOWN, INDEX_STUDIES,
];

/// Primary key columns.
pub const PRIMARY_KEY: [FixedColumn; 4] = [CHROMOSOME, POSITION, REFERENCE, ALTERNATE];

/// Fixed columns that cannot be NULL.
pub const NOT_NULL: [FixedColumn; 2] = [CHROMOSOME, POSITION];

/// Returns the fixed column with the given name.
pub fn fixed_column(name: &str) -> Option<FixedColumn> {
    FIXED_COLUMNS.iter().find(|column| column.name == name).copied()
}

/// Returns the conservation score column for the source (`phastCons`, `phylop`, or `gerp`).
pub fn conservation_column(source: &str) -> Option<FixedColumn> {
    match source.trim().to_ascii_uppercase().as_str() {
        "PHASTCONS" => Some(PHASTCONS),
        "PHYLOP" => Some(PHYLOP),
        "GERP" => Some(GERP),
        _ => None,
    }
}

/// Returns the functional score column for the source (`cadd_raw` or `cadd_scaled`).
pub fn functional_score_column(source: &str) -> Option<FixedColumn> {
    match source.trim().to_ascii_uppercase().as_str() {
        "CADD_RAW" => Some(CADD_RAW),
        "CADD_SCALED" => Some(CADD_SCALED),
        _ => None,
    }
}

//-----------------------------------------------------------------------------

// Naming of dynamic columns.

const SEPARATOR: char = '_';

/// Presence column of a study: non-NULL if the study has data for the variant.
pub fn column_for_study_presence(study: &str) -> ColumnDescriptor {
    ColumnDescriptor::new(format!("{}{}presence", study, SEPARATOR), Category::Study, SqlType::UNSIGNED_INT)
}

/// Fill-missing marker of a study.
pub fn column_for_fill_missing(study: &str) -> ColumnDescriptor {
    ColumnDescriptor::new(format!("{}{}{}FM", SEPARATOR, study, SEPARATOR), Category::Study, SqlType::INTEGER)
}

/// Per-sample genotype data. The first element is the genotype.
pub fn column_for_sample(study: &str, sample: &str) -> ColumnDescriptor {
    ColumnDescriptor::new(format!("{}{}{}{}S", study, SEPARATOR, sample, SEPARATOR), Category::Sample, SqlType::VARCHAR_ARRAY)
}

/// Per-file attributes.
///
/// See [`FILE_OVERLAP_STATUS`], [`FILE_QUAL`], and [`FILE_FILTER`] for the elements.
pub fn column_for_file(study: &str, file: &str) -> ColumnDescriptor {
    ColumnDescriptor::new(format!("{}{}{}{}F", study, SEPARATOR, file, SEPARATOR), Category::File, SqlType::VARCHAR_ARRAY)
}

/// 1-based index of the overlapping status in a file column.
pub const FILE_OVERLAP_STATUS: usize = 3;

/// 1-based index of the QUAL field in a file column.
pub const FILE_QUAL: usize = 4;

/// 1-based index of the FILTER field in a file column.
pub const FILE_FILTER: usize = 5;

/// Overlapping status of a variant that is present in the file itself.
pub const NO_OVERLAP: &str = "N";

/// Serialized statistics of a cohort.
pub fn column_for_cohort_stats(study: &str, cohort: &str) -> ColumnDescriptor {
    cohort_column(study, cohort, "PB", SqlType::BINARY)
}

/// Allele frequencies of a cohort as `[reference, alternate]`.
pub fn column_for_cohort_freq(study: &str, cohort: &str) -> ColumnDescriptor {
    cohort_column(study, cohort, "CF", SqlType::FLOAT_ARRAY)
}

/// Minor allele frequency of a cohort.
pub fn column_for_cohort_maf(study: &str, cohort: &str) -> ColumnDescriptor {
    cohort_column(study, cohort, "MAF", SqlType::FLOAT)
}

/// Minor genotype frequency of a cohort.
pub fn column_for_cohort_mgf(study: &str, cohort: &str) -> ColumnDescriptor {
    cohort_column(study, cohort, "MGF", SqlType::FLOAT)
}

/// Fraction of calls passing filters in a cohort.
pub fn column_for_cohort_pass_freq(study: &str, cohort: &str) -> ColumnDescriptor {
    cohort_column(study, cohort, "PSF", SqlType::FLOAT)
}

fn cohort_column(study: &str, cohort: &str, suffix: &str, sql_type: SqlType) -> ColumnDescriptor {
    ColumnDescriptor::new(format!("{}{}{}{}{}", study, SEPARATOR, cohort, SEPARATOR, suffix), Category::CohortStats, sql_type)
}

/// All statistics columns of a cohort.
pub fn cohort_stats_columns(study: &str, cohort: &str) -> Vec<ColumnDescriptor> {
    vec![
        column_for_cohort_stats(study, cohort),
        column_for_cohort_freq(study, cohort),
        column_for_cohort_maf(study, cohort),
        column_for_cohort_mgf(study, cohort),
        column_for_cohort_pass_freq(study, cohort),
    ]
}

/// Variant score of a study as `[score, p-value]`.
pub fn column_for_variant_score(study: &str, score: &str) -> ColumnDescriptor {
    ColumnDescriptor::new(format!("{}{}{}{}VS", study, SEPARATOR, score, SEPARATOR), Category::Study, SqlType::FLOAT_ARRAY)
}

/// Release flag: `true` if the variant was present in the release.
pub fn column_for_release(release: u32) -> ColumnDescriptor {
    ColumnDescriptor::new(format!("R{}{}", SEPARATOR, release), Category::Annotation, SqlType::BOOLEAN)
}

/// Sample identifiers with a genotype in the category.
pub fn column_for_genotype_category(study: &str, category: GenotypeCategory) -> ColumnDescriptor {
    ColumnDescriptor::new(format!("{}{}{}{}GT", study, SEPARATOR, category.code(), SEPARATOR), Category::Study, SqlType::VARCHAR_ARRAY)
}

// Source aliases replaced before building a population frequency column name.
const POPULATION_ALIASES: [(&str, &str); 2] = [
    ("1000GENOMES_PHASE_3", "1KG_PHASE3"),
    ("ESP_6500", "ESP6500"),
];

/// Separator between the source and the population in query keys.
pub const SOURCE_POPULATION_SEPARATOR: char = ':';

fn population_source(source: &str) -> String {
    let mut source = source.trim().to_ascii_uppercase();
    for (alias, canonical) in POPULATION_ALIASES.iter() {
        source = source.replace(alias, canonical);
    }
    source
}

/// Population frequencies from a source as `[reference, alternate]`.
///
/// # Examples
///
/// ```
/// use variant_store::columns;
///
/// let column = columns::column_for_population_frequency("1000GENOMES_phase_3", "afr");
/// assert_eq!(column.name, "A_PF_1KG_PHASE3_AFR");
/// ```
pub fn column_for_population_frequency(source: &str, population: &str) -> ColumnDescriptor {
    let name = format!("A_PF_{}{}{}", population_source(source), SEPARATOR, population.trim().to_ascii_uppercase());
    ColumnDescriptor::new(name, Category::Annotation, SqlType::FLOAT_ARRAY)
}

/// Population frequency column for a `source:population` key.
///
/// Returns [`None`] if the key does not contain both parts.
pub fn population_frequency_column(key: &str) -> Option<ColumnDescriptor> {
    let (source, population) = key.split_once(SOURCE_POPULATION_SEPARATOR)?;
    if source.trim().is_empty() || population.trim().is_empty() {
        return None;
    }
    Some(column_for_population_frequency(source, population))
}

const THOUSAND_GENOMES_POPULATIONS: [&str; 33] = [
    "ALL", "AFR", "AMR", "EAS", "EUR", "SAS", "ACB", "ASW", "BEB",
    "CDX", "CEU", "CHB", "CHD", "CHS", "CLM", "ESN", "FIN", "GBR",
    "GIH", "GWD", "IBS", "ITU", "JPT", "KHV", "LWK", "MSL", "MXL",
    "PEL", "PJL", "PUR", "STU", "TSI", "YRI",
];

const GNOMAD_POPULATIONS: [&str; 10] = ["ALL", "AFR", "AMR", "ASJ", "EAS", "FIN", "NFE", "OTH", "MALE", "FEMALE"];

/// Population frequency columns created for human data.
pub fn human_population_frequency_columns() -> Vec<ColumnDescriptor> {
    let mut sources: Vec<(&str, Vec<&str>)> = vec![
        ("ESP6500", vec!["ALL", "EA", "AA"]),
        ("EXAC", vec!["ALL", "AFR", "AMR", "EAS", "FIN", "NFE", "OTH", "SAS"]),
        ("GONL", vec!["ALL"]),
        ("UK10K", vec!["ALL", "ALSPAC", "TWINSUK", "TWINSUK_NODUP"]),
        ("GNOMAD_GENOMES", GNOMAD_POPULATIONS.to_vec()),
        ("GNOMAD_EXOMES", GNOMAD_POPULATIONS.to_vec()),
    ];
    sources.push(("1kG_phase3", THOUSAND_GENOMES_POPULATIONS.to_vec()));
    sources.push(("1000G", THOUSAND_GENOMES_POPULATIONS.to_vec()));

    let mut result = Vec::new();
    for (source, populations) in sources.iter() {
        for population in populations.iter() {
            result.push(column_for_population_frequency(source, population));
        }
    }
    result
}

//-----------------------------------------------------------------------------

/// Genotype categories used by the per-category genotype layout.
///
/// Homozygous reference has no category: a sample is homozygous reference if it is not listed in any category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GenotypeCategory {
    Het,
    HomAlt,
    NoCall,
    Other,
}

impl GenotypeCategory {
    /// All categories.
    pub const ALL: [GenotypeCategory; 4] = [GenotypeCategory::Het, GenotypeCategory::HomAlt, GenotypeCategory::NoCall, GenotypeCategory::Other];

    /// Returns the code used in column names.
    pub fn code(&self) -> &'static str {
        match self {
            GenotypeCategory::Het => "HET",
            GenotypeCategory::HomAlt => "HOM_ALT",
            GenotypeCategory::NoCall => "NOCALL",
            GenotypeCategory::Other => "OTHER",
        }
    }

    /// Returns the category of the genotype, or [`None`] for homozygous reference.
    pub fn of(genotype: &str) -> Option<GenotypeCategory> {
        if is_hom_ref(genotype) {
            return None;
        }
        match genotype {
            "0/1" | "1/0" | "0|1" | "1|0" => Some(GenotypeCategory::Het),
            "1/1" | "1|1" => Some(GenotypeCategory::HomAlt),
            "." | "./." | ".|." => Some(GenotypeCategory::NoCall),
            _ => Some(GenotypeCategory::Other),
        }
    }
}

impl Display for GenotypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Returns `true` if the genotype is homozygous reference (`0/0`, `0|0`, or haploid `0`).
pub fn is_hom_ref(genotype: &str) -> bool {
    matches!(genotype, "0/0" | "0|0" | "0")
}

/// Storage layout for genotypes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GenotypeLayout {
    /// One column per sample; the genotype is the first element.
    #[default]
    PerSample,
    /// One column per genotype category listing the samples in it.
    PerCategory,
}

impl Display for GenotypeLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenotypeLayout::PerSample => write!(f, "per-sample"),
            GenotypeLayout::PerCategory => write!(f, "per-category"),
        }
    }
}

impl FromStr for GenotypeLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-sample" | "sample" => Ok(GenotypeLayout::PerSample),
            "per-category" | "category" => Ok(GenotypeLayout::PerCategory),
            _ => Err(Error::malformed("genotype layout", s, "expected per-sample or per-category")),
        }
    }
}

/// Returns all columns owned by the study under the given genotype layout.
///
/// These are the presence and fill-missing columns, genotype columns, file columns, and cohort statistics columns.
pub fn study_columns(study: &str, entry: &StudyEntry, layout: GenotypeLayout) -> Vec<ColumnDescriptor> {
    let mut result = vec![column_for_study_presence(study), column_for_fill_missing(study)];
    match layout {
        GenotypeLayout::PerSample => {
            result.extend(entry.samples.iter().map(|sample| column_for_sample(study, sample)));
        },
        GenotypeLayout::PerCategory => {
            result.extend(GenotypeCategory::ALL.iter().map(|category| column_for_genotype_category(study, *category)));
        },
    }
    result.extend(entry.files.iter().map(|file| column_for_file(study, file)));
    for cohort in entry.cohorts.iter() {
        result.extend(cohort_stats_columns(study, cohort));
    }
    result
}

/// Infers the category of a column from its name.
///
/// Fixed columns have their declared category.
/// Dynamic columns are recognized by their prefixes and suffixes.
pub fn infer_category(name: &str) -> Category {
    if let Some(column) = fixed_column(name) {
        return column.category;
    }
    if name.starts_with("A_") || is_release_column(name) {
        return Category::Annotation;
    }
    let suffix = name.rsplit_once(SEPARATOR).map(|(_, suffix)| suffix).unwrap_or("");
    match suffix {
        "S" => Category::Sample,
        "F" => Category::File,
        "PB" | "CF" | "MAF" | "MGF" | "PSF" => Category::CohortStats,
        _ => Category::Study,
    }
}

fn is_release_column(name: &str) -> bool {
    name.strip_prefix("R_").map(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())).unwrap_or(false)
}

//-----------------------------------------------------------------------------

/// Samples, files, and cohorts registered for a study.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StudyEntry {
    pub samples: BTreeSet<String>,
    pub files: BTreeSet<String>,
    pub cohorts: BTreeSet<String>,
}

impl StudyEntry {
    /// Creates an entry with the given samples and cohorts.
    pub fn new<S: AsRef<str>, C: AsRef<str>>(samples: &[S], cohorts: &[C]) -> Self {
        StudyEntry {
            samples: samples.iter().map(|s| s.as_ref().to_string()).collect(),
            files: BTreeSet::new(),
            cohorts: cohorts.iter().map(|c| c.as_ref().to_string()).collect(),
        }
    }

    /// Adds files to the entry.
    pub fn with_files<F: AsRef<str>>(self, files: &[F]) -> Self {
        StudyEntry {
            files: files.iter().map(|f| f.as_ref().to_string()).collect(),
            ..self
        }
    }

    fn merge(&mut self, other: &StudyEntry) {
        self.samples.extend(other.samples.iter().cloned());
        self.files.extend(other.files.iter().cloned());
        self.cohorts.extend(other.cohorts.iter().cloned());
    }
}

/// An immutable view of the catalog.
///
/// Fixed columns are always present.
/// Dynamic columns and studies appear once registered and are never removed.
#[derive(Clone, Debug, Default)]
pub struct CatalogSnapshot {
    version: u64,
    columns: BTreeMap<String, ColumnDescriptor>,
    studies: BTreeMap<String, StudyEntry>,
    release: u32,
    genotype_layout: Option<GenotypeLayout>,
}

impl CatalogSnapshot {
    /// Returns the version of the snapshot. Each change increments the version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the column with the given name, fixed or dynamic.
    pub fn column(&self, name: &str) -> Option<ColumnDescriptor> {
        fixed_column(name).map(ColumnDescriptor::from).or_else(|| self.columns.get(name).cloned())
    }

    /// Returns `true` if the catalog contains the column.
    pub fn contains(&self, name: &str) -> bool {
        fixed_column(name).is_some() || self.columns.contains_key(name)
    }

    /// Returns the registered dynamic columns in name order.
    pub fn dynamic_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.values()
    }

    /// Returns the number of registered dynamic columns.
    pub fn dynamic_len(&self) -> usize {
        self.columns.len()
    }

    /// Returns the registered study names in sorted order.
    pub fn studies(&self) -> impl Iterator<Item = &str> {
        self.studies.keys().map(|s| s.as_str())
    }

    /// Returns the number of registered studies.
    pub fn study_count(&self) -> usize {
        self.studies.len()
    }

    /// Returns the entry for the study.
    pub fn study(&self, study: &str) -> Option<&StudyEntry> {
        self.studies.get(study)
    }

    /// Returns the only study, if exactly one study is registered.
    pub fn default_study(&self) -> Option<&str> {
        if self.studies.len() == 1 {
            self.studies.keys().next().map(|s| s.as_str())
        } else {
            None
        }
    }

    /// Returns the latest release.
    pub fn release(&self) -> u32 {
        self.release
    }

    /// Returns the genotype layout of the table, or [`None`] if it has not been recorded.
    pub fn genotype_layout(&self) -> Option<GenotypeLayout> {
        self.genotype_layout
    }

    // Adds the columns to this snapshot. Returns the number of new columns.
    fn add_columns<'a, I: IntoIterator<Item = &'a ColumnDescriptor>>(&mut self, columns: I) -> Result<usize> {
        let mut added = 0;
        for column in columns {
            let existing = self.column(&column.name);
            match existing {
                Some(existing) if existing.sql_type != column.sql_type => {
                    return Err(Error::ColumnRedefinition {
                        name: column.name.clone(),
                        existing: existing.sql_type.to_string(),
                        requested: column.sql_type.to_string(),
                    });
                },
                Some(_) => {},
                None => {
                    self.columns.insert(column.name.clone(), column.clone());
                    added += 1;
                },
            }
        }
        Ok(added)
    }
}

/// Column catalog with copy-on-write snapshots.
///
/// Readers call [`ColumnCatalog::snapshot`] and keep using the returned snapshot for the duration of an operation.
/// Registration builds a new snapshot and swaps it in, so readers never observe a partially applied registration.
///
/// # Examples
///
/// ```
/// use variant_store::columns::{self, ColumnCatalog, StudyEntry};
///
/// let catalog = ColumnCatalog::new();
/// let before = catalog.snapshot();
///
/// let entry = StudyEntry::new(&["NA12877"], &["ALL"]);
/// catalog.register_study("studyA", &entry).unwrap();
/// catalog.register_columns(&[columns::column_for_sample("studyA", "NA12877")]).unwrap();
///
/// let after = catalog.snapshot();
/// assert!(before.study("studyA").is_none());
/// assert!(after.contains("studyA_NA12877_S"));
/// ```
#[derive(Debug, Default)]
pub struct ColumnCatalog {
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl ColumnCatalog {
    /// Creates a catalog with only the fixed columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current.read().clone()
    }

    // Applies the update to a copy of the current snapshot and publishes the copy if the update succeeds.
    fn update<T, F: FnOnce(&mut CatalogSnapshot) -> Result<T>>(&self, update: F) -> Result<T> {
        let mut guard = self.current.write();
        let mut next = CatalogSnapshot::clone(&guard);
        let result = update(&mut next)?;
        next.version += 1;
        *guard = Arc::new(next);
        Ok(result)
    }

    /// Registers the columns. Returns the number of new columns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ColumnRedefinition`] if a column already exists with a different type.
    /// In that case, none of the columns are registered.
    pub fn register_columns<'a, I: IntoIterator<Item = &'a ColumnDescriptor>>(&self, columns: I) -> Result<usize> {
        self.update(|snapshot| snapshot.add_columns(columns))
    }

    /// Registers a study or adds samples, files, and cohorts to it.
    ///
    /// This does not register any columns.
    pub fn register_study(&self, study: &str, entry: &StudyEntry) -> Result<()> {
        self.update(|snapshot| {
            snapshot.studies.entry(study.to_string()).or_default().merge(entry);
            Ok(())
        })
    }

    /// Sets the latest release. Releases never decrease.
    pub fn register_release(&self, release: u32) -> Result<()> {
        self.update(|snapshot| {
            snapshot.release = snapshot.release.max(release);
            Ok(())
        })
    }

    /// Records the genotype layout of the table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedQueryParam`] if a different layout has already been recorded.
    pub fn register_genotype_layout(&self, layout: GenotypeLayout) -> Result<()> {
        self.update(|snapshot| {
            match snapshot.genotype_layout {
                Some(existing) if existing != layout => Err(Error::malformed(
                    "genotype layout", layout.to_string(), format!("the table already uses the {} layout", existing)
                )),
                _ => {
                    snapshot.genotype_layout = Some(layout);
                    Ok(())
                },
            }
        })
    }
}

//-----------------------------------------------------------------------------
