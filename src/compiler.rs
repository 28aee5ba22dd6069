//! Compilation of structured variant queries into SQL statements.
//!
//! [`QueryCompiler`] turns a [`Query`] into a [`QueryPlan`] against a snapshot of the column catalog.
//! Compilation is a pure function of the query, the snapshot, and the optional [`GeneResolver`].
//!
//! Query parameters fall into two groups:
//!
//! * Inclusive parameters (regions, identifiers, genes) select candidate variants.
//!   Their predicates are combined with OR.
//!   If there are none, the plan selects everything except the metadata row.
//! * Exclusive parameters (types, studies, genotypes, annotations, statistics) restrict the selection.
//!   Their predicates are combined with AND.
//!
//! Parameters are processed in a fixed order, so the same query always compiles to the same statement.
//!
//! # Examples
//!
//! ```
//! use variant_store::columns::{self, ColumnCatalog, GenotypeLayout, StudyEntry};
//! use variant_store::compiler::{CompilerParams, Projection, QueryCompiler, QueryOptions};
//! use variant_store::query::Query;
//!
//! let catalog = ColumnCatalog::new();
//! let entry = StudyEntry::new(&["NA12877"], &["ALL"]);
//! catalog.register_study("studyA", &entry).unwrap();
//! catalog.register_columns(&columns::study_columns("studyA", &entry, GenotypeLayout::PerSample)).unwrap();
//!
//! let compiler = QueryCompiler::new(catalog.snapshot(), CompilerParams::default());
//! let query = Query::new().with("REGION", "1:1000-2000").with("TYPE", "INDEL");
//! let options = QueryOptions::default().with_projection(Projection::COORDINATES);
//! let plan = compiler.compile(&query, &options).unwrap();
//! assert_eq!(
//!     plan.where_clause,
//!     "( ( \"CHROMOSOME\" = '1' AND \"POSITION\" >= 1000 AND \"POSITION\" <= 2000 ) AND ( \"TYPE\" = 'INDEL' ) )"
//! );
//! assert_eq!(plan.projected_columns, vec!["CHROMOSOME", "POSITION", "REFERENCE", "ALTERNATE", "TYPE"]);
//! ```

use crate::{Error, Result};
use crate::columns::{self, CatalogSnapshot, ColumnDescriptor, FixedColumn, GenotypeCategory, GenotypeLayout};
use crate::index::{self, IndexHint};
use crate::query::{self, LogicOp, Operator, ParamGroup, Query, QueryParam, Region};
use crate::row_key::{VariantKey, VariantType};
use crate::utils;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use std::io::BufRead;
use std::sync::Arc;

use tracing::{debug, warn};

pub mod consequence;
pub mod filter;

pub use filter::Predicate;


//-----------------------------------------------------------------------------

/// Resolves genes and gene sets for queries.
pub trait GeneResolver: Send + Sync {
    /// Returns the regions of the gene, or [`None`] if the gene is not known.
    fn resolve_gene(&self, gene: &str) -> Option<Vec<Region>>;

    /// Returns the genes annotated with the GO term.
    fn go_genes(&self, _term: &str) -> Vec<String> {
        Vec::new()
    }

    /// Returns the genes expressed in the tissue.
    fn expression_genes(&self, _term: &str) -> Vec<String> {
        Vec::new()
    }
}

/// An in-memory gene table.
///
/// Gene names and terms are case-insensitive.
///
/// # Examples
///
/// ```
/// use variant_store::compiler::{GeneResolver, GeneTable};
/// use variant_store::query::Region;
///
/// let mut genes = GeneTable::new();
/// genes.add_gene("BRCA2", Region::new("13", 32315474, 32400266));
/// genes.add_go_term("GO:0006281", "BRCA2");
///
/// assert_eq!(genes.resolve_gene("brca2"), Some(vec![Region::new("13", 32315474, 32400266)]));
/// assert_eq!(genes.resolve_gene("TP53"), None);
/// assert_eq!(genes.go_genes("GO:0006281"), vec!["BRCA2"]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneTable {
    regions: BTreeMap<String, Vec<Region>>,
    go_terms: BTreeMap<String, BTreeSet<String>>,
    expression: BTreeMap<String, BTreeSet<String>>,
}

impl GeneTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str) -> String {
        name.trim().to_ascii_uppercase()
    }

    /// Adds a region for the gene.
    pub fn add_gene(&mut self, gene: &str, region: Region) {
        self.regions.entry(Self::key(gene)).or_default().push(region);
    }

    /// Annotates the gene with the GO term.
    pub fn add_go_term(&mut self, term: &str, gene: &str) {
        self.go_terms.entry(Self::key(term)).or_default().insert(Self::key(gene));
    }

    /// Marks the gene as expressed in the tissue.
    pub fn add_expression(&mut self, tissue: &str, gene: &str) {
        self.expression.entry(Self::key(tissue)).or_default().insert(Self::key(gene));
    }

    /// Returns the number of genes with regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Returns `true` if the table contains no genes.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Reads a gene table from tab-separated lines `gene region [GO terms [tissues]]`.
    ///
    /// GO terms and tissues are comma-separated lists.
    /// Empty lines and lines starting with `#` are skipped.
    ///
    /// # Errors
    ///
    /// Passes through I/O errors.
    /// Returns [`Error::MalformedQueryParam`] if a line has no region or the region is invalid.
    pub fn read_tsv<R: BufRead>(reader: R) -> Result<Self> {
        let mut result = GeneTable::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 2 {
                return Err(Error::malformed("GENE", line, "expected gene and region"));
            }
            let gene = fields[0];
            result.add_gene(gene, fields[1].parse::<Region>()?);
            if let Some(terms) = fields.get(2) {
                for term in terms.split(query::OR).map(str::trim).filter(|t| !t.is_empty()) {
                    result.add_go_term(term, gene);
                }
            }
            if let Some(tissues) = fields.get(3) {
                for tissue in tissues.split(query::OR).map(str::trim).filter(|t| !t.is_empty()) {
                    result.add_expression(tissue, gene);
                }
            }
        }
        Ok(result)
    }
}

impl GeneResolver for GeneTable {
    fn resolve_gene(&self, gene: &str) -> Option<Vec<Region>> {
        self.regions.get(&Self::key(gene)).cloned()
    }

    fn go_genes(&self, term: &str) -> Vec<String> {
        self.go_terms.get(&Self::key(term)).map(|genes| genes.iter().cloned().collect()).unwrap_or_default()
    }

    fn expression_genes(&self, term: &str) -> Vec<String> {
        self.expression.get(&Self::key(term)).map(|genes| genes.iter().cloned().collect()).unwrap_or_default()
    }
}

//-----------------------------------------------------------------------------

/// Parameters for the query compiler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompilerParams {
    /// Name of the variant table.
    pub table: String,
    /// Storage layout for genotypes.
    pub genotype_layout: GenotypeLayout,
    /// The store can skip rows natively with `OFFSET`.
    pub native_skip: bool,
}

impl CompilerParams {
    /// Default name of the variant table.
    pub const TABLE: &'static str = "variants";

    /// Sets the name of the variant table.
    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    /// Sets the genotype layout.
    pub fn with_genotype_layout(mut self, genotype_layout: GenotypeLayout) -> Self {
        self.genotype_layout = genotype_layout;
        self
    }

    /// Sets whether the store supports `OFFSET`.
    pub fn with_native_skip(mut self, native_skip: bool) -> Self {
        self.native_skip = native_skip;
        self
    }
}

impl Default for CompilerParams {
    fn default() -> Self {
        CompilerParams {
            table: Self::TABLE.to_string(),
            genotype_layout: GenotypeLayout::default(),
            native_skip: true,
        }
    }
}

/// Column groups to include in the projection, in addition to the coordinates and the type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Projection {
    /// Study presence and fill-missing columns.
    pub studies: bool,
    /// Per-sample genotype columns.
    pub samples: bool,
    /// Serialized cohort statistics.
    pub stats: bool,
    /// Full annotation, annotation id, and release flags.
    pub annotation: bool,
}

impl Projection {
    /// Everything.
    pub const ALL: Projection = Projection { studies: true, samples: true, stats: true, annotation: true };

    /// Only the coordinates and the type.
    pub const COORDINATES: Projection = Projection { studies: false, samples: false, stats: false, annotation: false };
}

impl Default for Projection {
    fn default() -> Self {
        Self::ALL
    }
}

/// Sort order for the results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Ascending => write!(f, "ASC"),
            SortOrder::Descending => write!(f, "DESC"),
        }
    }
}

/// Options that shape the compiled statement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub projection: Projection,
    /// Sort by chromosome and position.
    pub sort: Option<SortOrder>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of results to skip.
    pub skip: Option<usize>,
    /// Count the results instead of returning them.
    pub count: bool,
    /// Additional planner hints.
    pub hints: Vec<String>,
}

impl QueryOptions {
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_sort(mut self, order: SortOrder) -> Self {
        self.sort = Some(order);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_count(mut self, count: bool) -> Self {
        self.count = count;
        self
    }

    pub fn with_hint(mut self, hint: &str) -> Self {
        self.hints.push(hint.to_string());
        self
    }
}

//-----------------------------------------------------------------------------

/// A compiled query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryPlan {
    /// Name of the variant table.
    pub table: String,
    /// Projected column names in order.
    pub projected_columns: Vec<String>,
    /// Inclusive predicates, combined with OR.
    pub inclusive: Vec<Predicate>,
    /// Exclusive predicates, combined with AND.
    pub exclusive: Vec<Predicate>,
    /// The full predicate.
    pub where_clause: String,
    pub order_by: Option<SortOrder>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Number of rows the caller must skip, if the store cannot skip them.
    pub client_skip: usize,
    pub index_hint: Option<IndexHint>,
    /// The statement counts the matching rows.
    pub count: bool,
}

impl QueryPlan {
    /// Returns `true` if the caller must skip rows from the results.
    pub fn needs_client_skip(&self) -> bool {
        self.client_skip > 0
    }

    /// Returns the names of the columns referenced by the predicates.
    pub fn referenced_columns(&self) -> BTreeSet<&str> {
        self.inclusive.iter().chain(self.exclusive.iter())
            .flat_map(|predicate| predicate.columns().iter().map(|c| c.as_str()))
            .collect()
    }

    /// Renders the plan as a SQL statement.
    pub fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT ");
        if let Some(hint) = self.index_hint.as_ref() {
            sql.push_str(&format!("{} ", hint));
        }
        if self.count {
            sql.push_str("COUNT(*)");
        } else {
            let projection: Vec<String> = self.projected_columns.iter().map(|c| columns::quote_identifier(c)).collect();
            sql.push_str(&projection.join(", "));
        }
        sql.push_str(&format!(" FROM {} WHERE {}", columns::quote_identifier(&self.table), self.where_clause));
        if let Some(order) = self.order_by {
            sql.push_str(&format!(" ORDER BY {}, {} {}", columns::CHROMOSOME.quoted(), columns::POSITION.quoted(), order));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }
}

impl Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

//-----------------------------------------------------------------------------

/// Builds the key of an annotation combination column such as `A_GENE_SO`.
///
/// # Examples
///
/// ```
/// use variant_store::compiler;
///
/// assert_eq!(compiler::combination(&["BRCA2", "1583"]), "BRCA2_1583");
/// ```
pub fn combination(parts: &[&str]) -> String {
    parts.join("_")
}

/// Compiles queries against a catalog snapshot.
///
/// The compiler is immutable and can be shared between threads.
#[derive(Clone)]
pub struct QueryCompiler {
    catalog: Arc<CatalogSnapshot>,
    resolver: Option<Arc<dyn GeneResolver>>,
    params: CompilerParams,
}

impl QueryCompiler {
    /// Creates a compiler without a gene resolver.
    ///
    /// Without a resolver, genes are matched against the gene annotation and gene set queries match nothing.
    pub fn new(catalog: Arc<CatalogSnapshot>, params: CompilerParams) -> Self {
        QueryCompiler { catalog, resolver: None, params }
    }

    /// Sets the gene resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn GeneResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn catalog(&self) -> &CatalogSnapshot {
        &self.catalog
    }

    pub fn params(&self) -> &CompilerParams {
        &self.params
    }

    /// Compiles the query.
    ///
    /// Unsupported filters are logged and ignored.
    /// Genes that cannot be resolved are logged; if no gene can be resolved, the plan matches nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedQueryParam`] for unknown parameters, invalid values, and unknown studies, samples, files, or cohorts.
    /// Returns [`Error::MalformedQueryParam`] for a hint that could escape the hint comment.
    /// Returns [`Error::TypeMismatch`] if an operator cannot be used with the column.
    pub fn compile(&self, query: &Query, options: &QueryOptions) -> Result<QueryPlan> {
        for hint in options.hints.iter() {
            index::check_hint(hint)?;
        }
        let mut values = BTreeMap::new();
        for (param, value) in query.params()? {
            values.insert(param, value.trim().to_string());
        }

        let mut state = Compilation::new(self, values);
        state.inclusive_filters()?;
        state.exclusive_filters()?;
        let projected_columns = state.projection(&options.projection)?;

        let inclusive = if state.inclusive.is_empty() { vec![Predicate::not_metadata()] } else { state.inclusive };
        let exclusive = state.exclusive;
        let mut parts = Vec::with_capacity(exclusive.len() + 1);
        if let Some(predicate) = Predicate::combine(inclusive.clone(), LogicOp::Or) {
            parts.push(predicate);
        }
        parts.extend(exclusive.iter().cloned());
        let where_clause = Predicate::combine(parts, LogicOp::And).map(|p| p.sql().to_string()).unwrap_or_default();

        let (order_by, limit, offset, client_skip) = if options.count {
            (None, None, None, 0)
        } else if self.params.native_skip {
            (options.sort, options.limit, options.skip.filter(|skip| *skip > 0), 0)
        } else {
            let skip = options.skip.unwrap_or(0);
            (options.sort, options.limit.map(|limit| limit.saturating_add(skip)), None, skip)
        };
        let index_hint = index::select_hint(exclusive.is_empty(), &options.hints);

        let plan = QueryPlan {
            table: self.params.table.clone(),
            projected_columns,
            inclusive,
            exclusive,
            where_clause,
            order_by,
            limit,
            offset,
            client_skip,
            index_hint,
            count: options.count,
        };
        debug!("Compiled {} into {}", query, plan);
        Ok(plan)
    }
}

//-----------------------------------------------------------------------------

// A study term: `study`, `!study`, or `study:!`.
fn parse_study_term(term: &str) -> (&str, bool) {
    if let Some(study) = term.strip_suffix(":!") {
        (study, true)
    } else if query::is_negated(term) {
        (query::remove_negation(term), true)
    } else {
        (term, false)
    }
}

// Genotypes of one sample in a GENOTYPE value.
#[derive(Clone, Debug, PartialEq, Eq)]
struct SampleGenotypes {
    study: Option<String>,
    sample: String,
    genotypes: Vec<String>,
    negated: bool,
}

// Parses `[study:]sample:gt[,gt]*` groups separated by `;` (AND) or `,` (OR).
fn parse_genotypes(value: &str) -> Result<(Vec<SampleGenotypes>, LogicOp)> {
    let param = QueryParam::Genotype.name();
    let mut tokens: Vec<(Option<char>, &str)> = Vec::new();
    let (mut previous, mut start) = (None, 0);
    for (i, c) in value.char_indices() {
        if c == query::AND || c == query::OR {
            tokens.push((previous, &value[start..i]));
            previous = Some(c);
            start = i + c.len_utf8();
        }
    }
    tokens.push((previous, &value[start..]));

    let mut groups: Vec<SampleGenotypes> = Vec::new();
    let mut op: Option<LogicOp> = None;
    for (separator, token) in tokens {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::malformed(param, value, "empty genotype term"));
        }
        match token.rsplit_once(':') {
            Some((sample, genotype)) => {
                if let Some(separator) = separator {
                    let this = if separator == query::AND { LogicOp::And } else { LogicOp::Or };
                    if op.is_some_and(|op| op != this) {
                        return Err(Error::malformed(param, value, "mixed AND (;) and OR (,) operators between samples"));
                    }
                    op = Some(this);
                }
                let (study, sample) = match sample.rsplit_once(':') {
                    Some((study, sample)) => (Some(study.to_string()), sample),
                    None => (None, sample),
                };
                if sample.is_empty() || genotype.is_empty() {
                    return Err(Error::malformed(param, value, "expected [study:]sample:genotype"));
                }
                groups.push(SampleGenotypes {
                    study,
                    sample: sample.to_string(),
                    genotypes: vec![genotype.to_string()],
                    negated: false,
                });
            },
            None => {
                if separator != Some(query::OR) {
                    return Err(Error::malformed(param, value, "genotypes of a sample must be separated by ','"));
                }
                match groups.last_mut() {
                    Some(group) => group.genotypes.push(token.to_string()),
                    None => return Err(Error::malformed(param, value, "expected [study:]sample:genotype")),
                }
            },
        }
    }

    for group in groups.iter_mut() {
        let negated = group.genotypes.iter().filter(|gt| query::is_negated(gt)).count();
        if negated > 0 && negated < group.genotypes.len() {
            return Err(Error::malformed(param, value, format!("cannot mix negated and non-negated genotypes for sample {}", group.sample)));
        }
        group.negated = negated > 0;
        for genotype in group.genotypes.iter_mut() {
            *genotype = query::remove_negation(genotype).to_string();
        }
    }
    Ok((groups, op.unwrap_or(LogicOp::And)))
}

// `( "c" IS NULL OR NOT 'v' = ANY("c") )`
fn not_member(column: &ColumnDescriptor, literal: &str) -> Predicate {
    let quoted = column.quoted();
    Predicate::new(format!("( {} IS NULL OR NOT {} = ANY({}) )", quoted, literal, quoted), [column.name.clone()])
}

fn member(column: &ColumnDescriptor, literal: &str) -> Predicate {
    Predicate::new(format!("{} = ANY({})", literal, column.quoted()), [column.name.clone()])
}

//-----------------------------------------------------------------------------

// State of a single compilation.
struct Compilation<'a> {
    compiler: &'a QueryCompiler,
    values: BTreeMap<QueryParam, String>,
    consumed: BTreeSet<QueryParam>,
    default_study: Option<String>,
    inclusive: Vec<Predicate>,
    exclusive: Vec<Predicate>,
}

impl<'a> Compilation<'a> {
    fn new(compiler: &'a QueryCompiler, values: BTreeMap<QueryParam, String>) -> Self {
        // The only registered study, or the only study listed in STUDY.
        let mut default_study = compiler.catalog.default_study().map(String::from);
        if default_study.is_none() {
            if let Some(Ok((terms, _))) = values.get(&QueryParam::Study).map(|v| query::split_values(QueryParam::Study.name(), v)) {
                let included: Vec<&str> = terms.iter().map(|t| parse_study_term(t)).filter(|(_, negated)| !negated).map(|(s, _)| s).collect();
                if included.len() == 1 {
                    default_study = Some(included[0].to_string());
                }
            }
        }
        Compilation {
            compiler,
            values,
            consumed: BTreeSet::new(),
            default_study,
            inclusive: Vec::new(),
            exclusive: Vec::new(),
        }
    }

    fn catalog(&self) -> &CatalogSnapshot {
        &self.compiler.catalog
    }

    fn value(&self, param: QueryParam) -> Option<&str> {
        if self.consumed.contains(&param) {
            None
        } else {
            self.values.get(&param).map(|v| v.as_str())
        }
    }

    //-------------------------------------------------------------------------

    // Entity resolution.

    fn resolve_study(&self, param: QueryParam, study: Option<&str>, value: &str) -> Result<String> {
        let study = match study {
            Some(study) => study.trim().to_string(),
            None => self.default_study.clone().ok_or_else(|| Error::malformed(param.name(), value, "the study must be specified"))?,
        };
        if self.catalog().study(&study).is_none() {
            return Err(Error::malformed(param.name(), value, format!("unknown study {}", study)));
        }
        Ok(study)
    }

    fn resolve_cohort(&self, param: QueryParam, term: &str) -> Result<(String, String)> {
        let (study, cohort) = query::split_study_resource(term);
        let study = self.resolve_study(param, study, term)?;
        let known = self.catalog().study(&study).map(|entry| entry.cohorts.contains(cohort)).unwrap_or(false);
        if !known {
            return Err(Error::malformed(param.name(), term, format!("unknown cohort {} in study {}", cohort, study)));
        }
        Ok((study, cohort.to_string()))
    }

    // Finds the study of a sample or a file. Without an explicit or a default study, the name must be unique.
    fn resolve_member<F>(&self, param: QueryParam, study: Option<&str>, name: &str, value: &str, is_member: F) -> Result<String>
        where F: Fn(&columns::StudyEntry, &str) -> bool
    {
        if study.is_some() || self.default_study.is_some() {
            let study = self.resolve_study(param, study, value)?;
            let known = self.catalog().study(&study).map(|entry| is_member(entry, name)).unwrap_or(false);
            if !known {
                return Err(Error::malformed(param.name(), value, format!("unknown {} in study {}", name, study)));
            }
            return Ok(study);
        }
        let candidates: Vec<&str> = self.catalog().studies()
            .filter(|study| self.catalog().study(study).map(|entry| is_member(entry, name)).unwrap_or(false))
            .collect();
        match candidates.len() {
            1 => Ok(candidates[0].to_string()),
            0 => Err(Error::malformed(param.name(), value, format!("unknown {}", name))),
            _ => Err(Error::malformed(param.name(), value, format!("{} is ambiguous, specify the study", name))),
        }
    }

    fn resolve_sample(&self, param: QueryParam, study: Option<&str>, sample: &str, value: &str) -> Result<String> {
        self.resolve_member(param, study, sample, value, |entry, name| entry.samples.contains(name))
    }

    fn resolve_file(&self, param: QueryParam, study: Option<&str>, file: &str, value: &str) -> Result<String> {
        self.resolve_member(param, study, file, value, |entry, name| entry.files.contains(name))
    }

    //-------------------------------------------------------------------------

    // Inclusive filters.

    fn inclusive_filters(&mut self) -> Result<()> {
        if let Some(value) = self.value(QueryParam::Region).map(String::from) {
            let (terms, _) = query::split_values(QueryParam::Region.name(), &value)?;
            for term in terms.iter() {
                let region = term.parse::<Region>()?;
                self.inclusive.push(region_predicate(QueryParam::Region, &region)?);
            }
        }
        if let Some(value) = self.value(QueryParam::Chromosome).map(String::from) {
            let (terms, _) = query::split_values(QueryParam::Chromosome.name(), &value)?;
            for term in terms.iter() {
                self.inclusive.push(region_predicate(QueryParam::Chromosome, &Region::chromosome(term))?);
            }
        }
        for param in [QueryParam::Id, QueryParam::Xref] {
            if let Some(value) = self.value(param).map(String::from) {
                self.identifier_filters(param, &value)?;
            }
        }
        if let Some(value) = self.value(QueryParam::AnnotHpo).map(String::from) {
            let (terms, _) = query::split_values(QueryParam::AnnotHpo.name(), &value)?;
            if let Some(predicate) = filter::membership(QueryParam::AnnotHpo.name(), &columns::XREFS.descriptor(), &terms, LogicOp::Or)? {
                self.inclusive.push(predicate);
            }
        }
        if let Some(value) = self.value(QueryParam::Gene).map(String::from) {
            self.gene_filters(&value)?;
        }
        Ok(())
    }

    // Variant identifiers become one tuple predicate; other identifiers are matched against cross-references.
    fn identifier_filters(&mut self, param: QueryParam, value: &str) -> Result<()> {
        let (terms, _) = query::split_values(param.name(), value)?;
        let mut variants = Vec::new();
        let mut xrefs = Vec::new();
        for term in terms {
            if crate::row_key::is_variant_id(&term) {
                variants.push(term.parse::<VariantKey>()?);
            } else {
                xrefs.push(term);
            }
        }
        if !variants.is_empty() {
            self.inclusive.push(variant_predicate(param, &variants)?);
        }
        for xref in xrefs.iter() {
            self.inclusive.push(filter::build_filter(param.name(), &columns::XREFS.descriptor(), None, Operator::EQ, xref)?);
        }
        Ok(())
    }

    fn gene_filters(&mut self, value: &str) -> Result<()> {
        let param = QueryParam::Gene;
        let (genes, _) = query::split_values(param.name(), value)?;
        let only_genes = self.inclusive.is_empty();

        let mut resolved = Vec::new();
        for gene in genes.iter() {
            match self.compiler.resolver.as_ref() {
                Some(resolver) => match resolver.resolve_gene(gene) {
                    Some(regions) if !regions.is_empty() => {
                        for region in regions.iter() {
                            resolved.push(region_predicate(param, region)?);
                        }
                    },
                    _ => warn!("{}", Error::GeneResolutionFailure { value: gene.clone() }),
                },
                None => resolved.push(filter::build_filter(param.name(), &columns::GENES.descriptor(), None, Operator::EQ, gene)?),
            }
        }
        let regions = match Predicate::combine(resolved, LogicOp::Or) {
            Some(predicate) => predicate,
            None => {
                warn!("No gene in {} could be resolved", value);
                self.inclusive.push(Predicate::void());
                return Ok(());
            },
        };

        let combined = self.gene_combinations(&genes)?;
        match Predicate::combine(combined, LogicOp::Or) {
            Some(combinations) => {
                let predicate = Predicate::combine(vec![regions, combinations], LogicOp::And);
                self.inclusive.extend(predicate);
                if only_genes {
                    self.consumed.insert(QueryParam::ConsequenceType);
                    self.consumed.insert(QueryParam::Biotype);
                }
            },
            None => self.inclusive.push(regions),
        }
        Ok(())
    }

    // Gene/consequence type, gene/biotype, and gene/biotype/consequence type combinations.
    fn gene_combinations(&self, genes: &[String]) -> Result<Vec<Predicate>> {
        let consequence_types = match self.value(QueryParam::ConsequenceType) {
            Some(value) => self.combinable_consequence_types(value)?,
            None => None,
        };
        let biotypes = match self.value(QueryParam::Biotype) {
            Some(value) => combinable_terms(QueryParam::Biotype, value)?,
            None => None,
        };
        let consequence_types: Option<Vec<String>> = consequence_types.map(|so| so.iter().map(|s| s.to_string()).collect());
        let (column, suffixes): (FixedColumn, Vec<String>) = match (consequence_types, biotypes) {
            (Some(so), None) => (columns::GENE_SO, so),
            (None, Some(biotypes)) => (columns::GENE_BIOTYPE, biotypes),
            (Some(so), Some(biotypes)) => {
                let mut suffixes = Vec::new();
                for biotype in biotypes.iter() {
                    for s in so.iter() {
                        suffixes.push(combination(&[biotype.as_str(), s.as_str()]));
                    }
                }
                (columns::GENE_BIOTYPE_SO, suffixes)
            },
            (None, None) => return Ok(Vec::new()),
        };
        let mut keys = BTreeSet::new();
        for gene in genes.iter() {
            for suffix in suffixes.iter() {
                keys.insert(combination(&[gene.as_str(), suffix.as_str()]));
            }
        }
        let column = column.descriptor();
        let mut result = Vec::with_capacity(keys.len());
        for key in keys.iter() {
            result.push(filter::build_filter(QueryParam::Gene.name(), &column, None, Operator::EQ, key)?);
        }
        Ok(result)
    }

    // Consequence types that can be combined with other annotations: OR of non-negated terms.
    fn combinable_consequence_types(&self, value: &str) -> Result<Option<Vec<u32>>> {
        let param = QueryParam::ConsequenceType;
        match combinable_terms(param, value)? {
            Some(terms) => {
                let mut result = BTreeSet::new();
                for term in terms.iter() {
                    result.extend(consequence::expand(param.name(), term)?);
                }
                Ok(Some(result.into_iter().collect()))
            },
            None => Ok(None),
        }
    }

    //-------------------------------------------------------------------------

    // Exclusive filters.

    fn exclusive_filters(&mut self) -> Result<()> {
        let params: Vec<QueryParam> = self.values.keys().copied().filter(|p| p.group() == ParamGroup::Exclusive).collect();
        for param in params {
            let value = match self.value(param) {
                Some(value) => value.to_string(),
                None => continue,
            };
            match self.exclusive_filter(param, &value) {
                Ok(Some(predicate)) => self.exclusive.push(predicate),
                Ok(None) => {},
                Err(err @ Error::UnsupportedFilter { .. }) => warn!("Ignoring {}={}: {}", param, value, err),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn exclusive_filter(&mut self, param: QueryParam, value: &str) -> Result<Option<Predicate>> {
        match param {
            QueryParam::Reference => self.simple_filter(param, &columns::REFERENCE.descriptor(), value),
            QueryParam::Alternate => self.simple_filter(param, &columns::ALTERNATE.descriptor(), value),
            QueryParam::Type => self.type_filter(value),
            QueryParam::Study => self.study_filter(value),
            QueryParam::Cohort => self.cohort_filter(value),
            QueryParam::Genotype => self.genotype_filter(value),
            QueryParam::File => self.file_filter(value),
            QueryParam::Qual => self.qual_filter(value),
            QueryParam::Filter => self.vcf_filter_filter(value),
            QueryParam::Score => self.score_filter(value),
            QueryParam::Release => self.release_filter(value),
            QueryParam::StatsRef | QueryParam::StatsAlt | QueryParam::StatsMaf | QueryParam::StatsMgf | QueryParam::StatsPassFreq => {
                self.stats_filter(param, value)
            },
            QueryParam::MissingAlleles | QueryParam::MissingGenotypes => {
                Err(Error::UnsupportedFilter { param: param.name().to_string() })
            },
            QueryParam::AnnotationExists => {
                let exists = utils::sql_boolean(param.name(), value)? == "true";
                Ok(Some(filter::is_null(&columns::FULL_ANNOTATION.descriptor(), !exists)))
            },
            QueryParam::ConsequenceType => self.consequence_type_filter(value),
            QueryParam::Biotype => annotation_membership(param, columns::BIOTYPE, value),
            QueryParam::TranscriptFlag => annotation_membership(param, columns::TRANSCRIPT_FLAGS, value),
            QueryParam::Sift | QueryParam::Polyphen | QueryParam::ProteinSubstitution => self.protein_substitution_filter(param, value),
            QueryParam::Conservation => source_score_filter(param, value, columns::conservation_column),
            QueryParam::FunctionalScore => source_score_filter(param, value, columns::functional_score_column),
            QueryParam::PopAltFreq | QueryParam::PopRefFreq => self.population_frequency_filter(param, value),
            QueryParam::PopMaf => self.population_maf_filter(value),
            QueryParam::GeneTraitId => annotation_membership(param, columns::XREFS, value),
            QueryParam::GeneTraitName => annotation_membership(param, columns::GENE_TRAITS_NAME, value),
            QueryParam::Go | QueryParam::Expression => self.gene_set_filter(param, value),
            QueryParam::ProteinKeyword => annotation_membership(param, columns::PROTEIN_KEYWORDS, value),
            QueryParam::Drug => annotation_membership(param, columns::DRUG, value),
            QueryParam::ClinicalSignificance => annotation_membership(param, columns::CLINICAL_SIGNIFICANCE, value),
            _ => Ok(None),
        }
    }

    // Terms `[op]value` on a single column.
    fn simple_filter(&self, param: QueryParam, column: &ColumnDescriptor, value: &str) -> Result<Option<Predicate>> {
        let (terms, op) = query::split_values(param.name(), value)?;
        let mut predicates = Vec::with_capacity(terms.len());
        for term in terms.iter() {
            let parsed = query::parse_term(term);
            if parsed.key.is_some() {
                return Err(Error::malformed(param.name(), term.as_str(), "unexpected key"));
            }
            predicates.push(filter::build_filter(param.name(), column, None, parsed.operator, &parsed.value)?);
        }
        Ok(Predicate::combine(predicates, op))
    }

    fn type_filter(&self, value: &str) -> Result<Option<Predicate>> {
        let (terms, op) = query::split_values(QueryParam::Type.name(), value)?;
        let column = columns::TYPE;
        let mut predicates = Vec::with_capacity(terms.len());
        for term in terms.iter() {
            let variant_type = query::remove_negation(term).parse::<VariantType>()?;
            let names: Vec<String> = variant_type.with_subtypes().iter().map(|t| format!("'{}'", t)).collect();
            let sql = if names.len() == 1 {
                format!("{} = {}", column.quoted(), names[0])
            } else {
                format!("{} IN ({})", column.quoted(), names.join(", "))
            };
            let predicate = Predicate::new(sql, [column.name]);
            predicates.push(if query::is_negated(term) { predicate.negate() } else { predicate });
        }
        Ok(Predicate::combine(predicates, op))
    }

    fn study_filter(&self, value: &str) -> Result<Option<Predicate>> {
        let param = QueryParam::Study;
        let (terms, op) = query::split_values(param.name(), value)?;
        let mut included = BTreeSet::new();
        let mut predicates = Vec::with_capacity(terms.len());
        for term in terms.iter() {
            let (study, negated) = parse_study_term(term);
            let study = self.resolve_study(param, Some(study), value)?;
            predicates.push(filter::is_null(&columns::column_for_study_presence(&study), negated));
            if !negated {
                included.insert(study);
            }
        }

        let all: BTreeSet<&str> = self.catalog().studies().collect();
        let included: BTreeSet<&str> = included.iter().map(|s| s.as_str()).collect();
        if included == all && (op == LogicOp::Or || all.len() == 1) {
            debug!("Dropping redundant study filter {}", value);
            return Ok(None);
        }
        Ok(Predicate::combine(predicates, op))
    }

    fn cohort_filter(&self, value: &str) -> Result<Option<Predicate>> {
        let param = QueryParam::Cohort;
        let (terms, op) = query::split_values(param.name(), value)?;
        let mut predicates = Vec::with_capacity(terms.len());
        for term in terms.iter() {
            let (study, cohort) = self.resolve_cohort(param, query::remove_negation(term))?;
            let column = columns::column_for_cohort_stats(&study, &cohort);
            predicates.push(filter::is_null(&column, query::is_negated(term)));
        }
        Ok(Predicate::combine(predicates, op))
    }

    fn genotype_filter(&self, value: &str) -> Result<Option<Predicate>> {
        let param = QueryParam::Genotype;
        let (groups, op) = parse_genotypes(value)?;
        let mut samples = Vec::with_capacity(groups.len());
        for group in groups.iter() {
            let study = self.resolve_sample(param, group.study.as_deref(), &group.sample, value)?;
            let mut predicates = Vec::with_capacity(group.genotypes.len());
            for genotype in group.genotypes.iter() {
                let predicate = match self.compiler.params.genotype_layout {
                    GenotypeLayout::PerSample => sample_genotype(&study, &group.sample, genotype, group.negated)?,
                    GenotypeLayout::PerCategory => category_genotype(&study, &group.sample, genotype, group.negated)?,
                };
                predicates.push(predicate);
            }
            let sample_op = if group.negated { LogicOp::And } else { LogicOp::Or };
            samples.extend(Predicate::combine(predicates, sample_op));
        }
        Ok(Predicate::combine(samples, op))
    }

    // Non-negated and negated files of the FILE parameter.
    fn files(&self, value: &str) -> Result<(Vec<(ColumnDescriptor, bool)>, LogicOp)> {
        let param = QueryParam::File;
        let (terms, op) = query::split_values(param.name(), value)?;
        let mut result = Vec::with_capacity(terms.len());
        for term in terms.iter() {
            let negated = query::is_negated(term);
            let (study, file) = query::split_study_resource(query::remove_negation(term));
            let study = self.resolve_file(param, study, file, value)?;
            result.push((columns::column_for_file(&study, file), negated));
        }
        Ok((result, op))
    }

    fn file_filter(&self, value: &str) -> Result<Option<Predicate>> {
        let (files, op) = self.files(value)?;
        let mut predicates = Vec::with_capacity(files.len());
        for (column, negated) in files.iter() {
            let quoted = column.quoted();
            let sql = if *negated {
                format!("( {} IS NULL OR {}[{}] != '{}' )", quoted, quoted, columns::FILE_OVERLAP_STATUS, columns::NO_OVERLAP)
            } else {
                format!("{}[{}] = '{}'", quoted, columns::FILE_OVERLAP_STATUS, columns::NO_OVERLAP)
            };
            predicates.push(Predicate::new(sql, [column.name.clone()]));
        }
        Ok(Predicate::combine(predicates, op))
    }

    // Applies a per-file filter to each listed file.
    fn per_file_filter<F>(&self, param: QueryParam, value: &str, render: F) -> Result<Option<Predicate>>
        where F: Fn(&ColumnDescriptor, &str) -> Result<Predicate>
    {
        let files = self.value(QueryParam::File)
            .ok_or_else(|| Error::malformed(param.name(), value, "requires FILE"))?;
        let (files, file_op) = self.files(files)?;
        let files: Vec<&ColumnDescriptor> = files.iter().filter(|(_, negated)| !negated).map(|(column, _)| column).collect();
        if files.is_empty() {
            return Err(Error::malformed(param.name(), value, "requires a non-negated FILE"));
        }
        let (terms, op) = query::split_values(param.name(), value)?;
        let mut predicates = Vec::with_capacity(files.len());
        for column in files {
            let mut per_file = Vec::with_capacity(terms.len());
            for term in terms.iter() {
                per_file.push(render(column, term)?);
            }
            predicates.extend(Predicate::combine(per_file, op));
        }
        Ok(Predicate::combine(predicates, file_op))
    }

    fn qual_filter(&self, value: &str) -> Result<Option<Predicate>> {
        let param = QueryParam::Qual;
        self.per_file_filter(param, value, |column, term| {
            let parsed = query::parse_term(term);
            if parsed.key.is_some() || parsed.operator.comparison.is_like() {
                return Err(Error::malformed(param.name(), term, "expected a numeric comparison"));
            }
            let number = utils::sql_number(param.name(), &parsed.value)?;
            let sql = format!("TO_NUMBER({}[{}]) {} {}", column.quoted(), columns::FILE_QUAL, parsed.operator.comparison.sql(), number);
            let predicate = Predicate::new(sql, [column.name.clone()]);
            Ok(if parsed.operator.negated { predicate.negate() } else { predicate })
        })
    }

    fn vcf_filter_filter(&self, value: &str) -> Result<Option<Predicate>> {
        let param = QueryParam::Filter;
        self.per_file_filter(param, value, |column, term| {
            let negated = query::is_negated(term);
            let name = query::remove_negation(term);
            let (comparison, pattern) = if name == "PASS" {
                (query::Comparison::Eq, name.to_string())
            } else {
                (query::Comparison::Like, format!("%{}%", name))
            };
            let operator = Operator { negated, ..Operator::new(comparison) };
            filter::build_filter(param.name(), column, Some(columns::FILE_FILTER), operator, &pattern)
        })
    }

    fn score_filter(&self, value: &str) -> Result<Option<Predicate>> {
        let param = QueryParam::Score;
        let (terms, op) = query::split_values(param.name(), value)?;
        let mut predicates = Vec::with_capacity(terms.len());
        for term in terms.iter() {
            let parsed = query::parse_term(term);
            let key = parsed.key.as_deref().ok_or_else(|| Error::malformed(param.name(), term.as_str(), "expected [study:]score op value"))?;
            let (study, score) = query::split_study_resource(key);
            let study = self.resolve_study(param, study, term)?;
            let column = columns::column_for_variant_score(&study, score);
            if !self.catalog().contains(&column.name) {
                return Err(Error::malformed(param.name(), term.as_str(), format!("unknown score {} in study {}", score, study)));
            }
            predicates.push(filter::build_filter(param.name(), &column, Some(1), parsed.operator, &parsed.value)?);
        }
        Ok(Predicate::combine(predicates, op))
    }

    fn release_filter(&self, value: &str) -> Result<Option<Predicate>> {
        let param = QueryParam::Release;
        let release = value.trim().parse::<u32>().map_err(|x| Error::malformed(param.name(), value, x.to_string()))?;
        if release == 0 {
            return Err(Error::malformed(param.name(), value, "releases start from 1"));
        }
        if release > self.catalog().release() {
            return Err(Error::malformed(param.name(), value, format!("the latest release is {}", self.catalog().release())));
        }
        let predicates: Vec<Predicate> = (1..=release).map(|r| {
            let column = columns::column_for_release(r);
            Predicate::new(format!("{} = true", column.quoted()), [column.name])
        }).collect();
        Ok(Predicate::combine(predicates, LogicOp::Or))
    }

    fn stats_filter(&self, param: QueryParam, value: &str) -> Result<Option<Predicate>> {
        let (terms, op) = query::split_values(param.name(), value)?;
        let mut predicates = Vec::with_capacity(terms.len());
        for term in terms.iter() {
            let parsed = query::parse_term(term);
            let key = parsed.key.as_deref().ok_or_else(|| Error::malformed(param.name(), term.as_str(), "expected [study:]cohort op value"))?;
            let (study, cohort) = self.resolve_cohort(param, key)?;
            let comparison = parsed.operator.comparison;
            let (column, element, or_null) = match param {
                QueryParam::StatsMaf => (columns::column_for_cohort_maf(&study, &cohort), None, comparison.is_less()),
                QueryParam::StatsMgf => (columns::column_for_cohort_mgf(&study, &cohort), None, comparison.is_less()),
                QueryParam::StatsAlt => (columns::column_for_cohort_freq(&study, &cohort), Some(2), comparison.is_less()),
                QueryParam::StatsRef => (columns::column_for_cohort_freq(&study, &cohort), Some(1), comparison.is_greater()),
                _ => (columns::column_for_cohort_pass_freq(&study, &cohort), None, false),
            };
            let mut operator = parsed.operator;
            operator.or_null |= or_null && !operator.negated;
            predicates.push(filter::build_filter(param.name(), &column, element, operator, &parsed.value)?);
        }
        Ok(Predicate::combine(predicates, op))
    }

    fn consequence_type_filter(&mut self, value: &str) -> Result<Option<Predicate>> {
        let param = QueryParam::ConsequenceType;
        if let Some(biotypes) = self.value(QueryParam::Biotype).map(String::from) {
            let consequence_types = self.combinable_consequence_types(value)?;
            let biotypes = combinable_terms(QueryParam::Biotype, &biotypes)?;
            if let (Some(consequence_types), Some(biotypes)) = (consequence_types, biotypes) {
                let column = columns::BIOTYPE_SO.descriptor();
                let mut predicates = Vec::new();
                for biotype in biotypes.iter() {
                    for so in consequence_types.iter() {
                        let so = so.to_string();
                        let key = combination(&[biotype.as_str(), so.as_str()]);
                        predicates.push(filter::build_filter(param.name(), &column, None, Operator::EQ, &key)?);
                    }
                }
                self.consumed.insert(QueryParam::Biotype);
                return Ok(Predicate::combine(predicates, LogicOp::Or));
            }
        }

        let (terms, op) = query::split_values(param.name(), value)?;
        let column = columns::SO.descriptor();
        let mut predicates = Vec::with_capacity(terms.len());
        for term in terms.iter() {
            let mut expanded = Vec::new();
            for so in consequence::expand(param.name(), query::remove_negation(term))? {
                expanded.push(filter::build_filter(param.name(), &column, None, Operator::EQ, &so.to_string())?);
            }
            if let Some(predicate) = Predicate::combine(expanded, LogicOp::Or) {
                predicates.push(if query::is_negated(term) { predicate.negate() } else { predicate });
            }
        }
        Ok(Predicate::combine(predicates, op))
    }

    fn protein_substitution_filter(&self, param: QueryParam, value: &str) -> Result<Option<Predicate>> {
        let (terms, op) = query::split_values(param.name(), value)?;
        let mut predicates = Vec::with_capacity(terms.len());
        for term in terms.iter() {
            let parsed = query::parse_term(term);
            let source = match (param, parsed.key.as_deref()) {
                (QueryParam::Sift, None) => "sift".to_string(),
                (QueryParam::Polyphen, None) => "polyphen".to_string(),
                (QueryParam::ProteinSubstitution, Some(key)) => key.to_ascii_lowercase(),
                _ => return Err(Error::malformed(param.name(), term.as_str(), "unexpected or missing key")),
            };
            let (score, description) = match source.as_str() {
                "sift" => (columns::SIFT, columns::SIFT_DESC),
                "polyphen" => (columns::POLYPHEN, columns::POLYPHEN_DESC),
                _ => return Err(Error::malformed(param.name(), term.as_str(), format!("unknown protein substitution score {}", source))),
            };
            let predicate = if parsed.value.parse::<f64>().is_ok() {
                // Range queries use the extreme value: maximum for greater than, minimum for less than.
                let comparison = parsed.operator.comparison;
                let element = if comparison.is_greater() { Some(2) } else if comparison.is_less() { Some(1) } else { None };
                filter::build_filter(param.name(), &score.descriptor(), element, parsed.operator, &parsed.value)?
            } else {
                filter::build_filter(param.name(), &description.descriptor(), None, parsed.operator, &parsed.value)?
            };
            predicates.push(predicate);
        }
        Ok(Predicate::combine(predicates, op))
    }

    fn population_frequency_column(&self, param: QueryParam, key: Option<&str>, term: &str) -> Result<ColumnDescriptor> {
        let column = key.and_then(columns::population_frequency_column)
            .ok_or_else(|| Error::malformed(param.name(), term, "expected source:population op value"))?;
        if !self.catalog().contains(&column.name) {
            return Err(Error::malformed(param.name(), term, format!("unknown population frequency column {}", column.name)));
        }
        Ok(column)
    }

    fn population_frequency_filter(&self, param: QueryParam, value: &str) -> Result<Option<Predicate>> {
        let (terms, op) = query::split_values(param.name(), value)?;
        let mut predicates = Vec::with_capacity(terms.len());
        for term in terms.iter() {
            let parsed = query::parse_term(term);
            let column = self.population_frequency_column(param, parsed.key.as_deref(), term)?;
            let comparison = parsed.operator.comparison;
            let (element, or_null) = if param == QueryParam::PopAltFreq {
                (2, comparison.is_less())
            } else {
                (1, comparison.is_greater())
            };
            let mut operator = parsed.operator;
            operator.or_null |= or_null && !operator.negated;
            predicates.push(filter::build_filter(param.name(), &column, Some(element), operator, &parsed.value)?);
        }
        Ok(Predicate::combine(predicates, op))
    }

    // The minor allele frequency is the smaller of the reference and alternate frequencies.
    fn population_maf_filter(&self, value: &str) -> Result<Option<Predicate>> {
        let param = QueryParam::PopMaf;
        let (terms, op) = query::split_values(param.name(), value)?;
        let mut predicates = Vec::with_capacity(terms.len());
        for term in terms.iter() {
            let parsed = query::parse_term(term);
            let column = self.population_frequency_column(param, parsed.key.as_deref(), term)?;
            let comparison = parsed.operator.comparison;
            let number = utils::sql_number(param.name(), &parsed.value)?;
            let c = column.quoted();
            let sql = if parsed.operator.negated {
                return Err(Error::malformed(param.name(), term.as_str(), "expected < or >"));
            } else if comparison.is_less() {
                format!("( {c}[1] {op} {v} OR {c}[2] {op} {v} OR {c}[2] IS NULL )", c = c, op = comparison.sql(), v = number)
            } else if comparison.is_greater() {
                format!("( {c}[1] {op} {v} AND {c}[2] {op} {v} )", c = c, op = comparison.sql(), v = number)
            } else {
                return Err(Error::malformed(param.name(), term.as_str(), "expected < or >"));
            };
            predicates.push(Predicate::new(sql, [column.name.clone()]));
        }
        Ok(Predicate::combine(predicates, op))
    }

    fn gene_set_filter(&self, param: QueryParam, value: &str) -> Result<Option<Predicate>> {
        if query::check_operator(param.name(), value)? == Some(LogicOp::And) {
            return Err(Error::malformed(param.name(), value, "only OR (,) is supported"));
        }
        let (terms, _) = query::split_values(param.name(), value)?;
        let mut genes = BTreeSet::new();
        if let Some(resolver) = self.compiler.resolver.as_ref() {
            for term in terms.iter() {
                let found = if param == QueryParam::Go { resolver.go_genes(term) } else { resolver.expression_genes(term) };
                genes.extend(found);
            }
        }
        if genes.is_empty() {
            warn!("No genes found for {}={}", param, value);
            return Ok(Some(Predicate::void()));
        }
        let genes: Vec<String> = genes.into_iter().collect();
        filter::membership(param.name(), &columns::GENES.descriptor(), &genes, LogicOp::Or)
    }

    //-------------------------------------------------------------------------

    // Projection.

    fn included_studies(&self) -> Result<Vec<String>> {
        let all: Vec<String> = self.catalog().studies().map(String::from).collect();
        if let Some(value) = self.values.get(&QueryParam::IncludeStudy) {
            let param = QueryParam::IncludeStudy;
            match value.to_ascii_lowercase().as_str() {
                "all" => return Ok(all),
                "none" => return Ok(Vec::new()),
                _ => {},
            }
            let (terms, _) = query::split_values(param.name(), value)?;
            let mut included = BTreeSet::new();
            let mut excluded = BTreeSet::new();
            for term in terms.iter() {
                let study = self.resolve_study(param, Some(query::remove_negation(term)), value)?;
                if query::is_negated(term) { excluded.insert(study); } else { included.insert(study); }
            }
            if included.is_empty() {
                return Ok(all.into_iter().filter(|s| !excluded.contains(s)).collect());
            }
            return Ok(included.into_iter().collect());
        }
        if let Some(value) = self.values.get(&QueryParam::Study) {
            let (terms, _) = query::split_values(QueryParam::Study.name(), value)?;
            let included: BTreeSet<String> = terms.iter()
                .map(|t| parse_study_term(t))
                .filter(|(_, negated)| !negated)
                .map(|(study, _)| study.to_string())
                .collect();
            if !included.is_empty() {
                return Ok(included.into_iter().collect());
            }
        }
        Ok(all)
    }

    fn included_samples(&self, studies: &[String]) -> Result<Vec<(String, String)>> {
        if let Some(value) = self.values.get(&QueryParam::IncludeSample) {
            let param = QueryParam::IncludeSample;
            match value.to_ascii_lowercase().as_str() {
                "all" => {},
                "none" => return Ok(Vec::new()),
                _ => {
                    let (terms, _) = query::split_values(param.name(), value)?;
                    let mut result = Vec::with_capacity(terms.len());
                    for term in terms.iter() {
                        let (study, sample) = query::split_study_resource(term);
                        let study = self.resolve_sample(param, study, sample, value)?;
                        if studies.contains(&study) {
                            result.push((study, sample.to_string()));
                        }
                    }
                    return Ok(result);
                },
            }
        }
        let mut result = Vec::new();
        for study in studies.iter() {
            if let Some(entry) = self.catalog().study(study) {
                result.extend(entry.samples.iter().map(|sample| (study.clone(), sample.clone())));
            }
        }
        Ok(result)
    }

    fn projection(&self, projection: &Projection) -> Result<Vec<String>> {
        let mut result: Vec<String> = [columns::CHROMOSOME, columns::POSITION, columns::REFERENCE, columns::ALTERNATE, columns::TYPE]
            .iter().map(|c| c.name.to_string()).collect();
        let push = |column: ColumnDescriptor, result: &mut Vec<String>| {
            if self.catalog().contains(&column.name) && !result.contains(&column.name) {
                result.push(column.name);
            }
        };

        let needs_studies = projection.studies || projection.stats || projection.samples;
        let studies = if needs_studies { self.included_studies()? } else { Vec::new() };
        if projection.studies {
            for study in studies.iter() {
                push(columns::column_for_study_presence(study), &mut result);
                push(columns::column_for_fill_missing(study), &mut result);
            }
        }
        if projection.stats {
            for study in studies.iter() {
                if let Some(entry) = self.catalog().study(study) {
                    for cohort in entry.cohorts.iter() {
                        push(columns::column_for_cohort_stats(study, cohort), &mut result);
                    }
                }
            }
        }
        if projection.samples {
            match self.compiler.params.genotype_layout {
                GenotypeLayout::PerSample => {
                    for (study, sample) in self.included_samples(&studies)? {
                        push(columns::column_for_sample(&study, &sample), &mut result);
                    }
                },
                GenotypeLayout::PerCategory => {
                    for study in studies.iter() {
                        for category in GenotypeCategory::ALL {
                            push(columns::column_for_genotype_category(study, category), &mut result);
                        }
                    }
                },
            }
        }
        if projection.annotation {
            push(columns::FULL_ANNOTATION.descriptor(), &mut result);
            push(columns::ANNOTATION_ID.descriptor(), &mut result);
            for release in 1..=self.catalog().release() {
                push(columns::column_for_release(release), &mut result);
            }
        }
        Ok(result)
    }
}

//-----------------------------------------------------------------------------

// Helpers that do not depend on the compilation state.

fn region_predicate(param: QueryParam, region: &Region) -> Result<Predicate> {
    let chromosome = utils::sql_string(param.name(), &region.chromosome)?;
    let mut sql = format!("{} = {}", columns::CHROMOSOME.quoted(), chromosome);
    let mut referenced = vec![columns::CHROMOSOME.name];
    if region.start > 1 {
        sql.push_str(&format!(" AND {} >= {}", columns::POSITION.quoted(), region.start));
    }
    if let Some(end) = region.end {
        sql.push_str(&format!(" AND {} <= {}", columns::POSITION.quoted(), end));
    }
    if region.start > 1 || region.end.is_some() {
        referenced.push(columns::POSITION.name);
    }
    Ok(Predicate::new(sql, referenced))
}

fn variant_predicate(param: QueryParam, variants: &[VariantKey]) -> Result<Predicate> {
    let mut tuples = Vec::with_capacity(variants.len());
    for variant in variants.iter() {
        tuples.push(format!(
            "({}, {}, {}, {})",
            utils::sql_string(param.name(), &variant.chromosome)?,
            variant.position,
            utils::sql_string(param.name(), &variant.reference)?,
            utils::sql_string(param.name(), &variant.alternate)?
        ));
    }
    let key: Vec<String> = columns::PRIMARY_KEY.iter().map(|c| c.quoted()).collect();
    let sql = format!("({}) IN ({})", key.join(", "), tuples.join(", "));
    Ok(Predicate::new(sql, columns::PRIMARY_KEY.iter().map(|c| c.name)))
}

fn annotation_membership(param: QueryParam, column: FixedColumn, value: &str) -> Result<Option<Predicate>> {
    let (terms, op) = query::split_values(param.name(), value)?;
    filter::membership(param.name(), &column.descriptor(), &terms, op)
}

// Terms that can be used in annotation combinations: no negation and no AND.
fn combinable_terms(param: QueryParam, value: &str) -> Result<Option<Vec<String>>> {
    let (terms, op) = query::split_values(param.name(), value)?;
    if (op == LogicOp::And && terms.len() > 1) || terms.iter().any(|t| query::is_negated(t)) {
        return Ok(None);
    }
    Ok(Some(terms))
}

fn source_score_filter(param: QueryParam, value: &str, lookup: fn(&str) -> Option<FixedColumn>) -> Result<Option<Predicate>> {
    let (terms, op) = query::split_values(param.name(), value)?;
    let mut predicates = Vec::with_capacity(terms.len());
    for term in terms.iter() {
        let parsed = query::parse_term(term);
        let column = parsed.key.as_deref().and_then(lookup)
            .ok_or_else(|| Error::malformed(param.name(), term.as_str(), "unknown score source"))?;
        predicates.push(filter::build_filter(param.name(), &column.descriptor(), None, parsed.operator, &parsed.value)?);
    }
    Ok(Predicate::combine(predicates, op))
}

fn sample_genotype(study: &str, sample: &str, genotype: &str, negated: bool) -> Result<Predicate> {
    let column = columns::column_for_sample(study, sample);
    let literal = utils::sql_string(QueryParam::Genotype.name(), genotype)?;
    let k = column.quoted();
    let sql = match (columns::is_hom_ref(genotype), negated) {
        (true, false) => format!("( {k}[1] = {gt} OR {k} IS NULL )", k = k, gt = literal),
        (true, true) => format!("{k} IS NOT NULL AND {k}[1] != {gt}", k = k, gt = literal),
        (false, false) => format!("{k}[1] = {gt}", k = k, gt = literal),
        (false, true) => format!("( {k}[1] != {gt} OR {k} IS NULL )", k = k, gt = literal),
    };
    Ok(Predicate::new(sql, [column.name]))
}

// Homozygous reference samples are not listed in any category.
fn category_genotype(study: &str, sample: &str, genotype: &str, negated: bool) -> Result<Predicate> {
    let literal = utils::sql_string(QueryParam::Genotype.name(), sample)?;
    match GenotypeCategory::of(genotype) {
        Some(category) => {
            let column = columns::column_for_genotype_category(study, category);
            Ok(if negated { not_member(&column, &literal) } else { member(&column, &literal) })
        },
        None => {
            let categories: Vec<ColumnDescriptor> = GenotypeCategory::ALL.iter()
                .map(|category| columns::column_for_genotype_category(study, *category))
                .collect();
            let predicate = if negated {
                Predicate::combine(categories.iter().map(|c| member(c, &literal)).collect(), LogicOp::Or)
            } else {
                Predicate::combine(categories.iter().map(|c| not_member(c, &literal)).collect(), LogicOp::And)
            };
            predicate.ok_or_else(|| Error::malformed(QueryParam::Genotype.name(), genotype, "no genotype categories"))
        },
    }
}

//-----------------------------------------------------------------------------
