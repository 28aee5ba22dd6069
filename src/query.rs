//! Structured variant queries and the grammar of parameter values.
//!
//! A [`Query`] is an ordered list of `(parameter, raw value)` pairs.
//! A raw value holds one or more terms separated by `,` (OR) or `;` (AND), but never both.
//! Double quotes protect separators inside a term.
//!
//! Each term may have the form `[key]operator value`, where the operator is one of
//! `=`, `==`, `!`, `!=`, `<`, `<=`, `>`, `>=`, `<<`, `<<=`, `>>`, `>>=`, `~`, `=~`, `!~`.
//! The doubled comparisons `<<` and `>>` also accept NULL values.
//! A term without an operator is an equality with no key.
//!
//! # Examples
//!
//! ```
//! use variant_store::query::{self, Comparison, LogicOp, Query, QueryParam};
//!
//! let query = Query::new()
//!     .with("REGION", "1:1000-2000")
//!     .with("popAltFreq", "1000G:ALL<0.01");
//! assert_eq!(query.get(QueryParam::PopAltFreq), Some("1000G:ALL<0.01"));
//!
//! let term = query::parse_term("1000G:ALL<0.01");
//! assert_eq!(term.key.as_deref(), Some("1000G:ALL"));
//! assert_eq!(term.operator.comparison, Comparison::Lt);
//! assert_eq!(term.value, "0.01");
//!
//! let (terms, op) = query::split_values("TYPE", "SNV,INDEL").unwrap();
//! assert_eq!(terms, vec!["SNV", "INDEL"]);
//! assert_eq!(op, LogicOp::Or);
//! ```

use crate::{Error, Result};

use std::fmt::{self, Display};
use std::io::BufRead;
use std::str::FromStr;


//-----------------------------------------------------------------------------

/// Parameter groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamGroup {
    /// Filters that select variants by location or identity. Combined with OR.
    Inclusive,
    /// Filters that restrict the selected variants. Combined with AND.
    Exclusive,
    /// Parameters that only affect the projection.
    Projection,
}

macro_rules! query_params {
    ($($variant:ident => ($name:literal, $alias:literal, $group:ident),)*) => {
        /// Recognized query parameters.
        ///
        /// Names are case-insensitive, and each parameter also has a camelCase alias.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum QueryParam {
            $($variant,)*
        }

        impl QueryParam {
            /// All parameters.
            pub const ALL: &'static [QueryParam] = &[$(QueryParam::$variant,)*];

            /// Returns the canonical name of the parameter.
            pub fn name(&self) -> &'static str {
                match self {
                    $(QueryParam::$variant => $name,)*
                }
            }

            /// Returns the camelCase alias of the parameter.
            pub fn alias(&self) -> &'static str {
                match self {
                    $(QueryParam::$variant => $alias,)*
                }
            }

            /// Returns the group of the parameter.
            pub fn group(&self) -> ParamGroup {
                match self {
                    $(QueryParam::$variant => ParamGroup::$group,)*
                }
            }
        }
    };
}

query_params! {
    Region => ("REGION", "region", Inclusive),
    Chromosome => ("CHROMOSOME", "chromosome", Inclusive),
    Id => ("ID", "id", Inclusive),
    Gene => ("GENE", "gene", Inclusive),
    Xref => ("XREF", "xref", Inclusive),
    AnnotHpo => ("ANNOT_HPO", "annotHpo", Inclusive),

    Reference => ("REFERENCE", "reference", Exclusive),
    Alternate => ("ALTERNATE", "alternate", Exclusive),
    Type => ("TYPE", "type", Exclusive),
    Study => ("STUDY", "study", Exclusive),
    Cohort => ("COHORT", "cohort", Exclusive),
    Genotype => ("GENOTYPE", "genotype", Exclusive),
    File => ("FILE", "file", Exclusive),
    Qual => ("QUAL", "qual", Exclusive),
    Filter => ("FILTER", "filter", Exclusive),
    Score => ("SCORE", "score", Exclusive),
    Release => ("RELEASE", "release", Exclusive),
    StatsRef => ("STATS_REF", "statsRef", Exclusive),
    StatsAlt => ("STATS_ALT", "statsAlt", Exclusive),
    StatsMaf => ("STATS_MAF", "statsMaf", Exclusive),
    StatsMgf => ("STATS_MGF", "statsMgf", Exclusive),
    StatsPassFreq => ("STATS_PASS_FREQ", "statsPassFreq", Exclusive),
    MissingAlleles => ("MISSING_ALLELES", "missingAlleles", Exclusive),
    MissingGenotypes => ("MISSING_GENOTYPES", "missingGenotypes", Exclusive),
    AnnotationExists => ("ANNOTATION_EXISTS", "annotationExists", Exclusive),
    ConsequenceType => ("CONSEQUENCE_TYPE", "consequenceType", Exclusive),
    Biotype => ("BIOTYPE", "biotype", Exclusive),
    TranscriptFlag => ("TRANSCRIPT_FLAG", "transcriptFlag", Exclusive),
    Sift => ("SIFT", "sift", Exclusive),
    Polyphen => ("POLYPHEN", "polyphen", Exclusive),
    ProteinSubstitution => ("PROTEIN_SUBSTITUTION", "proteinSubstitution", Exclusive),
    Conservation => ("CONSERVATION", "conservation", Exclusive),
    FunctionalScore => ("FUNCTIONAL_SCORE", "functionalScore", Exclusive),
    PopAltFreq => ("POP_ALT_FREQ", "popAltFreq", Exclusive),
    PopRefFreq => ("POP_REF_FREQ", "popRefFreq", Exclusive),
    PopMaf => ("POP_MAF", "popMaf", Exclusive),
    GeneTraitId => ("GENE_TRAIT_ID", "geneTraitId", Exclusive),
    GeneTraitName => ("GENE_TRAIT_NAME", "geneTraitName", Exclusive),
    Go => ("GO", "go", Exclusive),
    Expression => ("EXPRESSION", "expression", Exclusive),
    ProteinKeyword => ("PROTEIN_KEYWORD", "proteinKeyword", Exclusive),
    Drug => ("DRUG", "drug", Exclusive),
    ClinicalSignificance => ("CLINICAL_SIGNIFICANCE", "clinicalSignificance", Exclusive),

    IncludeStudy => ("INCLUDE_STUDY", "includeStudy", Projection),
    IncludeSample => ("INCLUDE_SAMPLE", "includeSample", Projection),
}

impl Display for QueryParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for QueryParam {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        QueryParam::ALL.iter()
            .find(|param| param.name().eq_ignore_ascii_case(name) || param.alias().eq_ignore_ascii_case(name))
            .copied()
            .ok_or_else(|| Error::malformed(s, "", "unknown query parameter"))
    }
}

//-----------------------------------------------------------------------------

/// A structured variant query: ordered `(parameter, raw value)` pairs.
///
/// Parameter names are validated when the query is compiled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    params: Vec<(String, String)>,
}

impl Query {
    /// Creates an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the query with the parameter set to the value.
    ///
    /// An existing value for the same parameter is replaced in place.
    pub fn with(mut self, param: &str, value: &str) -> Self {
        self.set(param, value);
        self
    }

    /// Sets the parameter to the value, replacing an existing value in place.
    pub fn set(&mut self, param: &str, value: &str) {
        let canonical = param.parse::<QueryParam>().ok();
        let existing = self.params.iter_mut().find(|(name, _)| {
            match (canonical, name.parse::<QueryParam>().ok()) {
                (Some(a), Some(b)) => a == b,
                _ => name == param,
            }
        });
        match existing {
            Some((_, old)) => *old = value.to_string(),
            None => self.params.push((param.to_string(), value.to_string())),
        }
    }

    /// Removes the parameter from the query.
    pub fn remove(&mut self, param: QueryParam) {
        self.params.retain(|(name, _)| name.parse::<QueryParam>().ok() != Some(param));
    }

    /// Returns the raw value of the parameter.
    pub fn get(&self, param: QueryParam) -> Option<&str> {
        self.params.iter()
            .find(|(name, _)| name.parse::<QueryParam>().ok() == Some(param))
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` if the parameter is present with a non-empty value.
    pub fn is_valid(&self, param: QueryParam) -> bool {
        self.get(param).map(|value| !value.trim().is_empty()).unwrap_or(false)
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Returns `true` if the query has no parameters.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Iterates over the raw `(parameter, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Returns the parsed parameters with non-empty values in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedQueryParam`] for an unknown parameter name.
    pub fn params(&self) -> Result<Vec<(QueryParam, &str)>> {
        let mut result = Vec::with_capacity(self.params.len());
        for (name, value) in self.params.iter() {
            let param = name.parse::<QueryParam>().map_err(|_| Error::malformed(name.as_str(), value.as_str(), "unknown query parameter"))?;
            if !value.trim().is_empty() {
                result.push((param, value.as_str()));
            }
        }
        Ok(result)
    }

    /// Parses a `NAME=VALUE` line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedQueryParam`] if there is no `=` or the name is empty.
    pub fn parse_pair(line: &str) -> Result<(String, String)> {
        let (name, value) = line.split_once('=').ok_or_else(|| Error::malformed(line, "", "expected NAME=VALUE"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::malformed(line, value, "empty parameter name"));
        }
        Ok((name.to_string(), value.trim().to_string()))
    }

    /// Reads a query from `NAME=VALUE` lines.
    ///
    /// Empty lines and lines starting with `#` are skipped.
    ///
    /// # Errors
    ///
    /// Passes through I/O errors and errors from [`Query::parse_pair`].
    pub fn read<R: BufRead>(reader: R) -> Result<Self> {
        let mut query = Query::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, value) = Self::parse_pair(line)?;
            query.set(&name, &value);
        }
        Ok(query)
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Query {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        let mut query = Query::new();
        for (param, value) in iter {
            query.set(param, value);
        }
        query
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.params.iter() {
            if !first {
                write!(f, "&")?;
            }
            write!(f, "{}={}", name, value)?;
            first = false;
        }
        Ok(())
    }
}

//-----------------------------------------------------------------------------

/// Logical operator between the terms of a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Or,
}

impl LogicOp {
    /// Returns the separator character for the operator.
    pub fn separator(&self) -> char {
        match self {
            LogicOp::And => AND,
            LogicOp::Or => OR,
        }
    }

    /// Returns the SQL keyword for the operator.
    pub fn sql(&self) -> &'static str {
        match self {
            LogicOp::And => "AND",
            LogicOp::Or => "OR",
        }
    }
}

impl Display for LogicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql())
    }
}

/// Separator for AND terms.
pub const AND: char = ';';

/// Separator for OR terms.
pub const OR: char = ',';

/// Negation prefix.
pub const NOT: char = '!';

const QUOTE: char = '"';

/// Returns the logical operator used in the value, or [`None`] if there is a single term.
///
/// # Errors
///
/// Returns [`Error::MalformedQueryParam`] if the value mixes `,` and `;` outside quotes.
pub fn check_operator(param: &str, value: &str) -> Result<Option<LogicOp>> {
    let mut in_quotes = false;
    let (mut and, mut or) = (false, false);
    for c in value.chars() {
        match c {
            QUOTE => in_quotes = !in_quotes,
            AND if !in_quotes => and = true,
            OR if !in_quotes => or = true,
            _ => {},
        }
    }
    match (and, or) {
        (true, true) => Err(Error::malformed(param, value, "mixed AND (;) and OR (,) operators")),
        (true, false) => Ok(Some(LogicOp::And)),
        (false, true) => Ok(Some(LogicOp::Or)),
        (false, false) => Ok(None),
    }
}

/// Splits the value into terms and returns them with the logical operator.
///
/// A single term is treated as an AND of one term.
/// Surrounding quotes are removed from each term.
///
/// # Errors
///
/// Returns [`Error::MalformedQueryParam`] if the operators are mixed or the quotes are unbalanced.
pub fn split_values(param: &str, value: &str) -> Result<(Vec<String>, LogicOp)> {
    let op = check_operator(param, value)?;
    let terms = split_quoted(param, value, op.map(|op| op.separator()))?;
    Ok((terms, op.unwrap_or(LogicOp::And)))
}

// Splits the value on the separator outside quotes.
fn split_quoted(param: &str, value: &str, separator: Option<char>) -> Result<Vec<String>> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in value.chars() {
        if c == QUOTE {
            in_quotes = !in_quotes;
            current.push(c);
        } else if Some(c) == separator && !in_quotes {
            result.push(unquote(&current));
            current.clear();
        } else {
            current.push(c);
        }
    }
    if in_quotes {
        return Err(Error::malformed(param, value, "unbalanced quotes"));
    }
    result.push(unquote(&current));
    Ok(result)
}

fn unquote(term: &str) -> String {
    let term = term.trim();
    if term.len() >= 2 && term.starts_with(QUOTE) && term.ends_with(QUOTE) {
        term[1..term.len() - 1].to_string()
    } else {
        term.to_string()
    }
}

/// Returns `true` if the term is negated with a leading `!`.
pub fn is_negated(term: &str) -> bool {
    term.starts_with(NOT)
}

/// Removes a leading `!` from the term.
pub fn remove_negation(term: &str) -> &str {
    term.strip_prefix(NOT).unwrap_or(term)
}

/// Splits a `study:resource` term on the last `:`.
///
/// Returns `(None, term)` if there is no `:`, or if it is the first or the last character.
pub fn split_study_resource(term: &str) -> (Option<&str>, &str) {
    match term.rfind(':') {
        Some(index) if index > 0 && index + 1 < term.len() => (Some(&term[..index]), &term[index + 1..]),
        _ => (None, term),
    }
}

//-----------------------------------------------------------------------------

/// SQL comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
}

impl Comparison {
    /// Returns the SQL form of the operator.
    pub fn sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Like => "LIKE",
            Comparison::NotLike => "NOT LIKE",
        }
    }

    /// Swaps the operands: `a < b` is the same as `b > a`.
    pub fn flip(&self) -> Comparison {
        match self {
            Comparison::Lt => Comparison::Gt,
            Comparison::Le => Comparison::Ge,
            Comparison::Gt => Comparison::Lt,
            Comparison::Ge => Comparison::Le,
            other => *other,
        }
    }

    /// Returns the logical complement: `!(a < b)` is the same as `a >= b`.
    pub fn inverse(&self) -> Comparison {
        match self {
            Comparison::Eq => Comparison::Ne,
            Comparison::Ne => Comparison::Eq,
            Comparison::Lt => Comparison::Ge,
            Comparison::Le => Comparison::Gt,
            Comparison::Gt => Comparison::Le,
            Comparison::Ge => Comparison::Lt,
            Comparison::Like => Comparison::NotLike,
            Comparison::NotLike => Comparison::Like,
        }
    }

    /// Returns `true` for `<` and `<=`.
    pub fn is_less(&self) -> bool {
        matches!(self, Comparison::Lt | Comparison::Le)
    }

    /// Returns `true` for `>` and `>=`.
    pub fn is_greater(&self) -> bool {
        matches!(self, Comparison::Gt | Comparison::Ge)
    }

    /// Returns `true` for pattern matching operators.
    pub fn is_like(&self) -> bool {
        matches!(self, Comparison::Like | Comparison::NotLike)
    }
}

impl Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql())
    }
}

/// A parsed term operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Operator {
    /// Comparison applied to the column.
    pub comparison: Comparison,
    /// NULL values also match.
    pub or_null: bool,
    /// The whole comparison is prefixed with `NOT`.
    pub negated: bool,
}

impl Operator {
    /// Plain equality.
    pub const EQ: Operator = Operator { comparison: Comparison::Eq, or_null: false, negated: false };

    /// Creates an operator without NULL handling or negation.
    pub fn new(comparison: Comparison) -> Self {
        Operator { comparison, or_null: false, negated: false }
    }

    /// Parses an operator of the term grammar.
    ///
    /// Operators starting with `!` are represented as the negation of the inverse comparison.
    pub fn parse(op: &str) -> Option<Operator> {
        let (comparison, or_null) = match op {
            "" | "=" | "==" => (Comparison::Eq, false),
            "!" | "!=" => (Comparison::Ne, false),
            "<" => (Comparison::Lt, false),
            "<=" => (Comparison::Le, false),
            ">" => (Comparison::Gt, false),
            ">=" => (Comparison::Ge, false),
            "<<" => (Comparison::Lt, true),
            "<<=" => (Comparison::Le, true),
            ">>" => (Comparison::Gt, true),
            ">>=" => (Comparison::Ge, true),
            "~" | "=~" => (Comparison::Like, false),
            "!~" | "!=~" => (Comparison::NotLike, false),
            _ => return None,
        };
        if op.starts_with(NOT) {
            Some(Operator { comparison: comparison.inverse(), or_null, negated: true })
        } else {
            Some(Operator { comparison, or_null, negated: false })
        }
    }

    /// Returns the comparison that this operator actually applies, taking negation into account.
    pub fn effective(&self) -> Comparison {
        if self.negated { self.comparison.inverse() } else { self.comparison }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.negated { "NOT " } else { "" };
        let suffix = if self.or_null { " OR NULL" } else { "" };
        write!(f, "{}{}{}", prefix, self.comparison, suffix)
    }
}

/// A term split into key, operator, and value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Term {
    pub key: Option<String>,
    pub operator: Operator,
    pub value: String,
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '=' | '<' | '>' | '~' | '!')
}

/// Splits a term into `[key]operator value`.
///
/// The key is the prefix before the first operator character, and the operator is the following run of operator characters.
/// If the run is not a valid operator or nothing follows it, the whole term is an equality value without a key.
pub fn parse_term(term: &str) -> Term {
    let fallback = Term { key: None, operator: Operator::EQ, value: term.to_string() };
    let op_start = match term.find(is_operator_char) {
        Some(index) => index,
        None => return fallback,
    };
    let op_end = term[op_start..].find(|c: char| !is_operator_char(c)).map(|i| op_start + i).unwrap_or(term.len());
    if op_end == term.len() {
        return fallback;
    }
    let operator = match Operator::parse(&term[op_start..op_end]) {
        Some(operator) => operator,
        None => return fallback,
    };
    let key = term[..op_start].trim();
    Term {
        key: if key.is_empty() { None } else { Some(key.to_string()) },
        operator,
        value: term[op_end..].trim().to_string(),
    }
}

//-----------------------------------------------------------------------------

/// A genomic region with 1-based inclusive coordinates.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Region {
    pub chromosome: String,
    pub start: u32,
    /// [`None`] if the region extends to the end of the chromosome.
    pub end: Option<u32>,
}

impl Region {
    /// Creates a region covering a whole chromosome.
    pub fn chromosome(chromosome: &str) -> Self {
        Region { chromosome: crate::row_key::normalize_chromosome(chromosome), start: 1, end: None }
    }

    /// Creates a region from `start` to `end`.
    pub fn new(chromosome: &str, start: u32, end: u32) -> Self {
        Region { chromosome: crate::row_key::normalize_chromosome(chromosome), start, end: Some(end) }
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}:{}-{}", self.chromosome, self.start, end),
            None if self.start > 1 => write!(f, "{}:{}-", self.chromosome, self.start),
            None => write!(f, "{}", self.chromosome),
        }
    }
}

impl FromStr for Region {
    type Err = Error;

    /// Parses `chr`, `chr:pos`, `chr:start-end`, or `chr:start-`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (chromosome, range) = match s.rsplit_once(':') {
            Some((chromosome, range)) => (chromosome, Some(range)),
            None => (s, None),
        };
        if chromosome.is_empty() {
            return Err(Error::malformed("REGION", s, "empty chromosome"));
        }
        let parse = |value: &str| value.trim().parse::<u32>().map_err(|x| Error::malformed("REGION", s, x.to_string()));
        let region = match range {
            None => Region::chromosome(chromosome),
            Some(range) => match range.split_once('-') {
                Some((start, "")) => Region { chromosome: crate::row_key::normalize_chromosome(chromosome), start: parse(start)?, end: None },
                Some((start, end)) => Region::new(chromosome, parse(start)?, parse(end)?),
                None => {
                    let pos = parse(range)?;
                    Region::new(chromosome, pos, pos)
                },
            },
        };
        if let Some(end) = region.end {
            if end < region.start {
                return Err(Error::malformed("REGION", s, "end before start"));
            }
        }
        Ok(region)
    }
}

//-----------------------------------------------------------------------------
