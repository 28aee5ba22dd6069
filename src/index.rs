//! Secondary indexes and planner hints.
//!
//! [`IndexAdvisor`] produces the canonical set of secondary indexes for the variant table.
//! All of them are local indexes that include the gene and consequence type columns.
//! Array elements can be indexed with 1-based element expressions such as `"A_SIFT"[2]`.
//!
//! [`select_hint`] chooses the planner hint for a compiled query.

use crate::{Error, Result};
use crate::columns::{self, ColumnDescriptor, FixedColumn};

use std::fmt::{self, Display};


//-----------------------------------------------------------------------------

/// Index scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Stored with the data regions of the table.
    Local,
    /// Stored as a separate table.
    Global,
}

impl Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Local => write!(f, "LOCAL"),
            IndexKind::Global => write!(f, "GLOBAL"),
        }
    }
}

/// An indexed column or array element.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IndexColumn {
    pub column: String,
    /// 1-based array element.
    pub element: Option<usize>,
}

impl IndexColumn {
    pub fn new(column: &str) -> Self {
        IndexColumn { column: column.to_string(), element: None }
    }

    pub fn element(column: &str, element: usize) -> Self {
        IndexColumn { column: column.to_string(), element: Some(element) }
    }

    /// Returns the column expression, such as `"A_SIFT"[2]`.
    pub fn expression(&self) -> String {
        match self.element {
            Some(element) => format!("{}[{}]", columns::quote_identifier(&self.column), element),
            None => columns::quote_identifier(&self.column),
        }
    }

    // Column expression without quotes or brackets.
    fn name_part(&self) -> String {
        match self.element {
            Some(element) => format!("{}{}", self.column, element),
            None => self.column.clone(),
        }
    }
}

impl Display for IndexColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression())
    }
}

/// A secondary index.
///
/// # Examples
///
/// ```
/// use variant_store::columns;
/// use variant_store::index::{IndexColumn, IndexDefinition, IndexKind};
///
/// let index = IndexDefinition::new("variants", IndexKind::Local)
///     .with_column(IndexColumn::element(columns::SIFT.name, 2))
///     .with_include(&[columns::GENES.name, columns::SO.name]);
/// assert_eq!(index.name(), "variants_A_SIFT2_IDX");
/// assert_eq!(
///     index.to_sql(),
///     "CREATE LOCAL INDEX IF NOT EXISTS \"variants_A_SIFT2_IDX\" ON \"variants\" (\"A_SIFT\"[2]) INCLUDE(\"A_GENES\",\"A_SO\")"
/// );
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IndexDefinition {
    pub table: String,
    pub kind: IndexKind,
    pub columns: Vec<IndexColumn>,
    pub include: Vec<String>,
    pub is_async: bool,
}

impl IndexDefinition {
    /// Creates an index without columns.
    pub fn new(table: &str, kind: IndexKind) -> Self {
        IndexDefinition {
            table: table.to_string(),
            kind,
            columns: Vec::new(),
            include: Vec::new(),
            is_async: false,
        }
    }

    /// Adds an indexed column.
    pub fn with_column(mut self, column: IndexColumn) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds covered columns.
    pub fn with_include(mut self, columns: &[&str]) -> Self {
        self.include.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Sets the index to be built asynchronously.
    pub fn with_async(self, is_async: bool) -> Self {
        IndexDefinition { is_async, ..self }
    }

    /// Returns the name of the index: `{table}_{columns}_IDX` with quotes and brackets removed.
    pub fn name(&self) -> String {
        let parts: Vec<String> = self.columns.iter().map(|c| c.name_part()).collect();
        format!("{}_{}_IDX", self.table, parts.join("_"))
    }

    /// Returns the index statement.
    pub fn to_sql(&self) -> String {
        let kind = match self.kind {
            IndexKind::Local => "LOCAL ",
            IndexKind::Global => "",
        };
        let expressions: Vec<String> = self.columns.iter().map(|c| c.expression()).collect();
        let mut sql = format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            kind, columns::quote_identifier(&self.name()), columns::quote_identifier(&self.table), expressions.join(", ")
        );
        if !self.include.is_empty() {
            let include: Vec<String> = self.include.iter().map(|c| columns::quote_identifier(c)).collect();
            sql.push_str(&format!(" INCLUDE({})", include.join(",")));
        }
        if self.is_async {
            sql.push_str(" ASYNC");
        }
        sql
    }
}

impl Display for IndexDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

//-----------------------------------------------------------------------------

/// Columns covered by every default index.
pub const DEFAULT_INCLUDE: [FixedColumn; 2] = [columns::GENES, columns::SO];

/// Population frequency columns indexed by default as `(source, population)`.
pub const DEFAULT_POPULATION_FREQUENCIES: [(&str, &str); 2] = [("1000G", "ALL"), ("EXAC", "ALL")];

/// Produces the canonical secondary index set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexAdvisor {
    /// Build the indexes asynchronously.
    pub is_async: bool,
}

impl IndexAdvisor {
    /// Creates an advisor for synchronous indexes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the advisor with asynchronous index creation set.
    pub fn with_async(self, is_async: bool) -> Self {
        IndexAdvisor { is_async }
    }

    fn local_index(&self, table: &str, column: IndexColumn) -> IndexDefinition {
        let include: Vec<&str> = DEFAULT_INCLUDE.iter().map(|c| c.name).collect();
        IndexDefinition::new(table, IndexKind::Local)
            .with_column(column)
            .with_include(&include)
            .with_async(self.is_async)
    }

    /// Returns the default indexes: conservation and functional scores, protein impact, and variant type.
    ///
    /// The PolyPhen index covers the minimum score and the SIFT index the maximum score.
    pub fn default_indexes(&self, table: &str) -> Vec<IndexDefinition> {
        let scalars = [
            columns::PHASTCONS, columns::PHYLOP, columns::GERP,
            columns::CADD_RAW, columns::CADD_SCALED,
        ];
        let mut result: Vec<IndexDefinition> = scalars.iter()
            .map(|column| self.local_index(table, IndexColumn::new(column.name)))
            .collect();
        result.push(self.local_index(table, IndexColumn::element(columns::POLYPHEN.name, 1)));
        result.push(self.local_index(table, IndexColumn::element(columns::SIFT.name, 2)));
        result.push(self.local_index(table, IndexColumn::new(columns::TYPE.name)));
        result
    }

    /// Returns two indexes for each population frequency column: alternate frequency and reference frequency.
    pub fn population_frequency_indexes(&self, table: &str, frequencies: &[ColumnDescriptor]) -> Vec<IndexDefinition> {
        let mut result = Vec::with_capacity(2 * frequencies.len());
        for column in frequencies.iter() {
            result.push(self.local_index(table, IndexColumn::element(&column.name, 2)));
            result.push(self.local_index(table, IndexColumn::element(&column.name, 1)));
        }
        result
    }

    /// Returns the population frequency indexes for [`DEFAULT_POPULATION_FREQUENCIES`].
    pub fn default_population_frequency_indexes(&self, table: &str) -> Vec<IndexDefinition> {
        let frequencies: Vec<ColumnDescriptor> = DEFAULT_POPULATION_FREQUENCIES.iter()
            .map(|(source, population)| columns::column_for_population_frequency(source, population))
            .collect();
        self.population_frequency_indexes(table, &frequencies)
    }

    /// Returns all indexes created when initializing a table.
    pub fn initial_indexes(&self, table: &str) -> Vec<IndexDefinition> {
        let mut result = self.default_indexes(table);
        result.extend(self.default_population_frequency_indexes(table));
        result
    }
}

//-----------------------------------------------------------------------------

/// Hint that disables secondary indexes.
pub const NO_INDEX: &str = "NO_INDEX";

/// Planner hints prepended to a statement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexHint {
    pub hints: Vec<String>,
}

impl IndexHint {
    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    /// Returns `true` if secondary indexes are disabled.
    pub fn is_no_index(&self) -> bool {
        self.hints.iter().any(|hint| hint == NO_INDEX)
    }
}

impl Display for IndexHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/*+ {} */", self.hints.join(","))
    }
}

/// Checks that a planner hint stays inside the `/*+ ... */` comment.
///
/// # Errors
///
/// Returns [`Error::MalformedQueryParam`] if the hint contains a comment delimiter or a statement separator.
pub fn check_hint(hint: &str) -> Result<()> {
    if hint.contains("*/") || hint.contains("/*") || hint.contains(';') {
        return Err(Error::malformed("hint", hint, "comment delimiters and ';' are not allowed"));
    }
    Ok(())
}

/// Selects the planner hint for a query.
///
/// Secondary indexes are disabled when there are no exclusive filters.
/// Extra hints are appended in order.
/// Returns [`None`] if there are no hints.
pub fn select_hint(exclusive_is_empty: bool, extra: &[String]) -> Option<IndexHint> {
    let mut hints = Vec::new();
    if exclusive_is_empty {
        hints.push(NO_INDEX.to_string());
    }
    for hint in extra.iter() {
        let hint = hint.trim();
        if !hint.is_empty() && !hints.iter().any(|h| h == hint) {
            hints.push(hint.to_string());
        }
    }
    if hints.is_empty() { None } else { Some(IndexHint { hints }) }
}

//-----------------------------------------------------------------------------
