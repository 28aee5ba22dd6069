//! Predicates and the rendering of single-column filters.
//!
//! The rendering depends on the declared type of the column:
//!
//! * `VARCHAR`: `"c" op 'v'`, or `"c" IS NULL` for an empty value.
//! * `VARCHAR ARRAY`: `'v' op ANY("c")`.
//! * numeric arrays: `v flip(op) ANY("c")`.
//! * numeric scalars and array elements: `"c"[i] op v`.
//! * `BOOLEAN`: equality only.
//!
//! Negated operators are rendered as `NOT` followed by the inverse comparison.

use crate::{Error, Result};
use crate::columns::{self, ColumnDescriptor, ScalarKind, SqlType};
use crate::query::{Comparison, LogicOp, Operator};
use crate::utils;

use std::collections::BTreeSet;
use std::fmt::{self, Display};

//-----------------------------------------------------------------------------

/// A SQL fragment and the columns it references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Predicate {
    sql: String,
    columns: BTreeSet<String>,
}

impl Predicate {
    /// Chromosome value of the metadata row.
    pub const METADATA_CHROMOSOME: &'static str = "_METADATA";

    /// Chromosome value that never matches a variant.
    pub const VOID_CHROMOSOME: &'static str = "_VOID";

    /// Creates a predicate from SQL and the referenced column names.
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(sql: impl Into<String>, columns: I) -> Self {
        Predicate {
            sql: sql.into(),
            columns: columns.into_iter().map(|c| c.into()).collect(),
        }
    }

    /// Predicate that matches every variant but not the metadata row.
    pub fn not_metadata() -> Self {
        let column = columns::CHROMOSOME;
        Predicate::new(format!("{} != '{}'", column.quoted(), Self::METADATA_CHROMOSOME), [column.name])
    }

    /// Predicate that matches nothing.
    pub fn void() -> Self {
        let column = columns::CHROMOSOME;
        Predicate::new(format!("{} = '{}'", column.quoted(), Self::VOID_CHROMOSOME), [column.name])
    }

    /// Returns `true` if this is the predicate that matches nothing.
    pub fn is_void(&self) -> bool {
        *self == Self::void()
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns the names of the referenced columns.
    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    /// Combines the predicates with the operator.
    ///
    /// A single predicate is returned as is; multiple predicates become `( ( a ) OP ( b ) )`.
    /// Returns [`None`] if there are no predicates.
    ///
    /// # Examples
    ///
    /// ```
    /// use variant_store::compiler::Predicate;
    /// use variant_store::query::LogicOp;
    ///
    /// let a = Predicate::new("\"A\" = 1", ["A"]);
    /// let b = Predicate::new("\"B\" = 2", ["B"]);
    /// let combined = Predicate::combine(vec![a, b], LogicOp::Or).unwrap();
    /// assert_eq!(combined.sql(), "( ( \"A\" = 1 ) OR ( \"B\" = 2 ) )");
    /// assert_eq!(combined.columns().len(), 2);
    /// ```
    pub fn combine(predicates: Vec<Predicate>, op: LogicOp) -> Option<Predicate> {
        if predicates.len() <= 1 {
            return predicates.into_iter().next();
        }
        let mut columns = BTreeSet::new();
        let mut parts = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            parts.push(format!("( {} )", predicate.sql));
            columns.extend(predicate.columns);
        }
        let separator = format!(" {} ", op.sql());
        Some(Predicate {
            sql: format!("( {} )", parts.join(&separator)),
            columns,
        })
    }

    /// Returns the predicate prefixed with `NOT`.
    pub fn negate(self) -> Predicate {
        Predicate {
            sql: format!("NOT {}", self.sql),
            columns: self.columns,
        }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

//-----------------------------------------------------------------------------

fn type_mismatch(param: &str, value: &str, column: &ColumnDescriptor, operator: &Operator) -> Error {
    Error::TypeMismatch {
        param: param.to_string(),
        value: value.to_string(),
        column: column.name.clone(),
        sql_type: column.sql_type.to_string(),
        operator: operator.to_string(),
    }
}

// Returns the value as a literal of the given scalar kind.
fn literal(param: &str, kind: ScalarKind, value: &str) -> Result<String> {
    match kind {
        ScalarKind::Varchar => utils::sql_string(param, value),
        ScalarKind::Integer | ScalarKind::UnsignedInt => {
            let number = utils::sql_number(param, value)?;
            if number.parse::<i64>().is_err() {
                return Err(Error::malformed(param, value, "expected an integer"));
            }
            Ok(number)
        },
        ScalarKind::Float => utils::sql_number(param, value),
        ScalarKind::Boolean => utils::sql_boolean(param, value).map(String::from),
        ScalarKind::Binary => Err(Error::malformed(param, value, "binary columns cannot be compared")),
    }
}

/// Renders a filter on a column.
///
/// `element` is a 1-based array index.
///
/// # Errors
///
/// Returns [`Error::TypeMismatch`] if the operator or the index cannot be used with the column.
/// Returns [`Error::MalformedQueryParam`] if the value cannot be parsed as the type of the column.
///
/// # Examples
///
/// ```
/// use variant_store::columns;
/// use variant_store::compiler::filter;
/// use variant_store::query::{Comparison, Operator};
///
/// let genes = columns::GENES.descriptor();
/// let predicate = filter::build_filter("GENE", &genes, None, Operator::EQ, "BRCA2").unwrap();
/// assert_eq!(predicate.sql(), "'BRCA2' = ANY(\"A_GENES\")");
///
/// let frequency = columns::column_for_population_frequency("1000G", "ALL");
/// let operator = Operator::new(Comparison::Lt);
/// let predicate = filter::build_filter("POP_ALT_FREQ", &frequency, Some(2), operator, "0.01").unwrap();
/// assert_eq!(predicate.sql(), "\"A_PF_1000G_ALL\"[2] < 0.01");
/// ```
pub fn build_filter(param: &str, column: &ColumnDescriptor, element: Option<usize>, operator: Operator, value: &str) -> Result<Predicate> {
    if element.is_some() && !column.is_array() {
        return Err(type_mismatch(param, value, column, &operator));
    }
    let target: SqlType = if element.is_some() { column.sql_type.element() } else { column.sql_type };
    let comparison = operator.comparison;
    let kind = target.kind;

    if comparison.is_like() && kind != ScalarKind::Varchar {
        return Err(type_mismatch(param, value, column, &operator));
    }
    if kind == ScalarKind::Boolean && !matches!(comparison, Comparison::Eq | Comparison::Ne) {
        return Err(type_mismatch(param, value, column, &operator));
    }

    let quoted = column.quoted();
    let expression = match element {
        Some(index) => format!("{}[{}]", quoted, index),
        None => quoted.clone(),
    };

    let base = if target.is_array() {
        if comparison.is_like() {
            return Err(type_mismatch(param, value, column, &operator));
        }
        let literal = literal(param, kind, value.trim())?;
        if kind == ScalarKind::Varchar {
            format!("{} {} ANY({})", literal, comparison.sql(), quoted)
        } else {
            format!("{} {} ANY({})", literal, comparison.flip().sql(), quoted)
        }
    } else if kind == ScalarKind::Varchar && value.is_empty() {
        if comparison.is_like() || comparison.is_less() || comparison.is_greater() {
            return Err(type_mismatch(param, value, column, &operator));
        }
        if comparison == Comparison::Ne {
            format!("{} IS NOT NULL", expression)
        } else {
            format!("{} IS NULL", expression)
        }
    } else {
        let value = if kind == ScalarKind::Varchar { value } else { value.trim() };
        let literal = literal(param, kind, value)?;
        format!("{} {} {}", expression, comparison.sql(), literal)
    };

    let negated = if operator.negated { format!("NOT {}", base) } else { base };
    let sql = if operator.or_null {
        let null_target = if target.is_array() { quoted } else { expression };
        format!("( {} OR {} IS NULL )", negated, null_target)
    } else {
        negated
    };
    Ok(Predicate::new(sql, [column.name.clone()]))
}

/// Renders `'v' = ANY("c")` for each value and combines them with the operator.
///
/// Values starting with `!` are negated.
pub fn membership(param: &str, column: &ColumnDescriptor, values: &[String], op: LogicOp) -> Result<Option<Predicate>> {
    let mut predicates = Vec::with_capacity(values.len());
    for value in values.iter() {
        let (operator, value) = if crate::query::is_negated(value) {
            (Operator { negated: true, ..Operator::EQ }, crate::query::remove_negation(value))
        } else {
            (Operator::EQ, value.as_str())
        };
        predicates.push(build_filter(param, column, None, operator, value)?);
    }
    Ok(Predicate::combine(predicates, op))
}

/// Renders `"c" IS NULL` or `"c" IS NOT NULL`.
pub fn is_null(column: &ColumnDescriptor, null: bool) -> Predicate {
    let test = if null { "IS NULL" } else { "IS NOT NULL" };
    Predicate::new(format!("{} {}", column.quoted(), test), [column.name.clone()])
}

//-----------------------------------------------------------------------------
