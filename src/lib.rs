//! # Variant store: population-scale genomic variants in a wide column store.
//!
//! This is the storage and query layer for a table where each row is a variant and the columns are created on demand.
//! Adding a study adds columns for its samples, files, and cohorts, so the schema grows with the data.
//! Queries are compiled into SQL against a snapshot of the known columns.
//!
//! # Row keys
//!
//! Each variant is identified by chromosome, position, reference allele, and alternate allele.
//! [`row_key`] encodes these into a binary key whose byte order matches the natural order of the variants.
//! See [`VariantKey`].
//!
//! ### Columns
//!
//! The table has a fixed set of core and annotation columns.
//! Study-dependent columns are named by convention, for example `studyA_NA12877_S` for the genotype of a sample.
//! [`columns`] defines the naming scheme and the declared types.
//! The [`ColumnCatalog`] tracks the columns that exist in the table and hands out immutable snapshots to readers.
//!
//! ### Schema evolution
//!
//! [`SchemaManager`] creates the table and adds missing columns through a [`StoreClient`].
//! The operations are idempotent and safe to run from multiple clients at the same time.
//! Concurrent schema changes are retried with random backoff.
//! [`SqliteStore`] is a store client backed by a local SQLite database.
//!
//! # Queries
//!
//! A [`Query`] is a list of named parameters with values in a small filter grammar.
//! [`QueryCompiler`] turns it into a [`QueryPlan`]: projected columns, predicates, ordering, limits, and a planner hint.
//! Secondary indexes are described by [`IndexDefinition`] and chosen by [`IndexAdvisor`].
//!
//! ```
//! use variant_store::{ColumnCatalog, QueryCompiler};
//! use variant_store::compiler::{CompilerParams, QueryOptions};
//! use variant_store::query::Query;
//!
//! let catalog = ColumnCatalog::new();
//! let compiler = QueryCompiler::new(catalog.snapshot(), CompilerParams::default());
//! let query = Query::new().with("TYPE", "INDEL");
//! let plan = compiler.compile(&query, &QueryOptions::default().with_count(true)).unwrap();
//! assert_eq!(
//!     plan.to_sql(),
//!     "SELECT COUNT(*) FROM \"variants\" WHERE ( ( \"CHROMOSOME\" != '_METADATA' ) AND ( \"TYPE\" = 'INDEL' ) )"
//! );
//! ```

pub mod columns;
pub mod compiler;
pub mod error;
pub mod index;
pub mod query;
pub mod row_key;
pub mod schema;
pub mod utils;

pub use columns::{CatalogSnapshot, ColumnCatalog, ColumnDescriptor, GenotypeLayout, StudyEntry};
pub use compiler::{GeneResolver, GeneTable, QueryCompiler, QueryPlan};
pub use error::{Error, Result, StoreErrorKind};
pub use index::{IndexAdvisor, IndexDefinition};
pub use query::{Query, QueryParam, Region};
pub use row_key::{VariantKey, VariantType};
pub use schema::{SchemaManager, SqliteStore, StoreClient};

#[cfg(test)]
mod internal;

#[cfg(test)]
mod tests;
