//! Schema evolution for the variant table.
//!
//! [`SchemaManager`] issues typed [`Statement`] values through a [`StoreClient`].
//! All operations are idempotent:
//!
//! * "already exists" errors are benign;
//! * if creating a table fails but the table exists afterwards, another client won the race;
//! * only the missing columns are added, and nothing is issued when no column is missing.
//!
//! Concurrent schema mutation errors are retried with random backoff.
//! If they persist after [`SchemaParams::max_attempts`] attempts, the operation fails with [`Error::SchemaConflict`].
//!
//! [`SqliteStore`] is a store client backed by a local SQLite database.

use crate::{Error, Result};
use crate::columns::{self, ColumnCatalog, ColumnDescriptor, GenotypeLayout, StudyEntry};
use crate::index::{IndexAdvisor, IndexDefinition};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Display};
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;

use tracing::{debug, info, warn};

pub mod sqlite;

pub use sqlite::SqliteStore;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// A typed schema statement.
///
/// [`Display`] renders the statement in the dialect of the column store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Statement {
    /// Creates a namespace for tables.
    CreateNamespace(String),
    /// Creates a table with the given columns and primary key.
    CreateTable {
        table: String,
        columns: Vec<ColumnDescriptor>,
        primary_key: Vec<String>,
        not_null: Vec<String>,
    },
    /// Adds columns that do not exist yet.
    AddColumns {
        table: String,
        columns: Vec<ColumnDescriptor>,
    },
    /// Creates a secondary index.
    CreateIndex(IndexDefinition),
}

impl Statement {
    /// Returns the statement creating the variant table with all fixed columns.
    pub fn create_variant_table(table: &str) -> Statement {
        Statement::CreateTable {
            table: table.to_string(),
            columns: columns::FIXED_COLUMNS.iter().map(|c| c.descriptor()).collect(),
            primary_key: columns::PRIMARY_KEY.iter().map(|c| c.name.to_string()).collect(),
            not_null: columns::NOT_NULL.iter().map(|c| c.name.to_string()).collect(),
        }
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateNamespace(name) => {
                write!(f, "CREATE SCHEMA IF NOT EXISTS {}", columns::quote_identifier(name))
            },
            Statement::CreateTable { table, columns, primary_key, not_null } => {
                let mut definitions: Vec<String> = columns.iter().map(|column| {
                    let constraint = if not_null.contains(&column.name) { " NOT NULL" } else { "" };
                    format!("{} {}{}", column.quoted(), column.sql_type, constraint)
                }).collect();
                let key: Vec<String> = primary_key.iter().map(|c| columns::quote_identifier(c)).collect();
                definitions.push(format!("CONSTRAINT PK PRIMARY KEY ({})", key.join(", ")));
                write!(f, "CREATE TABLE IF NOT EXISTS {} ({})", columns::quote_identifier(table), definitions.join(", "))
            },
            Statement::AddColumns { table, columns } => {
                let definitions: Vec<String> = columns.iter().map(|c| format!("{} {}", c.quoted(), c.sql_type)).collect();
                write!(f, "ALTER TABLE {} ADD IF NOT EXISTS {}", columns::quote_identifier(table), definitions.join(", "))
            },
            Statement::CreateIndex(index) => write!(f, "{}", index.to_sql()),
        }
    }
}

//-----------------------------------------------------------------------------

/// Client for the column store.
pub trait StoreClient {
    /// Executes a schema statement.
    fn execute(&mut self, statement: &Statement) -> Result<()>;

    /// Creates a secondary index.
    fn create_index(&mut self, index: &IndexDefinition) -> Result<()> {
        self.execute(&Statement::CreateIndex(index.clone()))
    }

    /// Returns `true` if the table exists.
    fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// Lists the columns of the table.
    fn list_columns(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Records the genotype layout of the table.
    ///
    /// Stores without their own metadata ignore this.
    fn save_genotype_layout(&mut self, _layout: GenotypeLayout) -> Result<()> {
        Ok(())
    }
}

/// Source of study metadata.
pub trait MetadataRegistry {
    /// Returns the samples of the study.
    fn samples(&self, study: &str) -> Result<Vec<String>>;

    /// Returns the files of the study.
    fn files(&self, _study: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Returns the cohorts of the study.
    fn cohorts(&self, study: &str) -> Result<Vec<String>>;
}

/// An in-memory [`MetadataRegistry`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StudyRegistry {
    studies: BTreeMap<String, StudyEntry>,
}

impl StudyRegistry {
    /// Cohort containing every sample of a study.
    pub const DEFAULT_COHORT: &'static str = "ALL";

    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a study or extends an existing one.
    pub fn add(&mut self, study: &str, entry: StudyEntry) {
        let existing = self.studies.entry(study.to_string()).or_default();
        existing.samples.extend(entry.samples);
        existing.files.extend(entry.files);
        existing.cohorts.extend(entry.cohorts);
    }

    /// Returns the registered study names.
    pub fn studies(&self) -> impl Iterator<Item = &str> {
        self.studies.keys().map(|s| s.as_str())
    }

    /// Returns the entry for the study.
    pub fn get(&self, study: &str) -> Option<&StudyEntry> {
        self.studies.get(study)
    }

    /// Reads a tab-separated sample sheet.
    ///
    /// Each line has the fields `study`, `sample`, an optional comma-separated list of cohorts, and an optional file name.
    /// Empty lines and lines starting with `#` are skipped.
    /// Every study gets the cohort [`Self::DEFAULT_COHORT`].
    ///
    /// # Errors
    ///
    /// Passes through I/O errors.
    /// Returns [`Error::MalformedQueryParam`] for a line without a sample.
    pub fn read_sample_sheet<R: BufRead>(reader: R) -> Result<Self> {
        let mut result = StudyRegistry::new();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').map(|f| f.trim()).collect();
            if fields.len() < 2 || fields[0].is_empty() || fields[1].is_empty() {
                return Err(Error::malformed("sample sheet", line, format!("line {}: expected study and sample", line_num + 1)));
            }
            let mut entry = StudyEntry::default();
            entry.samples.insert(fields[1].to_string());
            entry.cohorts.insert(String::from(Self::DEFAULT_COHORT));
            if let Some(cohorts) = fields.get(2) {
                entry.cohorts.extend(cohorts.split(',').map(|c| c.trim()).filter(|c| !c.is_empty()).map(String::from));
            }
            if let Some(file) = fields.get(3).filter(|f| !f.is_empty()) {
                entry.files.insert(file.to_string());
            }
            result.add(fields[0], entry);
        }
        Ok(result)
    }

    fn entry(&self, study: &str) -> Result<&StudyEntry> {
        self.studies.get(study).ok_or_else(|| Error::malformed("STUDY", study, "unknown study"))
    }
}

impl MetadataRegistry for StudyRegistry {
    fn samples(&self, study: &str) -> Result<Vec<String>> {
        Ok(self.entry(study)?.samples.iter().cloned().collect())
    }

    fn files(&self, study: &str) -> Result<Vec<String>> {
        Ok(self.entry(study)?.files.iter().cloned().collect())
    }

    fn cohorts(&self, study: &str) -> Result<Vec<String>> {
        Ok(self.entry(study)?.cohorts.iter().cloned().collect())
    }
}

//-----------------------------------------------------------------------------

/// Parameters for schema evolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaParams {
    /// Maximum number of attempts for a statement that fails with a concurrent mutation.
    pub max_attempts: usize,
    /// Minimum backoff between attempts in milliseconds.
    pub min_backoff_ms: u64,
    /// Maximum backoff between attempts in milliseconds.
    pub max_backoff_ms: u64,
    /// Maximum number of columns in a single statement.
    pub batch_size: usize,
    /// Genotype layout for new studies.
    pub genotype_layout: GenotypeLayout,
}

impl SchemaParams {
    /// Default for [`Self::max_attempts`].
    pub const MAX_ATTEMPTS: usize = 5;

    /// Default for [`Self::min_backoff_ms`].
    pub const MIN_BACKOFF_MS: u64 = 100;

    /// Default for [`Self::max_backoff_ms`].
    pub const MAX_BACKOFF_MS: u64 = 1000;

    /// Default for [`Self::batch_size`].
    pub const BATCH_SIZE: usize = 5000;

    /// Returns the parameters with the given backoff range.
    pub fn with_backoff(self, min_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        SchemaParams { min_backoff_ms, max_backoff_ms, ..self }
    }

    /// Returns the parameters with the given batch size.
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        SchemaParams { batch_size, ..self }
    }

    /// Returns the parameters with the given genotype layout.
    pub fn with_genotype_layout(self, genotype_layout: GenotypeLayout) -> Self {
        SchemaParams { genotype_layout, ..self }
    }
}

impl Default for SchemaParams {
    fn default() -> Self {
        SchemaParams {
            max_attempts: Self::MAX_ATTEMPTS,
            min_backoff_ms: Self::MIN_BACKOFF_MS,
            max_backoff_ms: Self::MAX_BACKOFF_MS,
            batch_size: Self::BATCH_SIZE,
            genotype_layout: GenotypeLayout::default(),
        }
    }
}

/// Idempotent schema evolution through a store client.
///
/// The manager shares the column catalog with query compilation.
/// Columns added through the manager are registered in the catalog.
///
/// # Examples
///
/// ```
/// use variant_store::columns::{ColumnCatalog, StudyEntry};
/// use variant_store::schema::{SchemaManager, SchemaParams, SqliteStore, StudyRegistry};
/// use std::sync::Arc;
///
/// let store = SqliteStore::open_in_memory().unwrap();
/// let catalog = Arc::new(ColumnCatalog::new());
/// let mut manager = SchemaManager::new(store, catalog.clone(), SchemaParams::default());
/// manager.ensure_table("variants").unwrap();
///
/// let mut registry = StudyRegistry::new();
/// registry.add("studyA", StudyEntry::new(&["NA12877", "NA12878"], &["ALL"]));
/// let added = manager.register_study("variants", "studyA", &registry).unwrap();
/// assert_eq!(added.len(), 2 + 2 + 5);
///
/// // Nothing is missing the second time.
/// let added = manager.register_study("variants", "studyA", &registry).unwrap();
/// assert!(added.is_empty());
/// assert!(catalog.snapshot().contains("studyA_NA12878_S"));
/// ```
pub struct SchemaManager<S: StoreClient> {
    client: S,
    catalog: Arc<ColumnCatalog>,
    params: SchemaParams,
}

impl<S: StoreClient> SchemaManager<S> {
    /// Creates a manager using the client and the catalog.
    pub fn new(client: S, catalog: Arc<ColumnCatalog>, params: SchemaParams) -> Self {
        SchemaManager { client, catalog, params }
    }

    /// Returns the store client.
    pub fn client(&self) -> &S {
        &self.client
    }

    /// Returns a mutable reference to the store client.
    pub fn client_mut(&mut self) -> &mut S {
        &mut self.client
    }

    /// Returns the catalog.
    pub fn catalog(&self) -> &Arc<ColumnCatalog> {
        &self.catalog
    }

    /// Returns the parameters.
    pub fn params(&self) -> &SchemaParams {
        &self.params
    }

    /// Consumes the manager and returns the store client.
    pub fn into_client(self) -> S {
        self.client
    }

    // Runs the operation, retrying concurrent mutation errors with random backoff.
    fn with_retry<F>(&mut self, description: &str, mut operation: F) -> Result<()>
        where F: FnMut(&mut S) -> Result<()>
    {
        let attempts = self.params.max_attempts.max(1);
        let min_backoff = self.params.min_backoff_ms;
        let max_backoff = self.params.max_backoff_ms.max(min_backoff);
        let mut rng = rand::thread_rng();
        let mut attempt = 1;
        loop {
            match operation(&mut self.client) {
                Ok(()) => return Ok(()),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if attempt >= attempts {
                        return Err(Error::SchemaConflict { statement: description.to_string(), attempts: attempt });
                    }
                    let delay = rng.gen_range(min_backoff..=max_backoff);
                    warn!("Attempt {}/{} failed: {}; retrying in {} ms", attempt, attempts, err, delay);
                    if delay > 0 {
                        thread::sleep(Duration::from_millis(delay));
                    }
                    attempt += 1;
                },
            }
        }
    }

    /// Executes the statement, retrying concurrent mutation errors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaConflict`] if the statement still fails with a concurrent mutation after all attempts.
    /// Passes through other errors.
    pub fn execute_with_retry(&mut self, statement: &Statement) -> Result<()> {
        debug!("{}", statement);
        let description = statement.to_string();
        self.with_retry(&description, |client| client.execute(statement))
    }

    /// Creates the namespace if it does not exist.
    pub fn ensure_namespace(&mut self, namespace: &str) -> Result<()> {
        let statement = Statement::CreateNamespace(namespace.to_string());
        match self.execute_with_retry(&statement) {
            Err(err) if err.is_already_exists() => Ok(()),
            result => result,
        }
    }

    /// Creates the variant table if it does not exist.
    ///
    /// Returns `true` if this call created the table.
    ///
    /// # Errors
    ///
    /// Passes through store errors, unless the table exists after the failure.
    pub fn ensure_table(&mut self, table: &str) -> Result<bool> {
        if self.client.table_exists(table)? {
            return Ok(false);
        }
        let statement = Statement::create_variant_table(table);
        match self.execute_with_retry(&statement) {
            Ok(()) => {
                info!("Created table {}", table);
                Ok(true)
            },
            Err(err) if err.is_already_exists() => Ok(false),
            Err(err) => {
                if self.client.table_exists(table).unwrap_or(false) {
                    warn!("Table {} was created concurrently: {}", table, err);
                    Ok(false)
                } else {
                    Err(err)
                }
            },
        }
    }

    /// Adds the desired columns that are missing from the table and registers all of them in the catalog.
    ///
    /// Missing columns are added in batches of at most [`SchemaParams::batch_size`] columns.
    /// Returns the columns that were missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ColumnRedefinition`] before issuing any statements if a desired column exists with a different type.
    /// Passes through store errors.
    pub fn add_missing_columns(&mut self, table: &str, desired: &[ColumnDescriptor]) -> Result<Vec<ColumnDescriptor>> {
        let existing: HashMap<String, ColumnDescriptor> = self.client.list_columns(table)?
            .into_iter()
            .map(|column| (column.name.clone(), column))
            .collect();

        let mut missing: Vec<ColumnDescriptor> = Vec::new();
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for column in desired.iter() {
            if let Some(current) = existing.get(&column.name) {
                if current.sql_type != column.sql_type {
                    return Err(Error::ColumnRedefinition {
                        name: column.name.clone(),
                        existing: current.sql_type.to_string(),
                        requested: column.sql_type.to_string(),
                    });
                }
            } else if seen.insert(column.name.as_str()) {
                missing.push(column.clone());
            }
        }

        let batch_size = self.params.batch_size.max(1);
        for batch in missing.chunks(batch_size) {
            let statement = Statement::AddColumns { table: table.to_string(), columns: batch.to_vec() };
            match self.execute_with_retry(&statement) {
                Err(err) if err.is_already_exists() => {
                    warn!("Some columns were added concurrently: {}", err);
                },
                result => result?,
            }
        }
        if !missing.is_empty() {
            info!("Added {} columns to table {}", missing.len(), table);
        }

        self.catalog.register_columns(desired)?;
        Ok(missing)
    }

    /// Creates the index if it does not exist.
    pub fn create_index(&mut self, index: &IndexDefinition) -> Result<()> {
        debug!("{}", index.to_sql());
        let description = index.to_sql();
        match self.with_retry(&description, |client| client.create_index(index)) {
            Err(err) if err.is_already_exists() => Ok(()),
            result => result,
        }
    }

    /// Registers a study using the metadata from the registry.
    ///
    /// Adds the missing columns for the study and returns them.
    /// See [`columns::study_columns`] for the column set.
    pub fn register_study(&mut self, table: &str, study: &str, registry: &dyn MetadataRegistry) -> Result<Vec<ColumnDescriptor>> {
        let entry = StudyEntry {
            samples: registry.samples(study)?.into_iter().collect(),
            files: registry.files(study)?.into_iter().collect(),
            cohorts: registry.cohorts(study)?.into_iter().collect(),
        };
        let desired = columns::study_columns(study, &entry, self.params.genotype_layout);
        let added = self.add_missing_columns(table, &desired)?;
        self.catalog.register_study(study, &entry)?;
        info!(
            "Registered study {} with {} samples, {} files, and {} cohorts",
            study, entry.samples.len(), entry.files.len(), entry.cohorts.len()
        );
        Ok(added)
    }

    /// Creates the table, adds the human population frequency columns, and creates the initial indexes.
    ///
    /// The genotype layout is recorded in the store and in the catalog.
    ///
    /// # Errors
    ///
    /// Fails if the store or the catalog already uses a different genotype layout.
    pub fn initialize(&mut self, table: &str, advisor: &IndexAdvisor) -> Result<()> {
        let layout = self.params.genotype_layout;
        self.client.save_genotype_layout(layout)?;
        self.catalog.register_genotype_layout(layout)?;
        self.ensure_table(table)?;
        self.add_missing_columns(table, &columns::human_population_frequency_columns())?;
        for index in advisor.initial_indexes(table).iter() {
            self.create_index(index)?;
        }
        Ok(())
    }
}

//-----------------------------------------------------------------------------
