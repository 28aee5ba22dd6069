//! A store client backed by a SQLite database.
//!
//! The variant table uses the declared types of the column store, so that [`StoreClient::list_columns`] can recover them.
//! Array values are stored as JSON text, and array element indexes become `json_extract` expression indexes.
//! Namespaces, index scopes, covered columns, and asynchronous index builds have no SQLite counterpart and are ignored.
//!
//! The database also stores the registered studies and the latest release, which are needed for loading the column catalog.

use crate::{Error, Result, StoreErrorKind};
use crate::columns::{self, ColumnCatalog, ColumnDescriptor, GenotypeLayout, SqlType, StudyEntry};
use crate::index::IndexDefinition;
use crate::utils;

use super::{Statement, StoreClient};

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rusqlite::{Connection, OptionalExtension};

use tracing::{debug, info};

//-----------------------------------------------------------------------------

/// A SQLite database storing the variant table and study metadata.
///
/// # Examples
///
/// ```
/// use variant_store::schema::{SqliteStore, Statement, StoreClient};
///
/// let mut store = SqliteStore::open_in_memory().unwrap();
/// assert!(!store.table_exists("variants").unwrap());
/// store.execute(&Statement::create_variant_table("variants")).unwrap();
/// assert!(store.table_exists("variants").unwrap());
///
/// let columns = store.list_columns("variants").unwrap();
/// assert_eq!(columns[0].name, "CHROMOSOME");
/// ```
#[derive(Debug)]
pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    /// Version of the metadata layout.
    pub const VERSION: &'static str = "Variant-store v0.1.0";

    // Key for the version.
    const KEY_VERSION: &'static str = "version";

    // Key for the latest release.
    const KEY_RELEASE: &'static str = "release";

    // Key for the genotype layout.
    const KEY_GENOTYPE_LAYOUT: &'static str = "genotype_layout";

    // Study metadata kinds.
    const KIND_STUDY: &'static str = "study";
    const KIND_SAMPLE: &'static str = "sample";
    const KIND_FILE: &'static str = "file";
    const KIND_COHORT: &'static str = "cohort";

    /// Creates a new database in the given file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file already exists.
    /// Passes through database errors.
    pub fn create<P: AsRef<Path>>(filename: P) -> Result<Self> {
        if utils::file_exists(&filename) {
            return Err(Error::store(
                StoreErrorKind::AlreadyExists,
                format!("Database {} already exists", filename.as_ref().display())
            ));
        }
        info!("Creating database {}", filename.as_ref().display());
        let mut connection = Connection::open(filename)?;
        Self::create_metadata(&mut connection)?;
        Ok(SqliteStore { connection })
    }

    /// Opens an existing database in the given file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or the metadata version is not supported.
    pub fn open<P: AsRef<Path>>(filename: P) -> Result<Self> {
        if !utils::file_exists(&filename) {
            return Err(Error::store(
                StoreErrorKind::Fatal,
                format!("Database {} does not exist", filename.as_ref().display())
            ));
        }
        let connection = Connection::open(filename)?;
        let version = Self::get_tag(&connection, Self::KEY_VERSION)?;
        match version {
            Some(version) if version == Self::VERSION => Ok(SqliteStore { connection }),
            Some(version) => Err(Error::store(
                StoreErrorKind::Fatal,
                format!("Unsupported database version: {} (expected {})", version, Self::VERSION)
            )),
            None => Err(Error::store(StoreErrorKind::Fatal, "Missing database version")),
        }
    }

    /// Creates a new in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let mut connection = Connection::open_in_memory()?;
        Self::create_metadata(&mut connection)?;
        Ok(SqliteStore { connection })
    }

    fn create_metadata(connection: &mut Connection) -> rusqlite::Result<()> {
        connection.execute(
            "CREATE TABLE IF NOT EXISTS Tags (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            ) STRICT",
            (),
        )?;
        connection.execute(
            "CREATE TABLE IF NOT EXISTS Studies (
                study TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                PRIMARY KEY (study, kind, name)
            ) STRICT",
            (),
        )?;
        connection.execute(
            "INSERT OR REPLACE INTO Tags(key, value) VALUES (?1, ?2)",
            (Self::KEY_VERSION, Self::VERSION),
        )?;
        Ok(())
    }

    fn get_tag(connection: &Connection, key: &str) -> Result<Option<String>> {
        let table = connection.query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'Tags'",
            (),
            |row| row.get::<_, String>(0)
        ).optional()?;
        if table.is_none() {
            return Ok(None);
        }
        let value = connection.query_row(
            "SELECT value FROM Tags WHERE key = ?1",
            (key,),
            |row| row.get::<_, String>(0)
        ).optional()?;
        Ok(value)
    }

    /// Returns the filename of the database, or [`None`] for an in-memory database.
    pub fn filename(&self) -> Option<&str> {
        self.connection.path().filter(|path| !path.is_empty())
    }

    /// Returns the size of the database file in a human-readable format.
    pub fn file_size(&self) -> Option<String> {
        let filename = self.filename()?;
        utils::file_size(filename)
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    //-------------------------------------------------------------------------

    /// Stores the study with its samples, files, and cohorts.
    ///
    /// Existing metadata for the study is extended.
    pub fn save_study(&mut self, study: &str, entry: &StudyEntry) -> Result<()> {
        let transaction = self.connection.transaction()?;
        {
            let mut insert = transaction.prepare(
                "INSERT OR IGNORE INTO Studies(study, kind, name) VALUES (?1, ?2, ?3)"
            )?;
            insert.execute((study, Self::KIND_STUDY, ""))?;
            for sample in entry.samples.iter() {
                insert.execute((study, Self::KIND_SAMPLE, sample))?;
            }
            for file in entry.files.iter() {
                insert.execute((study, Self::KIND_FILE, file))?;
            }
            for cohort in entry.cohorts.iter() {
                insert.execute((study, Self::KIND_COHORT, cohort))?;
            }
        }
        transaction.commit()?;
        Ok(())
    }

    /// Stores the latest release.
    pub fn save_release(&mut self, release: u32) -> Result<()> {
        self.connection.execute(
            "INSERT OR REPLACE INTO Tags(key, value) VALUES (?1, ?2)",
            (Self::KEY_RELEASE, release.to_string()),
        )?;
        Ok(())
    }

    /// Returns the stored genotype layout, or [`None`] if the schema has not been initialized.
    pub fn load_genotype_layout(&self) -> Result<Option<GenotypeLayout>> {
        match Self::get_tag(&self.connection, Self::KEY_GENOTYPE_LAYOUT)? {
            Some(layout) => Ok(Some(layout.parse::<GenotypeLayout>()?)),
            None => Ok(None),
        }
    }

    /// Loads the stored studies.
    pub fn load_studies(&self) -> Result<BTreeMap<String, StudyEntry>> {
        let mut result: BTreeMap<String, StudyEntry> = BTreeMap::new();
        let mut select = self.connection.prepare(
            "SELECT study, kind, name FROM Studies ORDER BY study, kind, name"
        )?;
        let mut rows = select.query(())?;
        while let Some(row) = rows.next()? {
            let study: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let name: String = row.get(2)?;
            let entry = result.entry(study).or_default();
            match kind.as_str() {
                Self::KIND_SAMPLE => { entry.samples.insert(name); },
                Self::KIND_FILE => { entry.files.insert(name); },
                Self::KIND_COHORT => { entry.cohorts.insert(name); },
                _ => {},
            }
        }
        Ok(result)
    }

    /// Builds a column catalog from the columns of the table and the stored metadata.
    ///
    /// The catalog includes the studies, the latest release, and the genotype layout.
    ///
    /// # Errors
    ///
    /// Passes through database errors and column type conflicts.
    pub fn load_catalog(&mut self, table: &str) -> Result<ColumnCatalog> {
        let catalog = ColumnCatalog::new();
        let columns = self.list_columns(table)?;
        catalog.register_columns(&columns)?;
        for (study, entry) in self.load_studies()?.iter() {
            catalog.register_study(study, entry)?;
        }
        if let Some(release) = Self::get_tag(&self.connection, Self::KEY_RELEASE)? {
            let release = release.parse::<u32>().map_err(|x| Error::store(StoreErrorKind::Fatal, format!("Invalid release {}: {}", release, x)))?;
            catalog.register_release(release)?;
        }
        if let Some(layout) = self.load_genotype_layout()? {
            catalog.register_genotype_layout(layout)?;
        }
        Ok(catalog)
    }

    //-------------------------------------------------------------------------

    // Returns the SQLite form of an index column.
    fn index_expression(column: &str, element: Option<usize>) -> String {
        match element {
            Some(element) => format!("json_extract({}, '$[{}]')", columns::quote_identifier(column), element.saturating_sub(1)),
            None => columns::quote_identifier(column),
        }
    }

    /// Returns the SQLite statement creating the index.
    pub fn index_sql(index: &IndexDefinition) -> String {
        let expressions: Vec<String> = index.columns.iter().map(|c| Self::index_expression(&c.column, c.element)).collect();
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            columns::quote_identifier(&index.name()), columns::quote_identifier(&index.table), expressions.join(", ")
        )
    }

    fn existing_columns(connection: &Connection, table: &str) -> Result<BTreeSet<String>> {
        let mut select = connection.prepare(&format!("PRAGMA table_info({})", columns::quote_identifier(table)))?;
        let names = select.query_map((), |row| row.get::<_, String>(1))?;
        let mut result = BTreeSet::new();
        for name in names {
            result.insert(name?);
        }
        Ok(result)
    }

    fn add_columns(&mut self, table: &str, new_columns: &[ColumnDescriptor]) -> Result<()> {
        let transaction = self.connection.transaction()?;
        let existing = Self::existing_columns(&transaction, table)?;
        let mut added = 0;
        for column in new_columns.iter().filter(|c| !existing.contains(&c.name)) {
            let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", columns::quote_identifier(table), column.quoted(), column.sql_type);
            transaction.execute(&sql, ())?;
            added += 1;
        }
        transaction.commit()?;
        debug!("Added {} columns to {}", added, table);
        Ok(())
    }
}

impl StoreClient for SqliteStore {
    fn execute(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::CreateNamespace(_) => Ok(()),
            Statement::CreateTable { .. } => {
                self.connection.execute(&statement.to_string(), ())?;
                Ok(())
            },
            Statement::AddColumns { table, columns } => self.add_columns(table, columns),
            Statement::CreateIndex(index) => self.create_index(index),
        }
    }

    fn create_index(&mut self, index: &IndexDefinition) -> Result<()> {
        self.connection.execute(&Self::index_sql(index), ())?;
        Ok(())
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let found = self.connection.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            (table,),
            |row| row.get::<_, i64>(0)
        ).optional()?;
        Ok(found.is_some())
    }

    fn list_columns(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let mut select = self.connection.prepare(&format!("PRAGMA table_info({})", columns::quote_identifier(table)))?;
        let rows = select.query_map((), |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?;
        let mut result = Vec::new();
        for row in rows {
            let (name, declared) = row?;
            let sql_type = SqlType::parse(&declared).ok_or_else(|| Error::store(
                StoreErrorKind::Fatal,
                format!("Column {} of table {} has an unsupported type {}", name, table, declared)
            ))?;
            let category = columns::infer_category(&name);
            result.push(ColumnDescriptor::new(name, category, sql_type));
        }
        Ok(result)
    }

    fn save_genotype_layout(&mut self, layout: GenotypeLayout) -> Result<()> {
        if let Some(existing) = self.load_genotype_layout()? {
            if existing != layout {
                return Err(Error::store(
                    StoreErrorKind::Fatal,
                    format!("The database uses the {} genotype layout, not {}", existing, layout)
                ));
            }
            return Ok(());
        }
        self.connection.execute(
            "INSERT INTO Tags(key, value) VALUES (?1, ?2)",
            (Self::KEY_GENOTYPE_LAYOUT, layout.to_string()),
        )?;
        debug!("Stored the {} genotype layout", layout);
        Ok(())
    }
}

//-----------------------------------------------------------------------------
