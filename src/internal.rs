use crate::{Error, Result, StoreErrorKind};
use crate::columns::{self, CatalogSnapshot, ColumnCatalog, ColumnDescriptor, GenotypeLayout};
use crate::compiler::{CompilerParams, GeneTable, QueryCompiler};
use crate::index::IndexDefinition;
use crate::schema::{MetadataRegistry, Statement, StoreClient, StudyRegistry};
use crate::utils;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

//-----------------------------------------------------------------------------

// Test data.

pub(crate) const TABLE: &str = "variants";

pub(crate) const STUDY_A: &str = "studyA";
pub(crate) const STUDY_B: &str = "studyB";

// Variant score registered for study A.
pub(crate) const SCORE: &str = "gwas";

// Latest release in the test catalog.
pub(crate) const RELEASE: u32 = 2;

pub(crate) fn test_registry() -> StudyRegistry {
    let reader = utils::open_file(utils::get_test_data("samples.tsv"));
    assert!(reader.is_ok(), "Failed to open the sample sheet: {}", reader.err().map(|e| e.to_string()).unwrap_or_default());
    let registry = StudyRegistry::read_sample_sheet(reader.unwrap());
    assert!(registry.is_ok(), "Failed to read the sample sheet: {}", registry.unwrap_err());
    registry.unwrap()
}

// Catalog with the studies from the sample sheet, population frequencies, a variant score, and releases.
pub(crate) fn test_catalog(layout: GenotypeLayout) -> ColumnCatalog {
    let registry = test_registry();
    let catalog = ColumnCatalog::new();
    for study in registry.studies() {
        let entry = registry.get(study).unwrap();
        let result = catalog.register_study(study, entry);
        assert!(result.is_ok(), "Failed to register study {}: {}", study, result.unwrap_err());
        let result = catalog.register_columns(&columns::study_columns(study, entry, layout));
        assert!(result.is_ok(), "Failed to register columns for study {}: {}", study, result.unwrap_err());
    }
    let mut extra = columns::human_population_frequency_columns();
    extra.push(columns::column_for_variant_score(STUDY_A, SCORE));
    extra.extend((1..=RELEASE).map(columns::column_for_release));
    let result = catalog.register_columns(&extra);
    assert!(result.is_ok(), "Failed to register columns: {}", result.unwrap_err());
    let result = catalog.register_release(RELEASE);
    assert!(result.is_ok(), "Failed to register release: {}", result.unwrap_err());
    catalog
}

pub(crate) fn test_snapshot(layout: GenotypeLayout) -> Arc<CatalogSnapshot> {
    test_catalog(layout).snapshot()
}

// Catalog with only study A.
pub(crate) fn single_study_snapshot() -> Arc<CatalogSnapshot> {
    let registry = test_registry();
    let catalog = ColumnCatalog::new();
    let entry = registry.get(STUDY_A).unwrap();
    catalog.register_study(STUDY_A, entry).unwrap();
    catalog.register_columns(&columns::study_columns(STUDY_A, entry, GenotypeLayout::PerSample)).unwrap();
    catalog.snapshot()
}

pub(crate) fn test_genes() -> GeneTable {
    let reader = utils::open_file(utils::get_test_data("genes.tsv"));
    assert!(reader.is_ok(), "Failed to open the gene table: {}", reader.err().map(|e| e.to_string()).unwrap_or_default());
    let genes = GeneTable::read_tsv(reader.unwrap());
    assert!(genes.is_ok(), "Failed to read the gene table: {}", genes.unwrap_err());
    genes.unwrap()
}

pub(crate) fn test_compiler(layout: GenotypeLayout) -> QueryCompiler {
    let params = CompilerParams::default().with_genotype_layout(layout);
    QueryCompiler::new(test_snapshot(layout), params)
}

pub(crate) fn test_compiler_with_genes(layout: GenotypeLayout) -> QueryCompiler {
    test_compiler(layout).with_resolver(Arc::new(test_genes()))
}

//-----------------------------------------------------------------------------

// An in-memory store client that records the statements and fails on demand.

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct InjectedFailure {
    pub kind: StoreErrorKind,
    // The statement takes effect even though it fails, as if another client executed it.
    pub applied: bool,
}

#[derive(Debug, Default)]
pub(crate) struct RecordingStore {
    tables: BTreeMap<String, Vec<ColumnDescriptor>>,
    indexes: BTreeSet<String>,
    pub statements: Vec<Statement>,
    pub failures: VecDeque<InjectedFailure>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    // The next statements fail with the given errors.
    pub fn fail_with(mut self, kind: StoreErrorKind, count: usize) -> Self {
        for _ in 0..count {
            self.failures.push_back(InjectedFailure { kind, applied: false });
        }
        self
    }

    // The next statement fails but takes effect.
    pub fn fail_applied(mut self, kind: StoreErrorKind) -> Self {
        self.failures.push_back(InjectedFailure { kind, applied: true });
        self
    }

    pub fn count<F: Fn(&Statement) -> bool>(&self, predicate: F) -> usize {
        self.statements.iter().filter(|s| predicate(s)).count()
    }

    pub fn add_column_statements(&self) -> usize {
        self.count(|s| matches!(s, Statement::AddColumns { .. }))
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains(name)
    }

    fn apply(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::CreateNamespace(_) => {},
            Statement::CreateTable { table, columns, .. } => {
                self.tables.entry(table.clone()).or_insert_with(|| columns.clone());
            },
            Statement::AddColumns { table, columns } => {
                let existing = self.tables.get_mut(table)
                    .ok_or_else(|| Error::store(StoreErrorKind::Fatal, format!("No table {}", table)))?;
                for column in columns.iter() {
                    if !existing.iter().any(|c| c.name == column.name) {
                        existing.push(column.clone());
                    }
                }
            },
            Statement::CreateIndex(index) => self.add_index(index),
        }
        Ok(())
    }

    fn add_index(&mut self, index: &IndexDefinition) {
        self.indexes.insert(index.name());
    }
}

impl StoreClient for RecordingStore {
    fn execute(&mut self, statement: &Statement) -> Result<()> {
        self.statements.push(statement.clone());
        if let Some(failure) = self.failures.pop_front() {
            if failure.applied {
                self.apply(statement)?;
            }
            return Err(Error::store(failure.kind, format!("Injected failure for {}", statement)));
        }
        self.apply(statement)
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        Ok(self.tables.contains_key(table))
    }

    fn list_columns(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.tables.get(table).cloned()
            .ok_or_else(|| Error::store(StoreErrorKind::Fatal, format!("No table {}", table)))
    }
}

//-----------------------------------------------------------------------------

// A metadata registry with a single study.

pub(crate) struct SingleStudy {
    pub samples: Vec<String>,
    pub cohorts: Vec<String>,
}

impl MetadataRegistry for SingleStudy {
    fn samples(&self, _study: &str) -> Result<Vec<String>> {
        Ok(self.samples.clone())
    }

    fn cohorts(&self, _study: &str) -> Result<Vec<String>> {
        Ok(self.cohorts.clone())
    }
}

pub(crate) fn single_study(samples: usize) -> SingleStudy {
    SingleStudy {
        samples: (0..samples).map(|i| format!("sample{}", i)).collect(),
        cohorts: vec![String::from(StudyRegistry::DEFAULT_COHORT)],
    }
}

//-----------------------------------------------------------------------------
