use super::*;

use crate::StoreErrorKind;
use crate::columns::{Category, SqlType};
use crate::internal::{self, RecordingStore, TABLE};
use crate::utils;

use std::io::Cursor;

//-----------------------------------------------------------------------------

fn fast_params() -> SchemaParams {
    SchemaParams::default().with_backoff(0, 0)
}

fn create_manager(store: RecordingStore, params: SchemaParams) -> SchemaManager<RecordingStore> {
    SchemaManager::new(store, Arc::new(ColumnCatalog::new()), params)
}

fn ensure_table(manager: &mut SchemaManager<RecordingStore>) {
    let result = manager.ensure_table(TABLE);
    assert!(result.is_ok(), "Failed to create the table: {}", result.unwrap_err());
}

//-----------------------------------------------------------------------------

#[test]
fn create_table() {
    let mut manager = create_manager(RecordingStore::new(), fast_params());
    let created = manager.ensure_table(TABLE);
    assert!(created.is_ok(), "Failed to create the table: {}", created.unwrap_err());
    assert!(created.unwrap(), "The table was not reported as created");

    let created = manager.ensure_table(TABLE);
    assert!(created.is_ok(), "Failed to ensure an existing table: {}", created.unwrap_err());
    assert!(!created.unwrap(), "An existing table was reported as created");
    assert_eq!(manager.client().statements.len(), 1, "Statements issued for an existing table");

    let columns = manager.client_mut().list_columns(TABLE).unwrap();
    assert_eq!(columns.len(), columns::FIXED_COLUMNS.len(), "Wrong number of columns in the new table");
}

#[test]
fn namespace_already_exists() {
    let store = RecordingStore::new().fail_with(StoreErrorKind::AlreadyExists, 1);
    let mut manager = create_manager(store, fast_params());
    let result = manager.ensure_namespace("genomes");
    assert!(result.is_ok(), "Existing namespace caused an error: {}", result.unwrap_err());
}

#[test]
fn idempotent_study_registration() {
    let mut manager = create_manager(RecordingStore::new(), fast_params());
    ensure_table(&mut manager);
    let registry = internal::single_study(3);

    let added = manager.register_study(TABLE, "study", &registry);
    assert!(added.is_ok(), "Failed to register the study: {}", added.unwrap_err());
    // Presence and fill-missing, samples, and five statistics columns for the default cohort.
    assert_eq!(added.unwrap().len(), 2 + 3 + 5, "Wrong number of added columns");
    assert_eq!(manager.client().add_column_statements(), 1, "Wrong number of ALTER statements");

    let added = manager.register_study(TABLE, "study", &registry);
    assert!(added.is_ok(), "Failed to register the study again: {}", added.unwrap_err());
    assert!(added.unwrap().is_empty(), "Columns added on the second registration");
    assert_eq!(manager.client().add_column_statements(), 1, "ALTER statements issued on the second registration");

    let snapshot = manager.catalog().snapshot();
    assert!(snapshot.contains("study_sample2_S"), "Sample column missing from the catalog");
    assert!(snapshot.study("study").is_some(), "Study missing from the catalog");
}

#[test]
fn batching() {
    let params = fast_params().with_batch_size(4);
    let mut manager = create_manager(RecordingStore::new(), params);
    ensure_table(&mut manager);

    let added = manager.register_study(TABLE, "study", &internal::single_study(10));
    assert!(added.is_ok(), "Failed to register the study: {}", added.unwrap_err());
    let added = added.unwrap();
    assert_eq!(added.len(), 17, "Wrong number of added columns");
    assert_eq!(manager.client().add_column_statements(), 5, "Wrong number of batches");
    let largest = manager.client().statements.iter().filter_map(|s| match s {
        Statement::AddColumns { columns, .. } => Some(columns.len()),
        _ => None,
    }).max();
    assert_eq!(largest, Some(4), "Batch size exceeded");
}

#[test]
fn retry_exhaustion() {
    let store = RecordingStore::new().fail_with(StoreErrorKind::ConcurrentMutation, 10);
    let params = SchemaParams { max_attempts: 3, ..fast_params() };
    let mut manager = create_manager(store, params);

    let result = manager.ensure_table(TABLE);
    match result {
        Err(Error::SchemaConflict { attempts, .. }) => assert_eq!(attempts, 3, "Wrong number of attempts"),
        Err(err) => panic!("Unexpected error: {}", err),
        Ok(_) => panic!("Persistent conflict did not fail"),
    }
    assert_eq!(manager.client().statements.len(), 3, "Wrong number of issued statements");
}

#[test]
fn retry_success() {
    let store = RecordingStore::new().fail_with(StoreErrorKind::ConcurrentMutation, 2);
    let mut manager = create_manager(store, fast_params());
    let result = manager.ensure_table(TABLE);
    assert!(result.is_ok(), "Retries did not recover from a transient conflict: {}", result.unwrap_err());
    assert_eq!(manager.client().statements.len(), 3, "Wrong number of issued statements");
    assert!(manager.client_mut().table_exists(TABLE).unwrap(), "Table was not created");
}

#[test]
fn benign_table_race() {
    let store = RecordingStore::new().fail_applied(StoreErrorKind::Fatal);
    let mut manager = create_manager(store, fast_params());
    let result = manager.ensure_table(TABLE);
    assert!(result.is_ok(), "Concurrent table creation caused an error: {}", result.unwrap_err());
    assert!(!result.unwrap(), "Table created by another client was reported as created");
}

#[test]
fn columns_added_concurrently() {
    let mut manager = create_manager(RecordingStore::new(), fast_params());
    ensure_table(&mut manager);
    manager.client_mut().failures.push_back(internal::InjectedFailure { kind: StoreErrorKind::AlreadyExists, applied: true });

    let added = manager.register_study(TABLE, "study", &internal::single_study(2));
    assert!(added.is_ok(), "Concurrently added columns caused an error: {}", added.unwrap_err());
    let columns = manager.client_mut().list_columns(TABLE).unwrap();
    assert!(columns.iter().any(|c| c.name == "study_sample1_S"), "Sample column missing from the table");
}

#[test]
fn fatal_errors() {
    let mut manager = create_manager(RecordingStore::new(), fast_params());
    ensure_table(&mut manager);
    manager.client_mut().failures.push_back(internal::InjectedFailure { kind: StoreErrorKind::Fatal, applied: false });

    let before = manager.client().statements.len();
    let result = manager.register_study(TABLE, "study", &internal::single_study(2));
    assert!(matches!(result, Err(Error::Store { kind: StoreErrorKind::Fatal, .. })), "Fatal error was not passed through");
    assert_eq!(manager.client().statements.len(), before + 1, "Fatal error was retried");
    assert!(manager.catalog().snapshot().study("study").is_none(), "Failed study was registered");
}

#[test]
fn column_redefinition() {
    let mut manager = create_manager(RecordingStore::new(), fast_params());
    ensure_table(&mut manager);
    let before = manager.client().statements.len();

    let redefined = ColumnDescriptor::new("CHROMOSOME", Category::Core, SqlType::INTEGER);
    let extra = ColumnDescriptor::new("extra", Category::Core, SqlType::VARCHAR);
    let result = manager.add_missing_columns(TABLE, &[extra, redefined]);
    assert!(matches!(result, Err(Error::ColumnRedefinition { .. })), "Column redefinition was accepted");
    assert_eq!(manager.client().statements.len(), before, "Statements issued before detecting the redefinition");
    assert!(!manager.catalog().snapshot().contains("extra"), "Columns registered despite the redefinition");
}

#[test]
fn initialize() {
    let mut manager = create_manager(RecordingStore::new(), fast_params());
    let advisor = IndexAdvisor::new();
    let result = manager.initialize(TABLE, &advisor);
    assert!(result.is_ok(), "Failed to initialize the schema: {}", result.unwrap_err());

    let snapshot = manager.catalog().snapshot();
    for column in columns::human_population_frequency_columns() {
        assert!(snapshot.contains(&column.name), "Population frequency column {} missing", column.name);
    }
    for index in advisor.initial_indexes(TABLE) {
        assert!(manager.client().has_index(&index.name()), "Index {} was not created", index.name());
    }

    let statements = manager.client().statements.len();
    let result = manager.initialize(TABLE, &advisor);
    assert!(result.is_ok(), "Failed to initialize the schema again: {}", result.unwrap_err());
    let new_alters = manager.client().statements[statements..].iter()
        .filter(|s| matches!(s, Statement::AddColumns { .. } | Statement::CreateTable { .. }))
        .count();
    assert_eq!(new_alters, 0, "Schema statements issued on the second initialization");
}

//-----------------------------------------------------------------------------

#[test]
fn statements() {
    let create = Statement::create_variant_table(TABLE).to_string();
    assert!(create.starts_with("CREATE TABLE IF NOT EXISTS \"variants\" ("), "Wrong CREATE TABLE statement: {}", create);
    assert!(create.contains("\"CHROMOSOME\" VARCHAR NOT NULL"), "Missing NOT NULL constraint: {}", create);
    assert!(create.contains("CONSTRAINT PK PRIMARY KEY (\"CHROMOSOME\", \"POSITION\", \"REFERENCE\", \"ALTERNATE\")"), "Wrong primary key: {}", create);

    let add = Statement::AddColumns {
        table: TABLE.to_string(),
        columns: vec![columns::column_for_sample("studyA", "NA12877"), columns::column_for_release(1)],
    };
    assert_eq!(
        add.to_string(),
        "ALTER TABLE \"variants\" ADD IF NOT EXISTS \"studyA_NA12877_S\" VARCHAR ARRAY, \"R_1\" BOOLEAN",
        "Wrong ALTER TABLE statement"
    );
    assert_eq!(
        Statement::CreateNamespace("genomes".to_string()).to_string(),
        "CREATE SCHEMA IF NOT EXISTS \"genomes\"",
        "Wrong CREATE SCHEMA statement"
    );
}

#[test]
fn sample_sheet() {
    let registry = internal::test_registry();
    let studies: Vec<&str> = registry.studies().collect();
    assert_eq!(studies, vec![internal::STUDY_A, internal::STUDY_B], "Wrong studies");

    let samples = registry.samples(internal::STUDY_A).unwrap();
    assert_eq!(samples, vec!["NA12877", "NA12878", "NA12879"], "Wrong samples for study A");
    let cohorts = registry.cohorts(internal::STUDY_A).unwrap();
    assert_eq!(cohorts, vec!["ALL", "EUR"], "Wrong cohorts for study A");
    let files = registry.files(internal::STUDY_B).unwrap();
    assert_eq!(files, vec!["gbr.vcf.gz"], "Wrong files for study B");
    assert!(registry.samples("studyC").is_err(), "Unknown study accepted");

    let gzipped = StudyRegistry::read_sample_sheet(utils::open_file(utils::get_test_data("samples.tsv.gz")).unwrap());
    assert!(gzipped.is_ok(), "Failed to read the compressed sample sheet: {}", gzipped.unwrap_err());
    assert_eq!(gzipped.unwrap(), registry, "Compressed sample sheet differs");

    let malformed = StudyRegistry::read_sample_sheet(Cursor::new("studyA\n"));
    assert!(matches!(malformed, Err(Error::MalformedQueryParam { .. })), "Line without a sample accepted");
}

//-----------------------------------------------------------------------------

#[test]
fn sqlite_store() {
    let filename = utils::temp_file_name("variant-store");
    let store = SqliteStore::create(&filename);
    assert!(store.is_ok(), "Failed to create the database: {}", store.unwrap_err());
    let catalog = Arc::new(ColumnCatalog::new());
    let mut manager = SchemaManager::new(store.unwrap(), catalog.clone(), fast_params());

    let result = manager.initialize(TABLE, &IndexAdvisor::new());
    assert!(result.is_ok(), "Failed to initialize the database: {}", result.unwrap_err());
    let registry = internal::test_registry();
    for study in registry.studies() {
        let added = manager.register_study(TABLE, study, &registry);
        assert!(added.is_ok(), "Failed to register study {}: {}", study, added.unwrap_err());
        let saved = manager.client_mut().save_study(study, registry.get(study).unwrap());
        assert!(saved.is_ok(), "Failed to save study {}: {}", study, saved.unwrap_err());
    }
    let result = manager.client_mut().save_release(3);
    assert!(result.is_ok(), "Failed to save the release: {}", result.unwrap_err());

    // Registering again issues nothing that fails.
    let added = manager.register_study(TABLE, internal::STUDY_A, &registry);
    assert!(added.is_ok(), "Failed to register the study again: {}", added.unwrap_err());
    assert!(added.unwrap().is_empty(), "Columns added on the second registration");
    drop(manager);

    let store = SqliteStore::open(&filename);
    assert!(store.is_ok(), "Failed to open the database: {}", store.unwrap_err());
    let mut store = store.unwrap();
    let loaded = store.load_catalog(TABLE);
    assert!(loaded.is_ok(), "Failed to load the catalog: {}", loaded.unwrap_err());
    let loaded = loaded.unwrap().snapshot();
    let expected = catalog.snapshot();
    assert_eq!(loaded.study_count(), 2, "Wrong number of loaded studies");
    assert_eq!(loaded.study(internal::STUDY_A), expected.study(internal::STUDY_A), "Wrong metadata for study A");
    assert_eq!(loaded.release(), 3, "Wrong release");
    for column in expected.dynamic_columns() {
        assert_eq!(loaded.column(&column.name).as_ref(), Some(column), "Wrong loaded column {}", column.name);
    }

    let duplicate = SqliteStore::create(&filename);
    assert!(matches!(duplicate, Err(Error::Store { kind: StoreErrorKind::AlreadyExists, .. })), "Existing database was overwritten");
    drop(store);
    let _ = std::fs::remove_file(&filename);
}

//-----------------------------------------------------------------------------
