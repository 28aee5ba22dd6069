use super::*;

use crate::compiler::{CompilerParams, Projection, QueryOptions};
use crate::index::IndexAdvisor;
use crate::internal::{self, RELEASE, STUDY_A, STUDY_B, TABLE};
use crate::query::Query;
use crate::schema::{SchemaManager, SchemaParams, SqliteStore};

use std::sync::Arc;
use std::thread;

//-----------------------------------------------------------------------------

fn create_store() -> (SqliteStore, std::path::PathBuf) {
    let filename = utils::temp_file_name("variant-store");
    let store = SqliteStore::create(&filename);
    assert!(store.is_ok(), "Failed to create database {}: {}", filename.display(), store.unwrap_err());
    (store.unwrap(), filename)
}

fn open_store(filename: &std::path::Path) -> SqliteStore {
    let store = SqliteStore::open(filename);
    assert!(store.is_ok(), "Failed to open database {}: {}", filename.display(), store.unwrap_err());
    store.unwrap()
}

// Initializes the table and registers the studies from the sample sheet.
fn populate(store: SqliteStore, layout: columns::GenotypeLayout) -> SqliteStore {
    let catalog = Arc::new(columns::ColumnCatalog::new());
    let params = SchemaParams::default().with_backoff(0, 0).with_genotype_layout(layout);
    let mut manager = SchemaManager::new(store, catalog, params);
    let result = manager.initialize(TABLE, &IndexAdvisor::new());
    assert!(result.is_ok(), "Failed to initialize the table: {}", result.unwrap_err());

    let registry = internal::test_registry();
    for study in registry.studies() {
        let result = manager.register_study(TABLE, study, &registry);
        assert!(result.is_ok(), "Failed to register study {}: {}", study, result.unwrap_err());
        let result = manager.client_mut().save_study(study, registry.get(study).unwrap());
        assert!(result.is_ok(), "Failed to save study {}: {}", study, result.unwrap_err());
    }

    let releases: Vec<columns::ColumnDescriptor> = (1..=RELEASE).map(columns::column_for_release).collect();
    let result = manager.add_missing_columns(TABLE, &releases);
    assert!(result.is_ok(), "Failed to add release columns: {}", result.unwrap_err());
    let result = manager.client_mut().save_release(RELEASE);
    assert!(result.is_ok(), "Failed to save the release: {}", result.unwrap_err());

    manager.into_client()
}

//-----------------------------------------------------------------------------

#[test]
fn compile_against_stored_schema() {
    let (store, filename) = create_store();
    drop(populate(store, columns::GenotypeLayout::PerSample));

    let mut store = open_store(&filename);
    let catalog = store.load_catalog(TABLE);
    assert!(catalog.is_ok(), "Failed to load the catalog: {}", catalog.unwrap_err());
    let snapshot = catalog.unwrap().snapshot();
    assert_eq!(snapshot.studies().collect::<Vec<_>>(), vec![STUDY_A, STUDY_B], "Wrong studies in the stored catalog");
    assert_eq!(snapshot.release(), RELEASE, "Wrong release in the stored catalog");
    assert_eq!(snapshot.genotype_layout(), Some(columns::GenotypeLayout::PerSample), "Wrong genotype layout in the stored catalog");

    let reader = utils::open_file(utils::get_test_data("query.txt"));
    assert!(reader.is_ok(), "Failed to open the query file: {}", reader.err().map(|e| e.to_string()).unwrap_or_default());
    let query = Query::read(reader.unwrap());
    assert!(query.is_ok(), "Failed to read the query: {}", query.unwrap_err());
    let query = query.unwrap();

    let compiler = QueryCompiler::new(snapshot.clone(), CompilerParams::default());
    let options = QueryOptions::default().with_projection(Projection::COORDINATES).with_limit(100);
    let plan = compiler.compile(&query, &options);
    assert!(plan.is_ok(), "Failed to compile {}: {}", query, plan.unwrap_err());
    let plan = plan.unwrap();

    let expected = "SELECT \"CHROMOSOME\", \"POSITION\", \"REFERENCE\", \"ALTERNATE\", \"TYPE\" FROM \"variants\" WHERE ( \
        ( \"CHROMOSOME\" = '1' AND \"POSITION\" >= 1000 AND \"POSITION\" <= 2000 ) AND \
        ( ( ( \"studyA_NA12877_S\"[1] = '0/1' ) OR ( \"studyA_NA12877_S\"[1] = '1/1' ) ) ) AND \
        ( 1583 = ANY(\"A_SO\") ) AND \
        ( ( \"A_PF_1000G_ALL\"[2] < 0.01 OR \"A_PF_1000G_ALL\"[2] IS NULL ) ) ) LIMIT 100";
    assert_eq!(plan.to_sql(), expected, "Wrong statement for the stored schema");
    for column in plan.referenced_columns() {
        assert!(snapshot.contains(column), "Plan references column {} that is not in the table", column);
    }

    drop(store);
    let _ = std::fs::remove_file(&filename);
}

#[test]
fn stored_genotype_layout() {
    let (store, filename) = create_store();
    drop(populate(store, columns::GenotypeLayout::PerCategory));

    let mut store = open_store(&filename);
    let catalog = store.load_catalog(TABLE);
    assert!(catalog.is_ok(), "Failed to load the catalog: {}", catalog.unwrap_err());
    let snapshot = catalog.unwrap().snapshot();
    let layout = snapshot.genotype_layout();
    assert_eq!(layout, Some(columns::GenotypeLayout::PerCategory), "Wrong genotype layout in the stored catalog");

    let params = CompilerParams::default().with_genotype_layout(layout.unwrap_or_default());
    let compiler = QueryCompiler::new(snapshot.clone(), params);
    let query = Query::new().with("GENOTYPE", "studyA:NA12877:0/1");
    let plan = compiler.compile(&query, &QueryOptions::default());
    assert!(plan.is_ok(), "Failed to compile {}: {}", query, plan.unwrap_err());
    let plan = plan.unwrap();
    let referenced = plan.referenced_columns();
    assert!(referenced.contains("studyA_HET_GT"), "Genotype filter does not use the category column: {}", plan.where_clause);
    for column in referenced {
        assert!(snapshot.contains(column), "Plan references column {} that is not in the table", column);
    }

    // The layout cannot change once the table exists.
    let catalog = Arc::new(columns::ColumnCatalog::new());
    let params = SchemaParams::default().with_backoff(0, 0).with_genotype_layout(columns::GenotypeLayout::PerSample);
    let mut manager = SchemaManager::new(store, catalog, params);
    let result = manager.initialize(TABLE, &IndexAdvisor::new());
    assert!(result.is_err(), "Initialized a per-category database with the per-sample layout");

    drop(manager);
    let _ = std::fs::remove_file(&filename);
}

#[test]
fn registration_while_compiling() {
    let catalog = Arc::new(internal::test_catalog(columns::GenotypeLayout::PerSample));
    let query = Query::new().with("GENOTYPE", "studyA:NA12877:0/1");
    let expected = {
        let compiler = QueryCompiler::new(catalog.snapshot(), CompilerParams::default());
        compiler.compile(&query, &QueryOptions::default()).unwrap()
    };

    let threads = 4;
    let mut handles = Vec::new();
    for thread_id in 0..threads {
        let catalog = catalog.clone();
        let query = query.clone();
        let expected = expected.clone();
        handles.push(thread::spawn(move || {
            for i in 0..20 {
                // New studies must not change the predicate.
                let study = format!("study_{}_{}", thread_id, i);
                let entry = columns::StudyEntry::new(&["sample"], &[schema::StudyRegistry::DEFAULT_COHORT]);
                catalog.register_study(&study, &entry).unwrap();
                catalog.register_columns(&columns::study_columns(&study, &entry, columns::GenotypeLayout::PerSample)).unwrap();

                let compiler = QueryCompiler::new(catalog.snapshot(), CompilerParams::default());
                let plan = compiler.compile(&query, &QueryOptions::default()).unwrap();
                assert_eq!(plan.where_clause, expected.where_clause, "Registration changed the predicate");
            }
        }));
    }
    for handle in handles {
        assert!(handle.join().is_ok(), "A registration thread panicked");
    }

    let snapshot = catalog.snapshot();
    assert_eq!(snapshot.study_count(), 2 + threads * 20, "Wrong number of studies after concurrent registration");
    assert!(snapshot.contains("study_3_19_sample_S"), "Missing column from concurrent registration");
}

#[test]
fn row_keys_for_identifiers() {
    let compiler = internal::test_compiler(columns::GenotypeLayout::PerSample);
    let key = VariantKey::new("chr1", 1000, "A", "C");
    let query = Query::new().with("ID", &key.to_string());
    let plan = compiler.compile(&query, &QueryOptions::default());
    assert!(plan.is_ok(), "Failed to compile {}: {}", query, plan.unwrap_err());
    let plan = plan.unwrap();
    assert_eq!(
        plan.inclusive[0].sql(),
        "(\"CHROMOSOME\", \"POSITION\", \"REFERENCE\", \"ALTERNATE\") IN (('1', 1000, 'A', 'C'))",
        "Wrong predicate for a variant identifier"
    );

    let decoded = VariantKey::decode(&key.encode());
    assert!(decoded.is_ok(), "Failed to decode the row key: {}", decoded.unwrap_err());
    assert_eq!(decoded.unwrap().to_string(), key.to_string(), "Row key does not identify the same variant");
}

//-----------------------------------------------------------------------------
