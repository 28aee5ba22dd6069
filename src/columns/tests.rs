use super::*;

//-----------------------------------------------------------------------------

#[test]
fn sql_types() {
    assert_eq!(SqlType::VARCHAR_ARRAY.to_string(), "VARCHAR ARRAY", "Wrong array type name");
    assert_eq!(SqlType::UNSIGNED_INT.to_string(), "UNSIGNED_INT", "Wrong scalar type name");
    assert_eq!(SqlType::BINARY.to_string(), "VARBINARY", "Wrong binary type name");
    assert_eq!(SqlType::FLOAT_ARRAY.element(), SqlType::FLOAT, "Wrong element type");
    assert!(SqlType::INTEGER_ARRAY.is_array(), "INTEGER ARRAY is not an array");
    assert!(!SqlType::FLOAT.is_array(), "FLOAT is an array");

    for sql_type in [SqlType::VARCHAR, SqlType::INTEGER_ARRAY, SqlType::BOOLEAN, SqlType::BINARY, SqlType::FLOAT_ARRAY] {
        let parsed = SqlType::parse(&sql_type.to_string());
        assert_eq!(parsed, Some(sql_type), "Display/parse mismatch for {}", sql_type);
    }
    assert_eq!(SqlType::parse("double"), Some(SqlType::FLOAT), "DOUBLE not parsed as FLOAT");
    assert_eq!(SqlType::parse("BLOB"), None, "Unknown type parsed");
}

#[test]
fn fixed_columns() {
    let mut names: Vec<&str> = FIXED_COLUMNS.iter().map(|c| c.name).collect();
    let len = names.len();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), len, "Duplicate fixed column names");

    for column in PRIMARY_KEY.iter() {
        assert_eq!(column.category, Category::Core, "Primary key column {} is not a core column", column);
        assert_eq!(fixed_column(column.name), Some(*column), "Primary key column {} not found", column);
    }
    assert_eq!(fixed_column("A_SIFT"), Some(SIFT), "SIFT column not found");
    assert_eq!(SIFT.sql_type, SqlType::FLOAT_ARRAY, "Wrong SIFT type");
    assert_eq!(fixed_column("studyA_presence"), None, "Dynamic column found in the fixed table");
    assert_eq!(CHROMOSOME.quoted(), "\"CHROMOSOME\"", "Wrong quoted name");
}

#[test]
fn score_lookups() {
    assert_eq!(conservation_column("phastCons"), Some(PHASTCONS), "phastCons not found");
    assert_eq!(conservation_column("GERP"), Some(GERP), "GERP not found");
    assert_eq!(conservation_column("cadd_raw"), None, "Functional score found as conservation");
    assert_eq!(functional_score_column("cadd_scaled"), Some(CADD_SCALED), "cadd_scaled not found");
    assert_eq!(functional_score_column("sift"), None, "Unknown functional score found");
}

//-----------------------------------------------------------------------------

#[test]
fn dynamic_names() {
    assert_eq!(column_for_study_presence("studyA").name, "studyA_presence", "Wrong presence column");
    assert_eq!(column_for_fill_missing("studyA").name, "_studyA_FM", "Wrong fill-missing column");
    assert_eq!(column_for_sample("studyA", "NA12877").name, "studyA_NA12877_S", "Wrong sample column");
    assert_eq!(column_for_file("studyA", "chr22.vcf").name, "studyA_chr22.vcf_F", "Wrong file column");
    assert_eq!(column_for_release(3).name, "R_3", "Wrong release column");
    assert_eq!(column_for_variant_score("studyA", "gwas").name, "studyA_gwas_VS", "Wrong score column");
    assert_eq!(
        column_for_genotype_category("studyA", GenotypeCategory::HomAlt).name, "studyA_HOM_ALT_GT",
        "Wrong genotype category column"
    );

    let stats = cohort_stats_columns("studyA", "ALL");
    let names: Vec<&str> = stats.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["studyA_ALL_PB", "studyA_ALL_CF", "studyA_ALL_MAF", "studyA_ALL_MGF", "studyA_ALL_PSF"], "Wrong cohort columns");
    assert!(stats.iter().all(|c| c.category == Category::CohortStats), "Wrong cohort column category");
    assert_eq!(stats[0].sql_type, SqlType::BINARY, "Wrong stats column type");
    assert_eq!(stats[1].sql_type, SqlType::FLOAT_ARRAY, "Wrong frequency column type");

    // Names are pure functions of the owners.
    assert_eq!(column_for_sample("s", "x"), column_for_sample("s", "x"), "Sample column is not deterministic");
}

#[test]
fn population_frequency_names() {
    let column = column_for_population_frequency("gnomad_genomes", "nfe");
    assert_eq!(column.name, "A_PF_GNOMAD_GENOMES_NFE", "Wrong population frequency column");
    assert_eq!(column.sql_type, SqlType::FLOAT_ARRAY, "Wrong population frequency type");
    assert_eq!(column_for_population_frequency("ESP_6500", "EA").name, "A_PF_ESP6500_EA", "Alias not applied");

    let from_key = population_frequency_column("1kG_phase3:ALL");
    assert_eq!(from_key.map(|c| c.name), Some(String::from("A_PF_1KG_PHASE3_ALL")), "Wrong column from key");
    assert!(population_frequency_column("EXAC").is_none(), "Key without population accepted");
    assert!(population_frequency_column("EXAC:").is_none(), "Key with an empty population accepted");

    let human = human_population_frequency_columns();
    assert_eq!(human.len(), 3 + 8 + 1 + 4 + 10 + 10 + 33 + 33, "Wrong number of human population columns");
    assert!(human.iter().any(|c| c.name == "A_PF_1000G_ALL"), "1000G ALL missing");
    assert!(human.iter().any(|c| c.name == "A_PF_EXAC_ALL"), "EXAC ALL missing");
}

#[test]
fn genotype_categories() {
    assert_eq!(GenotypeCategory::of("0/0"), None, "Hom-ref has a category");
    assert_eq!(GenotypeCategory::of("0|0"), None, "Phased hom-ref has a category");
    assert_eq!(GenotypeCategory::of("0/1"), Some(GenotypeCategory::Het), "Wrong category for 0/1");
    assert_eq!(GenotypeCategory::of("1|0"), Some(GenotypeCategory::Het), "Wrong category for 1|0");
    assert_eq!(GenotypeCategory::of("1/1"), Some(GenotypeCategory::HomAlt), "Wrong category for 1/1");
    assert_eq!(GenotypeCategory::of("./."), Some(GenotypeCategory::NoCall), "Wrong category for ./.");
    assert_eq!(GenotypeCategory::of("1/2"), Some(GenotypeCategory::Other), "Wrong category for 1/2");
}

//-----------------------------------------------------------------------------

#[test]
fn catalog_registration() {
    let catalog = ColumnCatalog::new();
    let initial = catalog.snapshot();
    assert_eq!(initial.dynamic_len(), 0, "New catalog has dynamic columns");
    assert!(initial.contains("CHROMOSOME"), "Fixed column missing from a new catalog");

    let columns = vec![column_for_study_presence("studyA"), column_for_sample("studyA", "s1")];
    let added = catalog.register_columns(&columns);
    assert!(added.is_ok(), "Failed to register columns: {}", added.unwrap_err());
    assert_eq!(added.unwrap(), 2, "Wrong number of new columns");

    // Registering again is a no-op, and so is a fixed column with the same type.
    let again = catalog.register_columns(columns.iter().chain(std::iter::once(&TYPE.descriptor())));
    assert_eq!(again.unwrap(), 0, "Existing columns registered again");

    let snapshot = catalog.snapshot();
    assert_eq!(snapshot.column("studyA_s1_S"), Some(column_for_sample("studyA", "s1")), "Registered column not found");
    assert_eq!(snapshot.column("A_GENES"), Some(GENES.descriptor()), "Fixed column not found");
    assert!(snapshot.version() > initial.version(), "Version did not increase");
}

#[test]
fn column_redefinition() {
    let catalog = ColumnCatalog::new();
    catalog.register_columns(&[column_for_study_presence("studyA")]).unwrap();
    let before = catalog.snapshot();

    let redefined = ColumnDescriptor::new("studyA_presence", Category::Study, SqlType::VARCHAR);
    let new_column = column_for_fill_missing("studyA");
    let result = catalog.register_columns(&[new_column.clone(), redefined]);
    match result {
        Err(Error::ColumnRedefinition { name, existing, requested }) => {
            assert_eq!(name, "studyA_presence", "Wrong redefined column");
            assert_eq!(existing, "UNSIGNED_INT", "Wrong existing type");
            assert_eq!(requested, "VARCHAR", "Wrong requested type");
        },
        Err(err) => panic!("Wrong error type: {}", err),
        Ok(_) => panic!("Column redefinition succeeded"),
    }

    // A failed registration publishes nothing.
    let after = catalog.snapshot();
    assert_eq!(after.version(), before.version(), "Failed registration changed the version");
    assert!(!after.contains(&new_column.name), "Failed registration added a column");

    let fixed = ColumnDescriptor::new("POSITION", Category::Core, SqlType::VARCHAR);
    assert!(catalog.register_columns(&[fixed]).is_err(), "Fixed column redefinition succeeded");
}

#[test]
fn snapshot_isolation() {
    let catalog = ColumnCatalog::new();
    catalog.register_study("studyA", &StudyEntry::new(&["s1"], &["ALL"])).unwrap();
    let old = catalog.snapshot();

    catalog.register_study("studyA", &StudyEntry::new(&["s2"], &["ALL", "EUR"]).with_files(&["a.vcf"])).unwrap();
    catalog.register_study("studyB", &StudyEntry::default()).unwrap();
    catalog.register_release(2).unwrap();
    catalog.register_release(1).unwrap();

    // The old snapshot is unchanged.
    assert_eq!(old.study_count(), 1, "Old snapshot sees a new study");
    let old_entry = old.study("studyA").unwrap();
    assert_eq!(old_entry.samples.len(), 1, "Old snapshot sees new samples");
    assert_eq!(old.default_study(), Some("studyA"), "Wrong default study with one study");

    let new = catalog.snapshot();
    let entry = new.study("studyA").unwrap();
    let samples: Vec<&str> = entry.samples.iter().map(|s| s.as_str()).collect();
    assert_eq!(samples, vec!["s1", "s2"], "Samples were not merged");
    assert_eq!(entry.cohorts.len(), 2, "Cohorts were not merged");
    assert_eq!(entry.files.len(), 1, "Files were not registered");
    assert_eq!(new.studies().collect::<Vec<_>>(), vec!["studyA", "studyB"], "Wrong studies");
    assert_eq!(new.default_study(), None, "Default study with two studies");
    assert_eq!(new.release(), 2, "Release decreased");
}

#[test]
fn genotype_layout_registration() {
    let catalog = ColumnCatalog::new();
    assert_eq!(catalog.snapshot().genotype_layout(), None, "Layout without registration");

    let result = catalog.register_genotype_layout(GenotypeLayout::PerCategory);
    assert!(result.is_ok(), "Failed to register the layout: {}", result.unwrap_err());
    let result = catalog.register_genotype_layout(GenotypeLayout::PerCategory);
    assert!(result.is_ok(), "Failed to register the same layout again: {}", result.unwrap_err());

    let before = catalog.snapshot();
    let result = catalog.register_genotype_layout(GenotypeLayout::PerSample);
    assert!(matches!(result, Err(Error::MalformedQueryParam { .. })), "Layout changed after registration");
    let after = catalog.snapshot();
    assert_eq!(after.genotype_layout(), Some(GenotypeLayout::PerCategory), "Wrong layout after a rejected change");
    assert_eq!(after.version(), before.version(), "A rejected change published a snapshot");
}

#[test]
fn concurrent_readers() {
    let catalog = Arc::new(ColumnCatalog::new());
    let writer = {
        let catalog = catalog.clone();
        std::thread::spawn(move || {
            for i in 0..100 {
                let sample = format!("s{}", i);
                catalog.register_columns(&[column_for_sample("studyA", &sample)]).unwrap();
            }
        })
    };
    for _ in 0..100 {
        let snapshot = catalog.snapshot();
        // Each snapshot is internally consistent: one column per version.
        assert_eq!(snapshot.dynamic_len() as u64, snapshot.version(), "Inconsistent snapshot");
    }
    writer.join().unwrap();
    assert_eq!(catalog.snapshot().dynamic_len(), 100, "Wrong final number of columns");
}

//-----------------------------------------------------------------------------

#[test]
fn study_column_sets() {
    let entry = StudyEntry::new(&["s1", "s2"], &["ALL"]).with_files(&["a.vcf"]);

    let columns = study_columns("studyA", &entry, GenotypeLayout::PerSample);
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec![
        "studyA_presence", "_studyA_FM",
        "studyA_s1_S", "studyA_s2_S",
        "studyA_a.vcf_F",
        "studyA_ALL_PB", "studyA_ALL_CF", "studyA_ALL_MAF", "studyA_ALL_MGF", "studyA_ALL_PSF",
    ], "Wrong per-sample study columns");

    let columns = study_columns("studyA", &entry, GenotypeLayout::PerCategory);
    assert!(columns.iter().all(|c| c.category != Category::Sample), "Per-category layout has sample columns");
    assert_eq!(
        columns.iter().filter(|c| c.name.ends_with("_GT")).count(), GenotypeCategory::ALL.len(),
        "Wrong number of genotype category columns"
    );

    assert_eq!("per-category".parse::<GenotypeLayout>().unwrap(), GenotypeLayout::PerCategory, "Layout not parsed");
    assert_eq!(GenotypeLayout::default(), GenotypeLayout::PerSample, "Wrong default layout");
    assert!("columnar".parse::<GenotypeLayout>().is_err(), "Unknown layout parsed");
}

#[test]
fn category_inference() {
    assert_eq!(infer_category("POSITION"), Category::Core, "Wrong category for a core column");
    assert_eq!(infer_category("A_SIFT"), Category::Annotation, "Wrong category for a fixed annotation column");
    assert_eq!(infer_category("A_PF_EXAC_ALL"), Category::Annotation, "Wrong category for a population frequency");
    assert_eq!(infer_category("R_2"), Category::Annotation, "Wrong category for a release column");
    assert_eq!(infer_category("studyA_s1_S"), Category::Sample, "Wrong category for a sample column");
    assert_eq!(infer_category("studyA_a.vcf_F"), Category::File, "Wrong category for a file column");
    assert_eq!(infer_category("studyA_ALL_MAF"), Category::CohortStats, "Wrong category for a cohort column");
    assert_eq!(infer_category("studyA_presence"), Category::Study, "Wrong category for a presence column");
    assert_eq!(infer_category("_studyA_FM"), Category::Study, "Wrong category for a fill-missing column");
}

//-----------------------------------------------------------------------------
