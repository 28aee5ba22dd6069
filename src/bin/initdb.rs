use std::time::Instant;
use std::{env, fs, process};
use std::sync::Arc;

use variant_store::{ColumnCatalog, GenotypeLayout, IndexAdvisor, SchemaManager, SqliteStore};
use variant_store::columns;
use variant_store::schema::{SchemaParams, StudyRegistry};
use variant_store::utils;

use getopts::Options;
use tracing_subscriber::EnvFilter;

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();
    init_logging();

    // Parse arguments.
    let config = Config::new();

    // Check if the database already exists.
    if utils::file_exists(&config.db_file) {
        if config.overwrite {
            eprintln!("Overwriting database {}", config.db_file);
            fs::remove_file(&config.db_file).map_err(|x| x.to_string())?;
        } else {
            return Err(format!("Database {} already exists", config.db_file));
        }
    }

    // Read the sample sheet before touching the database.
    let reader = utils::open_file(&config.sample_sheet).map_err(|x| x.to_string())?;
    let registry = StudyRegistry::read_sample_sheet(reader).map_err(|x| x.to_string())?;

    // Create the table and the initial indexes.
    let store = SqliteStore::create(&config.db_file).map_err(|x| x.to_string())?;
    let catalog = Arc::new(ColumnCatalog::new());
    let params = SchemaParams::default()
        .with_batch_size(config.batch_size)
        .with_genotype_layout(config.layout);
    let mut manager = SchemaManager::new(store, catalog.clone(), params);
    let advisor = IndexAdvisor::new();
    manager.initialize(&config.table, &advisor).map_err(|x| x.to_string())?;

    // Register the studies.
    for study in registry.studies() {
        let added = manager.register_study(&config.table, study, &registry).map_err(|x| x.to_string())?;
        if let Some(entry) = registry.get(study) {
            manager.client_mut().save_study(study, entry).map_err(|x| x.to_string())?;
        }
        eprintln!("Study {}: added {} columns", study, added.len());
    }

    // Release flags.
    if config.release > 0 {
        let releases: Vec<columns::ColumnDescriptor> = (1..=config.release).map(columns::column_for_release).collect();
        manager.add_missing_columns(&config.table, &releases).map_err(|x| x.to_string())?;
        manager.client_mut().save_release(config.release).map_err(|x| x.to_string())?;
    }

    // Statistics.
    let snapshot = catalog.snapshot();
    eprintln!(
        "The table contains {} studies and {} dynamic columns ({} genotype layout)",
        snapshot.study_count(), snapshot.dynamic_len(), config.layout
    );
    let store = manager.into_client();
    if let Some(size) = store.file_size() {
        eprintln!("Database size: {}", size);
    }

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    eprintln!("Used {:.3} seconds", seconds);

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

//-----------------------------------------------------------------------------

struct Config {
    pub sample_sheet: String,
    pub db_file: String,
    pub table: String,
    pub layout: GenotypeLayout,
    pub batch_size: usize,
    pub release: u32,
    pub overwrite: bool,
}

impl Config {
    pub fn new() -> Config {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("o", "output", "output file name (default: <input>.db)", "FILE");
        opts.optopt("t", "table", "name of the variant table (default: variants)", "NAME");
        opts.optopt("l", "layout", "genotype layout: per-sample or per-category (default: per-sample)", "STR");
        let batch_desc = format!("maximum number of columns added in one statement (default: {})", SchemaParams::BATCH_SIZE);
        opts.optopt("b", "batch-size", &batch_desc, "INT");
        opts.optopt("r", "release", "create release flags up to this release (default: 1)", "INT");
        opts.optflag("", "overwrite", "overwrite the database file if it exists");
        let matches = match opts.parse(&args[1..]) {
            Ok(m) => m,
            Err(f) => {
                eprintln!("{}", f);
                process::exit(1);
            }
        };

        let header = format!("Usage: {} [options] samples.tsv[.gz]", program);
        if matches.opt_present("h") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }

        let sample_sheet = if let Some(s) = matches.free.first() {
            s.clone()
        } else {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        };
        let db_file = matches.opt_str("o").unwrap_or_else(|| format!("{}.db", sample_sheet));
        let table = matches.opt_str("t").unwrap_or_else(|| String::from("variants"));

        let layout = match matches.opt_str("l") {
            Some(s) => match s.parse::<GenotypeLayout>() {
                Ok(layout) => layout,
                Err(err) => {
                    eprintln!("{}", err);
                    process::exit(1);
                }
            },
            None => GenotypeLayout::default(),
        };
        let batch_size = Self::parse_number(&matches, "b", SchemaParams::BATCH_SIZE);
        let release = Self::parse_number(&matches, "r", 1);
        let overwrite = matches.opt_present("overwrite");

        Config {
            sample_sheet,
            db_file,
            table,
            layout,
            batch_size,
            release,
            overwrite,
        }
    }

    fn parse_number<T: std::str::FromStr>(matches: &getopts::Matches, name: &str, default: T) -> T {
        match matches.opt_str(name) {
            Some(s) => match s.parse::<T>() {
                Ok(value) => value,
                Err(_) => {
                    eprintln!("--{}: invalid number {}", name, s);
                    process::exit(1);
                }
            },
            None => default,
        }
    }
}

//-----------------------------------------------------------------------------
