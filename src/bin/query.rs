use std::io::Write;
use std::time::Instant;
use std::sync::Arc;
use std::{env, io, process};

use variant_store::{GeneTable, GenotypeLayout, Query, QueryCompiler, SqliteStore};
use variant_store::compiler::{CompilerParams, Projection, QueryOptions, SortOrder};
use variant_store::utils;

use getopts::Options;
use tracing::warn;
use tracing_subscriber::EnvFilter;

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();
    init_logging();

    // Parse arguments.
    let config = Config::new();

    // Build the query.
    let mut query = match config.query_file.as_ref() {
        Some(filename) => {
            let reader = utils::open_file(filename).map_err(|x| x.to_string())?;
            Query::read(reader).map_err(|x| x.to_string())?
        },
        None => Query::new(),
    };
    for pair in config.pairs.iter() {
        let (name, value) = Query::parse_pair(pair).map_err(|x| x.to_string())?;
        query.set(&name, &value);
    }

    // Load the catalog.
    let mut store = SqliteStore::open(&config.db_file).map_err(|x| x.to_string())?;
    let catalog = store.load_catalog(&config.table).map_err(|x| x.to_string())?;
    let snapshot = catalog.snapshot();
    let layout = match (config.layout, snapshot.genotype_layout()) {
        (Some(requested), Some(stored)) if requested != stored => {
            warn!("Using the {} genotype layout, but the database uses {}", requested, stored);
            requested
        },
        (Some(requested), _) => requested,
        (None, Some(stored)) => stored,
        (None, None) => {
            warn!("The database does not record a genotype layout; assuming {}", GenotypeLayout::default());
            GenotypeLayout::default()
        },
    };

    // Compile the query.
    let params = CompilerParams::default()
        .with_table(&config.table)
        .with_genotype_layout(layout)
        .with_native_skip(!config.client_skip);
    let mut compiler = QueryCompiler::new(snapshot, params);
    if let Some(filename) = config.gene_file.as_ref() {
        let reader = utils::open_file(filename).map_err(|x| x.to_string())?;
        let genes = GeneTable::read_tsv(reader).map_err(|x| x.to_string())?;
        eprintln!("Loaded {} genes", genes.len());
        compiler = compiler.with_resolver(Arc::new(genes));
    }
    let plan = compiler.compile(&query, &config.options).map_err(|x| x.to_string())?;

    // Output.
    let mut output = io::stdout();
    writeln!(output, "{}", plan.to_sql()).map_err(|x| x.to_string())?;
    if plan.needs_client_skip() {
        eprintln!("Skip the first {} rows of the results", plan.client_skip);
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

pub struct Config {
    pub db_file: String,
    pub pairs: Vec<String>,
    pub query_file: Option<String>,
    pub gene_file: Option<String>,
    pub table: String,
    pub layout: Option<GenotypeLayout>,
    pub client_skip: bool,
    pub options: QueryOptions,
}

impl Config {
    pub fn new() -> Config {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("q", "query", "read NAME=VALUE lines from this file", "FILE");
        opts.optopt("g", "genes", "resolve genes using this table (gene, region, GO terms, tissues)", "FILE");
        opts.optopt("t", "table", "name of the variant table (default: variants)", "NAME");
        opts.optopt("l", "layout", "genotype layout: per-sample or per-category (default: stored in the database)", "STR");
        opts.optopt("s", "sort", "sort by position: asc or desc", "STR");
        opts.optopt("", "limit", "return at most this many variants", "INT");
        opts.optopt("", "skip", "skip this many variants", "INT");
        opts.optflag("", "client-skip", "the store cannot skip rows; skip them in the client");
        opts.optflag("c", "count", "count the variants instead of returning them");
        opts.optflag("", "coordinates", "only return the coordinates and the type");
        opts.optmulti("", "hint", "additional planner hint (may repeat)", "STR");
        let matches = match opts.parse(&args[1..]) {
            Ok(m) => m,
            Err(f) => {
                eprintln!("{}", f);
                process::exit(1);
            }
        };

        let header = format!("Usage: {} [options] variants.db [NAME=VALUE ...]", program);
        if matches.opt_present("h") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }

        let db_file = if let Some(s) = matches.free.first() {
            s.clone()
        } else {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        };
        let pairs: Vec<String> = matches.free.iter().skip(1).cloned().collect();
        let query_file = matches.opt_str("q");
        if pairs.is_empty() && query_file.is_none() {
            eprintln!("No query parameters given; selecting all variants");
        }
        let gene_file = matches.opt_str("g");
        let table = matches.opt_str("t").unwrap_or_else(|| String::from(CompilerParams::TABLE));
        let layout = matches.opt_str("l").map(|s| s.parse::<GenotypeLayout>().unwrap_or_else(|err| {
            eprintln!("{}", err);
            process::exit(1);
        }));

        let mut options = QueryOptions::default();
        if let Some(s) = matches.opt_str("s") {
            let order = match s.to_ascii_lowercase().as_str() {
                "asc" => SortOrder::Ascending,
                "desc" => SortOrder::Descending,
                _ => {
                    eprintln!("--sort: expected asc or desc, got {}", s);
                    process::exit(1);
                }
            };
            options = options.with_sort(order);
        }
        if let Some(limit) = Self::parse_usize(&matches, "limit") {
            options = options.with_limit(limit);
        }
        if let Some(skip) = Self::parse_usize(&matches, "skip") {
            options = options.with_skip(skip);
        }
        options = options.with_count(matches.opt_present("c"));
        if matches.opt_present("coordinates") {
            options = options.with_projection(Projection::COORDINATES);
        }
        for hint in matches.opt_strs("hint") {
            options = options.with_hint(&hint);
        }

        Config {
            db_file,
            pairs,
            query_file,
            gene_file,
            table,
            layout,
            client_skip: matches.opt_present("client-skip"),
            options,
        }
    }

    fn parse_usize(matches: &getopts::Matches, name: &str) -> Option<usize> {
        let value = matches.opt_str(name)?;
        match value.parse::<usize>() {
            Ok(n) => Some(n),
            Err(_) => {
                eprintln!("--{}: invalid number {}", name, value);
                process::exit(1);
            }
        }
    }
}

//-----------------------------------------------------------------------------
