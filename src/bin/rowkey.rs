use std::io::{BufRead, Write};
use std::{env, io, process};

use variant_store::VariantKey;

use getopts::Options;
use tracing_subscriber::EnvFilter;

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    init_logging();

    // Parse arguments.
    let config = Config::new();

    // Values from the command line, or one per line from stdin.
    let values: Vec<String> = if config.values.is_empty() {
        let stdin = io::stdin();
        let mut result = Vec::new();
        for line in stdin.lock().lines() {
            let line = line.map_err(|x| x.to_string())?;
            let line = line.trim();
            if !line.is_empty() {
                result.push(line.to_string());
            }
        }
        result
    } else {
        config.values.clone()
    };

    let mut output = io::stdout();
    for value in values.iter() {
        let line = if config.decode {
            let key = VariantKey::from_hex(value).map_err(|x| x.to_string())?;
            format!("{}\t{}", value, key)
        } else {
            let key: VariantKey = value.parse().map_err(|x: variant_store::Error| x.to_string())?;
            format!("{}\t{}", key, key.to_hex())
        };
        writeln!(output, "{}", line).map_err(|x| x.to_string())?;
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

//-----------------------------------------------------------------------------

struct Config {
    pub decode: bool,
    pub values: Vec<String>,
}

impl Config {
    pub fn new() -> Config {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optflag("d", "decode", "decode hexadecimal row keys instead of encoding variants");
        let matches = match opts.parse(&args[1..]) {
            Ok(m) => m,
            Err(f) => {
                eprintln!("{}", f);
                process::exit(1);
            }
        };

        if matches.opt_present("h") {
            let header = format!("Usage: {} [options] [chr:pos:ref:alt | hex ...]\n\nWithout arguments, reads the values from stdin.", program);
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }

        Config {
            decode: matches.opt_present("d"),
            values: matches.free.clone(),
        }
    }
}

//-----------------------------------------------------------------------------
