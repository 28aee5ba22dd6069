//! Utility functions for files and SQL literals.

use crate::{Error, Result};

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::io::{BufRead, BufReader, Read};

use flate2::read::MultiGzDecoder;

use rand::Rng;

//-----------------------------------------------------------------------------

/// Returns the full file name for a specific test file.
pub fn get_test_data(filename: &'static str) -> PathBuf {
    let mut buf = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    buf.push("test-data");
    buf.push(filename);
    buf
}

/// Returns a file name with the given prefix in the temporary directory.
///
/// The file does not exist when the function returns, but another process may create it.
pub fn temp_file_name(prefix: &str) -> PathBuf {
    let mut rng = rand::thread_rng();
    let mut buf = std::env::temp_dir();
    loop {
        let candidate = buf.join(format!("{}_{}_{:016x}", prefix, std::process::id(), rng.gen::<u64>()));
        if !file_exists(&candidate) {
            buf = candidate;
            break;
        }
    }
    buf
}

//-----------------------------------------------------------------------------

// Utilities for working with files.

const SIZE_UNITS: [(f64, &str); 6] = [
    (1.0, "B"),
    (1024.0, "KiB"),
    (1024.0 * 1024.0, "MiB"),
    (1024.0 * 1024.0 * 1024.0, "GiB"),
    (1024.0 * 1024.0 * 1024.0 * 1024.0, "TiB"),
    (1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0, "PiB"),
];

/// Returns a human-readable representation of the given number of bytes.
pub fn human_readable_size(bytes: usize) -> String {
    let mut unit = 0;
    let value = bytes as f64;
    while unit + 1 < SIZE_UNITS.len() && value >= SIZE_UNITS[unit + 1].0 {
        unit += 1;
    }
    format!("{:.3} {}", value / SIZE_UNITS[unit].0, SIZE_UNITS[unit].1)
}

/// Returns a human-readable size of the file.
pub fn file_size<P: AsRef<Path>>(filename: P) -> Option<String> {
    let metadata = fs::metadata(filename).ok()?;
    Some(human_readable_size(metadata.len() as usize))
}

/// Returns `true` if the file exists.
pub fn file_exists<P: AsRef<Path>>(filename: P) -> bool {
    fs::metadata(filename).is_ok()
}

/// Returns `true` if the file appears to be gzip-compressed.
pub fn is_gzipped<P: AsRef<Path>>(filename: P) -> bool {
    let file = match File::open(filename) {
        Ok(file) => file,
        Err(_) => return false,
    };
    let mut reader = BufReader::new(file);
    let mut magic = [0; 2];
    let len = reader.read(&mut magic).ok();
    len == Some(2) && magic == [0x1F, 0x8B]
}

/// Returns a buffered reader for the file, which may be gzip-compressed.
///
/// # Errors
///
/// Passes through I/O errors.
pub fn open_file<P: AsRef<Path>>(filename: P) -> Result<Box<dyn BufRead>> {
    let file = File::open(&filename)?;
    let inner = BufReader::new(file);
    if is_gzipped(&filename) {
        let inner = MultiGzDecoder::new(inner);
        Ok(Box::new(BufReader::new(inner)))
    } else {
        Ok(Box::new(inner))
    }
}

/// Reads the non-empty lines of a file that may be gzip-compressed.
///
/// Lines starting with `#` are skipped, and trailing whitespace is removed.
pub fn read_lines<P: AsRef<Path>>(filename: P) -> Result<Vec<String>> {
    let reader = open_file(filename)?;
    let mut result = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();
        if !line.is_empty() && !line.starts_with('#') {
            result.push(line.to_string());
        }
    }
    Ok(result)
}

//-----------------------------------------------------------------------------

// SQL literals.

/// Returns the value as a SQL string literal.
///
/// # Errors
///
/// Returns [`Error::MalformedQueryParam`] if the value contains a single quote.
pub fn sql_string(param: &str, value: &str) -> Result<String> {
    if value.contains('\'') {
        return Err(Error::malformed(param, value, "single quotes are not allowed in string values"));
    }
    Ok(format!("'{}'", value))
}

/// Parses a numeric value for a SQL comparison and returns it in canonical form.
///
/// # Errors
///
/// Returns [`Error::MalformedQueryParam`] if the value is not a finite number.
pub fn sql_number(param: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Ok(integer.to_string());
    }
    match trimmed.parse::<f64>() {
        Ok(number) if number.is_finite() => Ok(number.to_string()),
        _ => Err(Error::malformed(param, value, "expected a number")),
    }
}

/// Parses a boolean value for a SQL comparison.
///
/// # Errors
///
/// Returns [`Error::MalformedQueryParam`] if the value is not `true` or `false`.
pub fn sql_boolean(param: &str, value: &str) -> Result<&'static str> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok("true"),
        "false" | "0" | "no" => Ok("false"),
        _ => Err(Error::malformed(param, value, "expected a boolean")),
    }
}

//-----------------------------------------------------------------------------
