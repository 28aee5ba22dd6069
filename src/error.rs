//! Errors reported by the variant store.
//!
//! Query compilation errors carry the raw parameter and value, so that a failing query can be reproduced from the error message alone.
//! Store errors are classified by [`StoreErrorKind`], which tells the schema manager whether an error is a benign race, a retryable conflict, or fatal.

use std::fmt::{self, Display};

//-----------------------------------------------------------------------------

/// Classification of errors reported by a store client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// The table, namespace, column, or index already exists.
    AlreadyExists,
    /// Another client is mutating the schema at the same time.
    ConcurrentMutation,
    /// Anything else.
    Fatal,
}

impl Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErrorKind::AlreadyExists => write!(f, "already exists"),
            StoreErrorKind::ConcurrentMutation => write!(f, "concurrent mutation"),
            StoreErrorKind::Fatal => write!(f, "fatal"),
        }
    }
}

//-----------------------------------------------------------------------------

/// Error type for the variant store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A query parameter has a bad operator, value, or negation mix.
    #[error("Malformed query param {param}={value}: {reason}")]
    MalformedQueryParam {
        param: String,
        value: String,
        reason: String,
    },

    /// A recognized filter that is intentionally not implemented.
    #[error("Unsupported filter {param}")]
    UnsupportedFilter {
        param: String,
    },

    /// Gene or identifier lookup returned nothing.
    #[error("Unable to resolve {value}")]
    GeneResolutionFailure {
        value: String,
    },

    /// Concurrent schema mutation persisted after all retries.
    #[error("Schema conflict after {attempts} attempts: {statement}")]
    SchemaConflict {
        statement: String,
        attempts: usize,
    },

    /// The operator cannot be used with the declared type of the column.
    #[error("Type mismatch for {param}={value}: cannot use {operator} with column {column} ({sql_type})")]
    TypeMismatch {
        param: String,
        value: String,
        column: String,
        sql_type: String,
        operator: String,
    },

    /// A row key could not be decoded.
    #[error("Cannot decode row key {}: {reason}", hex(.bytes))]
    Decoding {
        reason: String,
        bytes: Vec<u8>,
    },

    /// A column was registered again with a different type.
    #[error("Column {name} is already defined as {existing}, cannot redefine as {requested}")]
    ColumnRedefinition {
        name: String,
        existing: String,
        requested: String,
    },

    /// An error reported by the store client.
    #[error("Store error ({kind}): {message}")]
    Store {
        kind: StoreErrorKind,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the variant store.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a [`Error::MalformedQueryParam`].
    pub fn malformed(param: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedQueryParam {
            param: param.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::Store`] of the given kind.
    pub fn store(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Error::Store {
            kind,
            message: message.into(),
        }
    }

    /// Returns the store error kind, or [`None`] if this is not a store error.
    pub fn store_kind(&self) -> Option<StoreErrorKind> {
        match self {
            Error::Store { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if the error is a benign "already exists" race.
    pub fn is_already_exists(&self) -> bool {
        self.store_kind() == Some(StoreErrorKind::AlreadyExists)
    }

    /// Returns `true` if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        self.store_kind() == Some(StoreErrorKind::ConcurrentMutation)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        let message = error.to_string();
        let kind = match error.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                StoreErrorKind::ConcurrentMutation
            },
            _ if message.contains("already exists") || message.contains("duplicate column name") => {
                StoreErrorKind::AlreadyExists
            },
            _ => StoreErrorKind::Fatal,
        };
        Error::Store { kind, message }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

//-----------------------------------------------------------------------------
