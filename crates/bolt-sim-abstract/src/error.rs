use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A trace line that could not be turned back into a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseRecordError {
    #[error("empty line")]
    Empty,

    #[error("unknown record tag '{0}'")]
    UnknownTag(String),

    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("invalid {field}: '{value}'")]
    InvalidField { field: &'static str, value: String },
}

/// Failures of an append-only trace sink. All of them are fatal for a run.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to create trace sink {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write trace sink {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to flush trace sink {}: {source}", path.display())]
    Flush {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "record at {time_ns} ns precedes last record at {last_ns} ns in {}",
        path.display()
    )]
    OutOfOrder {
        path: PathBuf,
        time_ns: u64,
        last_ns: u64,
    },
}
