use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Broken field table. Caught before any key is fetched.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("duplicate field name '{0}'")]
    DuplicateName(String),
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
    #[error("'{0}' is not a valid SQL identifier")]
    BadIdentifier(String),
    #[error("field '{0}' has an empty anchor")]
    EmptyAnchor(String),
    #[error("field '{field}' is stored as {column_type} but its normalizer produces another type")]
    TypeMismatch { field: String, column_type: &'static str },
    #[error("default '{default}' of field '{field}' is not in normalized form")]
    BadDefault { field: String, default: String },
}

/// A failed document retrieval. The key still yields an all-default record.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
}

/// Resource acquisition failures. These end the run before any key is processed.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot read seed list {path}: {source}")]
    Seeds {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed seed list {path}: {source}")]
    SeedFormat {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("cannot create output file {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot open database {path}: {source}")]
    Database {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("cannot create table '{table}': {source}")]
    CreateTable {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("cannot build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// One key's write that did not make it into a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistFailure {
    pub key: String,
    pub reason: String,
}
