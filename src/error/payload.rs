use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Failed to read payload file '{path}': {source}")]
    ReadCsv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Payload file '{path}' was empty.")]
    EmptyFile { path: PathBuf },
    #[error("Number of variables ({expected}) does not match the number of columns ({found}).")]
    ColumnMismatch { expected: usize, found: usize },
    #[error("Failed to fetch payload from '{url}': {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{message}")]
    UpstreamRejected { message: String },
    #[error("Malformed payload rows: {source}")]
    MalformedRows {
        #[source]
        source: serde_json::Error,
    },
    #[error("Payload contained no rows.")]
    NoRows,
}
