use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Failed to build HTTP client: {source}")]
    BuildClient {
        #[source]
        source: reqwest::Error,
    },
    #[error("Invalid resolved URL '{url}': {source}")]
    InvalidResolvedUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Failed to open body file '{path}': {source}")]
    OpenBodyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
