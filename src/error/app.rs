use thiserror::Error;

use super::{ConfigError, HttpError, PayloadError, ServerError, StatsError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("HTTP client error: {source}")]
    Reqwest {
        #[from]
        source: reqwest::Error,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
    #[error("Statistics error: {0}")]
    Stats(#[from] StatsError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn config<E>(error: E) -> Self
    where
        E: Into<ConfigError>,
    {
        error.into().into()
    }

    pub fn payload<E>(error: E) -> Self
    where
        E: Into<PayloadError>,
    {
        error.into().into()
    }

    pub fn http<E>(error: E) -> Self
    where
        E: Into<HttpError>,
    {
        error.into().into()
    }

    pub fn server<E>(error: E) -> Self
    where
        E: Into<ServerError>,
    {
        error.into().into()
    }

    pub fn stats<E>(error: E) -> Self
    where
        E: Into<StatsError>,
    {
        error.into().into()
    }

    /// HTTP status code reported to the submitter for this error.
    ///
    /// Configuration and payload-load problems are the submitter's fault;
    /// everything else is internal.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Config(_) | AppError::Payload(_) | AppError::Json { .. } => 400,
            _ => 500,
        }
    }
}
