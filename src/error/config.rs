use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Target URL is required.")]
    MissingUrl,
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Failed to decode URL '{url}'.")]
    UrlDecode { url: String },
    #[error("HTTP method is required.")]
    MissingMethod,
    #[error("Invalid HTTP method '{method}'.")]
    InvalidMethod { method: String },
    #[error("Number of connections must be greater than zero.")]
    ZeroConnections,
    #[error("Either a request count or a duration is required.")]
    MissingWorkload,
    #[error("Number of requests must be greater than zero.")]
    ZeroRequests,
    #[error("Duration must be greater than zero.")]
    ZeroDuration,
    #[error("Rate must be greater than zero.")]
    ZeroRate,
    #[error("Malformed header '{header}' (expected 'Key: Value').")]
    MalformedHeader { header: String },
    #[error("Invalid scope '{scope}' (expected request, connection, or global).")]
    InvalidScope { scope: String },
    #[error("Invalid client type '{client}' (expected fast, h1, or h2).")]
    InvalidClientType { client: String },
    #[error("Invalid assertion condition '{condition}'.")]
    InvalidCondition { condition: String },
    #[error("A payload source requires variable names.")]
    MissingVariableNames,
}
