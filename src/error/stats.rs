use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Histogram error while trying to {context}: {source}")]
    Histogram {
        context: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
