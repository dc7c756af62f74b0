mod app;
mod config;
mod http;
mod payload;
mod server;
mod stats;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use http::HttpError;
pub use payload::PayloadError;
pub use server::ServerError;
pub use stats::StatsError;
