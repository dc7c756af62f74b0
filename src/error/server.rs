use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind control listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("WebSocket handshake failed: {source}")]
    WsHandshake {
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("WebSocket error while {context}: {source}")]
    Ws {
        context: &'static str,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
}
