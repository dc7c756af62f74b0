use std::net::SocketAddr;

use clap::Parser;

/// Long-lived HTTP load generator. Jobs are submitted over the control
/// channel: `POST /api/pt` returns a report synchronously, `GET /ws`
/// streams progress ticks and then the report.
#[derive(Debug, Parser)]
#[command(name = "barrage", version, about)]
pub struct ServerArgs {
    /// Address the control listener binds to.
    #[arg(short, long, default_value = "0.0.0.0:8081")]
    pub listen: SocketAddr,

    /// Enable debug logging (`BARRAGE_LOG`/`RUST_LOG` override this).
    #[arg(short, long)]
    pub verbose: bool,
}
