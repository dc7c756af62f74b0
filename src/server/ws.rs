use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::warn;

use crate::config::{JobSpec, RunConfig};
use crate::engine::{Engine, Progress};
use crate::error::{AppError, AppResult, ServerError};

use super::ErrorBody;

const TICK_INTERVAL: Duration = Duration::from_millis(100);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Serves one streaming control session: the first text frame carries the
/// job spec, progress ticks stream every 100 ms as decimal completed-request
/// counts, and the terminal frame carries the full JSON report.
pub(super) async fn serve(socket: TcpStream) -> AppResult<()> {
    let ws = tokio_tungstenite::accept_async(socket)
        .await
        .map_err(|err| AppError::server(ServerError::WsHandshake { source: err }))?;
    let (mut sink, mut stream) = ws.split();

    let spec = match read_job_spec(&mut stream).await {
        Ok(spec) => spec,
        Err(message) => return send_error(&mut sink, 400, &message).await,
    };

    let engine = match prepare_engine(&spec).await {
        Ok(engine) => engine,
        Err(err) => {
            return send_error(&mut sink, err.status_code(), &err.to_string()).await;
        }
    };

    let cancel = engine.cancel_handle();
    let (progress_tx, progress_rx) = watch::channel(Progress::default());
    let mut job = tokio::spawn(engine.run(Some(progress_tx)));

    let mut tick = interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut socket_alive = true;

    let outcome = loop {
        tokio::select! {
            finished = &mut job => break finished,
            _ = tick.tick(), if socket_alive => {
                let completed = progress_rx.borrow().completed_reqs;
                if sink.send(Message::Text(completed.to_string())).await.is_err() {
                    // Peer went away mid-run; stop the workload.
                    socket_alive = false;
                    cancel.cancel();
                }
            }
            incoming = stream.next(), if socket_alive => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        socket_alive = false;
                        cancel.cancel();
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    let report = match outcome {
        Ok(Ok(report)) => report,
        Ok(Err(err)) => {
            warn!("streamed job failed: {}", err);
            if socket_alive {
                send_error(&mut sink, err.status_code(), &err.to_string()).await?;
            }
            return Ok(());
        }
        Err(err) => {
            warn!("streamed job aborted: {}", err);
            if socket_alive {
                send_error(&mut sink, 500, "job aborted").await?;
            }
            return Ok(());
        }
    };

    if socket_alive {
        let body = serde_json::to_string(&report).map_err(|err| {
            AppError::server(ServerError::Serialize {
                context: "final report",
                source: err,
            })
        })?;
        sink.send(Message::Text(body)).await.map_err(|err| {
            AppError::server(ServerError::Ws {
                context: "sending the final report",
                source: err,
            })
        })?;
        sink.close().await.map_err(|err| {
            AppError::server(ServerError::Ws {
                context: "closing the session",
                source: err,
            })
        })?;
    }
    Ok(())
}

async fn read_job_spec(stream: &mut WsStream) -> Result<JobSpec, String> {
    loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(err)) => return Err(format!("Failed to read job spec: {}", err)),
            None => return Err("Connection closed before a job spec arrived".to_owned()),
        };
        match message {
            Message::Text(text) => {
                return serde_json::from_str(&text)
                    .map_err(|err| format!("Invalid job spec: {}", err));
            }
            Message::Binary(bytes) => {
                return serde_json::from_slice(&bytes)
                    .map_err(|err| format!("Invalid job spec: {}", err));
            }
            Message::Close(_) => {
                return Err("Connection closed before a job spec arrived".to_owned())
            }
            // Control frames are answered by the protocol layer.
            _ => {}
        }
    }
}

async fn prepare_engine(spec: &JobSpec) -> AppResult<Engine> {
    let config = RunConfig::from_spec(spec)?;
    Engine::new(config).await
}

async fn send_error(sink: &mut WsSink, code: u16, message: &str) -> AppResult<()> {
    let body = serde_json::to_string(&ErrorBody::new(code, message)).map_err(|err| {
        AppError::server(ServerError::Serialize {
            context: "error frame",
            source: err,
        })
    })?;
    sink.send(Message::Text(body)).await.map_err(|err| {
        AppError::server(ServerError::Ws {
            context: "sending an error frame",
            source: err,
        })
    })?;
    sink.close().await.map_err(|err| {
        AppError::server(ServerError::Ws {
            context: "closing the session",
            source: err,
        })
    })?;
    Ok(())
}
