mod ws;

use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::{JobSpec, RunConfig};
use crate::engine::Engine;
use crate::error::{AppError, AppResult, ServerError};

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Error body returned on both transports: `{code, status, error}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: u16,
    status: &'static str,
    error: String,
}

impl ErrorBody {
    fn new(code: u16, error: impl Into<String>) -> Self {
        Self {
            code,
            status: reason(code),
            error: error.into(),
        }
    }
}

fn reason(code: u16) -> &'static str {
    match code {
        202 => "Accepted",
        400 => "Bad Request",
        404 => "Not Found",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Error",
    }
}

/// Runs the control listener until an interrupt signal arrives.
///
/// Each accepted connection is served by its own task: WebSocket upgrades
/// on `/ws` stream progress, everything else is plain HTTP with a single
/// `POST /api/pt` job endpoint.
pub async fn run(listen: SocketAddr) -> AppResult<()> {
    let listener = TcpListener::bind(listen).await.map_err(|err| {
        AppError::server(ServerError::Bind {
            addr: listen,
            source: err,
        })
    })?;
    info!("control listener bound on {}", listen);
    run_with_listener(listener).await
}

/// Serves an already-bound listener; used by `run` and by tests that need
/// an ephemeral port.
pub async fn run_with_listener(listener: TcpListener) -> AppResult<()> {
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => {
                info!("interrupt received, closing control listener");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        debug!("control connection from {}", peer);
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(socket).await {
                                warn!("control connection failed: {}", err);
                            }
                        });
                    }
                    Err(err) => {
                        warn!("failed to accept control connection: {}", err);
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_connection(socket: TcpStream) -> AppResult<()> {
    if let Some((method, path)) = peek_request_line(&socket).await {
        if method == "GET" && path.starts_with("/ws") {
            return ws::serve(socket).await;
        }
    }

    let mut reader = BufReader::new(socket);
    let request = read_control_request(&mut reader).await;
    let mut socket = reader.into_inner();
    let request = match request {
        Ok(request) => request,
        Err((status, message)) => return respond_error(&mut socket, status, &message).await,
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/api/pt") => submit_job(&mut socket, &request.body).await,
        _ => respond_error(&mut socket, 404, "no such endpoint").await,
    }
}

/// Runs a job synchronously and writes the report back on the same
/// connection; the submitter holds the request open for the whole run.
async fn submit_job(socket: &mut TcpStream, body: &[u8]) -> AppResult<()> {
    let spec: JobSpec = match serde_json::from_slice(body) {
        Ok(spec) => spec,
        Err(err) => {
            return respond_error(socket, 400, &format!("Invalid job spec: {}", err)).await;
        }
    };

    let report = async {
        let config = RunConfig::from_spec(&spec)?;
        let engine = Engine::new(config).await?;
        engine.run(None).await
    }
    .await;

    match report {
        Ok(report) => respond_json(socket, 202, &report).await,
        Err(err) => respond_error(socket, err.status_code(), &err.to_string()).await,
    }
}

struct ControlRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

/// Reads just enough HTTP/1.1 for the control plane's single JSON
/// endpoint: a request line, the content length, and the body.
async fn read_control_request<R>(reader: &mut R) -> Result<ControlRequest, (u16, String)>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let mut head_bytes = reader
        .read_line(&mut line)
        .await
        .map_err(|err| (400, format!("unreadable request line: {}", err)))?;
    if head_bytes == 0 {
        return Err((400, "connection closed before a request line".to_owned()));
    }
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| (400, "request line has no method".to_owned()))?
        .to_owned();
    let path = parts
        .next()
        .ok_or_else(|| (400, "request line has no path".to_owned()))?
        .to_owned();

    let mut content_length: usize = 0;
    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .await
            .map_err(|err| (400, format!("unreadable header: {}", err)))?;
        if bytes == 0 {
            return Err((400, "connection closed inside the header block".to_owned()));
        }
        head_bytes = head_bytes.saturating_add(bytes);
        if head_bytes > MAX_HEAD_BYTES {
            return Err((413, "header block too large".to_owned()));
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| (400, "invalid content-length".to_owned()))?;
            }
        }
    }

    if content_length > MAX_BODY_BYTES {
        return Err((413, "request body too large".to_owned()));
    }
    let mut body = vec![0u8; content_length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|err| (400, format!("short request body: {}", err)))?;

    Ok(ControlRequest { method, path, body })
}

async fn respond_json<T>(socket: &mut TcpStream, status: u16, payload: &T) -> AppResult<()>
where
    T: Serialize,
{
    let body = serde_json::to_vec(payload).map_err(|err| {
        AppError::server(ServerError::Serialize {
            context: "control response",
            source: err,
        })
    })?;
    let mut response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason(status),
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(&body);
    socket.write_all(&response).await.map_err(|err| {
        AppError::server(ServerError::Io {
            context: "writing control response",
            source: err,
        })
    })
}

async fn respond_error(socket: &mut TcpStream, status: u16, message: &str) -> AppResult<()> {
    respond_json(socket, status, &ErrorBody::new(status, message)).await
}

/// Looks at the request line without consuming it, so a WebSocket upgrade
/// can be handed a pristine stream.
async fn peek_request_line(socket: &TcpStream) -> Option<(String, String)> {
    let mut buffer = [0u8; 1024];
    for _ in 0..50 {
        let peeked = socket.peek(&mut buffer).await.ok()?;
        if peeked == 0 {
            return None;
        }
        let head = buffer.get(..peeked)?;
        if let Some(pos) = head.windows(2).position(|window| window == b"\r\n") {
            let line = std::str::from_utf8(head.get(..pos)?).ok()?;
            let mut parts = line.split_whitespace();
            let method = parts.next()?.to_owned();
            let path = parts.next()?.to_owned();
            return Some((method, path));
        }
        if peeked == buffer.len() {
            // Request line longer than the buffer; treat it as plain HTTP.
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}
