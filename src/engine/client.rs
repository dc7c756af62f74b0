use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Body, Client, Request, Url};
use tokio::time::Instant;

use crate::config::{BodySource, ClientKind, RunConfig};
use crate::error::{AppError, AppResult, ConfigError, HttpError};
use crate::payload::{Payload, Row};
use crate::stats::{RequestRecord, RunStats};

use super::assert::assert_that;
use super::template::replace;

/// Executes one request per call on behalf of a worker.
///
/// The client kind only changes how the underlying pool is built; the
/// per-request protocol is shared. Static fields (URL, headers) are
/// prepared once; fields flagged as containing placeholders are resolved
/// against the worker's payload row on every call.
pub struct WorkerClient {
    client: Client,
    config: Arc<RunConfig>,
    payload: Option<Arc<Payload>>,
    base_url: Option<Url>,
    base_headers: HeaderMap,
    stats: Arc<RunStats>,
}

impl WorkerClient {
    pub fn new(
        config: Arc<RunConfig>,
        payload: Option<Arc<Payload>>,
        stats: Arc<RunStats>,
    ) -> AppResult<Self> {
        let pool_size = usize::try_from(config.connections).unwrap_or(usize::MAX);
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(pool_size);
        builder = match config.client_kind {
            ClientKind::Fast => builder,
            ClientKind::H1 => builder.http1_only(),
            ClientKind::H2 => builder.http2_prior_knowledge(),
        };
        let client = builder
            .build()
            .map_err(|err| AppError::http(HttpError::BuildClient { source: err }))?;

        let base_headers = build_header_map(&config.headers, None)?;
        let base_url = if config.resolve_url {
            None
        } else {
            // Validated at config build.
            Some(Url::parse(&config.url).map_err(|err| {
                AppError::config(ConfigError::InvalidUrl {
                    url: config.url.clone(),
                    source: err,
                })
            })?)
        };

        Ok(Self {
            client,
            config,
            payload,
            base_url,
            base_headers,
            stats,
        })
    }

    /// Executes one request and returns its result record. Transport
    /// errors yield `status = -1` and never fail the run.
    pub async fn execute(&self, worker_idx: u64) -> RequestRecord {
        let row = self
            .payload
            .as_ref()
            .map(|payload| payload.get(self.config.scope, worker_idx));

        let url = match self.resolve_request_url(row) {
            Ok(url) => url,
            Err(message) => return error_record(0, message),
        };

        let headers = if self.config.resolve_headers {
            match build_header_map(&self.config.headers, row) {
                Ok(headers) => headers,
                Err(err) => return error_record(0, err.to_string()),
            }
        } else {
            self.base_headers.clone()
        };

        let mut request = Request::new(self.config.method.clone(), url);
        *request.headers_mut() = headers;

        let body_len = match self.attach_body(&mut request, row).await {
            Ok(len) => len,
            Err(message) => return error_record(0, message),
        };
        self.stats
            .add_bytes_written(request_overhead(&request).saturating_add(body_len));

        let start = Instant::now();
        match self.client.execute(request).await {
            Ok(response) => {
                let status = i32::from(response.status().as_u16());
                let (assert_ok, read_error) = self.drain_and_assert(response).await;
                RequestRecord {
                    status,
                    elapsed_micros: elapsed_micros(start),
                    assert_ok,
                    error: read_error,
                }
            }
            Err(err) => error_record(elapsed_micros(start), err.to_string()),
        }
    }

    fn resolve_request_url(&self, row: Option<&Row>) -> Result<Url, String> {
        if let Some(url) = &self.base_url {
            return Ok(url.clone());
        }
        let rendered = match row {
            Some(row) => replace(&self.config.url, row),
            None => self.config.url.clone(),
        };
        Url::parse(&rendered).map_err(|err| {
            AppError::http(HttpError::InvalidResolvedUrl {
                url: rendered,
                source: err,
            })
            .to_string()
        })
    }

    async fn attach_body(
        &self,
        request: &mut Request,
        row: Option<&Row>,
    ) -> Result<u64, String> {
        match &self.config.body {
            BodySource::Inline(text) => {
                if text.is_empty() {
                    return Ok(0);
                }
                let body = match row {
                    Some(row) if self.config.resolve_body => replace(text, row),
                    _ => text.clone(),
                };
                let len = u64::try_from(body.len()).unwrap_or(u64::MAX);
                *request.body_mut() = Some(Body::from(body));
                Ok(len)
            }
            BodySource::File(path) => {
                // A fresh reader per call; connections may retry.
                let file = tokio::fs::File::open(path).await.map_err(|err| {
                    AppError::http(HttpError::OpenBodyFile {
                        path: path.clone(),
                        source: err,
                    })
                    .to_string()
                })?;
                let len = file.metadata().await.map(|meta| meta.len()).unwrap_or(0);
                *request.body_mut() = Some(Body::from(file));
                Ok(len)
            }
        }
    }

    /// Drains the response body, counting bytes read, and evaluates the
    /// configured assertions against it. Returns the assertion outcome and
    /// any read error.
    async fn drain_and_assert(&self, response: reqwest::Response) -> (bool, Option<String>) {
        let collect = !self.config.assertions.is_empty();
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    self.stats
                        .add_bytes_read(u64::try_from(bytes.len()).unwrap_or(u64::MAX));
                    if collect {
                        body.extend_from_slice(&bytes);
                    }
                }
                Err(err) => return (false, Some(err.to_string())),
            }
        }
        if !collect {
            return (true, None);
        }
        (
            assert_that(&body, &self.config.assertions).successful,
            None,
        )
    }
}

fn error_record(elapsed_micros: u64, message: String) -> RequestRecord {
    RequestRecord {
        status: -1,
        elapsed_micros,
        assert_ok: false,
        error: Some(message),
    }
}

fn elapsed_micros(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}

/// Approximate wire size of the request line and headers. Byte accounting
/// lives at this layer because the pool does not expose its sockets.
fn request_overhead(request: &Request) -> u64 {
    let line = request.method().as_str().len() + request.url().as_str().len() + 12;
    let headers: usize = request
        .headers()
        .iter()
        .map(|(key, value)| key.as_str().len() + value.len() + 4)
        .sum();
    u64::try_from(line + headers).unwrap_or(u64::MAX)
}

fn build_header_map(
    headers: &[(String, String)],
    row: Option<&Row>,
) -> AppResult<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let resolved = match row {
            Some(row) => replace(value, row),
            None => value.clone(),
        };
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
            AppError::config(ConfigError::MalformedHeader {
                header: format!("{}: {}", key, value),
            })
        })?;
        let header_value = HeaderValue::from_str(&resolved).map_err(|_| {
            AppError::config(ConfigError::MalformedHeader {
                header: format!("{}: {}", key, resolved),
            })
        })?;
        map.append(name, header_value);
    }
    Ok(map)
}
