use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use url::Url;

use crate::error::{AppError, AppResult, PayloadError};

/// Rule choosing which payload row a worker sees for a given request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every request advances the shared cursor.
    Request,
    /// Each connection sticks to one row bucket.
    Connection,
    /// All workers share one constant row.
    Global,
}

pub type Row = BTreeMap<String, String>;

/// A finite table of variable bindings served to workers by scope.
///
/// Read-only after construction except for the cursor, which wraps on
/// overflow; indexing is always `cursor % len`.
#[derive(Debug)]
pub struct Payload {
    rows: Vec<Row>,
    cursor: AtomicU32,
    base: u32,
    len: u32,
}

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

impl Payload {
    fn new(rows: Vec<Row>, start: u32) -> AppResult<Self> {
        let len = u32::try_from(rows.len()).unwrap_or(u32::MAX);
        if len == 0 {
            return Err(AppError::payload(PayloadError::NoRows));
        }
        Ok(Self {
            rows,
            cursor: AtomicU32::new(start),
            base: start,
            len,
        })
    }

    /// Loads rows from a headerless CSV file, binding columns to `columns`
    /// in order. The column count must match the file exactly.
    pub fn from_file(path: &Path, columns: &[String], start_line: u32) -> AppResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .map_err(|err| {
                AppError::payload(PayloadError::ReadCsv {
                    path: path.to_path_buf(),
                    source: err,
                })
            })?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| {
                AppError::payload(PayloadError::ReadCsv {
                    path: path.to_path_buf(),
                    source: err,
                })
            })?;
            if record.len() != columns.len() {
                return Err(AppError::payload(PayloadError::ColumnMismatch {
                    expected: columns.len(),
                    found: record.len(),
                }));
            }
            let row = columns
                .iter()
                .cloned()
                .zip(record.iter().map(|field| field.to_owned()))
                .collect();
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(AppError::payload(PayloadError::EmptyFile {
                path: path.to_path_buf(),
            }));
        }
        Self::new(rows, start_line)
    }

    /// Fetches rows from an upstream dataset service: a GET with `columns`,
    /// `offset`, and `limit` query parameters returning a JSON array of
    /// `{column: value}` objects.
    pub async fn from_url(
        payload_url: &str,
        columns: &[String],
        offset: u32,
        limit: u32,
    ) -> AppResult<Self> {
        let mut request_url = Url::parse(payload_url).map_err(|err| {
            AppError::config(crate::error::ConfigError::InvalidUrl {
                url: payload_url.to_owned(),
                source: err,
            })
        })?;
        request_url
            .query_pairs_mut()
            .append_pair("columns", &columns.join(","))
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());

        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|err| {
                AppError::payload(PayloadError::Fetch {
                    url: payload_url.to_owned(),
                    source: err,
                })
            })?;
        let response = client.get(request_url).send().await.map_err(|err| {
            AppError::payload(PayloadError::Fetch {
                url: payload_url.to_owned(),
                source: err,
            })
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|err| {
            AppError::payload(PayloadError::Fetch {
                url: payload_url.to_owned(),
                source: err,
            })
        })?;

        if status != reqwest::StatusCode::OK {
            let message = if body.is_empty() {
                format!("invalid status code '{}'", status.as_u16())
            } else {
                String::from_utf8_lossy(&body).into_owned()
            };
            return Err(AppError::payload(PayloadError::UpstreamRejected {
                message,
            }));
        }

        let rows: Vec<Row> = serde_json::from_slice(&body)
            .map_err(|err| AppError::payload(PayloadError::MalformedRows { source: err }))?;
        Self::new(rows, 0)
    }

    /// Returns the row a request should use under `scope`.
    ///
    /// `Request` atomically advances the shared cursor and never blocks;
    /// `Connection` maps `worker_idx` to a stable row bucket; `Global`
    /// reads the cursor without advancing.
    #[must_use]
    pub fn get(&self, scope: Scope, worker_idx: u64) -> &Row {
        let index = match scope {
            Scope::Request => self.cursor.fetch_add(1, Ordering::Relaxed),
            Scope::Connection => {
                let idx = u32::try_from(worker_idx % u64::from(self.len)).unwrap_or(0);
                self.base.wrapping_add(idx)
            }
            Scope::Global => self.cursor.load(Ordering::Relaxed),
        };
        // len > 0 by construction.
        &self.rows[(index % self.len) as usize]
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
