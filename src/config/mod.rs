use std::path::PathBuf;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use reqwest::Method;
use serde::Deserialize;
use url::Url;

use crate::engine::assert::{Assertion, Asserter, Condition};
use crate::engine::template::contains_placeholder;
use crate::error::{AppError, AppResult, ConfigError};
use crate::payload::Scope;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// A job spec as submitted over the control channel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobSpec {
    #[serde(rename = "NumConns", alias = "numConns")]
    pub num_conns: u64,
    #[serde(rename = "NumReqs", alias = "numReqs")]
    pub num_reqs: Option<u64>,
    #[serde(rename = "DurationSecs", alias = "durationSecs")]
    pub duration_secs: Option<u64>,
    #[serde(rename = "Url", alias = "url")]
    pub url: String,
    #[serde(rename = "Method", alias = "method")]
    pub method: String,
    #[serde(rename = "Headers", alias = "headers")]
    pub headers: Vec<String>,
    #[serde(rename = "Body", alias = "body")]
    pub body: String,
    #[serde(rename = "BodyFile", alias = "bodyFile")]
    pub body_file: Option<String>,
    #[serde(rename = "PayloadFile", alias = "payloadFile")]
    pub payload_file: String,
    #[serde(rename = "PayloadUrl", alias = "payloadUrl")]
    pub payload_url: String,
    #[serde(rename = "VariableNames", alias = "variableNames")]
    pub variable_names: String,
    #[serde(rename = "StartLine", alias = "startLine")]
    pub start_line: u32,
    #[serde(rename = "Scope", alias = "scope")]
    pub scope: String,
    #[serde(rename = "Rate", alias = "rate")]
    pub rate: Option<u64>,
    #[serde(rename = "TimeoutSecs", alias = "timeoutSecs")]
    pub timeout_secs: Option<u64>,
    #[serde(rename = "Client", alias = "client")]
    pub client: String,
    #[serde(rename = "Assertions", alias = "assertions")]
    pub assertions: Vec<AssertionSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssertionSpec {
    #[serde(rename = "Asserter", alias = "asserter")]
    pub asserter: String,
    #[serde(rename = "Expression", alias = "expression")]
    pub expression: String,
    #[serde(rename = "Condition", alias = "condition")]
    pub condition: String,
    #[serde(rename = "Expected", alias = "expected")]
    pub expected: String,
}

/// Workload shape: a fixed request budget or a fixed duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    Counted { requests: u64 },
    Timed { duration: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// Keep-alive pool sized to the connection count; the default.
    Fast,
    H1,
    H2,
}

#[derive(Debug, Clone)]
pub enum BodySource {
    Inline(String),
    /// Streamed from disk with a fresh reader per request.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub enum PayloadSource {
    File(PathBuf),
    Url(String),
}

/// Frozen configuration for one run. Constructed once per job, owned by the
/// orchestrator, shared immutably with all workers.
#[derive(Debug)]
pub struct RunConfig {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: BodySource,
    pub workload: Workload,
    pub connections: u64,
    pub rate: Option<u64>,
    pub timeout: Duration,
    pub client_kind: ClientKind,
    pub payload_source: Option<PayloadSource>,
    pub variable_names: Vec<String>,
    pub start_line: u32,
    pub scope: Scope,
    pub assertions: Vec<Assertion>,
    /// Placeholder presence is precomputed per field so static requests
    /// skip scanning on the hot path. Only set when a payload exists.
    pub resolve_url: bool,
    pub resolve_headers: bool,
    pub resolve_body: bool,
}

impl RunConfig {
    /// Validates a submitted job spec and freezes it into a run
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing or invalid field; no job
    /// is started in that case.
    pub fn from_spec(spec: &JobSpec) -> AppResult<Self> {
        if spec.url.is_empty() {
            return Err(AppError::config(ConfigError::MissingUrl));
        }
        if spec.num_conns == 0 {
            return Err(AppError::config(ConfigError::ZeroConnections));
        }

        let method = parse_method(&spec.method)?;
        let workload = parse_workload(spec)?;
        let headers = parse_headers(&spec.headers)?;
        let scope = parse_scope(&spec.scope)?;
        let client_kind = parse_client_kind(&spec.client)?;
        let assertions = parse_assertions(&spec.assertions)?;

        if let Some(rate) = spec.rate {
            if rate == 0 {
                return Err(AppError::config(ConfigError::ZeroRate));
            }
        }

        let payload_source = if !spec.payload_file.is_empty() {
            Some(PayloadSource::File(PathBuf::from(&spec.payload_file)))
        } else if !spec.payload_url.is_empty() {
            Some(PayloadSource::Url(spec.payload_url.clone()))
        } else {
            None
        };

        let variable_names: Vec<String> = spec
            .variable_names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect();
        if payload_source.is_some() && variable_names.is_empty() {
            return Err(AppError::config(ConfigError::MissingVariableNames));
        }

        // Placeholder tokens may arrive percent-encoded from JSON tooling;
        // the URL is decoded only when a payload can resolve them. A literal
        // `%` in a payload-less URL stays untouched.
        let url = if payload_source.is_some() {
            percent_decode_str(&spec.url)
                .decode_utf8()
                .map_err(|_| {
                    AppError::config(ConfigError::UrlDecode {
                        url: spec.url.clone(),
                    })
                })?
                .into_owned()
        } else {
            spec.url.clone()
        };

        Url::parse(&url).map_err(|err| {
            AppError::config(ConfigError::InvalidUrl {
                url: url.clone(),
                source: err,
            })
        })?;

        let body = match spec.body_file.as_deref() {
            Some(path) if !path.is_empty() => BodySource::File(PathBuf::from(path)),
            _ => BodySource::Inline(spec.body.clone()),
        };

        let (resolve_url, resolve_headers, resolve_body) = if payload_source.is_some() {
            let resolve_body = match &body {
                BodySource::Inline(text) => contains_placeholder(text),
                BodySource::File(_) => false,
            };
            (
                contains_placeholder(&url),
                headers
                    .iter()
                    .any(|(_, value)| contains_placeholder(value)),
                resolve_body,
            )
        } else {
            (false, false, false)
        };

        let timeout = spec
            .timeout_secs
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);

        Ok(Self {
            url,
            method,
            headers,
            body,
            workload,
            connections: spec.num_conns,
            rate: spec.rate,
            timeout,
            client_kind,
            payload_source,
            variable_names,
            start_line: spec.start_line,
            scope,
            assertions,
            resolve_url,
            resolve_headers,
            resolve_body,
        })
    }

    /// Total request budget for a counted workload.
    #[must_use]
    pub fn counted_requests(&self) -> Option<u64> {
        match self.workload {
            Workload::Counted { requests } => Some(requests),
            Workload::Timed { .. } => None,
        }
    }
}

fn parse_method(method: &str) -> AppResult<Method> {
    if method.is_empty() {
        return Err(AppError::config(ConfigError::MissingMethod));
    }
    Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| {
        AppError::config(ConfigError::InvalidMethod {
            method: method.to_owned(),
        })
    })
}

fn parse_workload(spec: &JobSpec) -> AppResult<Workload> {
    match (spec.num_reqs, spec.duration_secs) {
        (Some(0), _) => Err(AppError::config(ConfigError::ZeroRequests)),
        (Some(requests), _) => Ok(Workload::Counted { requests }),
        (None, Some(0)) => Err(AppError::config(ConfigError::ZeroDuration)),
        (None, Some(secs)) => Ok(Workload::Timed {
            duration: Duration::from_secs(secs),
        }),
        (None, None) => Err(AppError::config(ConfigError::MissingWorkload)),
    }
}

fn parse_headers(headers: &[String]) -> AppResult<Vec<(String, String)>> {
    headers
        .iter()
        .map(|header| {
            header
                .split_once(':')
                .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| {
                    AppError::config(ConfigError::MalformedHeader {
                        header: header.clone(),
                    })
                })
        })
        .collect()
}

fn parse_scope(scope: &str) -> AppResult<Scope> {
    match scope.to_ascii_lowercase().as_str() {
        "" | "request" => Ok(Scope::Request),
        "connection" => Ok(Scope::Connection),
        "global" => Ok(Scope::Global),
        _ => Err(AppError::config(ConfigError::InvalidScope {
            scope: scope.to_owned(),
        })),
    }
}

fn parse_client_kind(client: &str) -> AppResult<ClientKind> {
    match client.to_ascii_lowercase().as_str() {
        "" | "fast" => Ok(ClientKind::Fast),
        "h1" | "http1" => Ok(ClientKind::H1),
        "h2" | "http2" => Ok(ClientKind::H2),
        _ => Err(AppError::config(ConfigError::InvalidClientType {
            client: client.to_owned(),
        })),
    }
}

fn parse_assertions(specs: &[AssertionSpec]) -> AppResult<Vec<Assertion>> {
    specs
        .iter()
        .map(|spec| {
            let condition = match spec.condition.as_str() {
                "NULL" => Condition::Null,
                "NOT_NULL" => Condition::NotNull,
                "EQUAL" => Condition::Equal,
                other => {
                    return Err(AppError::config(ConfigError::InvalidCondition {
                        condition: other.to_owned(),
                    }))
                }
            };
            let asserter = if spec.asserter == "JsonPath" {
                Asserter::JsonPath
            } else {
                Asserter::Other
            };
            Ok(Assertion {
                asserter,
                expression: spec.expression.clone(),
                condition,
                expected: spec.expected.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> JobSpec {
        JobSpec {
            num_conns: 10,
            num_reqs: Some(100),
            url: "http://localhost:8080/ping".to_owned(),
            method: "get".to_owned(),
            ..JobSpec::default()
        }
    }

    #[test]
    fn freezes_a_minimal_spec() -> AppResult<()> {
        let config = RunConfig::from_spec(&base_spec())?;
        assert_eq!(config.method, Method::GET);
        assert_eq!(config.connections, 10);
        assert_eq!(config.workload, Workload::Counted { requests: 100 });
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.client_kind, ClientKind::Fast);
        assert_eq!(config.scope, Scope::Request);
        assert!(!config.resolve_url);
        Ok(())
    }

    #[test]
    fn requires_url_method_and_workload() {
        let mut spec = base_spec();
        spec.url = String::new();
        assert!(RunConfig::from_spec(&spec).is_err());

        let mut spec = base_spec();
        spec.method = String::new();
        assert!(RunConfig::from_spec(&spec).is_err());

        let mut spec = base_spec();
        spec.num_reqs = None;
        assert!(RunConfig::from_spec(&spec).is_err());

        spec.duration_secs = Some(5);
        assert!(RunConfig::from_spec(&spec).is_ok());
    }

    #[test]
    fn parses_header_strings() -> AppResult<()> {
        let mut spec = base_spec();
        spec.headers = vec!["Content-Type: application/json".to_owned()];
        let config = RunConfig::from_spec(&spec)?;
        assert_eq!(
            config.headers,
            vec![("Content-Type".to_owned(), "application/json".to_owned())]
        );

        spec.headers = vec!["no-colon-here".to_owned()];
        assert!(RunConfig::from_spec(&spec).is_err());
        Ok(())
    }

    #[test]
    fn rejects_unknown_scope() {
        let mut spec = base_spec();
        spec.scope = "thread".to_owned();
        assert!(RunConfig::from_spec(&spec).is_err());
    }

    #[test]
    fn placeholder_flags_require_a_payload() -> AppResult<()> {
        let mut spec = base_spec();
        spec.url = "http://localhost/u/${name}".to_owned();
        spec.body = "hi ${name}".to_owned();
        let config = RunConfig::from_spec(&spec)?;
        assert!(!config.resolve_url);
        assert!(!config.resolve_body);

        spec.payload_file = "users.csv".to_owned();
        spec.variable_names = "name".to_owned();
        let config = RunConfig::from_spec(&spec)?;
        assert!(config.resolve_url);
        assert!(config.resolve_body);
        Ok(())
    }

    #[test]
    fn decodes_url_only_with_payload() -> AppResult<()> {
        let mut spec = base_spec();
        spec.url = "http://localhost/u/%7B".to_owned();
        let config = RunConfig::from_spec(&spec)?;
        assert_eq!(config.url, "http://localhost/u/%7B");

        spec.url = "http://localhost/u/$%7Bname%7D".to_owned();
        spec.payload_file = "users.csv".to_owned();
        spec.variable_names = "name".to_owned();
        let config = RunConfig::from_spec(&spec)?;
        assert_eq!(config.url, "http://localhost/u/${name}");
        assert!(config.resolve_url);
        Ok(())
    }

    #[test]
    fn spec_deserializes_wire_field_names() -> Result<(), String> {
        let raw = r#"{
            "NumConns": 5,
            "NumReqs": 50,
            "Url": "http://localhost/api",
            "Method": "POST",
            "Headers": ["Accept: application/json"],
            "Body": "{}",
            "Scope": "connection",
            "Assertions": [
                {"Asserter": "JsonPath", "Expression": "$.ok", "Condition": "NOT_NULL", "Expected": ""}
            ]
        }"#;
        let spec: JobSpec = serde_json::from_str(raw).map_err(|err| err.to_string())?;
        assert_eq!(spec.num_conns, 5);
        assert_eq!(spec.num_reqs, Some(50));
        assert_eq!(spec.assertions.len(), 1);
        let config = RunConfig::from_spec(&spec).map_err(|err| err.to_string())?;
        assert_eq!(config.scope, Scope::Connection);
        assert_eq!(config.assertions.len(), 1);
        Ok(())
    }
}
