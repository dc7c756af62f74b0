mod support;

use std::io::Write;
use std::time::{Duration, Instant};

use barrage::config::{JobSpec, RunConfig};
use barrage::engine::Engine;
use barrage::payload::{Payload, Scope};

use support::spawn_http_server;

fn counted_spec(url: &str, conns: u64, reqs: u64) -> JobSpec {
    JobSpec {
        num_conns: conns,
        num_reqs: Some(reqs),
        url: url.to_owned(),
        method: "GET".to_owned(),
        ..JobSpec::default()
    }
}

async fn run_job(spec: &JobSpec) -> Result<barrage::report::RunReport, String> {
    let config = RunConfig::from_spec(spec).map_err(|err| err.to_string())?;
    let engine = Engine::new(config).await.map_err(|err| err.to_string())?;
    engine.run(None).await.map_err(|err| err.to_string())
}

#[tokio::test(flavor = "multi_thread")]
async fn counted_job_attempts_exactly_n_requests() -> Result<(), String> {
    let (url, _server) = spawn_http_server("{}")?;
    let report = run_job(&counted_spec(&url, 10, 100)).await?;

    assert_eq!(report.num_reqs, 100);
    assert_eq!(report.status.req2xx, 100);
    let total = report.status.req1xx
        + report.status.req2xx
        + report.status.req3xx
        + report.status.req4xx
        + report.status.req5xx
        + report.status.others;
    assert_eq!(total, 100);
    assert_eq!(report.error_count, 0);

    let tps: f64 = report.tps.parse().map_err(|_| "tps not numeric")?;
    assert!(tps > 0.0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_job_stops_at_the_deadline() -> Result<(), String> {
    let (url, _server) = spawn_http_server("{}")?;
    let spec = JobSpec {
        num_conns: 4,
        duration_secs: Some(1),
        url,
        method: "GET".to_owned(),
        ..JobSpec::default()
    };

    let start = Instant::now();
    let report = run_job(&spec).await?;
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(1));
    // One in-flight request per worker may land after the deadline.
    assert!(elapsed < Duration::from_secs(4), "took {:?}", elapsed);
    assert!(report.num_reqs > 0);
    assert_eq!(report.error_count, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_errors_count_as_others() -> Result<(), String> {
    // Nothing listens on this address.
    let report = run_job(&counted_spec("http://127.0.0.1:9/none", 2, 10)).await?;

    assert_eq!(report.status.others, 10);
    assert_eq!(report.status.req2xx, 0);
    // Transport failures carry a failed assertion result.
    assert_eq!(report.error_count, 10);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn assertions_pass_against_response_body() -> Result<(), String> {
    let (url, _server) = spawn_http_server(r#"{"user": {"name": "Tom"}}"#)?;
    let mut spec = counted_spec(&url, 2, 20);
    spec.assertions = vec![
        assertion("$.user", "NOT_NULL", ""),
        assertion("$.age", "NULL", ""),
        assertion("$.user.name", "EQUAL", "Tom"),
    ];

    let report = run_job(&spec).await?;
    assert_eq!(report.status.req2xx, 20);
    assert_eq!(report.error_count, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_assertions_increment_error_count() -> Result<(), String> {
    let (url, _server) = spawn_http_server(r#"{"user": {"name": "Tom"}}"#)?;
    let mut spec = counted_spec(&url, 2, 10);
    spec.assertions = vec![assertion("$.user.name", "EQUAL", "NotTom")];

    let report = run_job(&spec).await?;
    // The request itself succeeds; only the assertion fails.
    assert_eq!(report.status.req2xx, 10);
    assert_eq!(report.error_count, 10);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn payload_rows_feed_placeholders() -> Result<(), String> {
    let (url, _server) = spawn_http_server("{}")?;

    let mut csv = tempfile::NamedTempFile::new().map_err(|err| err.to_string())?;
    writeln!(csv, "tom").map_err(|err| err.to_string())?;
    writeln!(csv, "ann").map_err(|err| err.to_string())?;
    let csv_path = csv
        .path()
        .to_str()
        .ok_or("csv path not utf-8")?
        .to_owned();

    let mut spec = counted_spec(&format!("{}/users/${{name}}", url), 2, 10);
    spec.payload_file = csv_path;
    spec.variable_names = "name".to_owned();
    spec.scope = "request".to_owned();

    let report = run_job(&spec).await?;
    assert_eq!(report.status.req2xx, 10);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limited_job_respects_the_rate() -> Result<(), String> {
    let (url, _server) = spawn_http_server("{}")?;
    let mut spec = counted_spec(&url, 2, 20);
    spec.rate = Some(40);

    let start = Instant::now();
    let report = run_job(&spec).await?;
    let elapsed = start.elapsed();

    assert_eq!(report.status.req2xx, 20);
    // 20 requests at 40 req/s with a burst bucket of 4 need refills.
    assert!(elapsed >= Duration::from_millis(300), "took {:?}", elapsed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn payload_loads_from_an_upstream_url() -> Result<(), String> {
    let (url, _server) = spawn_http_server(r#"[{"name": "a"}, {"name": "b"}]"#)?;
    let columns = vec!["name".to_owned()];
    let payload = Payload::from_url(&url, &columns, 0, 2)
        .await
        .map_err(|err| err.to_string())?;

    assert_eq!(payload.len(), 2);
    let row = payload.get(Scope::Connection, 1);
    assert_eq!(row["name"], "b");
    Ok(())
}

fn assertion(expression: &str, condition: &str, expected: &str) -> barrage::config::AssertionSpec {
    barrage::config::AssertionSpec {
        asserter: "JsonPath".to_owned(),
        expression: expression.to_owned(),
        condition: condition.to_owned(),
        expected: expected.to_owned(),
    }
}
