use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;

use crate::config::RunConfig;
use crate::stats::RunStats;

/// Quantiles exposed in the report, with their wire labels.
const REPORT_QUANTILES: [(f64, &str); 6] = [
    (0.25, "0.25"),
    (0.5, "0.5"),
    (0.75, "0.75"),
    (0.9, "0.9"),
    (0.95, "0.95"),
    (0.99, "0.99"),
];

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub req1xx: u64,
    pub req2xx: u64,
    pub req3xx: u64,
    pub req4xx: u64,
    pub req5xx: u64,
    #[serde(rename = "other")]
    pub others: u64,
}

/// Latency figures as decimal strings in milliseconds with two fractional
/// digits; the internal unit is microseconds.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyReport {
    pub avg: String,
    #[serde(rename = "stdDev")]
    pub std_dev: String,
    pub max: String,
    pub min: String,
    pub percentiles: BTreeMap<String, String>,
}

/// The aggregated report returned to the submitter.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub url: String,
    #[serde(rename = "numConns")]
    pub num_conns: u64,
    #[serde(rename = "numReqs")]
    pub num_reqs: u64,
    pub status: StatusReport,
    pub latency: LatencyReport,
    pub tps: String,
    #[serde(rename = "errorCount")]
    pub error_count: u64,
}

impl RunReport {
    /// Assembles the final report after all workers have joined.
    #[must_use]
    pub fn build(
        config: &RunConfig,
        stats: &RunStats,
        completed_reqs: u64,
        time_taken: Duration,
    ) -> Self {
        let quantiles: Vec<f64> = REPORT_QUANTILES.iter().map(|(q, _)| *q).collect();
        let latencies = stats.latency_summary(&quantiles);

        let percentiles = REPORT_QUANTILES
            .iter()
            .zip(latencies.percentiles.iter())
            .map(|((_, label), (_, micros))| ((*label).to_owned(), format_ms(*micros as f64)))
            .collect();

        let status = stats.status();
        let num_reqs = config.counted_requests().unwrap_or(completed_reqs);
        let seconds = time_taken.as_secs_f64();
        let tps = if seconds > 0.0 {
            num_reqs as f64 / seconds
        } else {
            0.0
        };

        Self {
            url: config.url.clone(),
            num_conns: config.connections,
            num_reqs,
            status: StatusReport {
                req1xx: status.req_1xx.load(Ordering::Relaxed),
                req2xx: status.req_2xx.load(Ordering::Relaxed),
                req3xx: status.req_3xx.load(Ordering::Relaxed),
                req4xx: status.req_4xx.load(Ordering::Relaxed),
                req5xx: status.req_5xx.load(Ordering::Relaxed),
                others: status.others.load(Ordering::Relaxed),
            },
            latency: LatencyReport {
                avg: format_ms(latencies.mean),
                std_dev: format_ms(latencies.stddev),
                max: format_ms(latencies.max as f64),
                min: format_ms(latencies.min as f64),
                percentiles,
            },
            tps: format!("{:.2}", tps),
            error_count: stats.assert_failures(),
        }
    }
}

fn format_ms(micros: f64) -> String {
    format!("{:.2}", micros / 1000.0)
}
