use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::error::{AppError, AppResult, StatsError};

/// Outcome of one request, consumed by the aggregator.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// HTTP status code, or `-1` on a transport error.
    pub status: i32,
    pub elapsed_micros: u64,
    pub assert_ok: bool,
    pub error: Option<String>,
}

/// Six status-class counters, one increment per completed request.
#[derive(Debug, Default)]
pub struct StatusCounts {
    pub req_1xx: AtomicU64,
    pub req_2xx: AtomicU64,
    pub req_3xx: AtomicU64,
    pub req_4xx: AtomicU64,
    pub req_5xx: AtomicU64,
    pub others: AtomicU64,
}

impl StatusCounts {
    fn record(&self, status: i32) {
        let counter = match status / 100 {
            1 => &self.req_1xx,
            2 => &self.req_2xx,
            3 => &self.req_3xx,
            4 => &self.req_4xx,
            5 => &self.req_5xx,
            _ => &self.others,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.req_1xx
            .load(Ordering::Relaxed)
            .saturating_add(self.req_2xx.load(Ordering::Relaxed))
            .saturating_add(self.req_3xx.load(Ordering::Relaxed))
            .saturating_add(self.req_4xx.load(Ordering::Relaxed))
            .saturating_add(self.req_5xx.load(Ordering::Relaxed))
            .saturating_add(self.others.load(Ordering::Relaxed))
    }
}

/// Error messages keyed by occurrence count.
#[derive(Debug, Default)]
pub struct ErrorMap {
    entries: Mutex<HashMap<String, u64>>,
}

impl ErrorMap {
    pub fn add(&self, message: &str) {
        let mut entries = self.entries.lock();
        *entries.entry(message.to_owned()).or_insert(0) += 1;
    }

    /// Entries sorted by count descending, message ascending for ties.
    #[must_use]
    pub fn by_frequency(&self) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = self
            .entries
            .lock()
            .iter()
            .map(|(message, count)| (message.clone(), *count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

/// Running statistics over requests-per-second samples.
#[derive(Debug, Default)]
struct RpsAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
    max: f64,
}

impl RpsAccumulator {
    fn record(&mut self, sample: f64) {
        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample - self.mean);
        if sample > self.max {
            self.max = sample;
        }
    }

    fn stddev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / self.count as f64).sqrt()
    }
}

/// Summary of the requests-per-second samples taken during a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpsSummary {
    pub mean: f64,
    pub stddev: f64,
    pub max: f64,
}

/// Summary of the latency histogram, in microseconds.
#[derive(Debug, Clone)]
pub struct LatencySummary {
    pub mean: f64,
    pub stddev: f64,
    pub max: u64,
    pub min: u64,
    /// `(quantile, value_micros)` pairs in ascending quantile order.
    pub percentiles: Vec<(f64, u64)>,
}

/// Concurrently updated aggregates for one run.
///
/// Workers call [`RunStats::record`]; the orchestrator reads everything
/// else after the workers have joined.
#[derive(Debug)]
pub struct RunStats {
    latencies: Mutex<Histogram<u64>>,
    status: StatusCounts,
    errors: ErrorMap,
    assert_failures: AtomicU64,
    since_sample: AtomicU64,
    rps: Mutex<RpsAccumulator>,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl RunStats {
    /// Creates empty aggregates.
    ///
    /// # Errors
    ///
    /// Returns an error if the latency histogram cannot be created.
    pub fn new() -> AppResult<Self> {
        let latencies = Histogram::<u64>::new(3).map_err(|err| {
            AppError::stats(StatsError::Histogram {
                context: "create latency histogram",
                source: Box::new(err),
            })
        })?;
        Ok(Self {
            latencies: Mutex::new(latencies),
            status: StatusCounts::default(),
            errors: ErrorMap::default(),
            assert_failures: AtomicU64::new(0),
            since_sample: AtomicU64::new(0),
            rps: Mutex::new(RpsAccumulator::default()),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        })
    }

    /// Folds one completed request into the aggregates. Every call
    /// increments exactly one status-class counter and one latency bucket.
    pub fn record(&self, record: &RequestRecord) {
        {
            let mut latencies = self.latencies.lock();
            // Auto-resizing histograms only reject zero; clamp it away.
            drop(latencies.record(record.elapsed_micros.max(1)));
        }
        self.status.record(record.status);
        self.since_sample.fetch_add(1, Ordering::Relaxed);
        if !record.assert_ok {
            self.assert_failures.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(message) = record.error.as_deref() {
            self.errors.add(message);
        }
    }

    /// Takes one requests-per-second sample: the number of completions
    /// since the previous sample divided by the elapsed interval.
    pub fn sample_rps(&self, interval_secs: f64) {
        if interval_secs <= 0.0 {
            return;
        }
        let completed = self.since_sample.swap(0, Ordering::Relaxed);
        self.rps.lock().record(completed as f64 / interval_secs);
    }

    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    #[must_use]
    pub fn status(&self) -> &StatusCounts {
        &self.status
    }

    #[must_use]
    pub fn errors(&self) -> &ErrorMap {
        &self.errors
    }

    #[must_use]
    pub fn assert_failures(&self) -> u64 {
        self.assert_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.status.total()
    }

    #[must_use]
    pub fn latency_summary(&self, quantiles: &[f64]) -> LatencySummary {
        let latencies = self.latencies.lock();
        let percentiles = quantiles
            .iter()
            .map(|&q| (q, latencies.value_at_quantile(q)))
            .collect();
        LatencySummary {
            mean: latencies.mean(),
            stddev: latencies.stdev(),
            max: latencies.max(),
            min: if latencies.len() == 0 {
                0
            } else {
                latencies.min()
            },
            percentiles,
        }
    }

    #[must_use]
    pub fn rps_summary(&self) -> RpsSummary {
        let rps = self.rps.lock();
        RpsSummary {
            mean: rps.mean,
            stddev: rps.stddev(),
            max: rps.max,
        }
    }
}
