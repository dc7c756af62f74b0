pub mod assert;
pub mod barrier;
pub mod client;
pub mod limiter;
pub mod template;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

use crate::config::{PayloadSource, RunConfig, Workload};
use crate::error::AppResult;
use crate::payload::{Payload, Scope};
use crate::report::RunReport;
use crate::stats::RunStats;

use barrier::CompletionBarrier;
use client::WorkerClient;
use limiter::{Pace, RateLimiter};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Periodic progress snapshot published to the control interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    /// Fraction of the workload finished, in `[0, 1]`.
    pub fraction: f64,
    pub completed_reqs: u64,
}

/// Cancels a running job. In-flight requests complete naturally, bounded by
/// the per-request timeout.
#[derive(Clone)]
pub struct CancelHandle {
    barrier: Arc<CompletionBarrier>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.barrier.cancel();
    }
}

/// Owns one job from frozen configuration to final report. The payload
/// table lives inside the worker client and is dropped with the job.
pub struct Engine {
    config: Arc<RunConfig>,
    barrier: Arc<CompletionBarrier>,
    limiter: Arc<RateLimiter>,
    client: Arc<WorkerClient>,
    stats: Arc<RunStats>,
}

impl Engine {
    /// Builds the barrier, limiter, payload, client, and aggregates for a
    /// validated configuration. Fails before any worker starts.
    pub async fn new(config: RunConfig) -> AppResult<Self> {
        let config = Arc::new(config);
        let payload = load_payload(&config).await?;

        let barrier = Arc::new(match config.workload {
            Workload::Counted { requests } => CompletionBarrier::counted(requests),
            Workload::Timed { duration } => CompletionBarrier::timed(duration),
        });
        let limiter = Arc::new(match config.rate {
            Some(rate) => RateLimiter::bucket(rate, barrier.done()),
            None => RateLimiter::noop(),
        });
        let stats = Arc::new(RunStats::new()?);
        let client = Arc::new(WorkerClient::new(
            Arc::clone(&config),
            payload,
            Arc::clone(&stats),
        )?);

        Ok(Self {
            config,
            barrier,
            limiter,
            client,
            stats,
        })
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            barrier: Arc::clone(&self.barrier),
        }
    }

    /// Drives the workload to completion and gathers the report.
    ///
    /// Spawns one task per connection, a rate-meter task, and a progress
    /// updater. Progress snapshots go to `progress` when provided. The
    /// aggregates are read only after every worker has joined.
    pub async fn run(
        self,
        progress: Option<watch::Sender<Progress>>,
    ) -> AppResult<RunReport> {
        self.barrier.arm();

        // Both auxiliary tasks report their exit through this channel.
        let (exit_tx, mut exit_rx) = mpsc::channel::<()>(2);
        let (joined_tx, joined_rx) = watch::channel(false);

        let begin = Instant::now();
        let mut workers = Vec::with_capacity(usize::try_from(self.config.connections).unwrap_or(0));
        for idx in 0..self.config.connections {
            let barrier = Arc::clone(&self.barrier);
            let limiter = Arc::clone(&self.limiter);
            let client = Arc::clone(&self.client);
            let stats = Arc::clone(&self.stats);
            workers.push(tokio::spawn(async move {
                let mut done = barrier.done();
                while barrier.try_acquire() {
                    if limiter.pace(&mut done).await == Pace::Break {
                        break;
                    }
                    let record = client.execute(idx).await;
                    stats.record(&record);
                    barrier.release();
                }
            }));
        }

        spawn_rate_meter(
            Arc::clone(&self.stats),
            self.barrier.done(),
            joined_rx,
            sample_interval(self.config.rate),
            exit_tx.clone(),
        );
        spawn_progress_updater(Arc::clone(&self.barrier), progress, exit_tx);

        for handle in workers {
            handle.await?;
        }
        let time_taken = begin.elapsed();
        joined_tx.send_replace(true);

        exit_rx.recv().await;
        exit_rx.recv().await;

        let completed_reqs = self.barrier.completed_reqs();
        let rps = self.stats.rps_summary();
        debug!(
            completed_reqs,
            time_taken_ms = time_taken.as_millis() as u64,
            rps_mean = rps.mean,
            rps_max = rps.max,
            bytes_read = self.stats.bytes_read.load(std::sync::atomic::Ordering::Relaxed),
            bytes_written = self.stats.bytes_written.load(std::sync::atomic::Ordering::Relaxed),
            "run finished"
        );

        Ok(RunReport::build(
            &self.config,
            &self.stats,
            completed_reqs,
            time_taken,
        ))
    }
}

/// Sampling cadence for the requests-per-second meter: roughly one request
/// interval plus slack, never faster than 10 ms.
fn sample_interval(rate: Option<u64>) -> Duration {
    let slack = Duration::from_millis(10);
    match rate {
        Some(rate) if rate > 0 => Duration::from_secs_f64(1.0 / rate as f64) + slack,
        _ => slack,
    }
}

fn spawn_rate_meter(
    stats: Arc<RunStats>,
    mut done: barrier::DoneSignal,
    mut joined_rx: watch::Receiver<bool>,
    period: Duration,
    exit_tx: mpsc::Sender<()>,
) {
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Instant::now();
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now = Instant::now();
                    stats.sample_rps((now - last).as_secs_f64());
                    last = now;
                }
                () = done.wait() => {
                    // Let in-flight requests land before the final sample.
                    while !*joined_rx.borrow_and_update() {
                        if joined_rx.changed().await.is_err() {
                            break;
                        }
                    }
                    stats.sample_rps((Instant::now() - last).as_secs_f64());
                    drop(exit_tx.send(()).await);
                    return;
                }
            }
        }
    });
}

fn spawn_progress_updater(
    barrier: Arc<CompletionBarrier>,
    progress: Option<watch::Sender<Progress>>,
    exit_tx: mpsc::Sender<()>,
) {
    tokio::spawn(async move {
        let mut done = barrier.done();
        let mut tick = interval(PROGRESS_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    publish(&progress, &barrier);
                }
                () = done.wait() => {
                    publish(&progress, &barrier);
                    drop(exit_tx.send(()).await);
                    return;
                }
            }
        }
    });
}

fn publish(progress: &Option<watch::Sender<Progress>>, barrier: &CompletionBarrier) {
    if let Some(tx) = progress {
        drop(tx.send(Progress {
            fraction: barrier.completed(),
            completed_reqs: barrier.completed_reqs(),
        }));
    }
}

async fn load_payload(config: &RunConfig) -> AppResult<Option<Arc<Payload>>> {
    let Some(source) = &config.payload_source else {
        return Ok(None);
    };
    let payload = match source {
        PayloadSource::File(path) => {
            Payload::from_file(path, &config.variable_names, config.start_line)?
        }
        PayloadSource::Url(url) => {
            // Request scope draws one row per request; every other scope
            // needs at most one row per connection.
            let limit = match (config.workload, config.scope) {
                (Workload::Counted { requests }, Scope::Request) => {
                    u32::try_from(requests).unwrap_or(u32::MAX)
                }
                _ => u32::try_from(config.connections).unwrap_or(u32::MAX),
            };
            Payload::from_url(url, &config.variable_names, config.start_line, limit).await?
        }
    };
    Ok(Some(Arc::new(payload)))
}
