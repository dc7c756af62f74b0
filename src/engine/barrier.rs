use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// One-shot workload-completion notification.
///
/// Clonable and observable by any number of tasks; firing is idempotent and
/// observers that subscribe after the fact still see the signal.
#[derive(Debug, Clone)]
pub struct DoneSignal {
    rx: watch::Receiver<bool>,
}

impl DoneSignal {
    #[must_use]
    pub fn fired(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires. Returns immediately if it already has.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender dropped, the run is over either way.
                return;
            }
        }
    }
}

#[derive(Debug)]
struct DoneHandle {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl DoneHandle {
    fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    fn fire(&self) {
        self.tx.send_replace(true);
    }

    fn signal(&self) -> DoneSignal {
        DoneSignal {
            rx: self.rx.clone(),
        }
    }
}

#[derive(Debug)]
enum BarrierKind {
    Counted {
        total: u64,
        granted: AtomicU64,
    },
    Timed {
        started: Instant,
        duration: Duration,
        deadline: Instant,
    },
}

/// Decides whether a worker may start another request and broadcasts
/// workload completion.
///
/// The counted variant grants exactly `total` acquisitions; the timed
/// variant grants until its deadline. Both stop granting once cancelled.
/// Acquisition never suspends.
#[derive(Debug)]
pub struct CompletionBarrier {
    kind: BarrierKind,
    released: AtomicU64,
    cancelled: AtomicBool,
    done: DoneHandle,
}

impl CompletionBarrier {
    #[must_use]
    pub fn counted(total: u64) -> Self {
        Self {
            kind: BarrierKind::Counted {
                total,
                granted: AtomicU64::new(0),
            },
            released: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            done: DoneHandle::new(),
        }
    }

    #[must_use]
    pub fn timed(duration: Duration) -> Self {
        let started = Instant::now();
        Self {
            kind: BarrierKind::Timed {
                started,
                duration,
                deadline: started + duration,
            },
            released: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            done: DoneHandle::new(),
        }
    }

    /// Spawns the deadline timer for the timed variant. Must be called once
    /// from within a runtime before workers start.
    pub fn arm(&self) {
        if let BarrierKind::Timed { deadline, .. } = &self.kind {
            let deadline = *deadline;
            let mut done = self.done.signal();
            let tx = self.done.tx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => {
                        tx.send_replace(true);
                    }
                    () = done.wait() => {}
                }
            });
        }
    }

    /// Returns true while another request may start.
    pub fn try_acquire(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return false;
        }
        match &self.kind {
            BarrierKind::Counted { total, granted } => loop {
                let current = granted.load(Ordering::Relaxed);
                if current >= *total {
                    self.done.fire();
                    return false;
                }
                if granted
                    .compare_exchange(current, current + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    return true;
                }
            },
            BarrierKind::Timed { deadline, .. } => Instant::now() < *deadline,
        }
    }

    /// Records one completed request.
    pub fn release(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    /// Operator-initiated stop: no further grants, `done` fires immediately.
    /// In-flight requests complete naturally.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.done.fire();
    }

    #[must_use]
    pub fn done(&self) -> DoneSignal {
        self.done.signal()
    }

    /// Fraction of the workload finished, in `[0, 1]`.
    #[must_use]
    pub fn completed(&self) -> f64 {
        match &self.kind {
            BarrierKind::Counted { total, granted } => {
                if *total == 0 {
                    return 1.0;
                }
                let granted = granted.load(Ordering::Relaxed).min(*total);
                granted as f64 / *total as f64
            }
            BarrierKind::Timed {
                started, duration, ..
            } => {
                if duration.is_zero() {
                    return 1.0;
                }
                (started.elapsed().as_secs_f64() / duration.as_secs_f64()).min(1.0)
            }
        }
    }

    /// Absolute count of completed requests, for streaming progress.
    #[must_use]
    pub fn completed_reqs(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counted_grants_exactly_total() {
        let barrier = CompletionBarrier::counted(3);
        assert!(barrier.try_acquire());
        assert!(barrier.try_acquire());
        assert!(barrier.try_acquire());
        assert!(!barrier.try_acquire());
        assert!(!barrier.try_acquire());
        assert!(barrier.done().fired());
    }

    #[test]
    fn counted_progress_tracks_grants() {
        let barrier = CompletionBarrier::counted(4);
        assert_eq!(barrier.completed(), 0.0);
        assert!(barrier.try_acquire());
        assert!(barrier.try_acquire());
        assert_eq!(barrier.completed(), 0.5);
        barrier.release();
        assert_eq!(barrier.completed_reqs(), 1);
    }

    #[test]
    fn cancel_stops_grants_and_fires_done() {
        let barrier = CompletionBarrier::counted(100);
        assert!(barrier.try_acquire());
        barrier.cancel();
        assert!(!barrier.try_acquire());
        assert!(barrier.done().fired());
        // Idempotent.
        barrier.cancel();
        assert!(barrier.done().fired());
    }

    #[test]
    fn concurrent_counted_grants_are_exact() -> Result<(), String> {
        use std::sync::Arc;

        let total = 1000u64;
        let barrier = Arc::new(CompletionBarrier::counted(total));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let barrier = Arc::clone(&barrier);
            handles.push(std::thread::spawn(move || {
                let mut grabbed = 0u64;
                while barrier.try_acquire() {
                    grabbed += 1;
                    barrier.release();
                }
                grabbed
            }));
        }
        let mut grabbed = 0u64;
        for handle in handles {
            grabbed += handle
                .join()
                .map_err(|_| "worker thread panicked".to_owned())?;
        }
        assert_eq!(grabbed, total);
        assert_eq!(barrier.completed_reqs(), total);
        Ok(())
    }

    #[tokio::test]
    async fn timed_barrier_fires_at_deadline() {
        let barrier = CompletionBarrier::timed(Duration::from_millis(20));
        barrier.arm();
        assert!(barrier.try_acquire());
        let mut done = barrier.done();
        done.wait().await;
        assert!(!barrier.try_acquire());
        assert_eq!(barrier.completed(), 1.0);
    }

    #[tokio::test]
    async fn done_signal_observed_by_late_subscriber() {
        let barrier = CompletionBarrier::counted(0);
        assert!(!barrier.try_acquire());
        let mut late = barrier.done();
        late.wait().await;
        assert!(late.fired());
    }
}
