use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{interval_at, Instant};

use super::barrier::DoneSignal;

const REFILL_PERIOD: Duration = Duration::from_millis(100);
const REFILLS_PER_SEC: u64 = 10;

/// Outcome of waiting for permission to start a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    Continue,
    Break,
}

/// Paces request starts to a target rate.
///
/// The bucket variant is a leaky bucket: burst capacity `max(1, rate / 10)`,
/// refilled every 100 ms by a background task that exits when the workload
/// completes. The no-op variant never suspends.
pub enum RateLimiter {
    Noop,
    Bucket { permits: Arc<Semaphore> },
}

impl RateLimiter {
    #[must_use]
    pub fn noop() -> Self {
        RateLimiter::Noop
    }

    /// Creates a bucket limiter for `rate` requests per second and spawns
    /// its refill task. Must be called from within a runtime.
    #[must_use]
    pub fn bucket(rate: u64, done: DoneSignal) -> Self {
        let capacity = usize::try_from((rate / REFILLS_PER_SEC).max(1)).unwrap_or(usize::MAX);
        let permits = Arc::new(Semaphore::new(capacity));
        spawn_refill_task(Arc::clone(&permits), rate, capacity, done);
        RateLimiter::Bucket { permits }
    }

    /// Suspends until a token is available, or returns [`Pace::Break`] as
    /// soon as `done` fires during the wait.
    pub async fn pace(&self, done: &mut DoneSignal) -> Pace {
        match self {
            RateLimiter::Noop => Pace::Continue,
            RateLimiter::Bucket { permits } => {
                if done.fired() {
                    return Pace::Break;
                }
                tokio::select! {
                    () = done.wait() => Pace::Break,
                    acquired = permits.acquire() => match acquired {
                        Ok(permit) => {
                            permit.forget();
                            Pace::Continue
                        }
                        Err(_) => Pace::Break,
                    },
                }
            }
        }
    }
}

fn spawn_refill_task(permits: Arc<Semaphore>, rate: u64, capacity: usize, mut done: DoneSignal) {
    tokio::spawn(async move {
        let base = rate / REFILLS_PER_SEC;
        let rem = rate % REFILLS_PER_SEC;
        let mut carry = 0u64;
        let mut tick = interval_at(Instant::now() + REFILL_PERIOD, REFILL_PERIOD);
        loop {
            tokio::select! {
                () = done.wait() => break,
                _ = tick.tick() => {
                    carry += rem;
                    let extra = carry / REFILLS_PER_SEC;
                    carry %= REFILLS_PER_SEC;
                    let tokens = usize::try_from(base.saturating_add(extra)).unwrap_or(usize::MAX);
                    let available = permits.available_permits();
                    let headroom = capacity.saturating_sub(available);
                    permits.add_permits(tokens.min(headroom));
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::barrier::CompletionBarrier;
    use tokio::time::Instant;

    #[tokio::test]
    async fn noop_never_suspends() {
        let barrier = CompletionBarrier::counted(1);
        let mut done = barrier.done();
        assert_eq!(RateLimiter::noop().pace(&mut done).await, Pace::Continue);
    }

    #[tokio::test]
    async fn bucket_breaks_when_done_fires() {
        let barrier = CompletionBarrier::counted(1);
        let limiter = RateLimiter::bucket(10, barrier.done());
        let mut done = barrier.done();

        // Drain the initial burst capacity.
        assert_eq!(limiter.pace(&mut done).await, Pace::Continue);

        barrier.cancel();
        assert_eq!(limiter.pace(&mut done).await, Pace::Break);
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_paces_roughly_at_rate() {
        let barrier = CompletionBarrier::counted(u64::MAX);
        let limiter = RateLimiter::bucket(50, barrier.done());
        let mut done = barrier.done();

        let start = Instant::now();
        // Burst capacity is 5; ten more tokens need ~200 ms of refills.
        for _ in 0..15 {
            assert_eq!(limiter.pace(&mut done).await, Pace::Continue);
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(150), "took {:?}", elapsed);
        barrier.cancel();
    }
}
