//! Token bucket gating every outbound platform call, with a shutdown signal
//! that aborts pending waits.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub per_second: f64,
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            per_second: 2.0,
            burst: 2,
        }
    }
}

impl RateLimit {
    pub fn refill_every(&self) -> Duration {
        if self.per_second > 0.0 {
            Duration::try_from_secs_f64(1.0 / self.per_second).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        }
    }
}

/// Returned when a token wait is cut short by shutdown. Not a failure: the
/// owning cycle stops cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("gateway wait aborted by shutdown")]
pub struct Aborted;

/// Owner side of the shutdown signal.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered (or its owner is gone).
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

#[derive(Debug)]
pub struct Gateway {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl Gateway {
    pub fn new(limit: RateLimit) -> Self {
        let capacity = limit.burst.max(1);
        Self {
            capacity,
            refill_every: limit.refill_every(),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Waits for a token. Returns `Err(Aborted)` as soon as `shutdown` fires,
    /// including when it had already fired before the call.
    pub async fn acquire(&self, shutdown: &ShutdownSignal) -> Result<(), Aborted> {
        loop {
            if shutdown.is_triggered() {
                return Err(Aborted);
            }

            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens > 0 {
                    state.tokens -= 1;
                    return Ok(());
                }
                self.refill_every
                    .saturating_sub(state.last_refill.elapsed())
                    .max(Duration::from_millis(1))
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.triggered() => return Err(Aborted),
            }
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed();
        if elapsed < self.refill_every {
            return;
        }
        let refills = (elapsed.as_nanos() / self.refill_every.as_nanos().max(1))
            .min(u128::from(self.capacity)) as u32;
        state.tokens = state.tokens.saturating_add(refills).min(self.capacity);
        if state.tokens == self.capacity {
            state.last_refill = Instant::now();
        } else {
            state.last_refill += self.refill_every * refills;
        }
    }
}
