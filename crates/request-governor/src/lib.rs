//! Token-bucket request governor.
//!
//! Every outbound market-data and AI reasoning call is dispatched
//! through [`RequestGovernor::run`]. A call consumes one token; tokens are
//! refilled on a fixed one-second timer. Waiting calls are served from a
//! priority queue, and calls rejected by the remote side for rate limiting are
//! re-queued at the front after an exponential backoff.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use trading_core::RateLimitAware;

/// Caller-visible priority of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// Queue placement. `Retry` is reserved for requests coming back from a
/// rate-limit backoff and always goes to the front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Retry,
    High,
    Normal,
    Low,
}

impl From<Priority> for Slot {
    fn from(p: Priority) -> Self {
        match p {
            Priority::High => Slot::High,
            Priority::Normal => Slot::Normal,
            Priority::Low => Slot::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Bucket capacity (burst size).
    pub capacity: u32,
    /// Tokens added per refill tick.
    pub refill_per_second: u32,
    /// Retries allowed after a rate-limit rejection.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            capacity: 1500,
            refill_per_second: 25,
            max_retries: 3,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

struct Waiter {
    slot: Slot,
    tx: oneshot::Sender<()>,
}

struct BucketState {
    tokens: u32,
    queue: VecDeque<Waiter>,
}

pub struct RequestGovernor {
    config: GovernorConfig,
    state: Mutex<BucketState>,
    dispatched: AtomicU64,
    rate_limited: AtomicU64,
}

/// Index at which a request with `slot` is inserted, given the slots already
/// queued (front first).
fn insert_position(queued: impl Iterator<Item = Slot>, slot: Slot, len: usize) -> usize {
    match slot {
        Slot::Retry | Slot::High => 0,
        Slot::Low => len,
        Slot::Normal => queued
            .enumerate()
            .find(|(_, s)| *s == Slot::Low)
            .map(|(i, _)| i)
            .unwrap_or(len),
    }
}

impl RequestGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let tokens = config.capacity;
        Self {
            config,
            state: Mutex::new(BucketState {
                tokens,
                queue: VecDeque::new(),
            }),
            dispatched: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Start the one-second refill timer. The task stops once the governor
    /// is dropped.
    pub fn spawn_refill(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(governor) => governor.refill().await,
                    None => break,
                }
            }
        })
    }

    /// Add one tick worth of tokens (capped at capacity) and dispatch waiters.
    pub async fn refill(&self) {
        let mut state = self.state.lock().await;
        state.tokens = state
            .tokens
            .saturating_add(self.config.refill_per_second)
            .min(self.config.capacity);
        self.dispatch(&mut state);
    }

    pub async fn available_tokens(&self) -> u32 {
        self.state.lock().await.tokens
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn rate_limited_count(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    /// Backoff before the `retries`-th retry: base * 2^retries, capped.
    pub fn backoff_delay(&self, retries: u32) -> Duration {
        let factor = 2u32.saturating_pow(retries);
        self.config
            .backoff_base
            .saturating_mul(factor)
            .min(self.config.backoff_cap)
    }

    fn dispatch(&self, state: &mut BucketState) {
        while state.tokens > 0 {
            let Some(waiter) = state.queue.pop_front() else {
                break;
            };
            // A dropped receiver means the caller went away; keep the token.
            if waiter.tx.send(()).is_ok() {
                state.tokens -= 1;
                self.dispatched.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn acquire(&self, slot: Slot) {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            let len = state.queue.len();
            let idx = insert_position(state.queue.iter().map(|w| w.slot), slot, len);
            state.queue.insert(idx, Waiter { slot, tx });
            self.dispatch(&mut state);
        }
        if rx.await.is_err() {
            tracing::debug!("Governor waiter dropped before dispatch");
        }
    }

    /// Run `op` once a token is available. Rate-limit failures are retried
    /// with exponential backoff from the front of the queue. Any other error
    /// is returned unchanged; once retries are exhausted the caller gets the
    /// first rate-limit error seen.
    pub async fn run<T, E, F, Fut>(&self, priority: Priority, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitAware + std::fmt::Display,
    {
        let mut retries = 0u32;
        let mut slot = Slot::from(priority);
        let mut first_err: Option<E> = None;

        loop {
            self.acquire(slot).await;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_rate_limited() && retries < self.config.max_retries => {
                    retries += 1;
                    self.rate_limited.fetch_add(1, Ordering::Relaxed);
                    let delay = self.backoff_delay(retries);
                    tracing::warn!(
                        retry = retries,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited ({}), backing off before re-queue",
                        e
                    );
                    first_err.get_or_insert(e);
                    tokio::time::sleep(delay).await;
                    slot = Slot::Retry;
                }
                Err(e) if e.is_rate_limited() => {
                    self.rate_limited.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("Rate limit retries exhausted: {}", e);
                    return Err(first_err.unwrap_or(e));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
