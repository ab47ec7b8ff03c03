//! Per-exchange concurrency budget with multiplicative backoff.
//!
//! Every outbound call goes through [`RateController::execute`], which holds a
//! semaphore permit for the duration of the request only. Backoff sleeps happen
//! after the permit is released so a throttled symbol never starves the others.

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::RateSettings;
use crate::error::MetricsError;
use crate::models::metric::ExchangeId;

const JITTER_MIN_SECS: f64 = 0.1;
const JITTER_MAX_SECS: f64 = 0.5;
/// Consecutive successes before the backoff is halved
const DECAY_STREAK: u32 = 5;

/// Snapshot of one exchange's budget
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBudget {
    pub max_concurrent: usize,
    pub current_backoff_secs: f64,
    pub success_streak: u32,
}

struct ExchangeBudget {
    semaphore: Arc<Semaphore>,
    state: Mutex<RateBudget>,
}

/// Held while a request is outstanding; dropping it releases the slot.
#[derive(Debug)]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

pub struct RateController {
    settings: RateSettings,
    budgets: RwLock<HashMap<ExchangeId, Arc<ExchangeBudget>>>,
}

impl RateController {
    pub fn new(settings: RateSettings) -> Self {
        Self {
            settings,
            budgets: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &RateSettings {
        &self.settings
    }

    fn budget(&self, exchange: ExchangeId) -> Arc<ExchangeBudget> {
        if let Some(budget) = self.budgets.read().get(&exchange) {
            return budget.clone();
        }

        let mut budgets = self.budgets.write();
        budgets
            .entry(exchange)
            .or_insert_with(|| {
                Arc::new(ExchangeBudget {
                    semaphore: Arc::new(Semaphore::new(self.settings.max_concurrent)),
                    state: Mutex::new(RateBudget {
                        max_concurrent: self.settings.max_concurrent,
                        current_backoff_secs: self.settings.backoff_floor_secs,
                        success_streak: 0,
                    }),
                })
            })
            .clone()
    }

    /// Suspends until fewer than `max_concurrent` permits are outstanding.
    pub async fn acquire(&self, exchange: ExchangeId) -> Result<RatePermit, MetricsError> {
        let semaphore = self.budget(exchange).semaphore.clone();
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| MetricsError::NetworkTransient("rate controller closed".to_string()))?;

        Ok(RatePermit { _permit: permit })
    }

    pub fn release(&self, permit: RatePermit) {
        drop(permit);
    }

    pub fn available_permits(&self, exchange: ExchangeId) -> usize {
        self.budget(exchange).semaphore.available_permits()
    }

    pub fn snapshot(&self, exchange: ExchangeId) -> RateBudget {
        *self.budget(exchange).state.lock()
    }

    /// Doubles the backoff (capped at the ceiling) and returns how long the
    /// caller must sleep: the new backoff plus a random jitter.
    pub fn on_rate_limit_signal(&self, exchange: ExchangeId) -> Duration {
        let budget = self.budget(exchange);
        let backoff = {
            let mut state = budget.state.lock();
            state.current_backoff_secs = (state.current_backoff_secs * 2.0)
                .max(self.settings.backoff_floor_secs)
                .min(self.settings.backoff_ceiling_secs);
            state.success_streak = 0;
            state.current_backoff_secs
        };

        delay_from_secs(backoff + jitter_secs())
    }

    /// Records a clean chunk. `DECAY_STREAK` clean chunks in a row halve the
    /// backoff, never below the floor.
    pub fn on_success(&self, exchange: ExchangeId) {
        let budget = self.budget(exchange);
        let mut state = budget.state.lock();
        state.success_streak += 1;
        if state.success_streak >= DECAY_STREAK {
            state.current_backoff_secs =
                (state.current_backoff_secs / 2.0).max(self.settings.backoff_floor_secs);
            state.success_streak = 0;
        }
    }

    /// Signal throttling and sleep it off.
    pub async fn backoff_and_sleep(&self, exchange: ExchangeId) {
        let delay = self.on_rate_limit_signal(exchange);
        warn!(
            exchange = %exchange,
            delay_ms = delay.as_millis() as u64,
            "Rate limited, backing off"
        );
        tokio::time::sleep(delay).await;
    }

    /// Delay for a transient (non-throttling) failure: current backoff plus
    /// jitter, without growing the backoff.
    fn transient_delay(&self, exchange: ExchangeId) -> Duration {
        let backoff = self.budget(exchange).state.lock().current_backoff_secs;
        delay_from_secs(backoff + jitter_secs())
    }

    /// Run one request under the budget with timeout and retries.
    ///
    /// `op` is called once per attempt. Retryable errors are retried up to
    /// `max_retries` times; anything else is returned immediately.
    pub async fn execute<T, F, Fut>(
        &self,
        exchange: ExchangeId,
        label: &str,
        op: F,
    ) -> Result<T, MetricsError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, MetricsError>>,
    {
        let timeout = self.settings.request_timeout;
        let mut retries = 0;

        loop {
            let permit = self.acquire(exchange).await?;
            let outcome = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(MetricsError::NetworkTransient(format!(
                    "{} timed out after {:?}",
                    label, timeout
                ))),
            };
            self.release(permit);

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retries < self.settings.max_retries => {
                    retries += 1;
                    let delay = if e.is_rate_limited() {
                        self.on_rate_limit_signal(exchange)
                    } else {
                        self.transient_delay(exchange)
                    };
                    warn!(
                        "Retry {}/{} for {} on {}: {}. Waiting {:?}",
                        retries, self.settings.max_retries, label, exchange, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!("{} on {} failed after {} retries: {}", label, exchange, retries, e);
                    return Err(e);
                }
            }
        }
    }
}

fn jitter_secs() -> f64 {
    rand::rng().random_range(JITTER_MIN_SECS..JITTER_MAX_SECS)
}

/// Negative and NaN inputs sleep for zero; unrepresentable ones too.
fn delay_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or_default()
}
