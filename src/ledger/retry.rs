use std::time::Duration;

use rand::Rng;

/// Default number of times a conflicting ledger mutation is attempted.
///
/// Under snapshot isolation an attempt only fails when another mutation of
/// the same candidate commits while it is open, so with `n` concurrent
/// voters an attempt budget of `n` always suffices.
pub const DEFAULT_TRANSACTION_ATTEMPTS: u32 = 20;

/// Capped exponential backoff between attempts of a conflicting mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Backoff ceiling after the first failed attempt.
    pub initial_backoff: Duration,
    /// Backoff ceiling is never raised above this.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_TRANSACTION_ATTEMPTS,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// The default policy with a different attempt budget (at least one).
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Upper bound of the pause after failed attempt `attempt` (1-indexed):
    /// doubles with every attempt, up to `max_backoff`.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff)
    }

    /// A random pause in `0..=backoff_ceiling(attempt)`, so that colliding
    /// mutations spread out instead of retrying in lockstep.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_micros() as u64;
        Duration::from_micros(rand::thread_rng().gen_range(0..=ceiling))
    }
}
