use std::time::Duration;

use tracing::warn;

use crate::error::MigrationError;

const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(1);

/// How often, and how patiently, a migration attempt is re-run when the
/// write lock cannot be taken.
///
/// Backoff doubles after every contended attempt, capped at `max_backoff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until the lock is released.
    pub max_attempts: Option<u32>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    /// At most `attempts` tries in total. Zero is treated as one.
    pub fn bounded(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts.max(1)),
            ..Self::unbounded()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Delay before retrying after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, MigrationError>
    where
        F: FnMut(u32) -> Result<T, MigrationError>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Err(e) if e.is_transient() => {
                    if self.max_attempts.is_some_and(|max| attempt >= max) {
                        warn!(attempts = attempt, "giving up on locked database: {e}");
                        return Err(MigrationError::Busy { attempts: attempt });
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "database is locked, retrying migration"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy() -> MigrationError {
        MigrationError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    fn quick(policy: RetryPolicy) -> RetryPolicy {
        policy.with_backoff(Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::unbounded()
            .with_backoff(Duration::from_millis(10), Duration::from_millis(50));
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(4), Duration::from_millis(50));
        assert_eq!(policy.delay_for(100), Duration::from_millis(50));
    }

    #[test]
    fn retries_transient_errors_until_success() {
        let mut seen = Vec::new();
        let result = quick(RetryPolicy::unbounded()).run(|attempt| {
            seen.push(attempt);
            if attempt < 4 { Err(busy()) } else { Ok("done") }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn bounded_policy_gives_up_with_busy() {
        let mut calls = 0;
        let result: Result<(), _> = quick(RetryPolicy::bounded(3)).run(|_| {
            calls += 1;
            Err(busy())
        });
        assert!(matches!(result, Err(MigrationError::Busy { attempts: 3 })));
        assert_eq!(calls, 3);
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = quick(RetryPolicy::unbounded()).run(|_| {
            calls += 1;
            Err(MigrationError::MissingMigration { version: 2 })
        });
        assert!(matches!(
            result,
            Err(MigrationError::MissingMigration { version: 2 })
        ));
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::bounded(0).max_attempts, Some(1));
    }
}
