//! Retry strategies for the I/O steps of the state machines.
//!
//! Every strategy runs an operation that returns `Ok(true)` when done and
//! `Ok(false)` when it should be attempted again. Between attempts the
//! strategy yields to the scheduler, so other work on the runtime
//! (including a close request) makes progress. After every unsuccessful
//! attempt the abort condition is checked before yielding; once it is true
//! the strategy stops with [`RetryError::Aborted`].
//!
//! | Strategy      | `Ok(false)` | recoverable error | other error |
//! |---------------|-------------|-------------------|-------------|
//! | Abortable     | retry       | fail              | fail        |
//! | Endless       | retry       | retry             | retry       |
//! | Recoverable   | retry       | retry after delay | retry       |

use std::fmt::Display;
use std::time::Duration;

use sluice_state::DbError;
use thiserror::Error;

/// Classifies failures for [`RecoverableRetryStrategy`].
pub trait Retryable {
    fn is_recoverable(&self) -> bool;
}

impl Retryable for DbError {
    fn is_recoverable(&self) -> bool {
        DbError::is_recoverable(self)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("retry aborted after {attempts} attempts")]
    Aborted { attempts: u64 },

    #[error("operation failed: {0}")]
    Failed(E),
}

/// Retries until success; any error fails immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortableRetryStrategy;

impl AbortableRetryStrategy {
    pub async fn run_with_retry<F, E, A>(
        &self,
        mut operation: F,
        abort: A,
    ) -> Result<(), RetryError<E>>
    where
        F: FnMut() -> Result<bool, E>,
        A: Fn() -> bool,
    {
        let mut attempts = 0u64;
        loop {
            attempts += 1;
            match operation() {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(error) => return Err(RetryError::Failed(error)),
            }
            if abort() {
                return Err(RetryError::Aborted { attempts });
            }
            tokio::task::yield_now().await;
        }
    }
}

/// Retries through every failure until success or abort.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndlessRetryStrategy;

impl EndlessRetryStrategy {
    pub async fn run_with_retry<F, E, A>(
        &self,
        mut operation: F,
        abort: A,
    ) -> Result<(), RetryError<E>>
    where
        F: FnMut() -> Result<bool, E>,
        E: Display,
        A: Fn() -> bool,
    {
        let mut attempts = 0u64;
        loop {
            attempts += 1;
            match operation() {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(attempts, error = %error, "operation failed, will retry");
                }
            }
            if abort() {
                return Err(RetryError::Aborted { attempts });
            }
            tokio::task::yield_now().await;
        }
    }
}

/// Like [`EndlessRetryStrategy`], but waits `delay` after a recoverable
/// failure before the next attempt.
#[derive(Debug, Clone, Copy)]
pub struct RecoverableRetryStrategy {
    delay: Duration,
}

impl RecoverableRetryStrategy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn run_with_retry<F, E, A>(
        &self,
        mut operation: F,
        abort: A,
    ) -> Result<(), RetryError<E>>
    where
        F: FnMut() -> Result<bool, E>,
        E: Retryable + Display,
        A: Fn() -> bool,
    {
        let mut attempts = 0u64;
        loop {
            attempts += 1;
            let recoverable = match operation() {
                Ok(true) => return Ok(()),
                Ok(false) => false,
                Err(error) if error.is_recoverable() => {
                    tracing::debug!(
                        attempts,
                        error = %error,
                        delay = ?self.delay,
                        "recoverable failure, retrying after delay"
                    );
                    true
                }
                Err(error) => {
                    tracing::warn!(attempts, error = %error, "operation failed, will retry");
                    false
                }
            };
            if abort() {
                return Err(RetryError::Aborted { attempts });
            }
            if recoverable {
                tokio::time::sleep(self.delay).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
    }
}

impl Default for RecoverableRetryStrategy {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn never() -> bool {
        false
    }

    #[tokio::test]
    async fn abortable_retries_until_success() {
        let calls = Cell::new(0);
        let result: Result<(), RetryError<DbError>> = AbortableRetryStrategy
            .run_with_retry(
                || {
                    calls.set(calls.get() + 1);
                    Ok(calls.get() == 3)
                },
                never,
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn abortable_fails_on_first_error() {
        let calls = Cell::new(0);
        let result = AbortableRetryStrategy
            .run_with_retry(
                || {
                    calls.set(calls.get() + 1);
                    Err::<bool, _>(DbError::Other("disk gone".into()))
                },
                never,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Failed(DbError::Other(_)))));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn abortable_stops_once_abort_flips() {
        let calls = Cell::new(0);
        let result: Result<(), RetryError<DbError>> = AbortableRetryStrategy
            .run_with_retry(
                || {
                    calls.set(calls.get() + 1);
                    Ok(false)
                },
                || calls.get() >= 4,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Aborted { attempts: 4 })));
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn endless_retries_through_errors() {
        let calls = Cell::new(0);
        let result: Result<(), RetryError<DbError>> = EndlessRetryStrategy
            .run_with_retry(
                || {
                    calls.set(calls.get() + 1);
                    match calls.get() {
                        1 => Err(DbError::Other("boom".into())),
                        2 => Err(DbError::Recoverable("busy".into())),
                        3 => Ok(false),
                        _ => Ok(true),
                    }
                },
                never,
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn endless_observes_abort() {
        let result = EndlessRetryStrategy
            .run_with_retry(|| Err::<bool, _>(DbError::Other("boom".into())), || true)
            .await;

        assert!(matches!(result, Err(RetryError::Aborted { attempts: 1 })));
    }

    #[tokio::test(start_paused = true)]
    async fn recoverable_waits_delay_only_for_recoverable_errors() {
        let strategy = RecoverableRetryStrategy::new(Duration::from_millis(250));
        let calls = Cell::new(0);
        let start = tokio::time::Instant::now();

        let result = strategy
            .run_with_retry(
                || {
                    calls.set(calls.get() + 1);
                    match calls.get() {
                        1 | 2 => Err(DbError::Recoverable("lock timeout".into())),
                        3 => Err(DbError::Other("transient".into())),
                        _ => Ok(true),
                    }
                },
                never,
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.get(), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn recoverable_aborts_without_waiting() {
        let strategy = RecoverableRetryStrategy::default();
        let start = tokio::time::Instant::now();

        let result = strategy
            .run_with_retry(|| Err::<bool, _>(DbError::Recoverable("busy".into())), || true)
            .await;

        assert!(matches!(result, Err(RetryError::Aborted { attempts: 1 })));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
