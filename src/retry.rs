//! Retry logic with exponential backoff
//!
//! Helper spawns that fail for transient reasons (process table full, out of
//! memory) are retried with a blocking, bounded backoff. The whole invocation
//! waits while this happens; only one batch is ever in flight.
//!
//! # Example
//!
//! ```no_run
//! use usenet_rnews::retry::{IsRetryable, with_retry};
//! use usenet_rnews::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! let config = RetryConfig::default();
//! let result = with_retry(&config, || Ok::<_, MyError>(()));
//! assert!(result.is_ok());
//! ```

use crate::config::RetryConfig;
use rand::Rng;
use std::io;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (resource exhaustion, interrupted calls) should return `true`.
/// Permanent failures (missing binary, permission denied) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Spawn failures worth waiting out
impl IsRetryable for io::Error {
    fn is_retryable(&self) -> bool {
        if matches!(
            self.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::OutOfMemory
        ) {
            return true;
        }
        // EAGAIN / ENOMEM / ENFILE / EMFILE from fork or pipe, ETXTBSY from exec
        matches!(self.raw_os_error(), Some(11 | 12 | 23 | 24 | 26))
    }
}

/// Run an operation, retrying transient failures with exponential backoff
///
/// The operation runs at most `config.max_attempts` times. The last error is
/// returned when the budget is exhausted or the error is permanent; callers
/// tell the two apart with [`IsRetryable::is_retryable`] on that error.
pub fn with_retry<F, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 1;
    let mut delay = config.initial_delay;

    loop {
        match operation() {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, waiting"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                std::thread::sleep(jittered_delay);

                attempt += 1;
                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Instant;

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_success_no_retry() {
        let calls = Cell::new(0);
        let result = with_retry(&fast_config(3), || {
            calls.set(calls.get() + 1);
            Ok::<_, TestError>(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 1, "should only call once");
    }

    #[test]
    fn test_retry_transient_then_succeed() {
        let calls = Cell::new(0);
        let result = with_retry(&fast_config(5), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(TestError::Transient)
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_exhausted_returns_retryable_error() {
        let calls = Cell::new(0);
        let result = with_retry(&fast_config(3), || {
            calls.set(calls.get() + 1);
            Err::<i32, _>(TestError::Transient)
        });
        let err = result.unwrap_err();
        assert!(err.is_retryable(), "exhaustion is signalled by a retryable error");
        assert_eq!(calls.get(), 3, "max_attempts bounds the total number of calls");
    }

    #[test]
    fn test_permanent_error_no_retry() {
        let calls = Cell::new(0);
        let result = with_retry(&fast_config(5), || {
            calls.set(calls.get() + 1);
            Err::<i32, _>(TestError::Permanent)
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1, "should not retry permanent error");
    }

    #[test]
    fn test_backoff_is_capped() {
        // Delays: 10ms, 20ms, 40ms, 40ms
        let start = Instant::now();
        let _ = with_retry(&fast_config(5), || Err::<i32, _>(TestError::Transient));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(110), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "waited {elapsed:?}");
    }

    #[test]
    fn test_io_error_classification() {
        assert!(io::Error::new(io::ErrorKind::WouldBlock, "EAGAIN").is_retryable());
        assert!(io::Error::from_raw_os_error(11).is_retryable());
        assert!(io::Error::from_raw_os_error(24).is_retryable());
        assert!(!io::Error::new(io::ErrorKind::NotFound, "gone").is_retryable());
        assert!(!io::Error::new(io::ErrorKind::PermissionDenied, "no").is_retryable());
    }

    #[test]
    fn add_jitter_stays_within_bounds_over_many_iterations() {
        let delay = Duration::from_millis(50);
        for i in 0..200 {
            let jittered = add_jitter(delay);
            assert!(
                jittered >= delay,
                "iteration {i}: jittered {jittered:?} < base delay {delay:?}"
            );
            assert!(
                jittered <= delay * 2,
                "iteration {i}: jittered {jittered:?} > 2x base delay {:?}",
                delay * 2
            );
        }
    }
}
