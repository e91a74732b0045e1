//! Bounded polling for values that appear asynchronously.
//!
//! The token controller fills in a service-account token secret some time after
//! the secret is created. [`poll_until_ready`] re-reads until the value shows
//! up or the attempt budget runs out, and never surfaces per-attempt errors:
//! callers get either the value or a single "not ready" outcome.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, trace};

/// Default number of reads before giving up on a token
pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;

/// Default delay between reads
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for a bounded fixed-interval polling loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Maximum number of checks (always at least one is performed)
    pub max_attempts: u32,
    /// Delay between checks
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_POLL_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollConfig {
    /// Polling with the given attempt budget and delay
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

/// Repeatedly run `check` until it yields `Some`.
///
/// `Ok(None)` and `Err(_)` from `check` both count as a miss. Returns `None`
/// once `max_attempts` checks have missed. There is no sleep after the final
/// miss.
pub async fn poll_until_ready<F, Fut, T, E>(
    config: &PollConfig,
    operation_name: &str,
    mut check: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match check().await {
            Ok(Some(value)) => {
                debug!(operation = %operation_name, attempt, "Poll condition met");
                return Some(value);
            }
            Ok(None) => {
                trace!(operation = %operation_name, attempt, "Poll condition not yet met");
            }
            Err(e) => {
                trace!(operation = %operation_name, attempt, error = %e, "Poll check failed");
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(config.interval).await;
        }
    }

    debug!(
        operation = %operation_name,
        attempts = max_attempts,
        "Poll attempts exhausted"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(attempts: u32) -> PollConfig {
        PollConfig::fixed(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_ready_immediately() {
        let result =
            poll_until_ready(&fast(3), "op", || async { Ok::<_, &str>(Some(42)) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_ready_after_misses_and_errors() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = poll_until_ready(&fast(5), "op", || {
            let c = c.clone();
            async move {
                match c.fetch_add(1, Ordering::SeqCst) {
                    0 => Err("transient"),
                    1 => Ok(None),
                    _ => Ok(Some("token")),
                }
            }
        })
        .await;

        assert_eq!(result, Some("token"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Option<u8> = poll_until_ready(&fast(4), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(None)
            }
        })
        .await;

        assert_eq!(result, None);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_checks_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Option<u8> = poll_until_ready(&fast(0), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(None)
            }
        })
        .await;

        assert_eq!(result, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_is_fixed_and_skipped_after_last_check() {
        let config = PollConfig::fixed(4, Duration::from_secs(2));
        let start = tokio::time::Instant::now();

        let result: Option<u8> =
            poll_until_ready(&config, "op", || async { Ok::<_, &str>(None) }).await;

        assert_eq!(result, None);
        // three sleeps between four checks
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[test]
    fn test_default_is_ten_reads_a_second_apart() {
        let config = PollConfig::default();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.interval, Duration::from_secs(1));
    }
}
