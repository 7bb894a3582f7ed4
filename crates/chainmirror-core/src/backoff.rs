//! Randomized backoff and the retry-until-success helper shared by the loops.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::MirrorError;

/// Uniformly random delay in `[min, max]`.
///
/// Randomizing spreads retries from the different loops so they don't hit a
/// recovering node in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(10),
            max: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Same delay every time.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    /// A fresh random delay.
    pub fn next_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }

    /// Sleep for a fresh delay. Returns `false` if `cancel` fired first.
    pub async fn sleep(&self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Run `op` until it succeeds, sleeping a random backoff between attempts.
///
/// Every failure is logged and retried; nothing is dropped. Returns `None`
/// only when `cancel` fires during a backoff sleep.
pub async fn retry_forever<T, F, Fut>(
    backoff: &Backoff,
    label: &str,
    cancel: &CancellationToken,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MirrorError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Some(v),
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    op = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    transient = e.is_transient(),
                    error = %e,
                    "retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_within_bounds() {
        let backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(60));
        for _ in 0..100 {
            let d = backoff.next_delay();
            assert!(d >= Duration::from_secs(10) && d <= Duration::from_secs(60), "d={d:?}");
        }
    }

    #[test]
    fn inverted_bounds_collapse_to_min() {
        let backoff = Backoff::new(Duration::from_millis(50), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::fixed(Duration::from_millis(1));
        let cancel = CancellationToken::new();

        let out = retry_forever(&backoff, "test", &cancel, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(MirrorError::Rpc("boom".into()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(out, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let backoff = Backoff::fixed(Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let out: Option<()> = retry_forever(&backoff, "test", &cancel, || async {
            Err(MirrorError::Rpc("down".into()))
        })
        .await;
        assert!(out.is_none());
    }
}
