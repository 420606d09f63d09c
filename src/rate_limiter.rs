//! Per-provider request scheduling (§4.4/§4.5 runtime concerns). Each
//! provider gets a bounded concurrency gate plus RPM/TPM token reservoirs
//! that refill once a minute, mirroring the `Limiters::acquire_timed`
//! wait-then-permit pattern from the pack's RAG service, generalized here to
//! also govern token budgets and to expose retry/backoff on top.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ProviderLimits;
use crate::error::MimirError;

struct Reservoir {
    capacity: u32,
    remaining: u32,
    refilled_at: Instant,
}

impl Reservoir {
    fn new(capacity: u32) -> Self {
        Self { capacity, remaining: capacity, refilled_at: Instant::now() }
    }

    fn refill_if_due(&mut self) {
        if self.refilled_at.elapsed() >= Duration::from_secs(60) {
            self.remaining = self.capacity;
            self.refilled_at = Instant::now();
        }
    }

    fn try_take(&mut self, amount: u32) -> bool {
        self.refill_if_due();
        let amount = amount.min(self.capacity);
        if self.remaining >= amount {
            self.remaining -= amount;
            true
        } else {
            false
        }
    }
}

/// Gates concurrency, requests-per-minute and tokens-per-minute for a single
/// provider. Cloning shares the same reservoirs (wrap in `Arc`).
pub struct RateLimiter {
    concurrency: Arc<Semaphore>,
    requests: Mutex<Reservoir>,
    tokens: Mutex<Reservoir>,
    retries: u32,
}

impl RateLimiter {
    pub fn new(limits: &ProviderLimits) -> Self {
        Self {
            concurrency: Arc::new(Semaphore::new(limits.concurrency.max(1))),
            requests: Mutex::new(Reservoir::new(limits.max_requests_per_minute.max(1))),
            tokens: Mutex::new(Reservoir::new(limits.max_tokens_per_minute.max(1))),
            retries: limits.retries,
        }
    }

    /// Waits for a concurrency slot and enough RPM/TPM budget for
    /// `estimated_tokens`, honoring `cancel`. Returns once budget is
    /// reserved; the returned guard must be held for the duration of the
    /// in-flight request.
    async fn acquire(
        &self,
        estimated_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<tokio::sync::OwnedSemaphorePermit, MimirError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MimirError::Cancelled),
            permit = Arc::clone(&self.concurrency).acquire_owned() => {
                permit.map_err(|_| MimirError::Cancelled)?
            }
        };

        loop {
            {
                let mut requests = self.requests.lock().await;
                let mut tokens = self.tokens.lock().await;
                if requests.try_take(1) && tokens.try_take(estimated_tokens) {
                    return Ok(permit);
                }
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MimirError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            }
        }
    }

    /// Runs `op` under this limiter's concurrency/rate budget, retrying
    /// retryable errors with exponential backoff and jitter up to the
    /// provider's configured retry count.
    pub async fn run<T, F, Fut>(
        &self,
        estimated_tokens: u32,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, MimirError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, MimirError>>,
    {
        let mut attempt = 0u32;
        loop {
            let _permit = self.acquire(estimated_tokens, cancel).await?;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable() && attempt < self.retries => {
                    attempt += 1;
                    let backoff = backoff_delay(attempt);
                    tracing::warn!(attempt, ?backoff, "retrying after retryable provider error: {err}");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(MimirError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Exponential backoff with full jitter: `rand(0, base * 2^attempt)`, capped
/// at 30s so a long outage doesn't stall ingestion indefinitely.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 200u64;
    let capped_exp = attempt.min(8);
    let max_ms = (base_ms * 2u64.pow(capped_exp)).min(30_000);
    let jittered = rand::thread_rng().gen_range(0..=max_ms);
    Duration::from_millis(jittered.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_but_is_capped() {
        for attempt in 0..12 {
            let d = backoff_delay(attempt);
            assert!(d <= Duration::from_secs(30));
        }
    }

    #[tokio::test]
    async fn run_retries_retryable_errors_and_eventually_succeeds() {
        let limiter = RateLimiter::new(&ProviderLimits { retries: 3, ..ProviderLimits::default() });
        let cancel = CancellationToken::new();
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let result: Result<u32, MimirError> = limiter
            .run(1, &cancel, || {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(MimirError::Transport("temporary".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_does_not_retry_non_retryable_errors() {
        let limiter = RateLimiter::new(&ProviderLimits::default());
        let cancel = CancellationToken::new();
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let result: Result<u32, MimirError> = limiter
            .run(1, &cancel, || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move { Err(MimirError::BadRequest("nope".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_reservation_is_capped_at_capacity_not_refused_forever() {
        let limits = ProviderLimits { max_tokens_per_minute: 1_000, ..ProviderLimits::default() };
        let limiter = RateLimiter::new(&limits);
        let cancel = CancellationToken::new();

        // Request far more tokens than the reservoir's capacity; this must
        // not spin forever waiting for a refill that can never satisfy it.
        let result: Result<u32, MimirError> = limiter.run(10_000, &cancel, || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_wait() {
        let limits = ProviderLimits { max_requests_per_minute: 0, ..ProviderLimits::default() };
        let limiter = RateLimiter::new(&limits);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<u32, MimirError> = limiter.run(1, &cancel, || async { Ok(1) }).await;
        assert!(matches!(result, Err(MimirError::Cancelled)));
    }
}
