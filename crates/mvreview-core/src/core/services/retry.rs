//! Retry Decorator
//!
//! Bounded attempts with exponential backoff, a per-call timeout and
//! server-supplied retry-after, wrapped around any service adapter.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Classification, Credit, FingerprintService, MetadataService, VisionClassifier};
use crate::core::config::RetryConfig;
use crate::core::review::context::{AudioSample, FingerprintMatch, Frame};
use crate::core::review::rules::content::ContentCategory;
use crate::core::{CoreError, CoreResult};

/// Decides whether a failed attempt should be retried
pub type RetryPredicate = fn(&CoreError) -> bool;

/// Retry parameters for external calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
    pub retryable: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            call_timeout: Duration::from_millis(config.call_timeout_ms),
            retryable: CoreError::is_transient,
        }
    }

    /// Replaces the retryable predicate
    pub fn with_predicate(mut self, retryable: RetryPredicate) -> Self {
        self.retryable = retryable;
        self
    }

    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// A server-requested retry-after takes precedence over backoff; both are
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, err: &CoreError) -> Duration {
        let delay = match err.retry_after_ms() {
            Some(ms) => Duration::from_millis(ms),
            None => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    /// Runs `f` until it succeeds, fails permanently or attempts run out.
    ///
    /// Exhausted retries surface as [`CoreError::ServiceUnavailable`];
    /// non-retryable failures are returned unchanged.
    pub async fn run<F, Fut, T>(&self, service: &str, operation: &str, mut f: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match tokio::time::timeout(self.call_timeout, f()).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!("{} {} succeeded on attempt {}", service, operation, attempt);
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => CoreError::Timeout(format!(
                    "{} {} exceeded {}ms",
                    service,
                    operation,
                    self.call_timeout.as_millis()
                )),
            };

            if !(self.retryable)(&err) {
                return Err(err);
            }

            if attempt >= self.max_attempts {
                return Err(CoreError::ServiceUnavailable {
                    service: service.to_string(),
                    attempts: attempt,
                    message: err.to_string(),
                });
            }

            let delay = self.delay_for(attempt, &err);
            warn!(
                "{} {} failed (attempt {}/{}), retrying in {}ms: {}",
                service,
                operation,
                attempt,
                self.max_attempts,
                delay.as_millis(),
                err
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Wraps a service adapter with a [`RetryPolicy`]
pub struct Retrying<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> Retrying<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: FingerprintService> FingerprintService for Retrying<S> {
    fn service_name(&self) -> &str {
        self.inner.service_name()
    }

    async fn identify(&self, sample: &AudioSample) -> CoreResult<Option<FingerprintMatch>> {
        self.policy
            .run(self.inner.service_name(), "identify", || {
                self.inner.identify(sample)
            })
            .await
    }
}

#[async_trait]
impl<S: MetadataService> MetadataService for Retrying<S> {
    fn service_name(&self) -> &str {
        self.inner.service_name()
    }

    async fn lookup(&self, title: &str, performer: &str) -> CoreResult<Vec<Credit>> {
        self.policy
            .run(self.inner.service_name(), "lookup", || {
                self.inner.lookup(title, performer)
            })
            .await
    }
}

#[async_trait]
impl<S: VisionClassifier> VisionClassifier for Retrying<S> {
    fn service_name(&self) -> &str {
        self.inner.service_name()
    }

    async fn classify(
        &self,
        frame: &Frame,
        categories: &[ContentCategory],
    ) -> CoreResult<Classification> {
        self.policy
            .run(self.inner.service_name(), "classify", || {
                self.inner.classify(frame, categories)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            call_timeout: Duration::from_millis(200),
            retryable: CoreError::is_transient,
        }
    }

    /// Fails with the given errors in order, then succeeds
    struct FlakyFingerprinter {
        calls: Arc<AtomicU32>,
        failures: Vec<fn() -> CoreError>,
    }

    #[async_trait]
    impl FingerprintService for FlakyFingerprinter {
        fn service_name(&self) -> &str {
            "flaky"
        }

        async fn identify(&self, _sample: &AudioSample) -> CoreResult<Option<FingerprintMatch>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.failures.get(n) {
                Some(make) => Err(make()),
                None => Ok(Some(FingerprintMatch {
                    title: "Song".into(),
                    performer: "Singer".into(),
                    confidence: 0.9,
                })),
            }
        }
    }

    fn sample() -> AudioSample {
        AudioSample {
            fingerprint: "AQAA".into(),
            duration_sec: 30,
        }
    }

    fn unavailable() -> CoreError {
        CoreError::request_failed("flaky", Some(503), "down")
    }

    // =========================================================================
    // Policy Tests
    // =========================================================================

    #[test]
    fn test_exponential_backoff_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
            ..fast_policy(5)
        };
        let err = unavailable();
        assert_eq!(policy.delay_for(1, &err), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2, &err), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3, &err), Duration::from_millis(3000));
    }

    #[test]
    fn test_retry_after_takes_precedence() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            ..fast_policy(3)
        };
        let err = CoreError::RateLimited {
            service: "mb".into(),
            retry_after_ms: Some(4_000),
        };
        assert_eq!(policy.delay_for(1, &err), Duration::from_millis(4_000));
    }

    // =========================================================================
    // Decorator Tests
    // =========================================================================

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let service = Retrying::new(
            FlakyFingerprinter {
                calls: calls.clone(),
                failures: vec![
                    unavailable as fn() -> CoreError,
                    || CoreError::Timeout("slow".into()),
                ],
            },
            fast_policy(3),
        );

        let result = service.identify(&sample()).await.unwrap();
        assert_eq!(result.unwrap().title, "Song");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_becomes_service_unavailable() {
        let calls = Arc::new(AtomicU32::new(0));
        let service = Retrying::new(
            FlakyFingerprinter {
                calls: calls.clone(),
                failures: vec![unavailable as fn() -> CoreError; 5],
            },
            fast_policy(3),
        );

        let err = service.identify(&sample()).await.unwrap_err();
        match err {
            CoreError::ServiceUnavailable {
                service, attempts, ..
            } => {
                assert_eq!(service, "flaky");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let service = Retrying::new(
            FlakyFingerprinter {
                calls: calls.clone(),
                failures: vec![(|| CoreError::request_failed("flaky", Some(400), "bad request"))
                    as fn() -> CoreError],
            },
            fast_policy(3),
        );

        let err = service.identify(&sample()).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::ServiceRequestFailed {
                status: Some(400),
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_call_timeout_enforced() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(10),
            ..fast_policy(2)
        };
        let err = policy
            .run("slow", "identify", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, CoreError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ServiceUnavailable { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_custom_predicate() {
        let policy = fast_policy(3).with_predicate(|_| false);
        let calls = AtomicU32::new(0);
        let err = policy
            .run("svc", "op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CoreError::Timeout("t".into())) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
