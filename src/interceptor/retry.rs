//! Retry stage: re-issues a call after network-level failures.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Request, Response};

use super::{Interceptor, Next, replayable};
use crate::error::{Error, Result};

/// Default number of attempts, the first one included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between attempts in milliseconds.
pub const DEFAULT_SLEEP_MILLIS: u64 = 0;

type ResponsePredicate = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Bounded retry policy with a fixed delay between attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    sleep: Duration,
    retry_on_response: Option<ResponsePredicate>,
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` counts the first attempt and is at least one.
    pub fn new(max_attempts: u32, sleep_millis: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            sleep: Duration::from_millis(sleep_millis),
            retry_on_response: None,
        }
    }

    /// Also retries when a received response matches `predicate`.
    ///
    /// Responses are never retried otherwise. When the attempts run out, the last matching
    /// response is returned as-is.
    pub fn with_response_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.retry_on_response = Some(Arc::new(predicate));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn sleep(&self) -> Duration {
        self.sleep
    }

    fn should_retry_response(&self, response: &Response) -> bool {
        self.retry_on_response
            .as_ref()
            .is_some_and(|predicate| predicate(response))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_SLEEP_MILLIS)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("sleep", &self.sleep)
            .field("retry_on_response", &self.retry_on_response.is_some())
            .finish()
    }
}

/// Pipeline stage applying a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryInterceptor {
    policy: RetryPolicy,
}

impl RetryInterceptor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sleeps between attempts. Cancellation cuts the wait short.
    async fn wait(&self, next: &Next<'_>) -> Result<()> {
        if !self.policy.sleep.is_zero() {
            tokio::select! {
                biased;
                _ = next.canceled() => {}
                _ = tokio::time::sleep(self.policy.sleep) => {}
            }
        }
        if next.is_canceled() {
            debug!("retry: call canceled, not starting another attempt");
            return Err(Error::Canceled);
        }
        Ok(())
    }
}

#[async_trait]
impl Interceptor for RetryInterceptor {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response> {
        let max_attempts = self.policy.max_attempts;
        let mut request = if max_attempts > 1 {
            replayable(request).await?
        } else {
            request
        };
        let mut attempt = 1;

        loop {
            let replay = if attempt < max_attempts {
                request.try_clone()
            } else {
                None
            };

            match next.run(request).await {
                Ok(response) => {
                    let Some(replay) = replay else {
                        return Ok(response);
                    };
                    if !self.policy.should_retry_response(&response) {
                        return Ok(response);
                    }
                    warn!(
                        "retry: attempt {}/{} got HTTP {}, retrying in {}ms...",
                        attempt,
                        max_attempts,
                        response.status().as_u16(),
                        self.policy.sleep.as_millis()
                    );
                    drop(response);
                    request = replay;
                }
                Err(e) if e.is_network() => {
                    let Some(replay) = replay else {
                        if attempt > 1 {
                            warn!("retry: giving up after {} attempts: {}", attempt, e);
                        }
                        return Err(e);
                    };
                    warn!(
                        "retry: attempt {}/{} failed ({}), retrying in {}ms...",
                        attempt,
                        max_attempts,
                        e,
                        self.policy.sleep.as_millis()
                    );
                    request = replay;
                }
                Err(e) => {
                    debug!("retry: non-retryable error: {}", e);
                    return Err(e);
                }
            }

            self.wait(&next).await?;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::test_support::*;
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn pipeline(policy: RetryPolicy, terminal: Arc<ScriptedStage>) -> Vec<Arc<dyn Interceptor>> {
        vec![Arc::new(RetryInterceptor::new(policy)), terminal]
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(policy.sleep(), Duration::from_millis(DEFAULT_SLEEP_MILLIS));
    }

    #[test]
    fn test_policy_clamps_zero_attempts() {
        assert_eq!(RetryPolicy::new(0, 10).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts_on_network_errors() {
        let terminal = ScriptedStage::always_refused();
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let result = run_pipeline(
            pipeline(RetryPolicy::new(4, 20), terminal.clone()),
            get("http://localhost/"),
            &cancel,
        )
        .await;

        assert!(result.unwrap_err().is_network());
        assert_eq!(terminal.attempts(), 4);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_success_short_circuits() {
        let terminal = ScriptedStage::new(vec![
            Scripted::Refused,
            Scripted::Status(200),
            Scripted::Refused,
        ]);
        let cancel = CancellationToken::new();

        let response = run_pipeline(
            pipeline(RetryPolicy::new(5, 0), terminal.clone()),
            get("http://localhost/"),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(terminal.attempts(), 2);
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let terminal = ScriptedStage::new(vec![Scripted::Status(500), Scripted::Status(200)]);
        let cancel = CancellationToken::new();

        let response = run_pipeline(
            pipeline(RetryPolicy::new(3, 0), terminal.clone()),
            get("http://localhost/"),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(response.status(), 500);
        assert_eq!(terminal.attempts(), 1);
    }

    #[tokio::test]
    async fn test_response_predicate_retries_matching_status() {
        let terminal = ScriptedStage::new(vec![Scripted::Status(503), Scripted::Status(200)]);
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(3, 0)
            .with_response_predicate(|response| response.status().is_server_error());

        let response = run_pipeline(
            pipeline(policy, terminal.clone()),
            get("http://localhost/"),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(terminal.attempts(), 2);
    }

    #[tokio::test]
    async fn test_response_predicate_returns_last_response_when_exhausted() {
        let terminal = ScriptedStage::new(vec![Scripted::Status(503)]);
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(2, 0)
            .with_response_predicate(|response| response.status().is_server_error());

        let response = run_pipeline(
            pipeline(policy, terminal.clone()),
            get("http://localhost/"),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(response.status(), 503);
        assert_eq!(terminal.attempts(), 2);
    }

    #[tokio::test]
    async fn test_single_attempt_policy_does_not_retry() {
        let terminal = ScriptedStage::always_refused();
        let cancel = CancellationToken::new();

        let result = run_pipeline(
            pipeline(RetryPolicy::new(1, 0), terminal.clone()),
            get("http://localhost/"),
            &cancel,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(terminal.attempts(), 1);
    }

    #[tokio::test]
    async fn test_multipart_body_is_retried() {
        let terminal = ScriptedStage::always_refused();
        let cancel = CancellationToken::new();
        let form = reqwest::multipart::Form::new().text("name", "value");
        let request = reqwest::Client::new()
            .post("http://localhost/upload")
            .multipart(form)
            .build()
            .unwrap();

        let result = run_pipeline(
            pipeline(RetryPolicy::new(3, 0), terminal.clone()),
            request,
            &cancel,
        )
        .await;

        assert!(result.unwrap_err().is_network());
        assert_eq!(terminal.attempts(), 3);
        let seen = terminal.seen.lock().unwrap();
        let boundaries: Vec<_> = seen
            .iter()
            .map(|headers| headers[reqwest::header::CONTENT_TYPE].clone())
            .collect();
        assert!(boundaries.iter().all(|b| b == &boundaries[0]));
    }

    #[tokio::test]
    async fn test_cancel_during_wait_stops_retrying() {
        let terminal = ScriptedStage::always_refused();
        let cancel = CancellationToken::new();

        let canceler = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceler.cancel();
        });

        let start = Instant::now();
        let result = run_pipeline(
            pipeline(RetryPolicy::new(5, 10_000), terminal.clone()),
            get("http://localhost/"),
            &cancel,
        )
        .await;

        assert!(result.unwrap_err().is_canceled());
        assert_eq!(terminal.attempts(), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_canceled_call_does_not_start_next_attempt() {
        let terminal = ScriptedStage::always_refused();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_pipeline(
            pipeline(RetryPolicy::new(3, 0), terminal.clone()),
            get("http://localhost/"),
            &cancel,
        )
        .await;

        assert!(result.unwrap_err().is_canceled());
        assert_eq!(terminal.attempts(), 1);
    }
}
