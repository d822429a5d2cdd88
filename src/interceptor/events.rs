//! Call lifecycle notifications.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, Request, Response, StatusCode, Url};

use super::{Interceptor, Next};
use crate::error::{Error, Result};

/// Observes the lifecycle of a call. Every method defaults to a no-op.
///
/// Exactly one of `call_end` or `call_failed` follows each `call_start`.
#[cfg_attr(test, mockall::automock)]
pub trait EventListener: Send + Sync {
    fn call_start(&self, _method: &Method, _url: &Url) {}

    fn call_end(&self, _status: StatusCode) {}

    fn call_failed(&self, _error: &Error) {}
}

/// Outermost stage that reports call events to an [`EventListener`].
pub struct EventListenerInterceptor {
    listener: Arc<dyn EventListener>,
}

impl EventListenerInterceptor {
    pub fn new(listener: Arc<dyn EventListener>) -> Self {
        Self { listener }
    }
}

#[async_trait]
impl Interceptor for EventListenerInterceptor {
    fn name(&self) -> &'static str {
        "events"
    }

    async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response> {
        self.listener.call_start(request.method(), request.url());

        let outcome = tokio::select! {
            biased;
            _ = next.canceled() => Err(Error::Canceled),
            outcome = next.run(request) => outcome,
        };

        match &outcome {
            Ok(response) => self.listener.call_end(response.status()),
            Err(e) => self.listener.call_failed(e),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::test_support::*;
    use crate::interceptor::{MockEventListener, RetryInterceptor, RetryPolicy};
    use mockall::predicate::eq;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_success_reports_start_and_end() {
        let mut listener = MockEventListener::new();
        listener
            .expect_call_start()
            .withf(|method, url| *method == Method::GET && url.path() == "/items")
            .times(1)
            .return_const(());
        listener
            .expect_call_end()
            .with(eq(StatusCode::OK))
            .times(1)
            .return_const(());
        listener.expect_call_failed().never();

        let stages: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(EventListenerInterceptor::new(Arc::new(listener))),
            ScriptedStage::new(vec![Scripted::Status(200)]),
        ];
        let cancel = CancellationToken::new();
        run_pipeline(stages, get("http://localhost/items"), &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_retries_report_a_single_failure() {
        let mut listener = MockEventListener::new();
        listener.expect_call_start().times(1).return_const(());
        listener.expect_call_end().never();
        listener
            .expect_call_failed()
            .withf(|e| e.is_network())
            .times(1)
            .return_const(());

        let terminal = ScriptedStage::always_refused();
        let stages: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(EventListenerInterceptor::new(Arc::new(listener))),
            Arc::new(RetryInterceptor::new(RetryPolicy::new(3, 0))),
            terminal.clone(),
        ];
        let cancel = CancellationToken::new();
        let result = run_pipeline(stages, get("http://localhost/"), &cancel).await;

        assert!(result.is_err());
        assert_eq!(terminal.attempts(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_is_reported() {
        let mut listener = MockEventListener::new();
        listener.expect_call_start().return_const(());
        listener
            .expect_call_failed()
            .withf(|e| e.is_canceled())
            .times(1)
            .return_const(());

        let stages: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(EventListenerInterceptor::new(Arc::new(listener))),
            ScriptedStage::new(vec![Scripted::Status(200)]),
        ];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_pipeline(stages, get("http://localhost/"), &cancel).await;
        assert!(result.unwrap_err().is_canceled());
    }
}
