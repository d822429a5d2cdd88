//! Ordered interceptor pipeline that every call runs through.
//!
//! A call is a list of stages followed by the HTTP client. Each stage receives the request and a
//! [`Next`] handle for the rest of the pipeline; it may rewrite the request, forward it (once or
//! several times), or answer it directly without forwarding.

mod auth;
mod events;
mod logging;
mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use http_body_util::BodyExt;
use reqwest::{Body, Client, Request, Response};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

pub use auth::{AuthInterceptor, Authenticator, BasicAuthenticator};
pub use events::{EventListener, EventListenerInterceptor};
pub use logging::{LogLevel, LoggingInterceptor};
pub use retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_SLEEP_MILLIS, RetryInterceptor, RetryPolicy};

#[cfg(test)]
pub(crate) use auth::MockAuthenticator;
#[cfg(test)]
pub(crate) use events::MockEventListener;

/// A named pipeline stage.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "interceptor"
    }

    /// Handles one request. Call `next.run(request)` to forward it.
    async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response>;
}

#[async_trait]
impl<I: Interceptor + ?Sized> Interceptor for Arc<I> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response> {
        (**self).intercept(request, next).await
    }
}

/// The remainder of a pipeline, from the perspective of the stage holding it.
///
/// `Next` is `Copy`, so a stage can forward the same request more than once.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    client: &'a Client,
    stages: &'a [Arc<dyn Interceptor>],
    cancel: &'a CancellationToken,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        client: &'a Client,
        stages: &'a [Arc<dyn Interceptor>],
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            client,
            stages,
            cancel,
        }
    }

    /// Runs the request through the remaining stages and the client.
    pub fn run(mut self, request: Request) -> BoxFuture<'a, Result<Response>> {
        if let Some((current, rest)) = self.stages.split_first() {
            self.stages = rest;
            Box::pin(current.intercept(request, self))
        } else {
            let client = self.client;
            Box::pin(async move { client.execute(request).await.map_err(Error::from) })
        }
    }

    /// Returns true once the call owning this pipeline has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the call owning this pipeline is canceled.
    pub async fn canceled(&self) {
        self.cancel.cancelled().await
    }
}

/// Buffers a streaming body in memory so the request can be cloned for another attempt.
///
/// Multipart bodies are streams; everything else is already backed by bytes.
pub(crate) async fn replayable(mut request: Request) -> Result<Request> {
    let streaming = request
        .body()
        .is_some_and(|body| body.as_bytes().is_none());
    if !streaming {
        return Ok(request);
    }
    if let Some(body) = request.body_mut().take() {
        let bytes = body.collect().await.map_err(Error::from)?.to_bytes();
        *request.body_mut() = Some(Body::from(bytes));
    }
    Ok(request)
}
