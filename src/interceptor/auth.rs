//! Challenge-driven authentication stage.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::debug;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Request, Response, StatusCode, Url};

use super::{Interceptor, Next, replayable};
use crate::error::Result;

/// Supplies credentials after a server answered `401 Unauthorized`.
#[cfg_attr(test, mockall::automock)]
pub trait Authenticator: Send + Sync {
    /// Returns the `Authorization` value to retry with, or `None` to give up and
    /// return the 401 response to the caller.
    fn authenticate(&self, url: &Url, response: &Response) -> Option<HeaderValue>;
}

/// Answers challenges with HTTP Basic credentials.
#[derive(Clone)]
pub struct BasicAuthenticator {
    credential: String,
}

impl BasicAuthenticator {
    pub fn new(username: &str, password: &str) -> Self {
        let token = STANDARD.encode(format!("{}:{}", username, password));
        Self {
            credential: format!("Basic {}", token),
        }
    }
}

impl std::fmt::Debug for BasicAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthenticator").finish_non_exhaustive()
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, _url: &Url, _response: &Response) -> Option<HeaderValue> {
        let mut value = HeaderValue::from_str(&self.credential).ok()?;
        value.set_sensitive(true);
        Some(value)
    }
}

/// Re-issues a request once with credentials when the server asks for them.
///
/// Requests that already carry an `Authorization` header are passed through untouched.
pub struct AuthInterceptor {
    authenticator: Arc<dyn Authenticator>,
}

impl AuthInterceptor {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response> {
        if request.headers().contains_key(AUTHORIZATION) {
            return next.run(request).await;
        }

        let request = replayable(request).await?;
        let replay = request.try_clone();
        let url = request.url().clone();
        let response = next.run(request).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(mut replay) = replay else {
            return Ok(response);
        };
        let Some(credential) = self.authenticator.authenticate(&url, &response) else {
            return Ok(response);
        };

        debug!("auth: {} answered 401, retrying with credentials", url);
        drop(response);
        replay.headers_mut().insert(AUTHORIZATION, credential);
        next.run(replay).await
    }
}
