//! Buffered outcome of a call.

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode, Url, Version};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::method::Method;

/// What was sent: method, final URL and headers of a request.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    method: Method,
    url: Url,
    headers: HeaderMap,
}

impl RequestSnapshot {
    pub(crate) fn new(method: Method, url: Url, headers: HeaderMap) -> Self {
        Self {
            method,
            url,
            headers,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// A response whose body has been read.
#[derive(Debug)]
pub(crate) struct Received {
    status: StatusCode,
    version: Version,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
}

impl Received {
    pub(crate) async fn read(response: Response) -> Result<Self> {
        let status = response.status();
        let version = response.version();
        let url = response.url().clone();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            version,
            url,
            headers,
            body,
        })
    }
}

/// Result of executing a request: a received response or the error that ended the call.
///
/// Error statuses are ordinary responses here; use [`is_success`](Self::is_success) or
/// [`error_for_status`](Self::error_for_status) to classify them.
#[derive(Debug)]
pub struct HttpResponse {
    request: RequestSnapshot,
    status: Option<StatusCode>,
    version: Option<Version>,
    url: Option<Url>,
    headers: HeaderMap,
    body: Bytes,
    error: Option<Error>,
}

impl HttpResponse {
    pub(crate) fn from_outcome(request: RequestSnapshot, outcome: Result<Received>) -> Self {
        match outcome {
            Ok(received) => Self {
                request,
                status: Some(received.status),
                version: Some(received.version),
                url: Some(received.url),
                headers: received.headers,
                body: received.body,
                error: None,
            },
            Err(error) => Self::failed(request, error),
        }
    }

    pub(crate) fn failed(request: RequestSnapshot, error: Error) -> Self {
        Self {
            request,
            status: None,
            version: None,
            url: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            error: Some(error),
        }
    }

    pub fn request(&self) -> &RequestSnapshot {
        &self.request
    }

    /// Status code, or `None` if no response was received.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|status| status.is_success())
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// URL of the final response, after redirects.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Response headers; empty when the call failed.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of header `name`, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Error::Decode)
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// True if a response was received, whatever its status.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_network_error(&self) -> bool {
        self.error.as_ref().is_some_and(Error::is_network)
    }

    /// Turns a failed call into `Err`.
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }

    /// Like [`into_result`](Self::into_result), and also turns 4xx/5xx statuses into
    /// [`Error::Status`].
    pub fn error_for_status(self) -> Result<Self> {
        let response = self.into_result()?;
        match response.status {
            Some(status) if status.is_client_error() || status.is_server_error() => {
                Err(Error::Status {
                    status,
                    url: response.url.unwrap_or(response.request.url),
                })
            }
            _ => Ok(response),
        }
    }

    /// Takes the error out, leaving the response as if it succeeded.
    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }
}
