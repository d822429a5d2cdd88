//! Error type shared by the request builder, the interceptor pipeline and the calls.

use crate::method::Method;

/// Errors produced while building or running a request.
///
/// Only [`Error::InvalidUrl`] is ever returned directly to the caller (from the request
/// factories). Everything else is carried inside the [`HttpResponse`](crate::HttpResponse)
/// produced by an execution.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The URL could not be parsed as an absolute http(s) URL.
    #[error("cannot parse url: {method} [{url}]: {reason}")]
    InvalidUrl {
        method: Method,
        url: String,
        reason: String,
    },

    /// A header name or value was rejected.
    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    /// The request body could not be produced.
    #[error("failed to build request body: {0}")]
    Body(String),

    /// Proxy or TLS material was rejected, or the client could not be built.
    #[error("invalid transport configuration: {0}")]
    Config(#[source] reqwest::Error),

    /// I/O failure reported by the HTTP client (connect, TLS handshake, timeout, reset).
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// I/O failure raised by an interceptor or while reading request material.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered with an error status; produced by
    /// [`HttpResponse::error_for_status`](crate::HttpResponse::error_for_status).
    #[error("HTTP status {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: reqwest::Url,
    },

    /// The response body was not valid JSON for the requested type.
    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    /// The call was canceled through its [`CancelHandle`](crate::CancelHandle).
    #[error("call canceled")]
    Canceled,

    /// The dispatcher runtime could not be started.
    #[error("failed to start dispatcher: {0}")]
    Dispatcher(#[source] std::io::Error),

    /// An interceptor failed for a reason other than I/O.
    #[error("interceptor failed: {0}")]
    Interceptor(#[source] anyhow::Error),
}

impl Error {
    /// Returns true for transport-level faults where the server never produced a response.
    ///
    /// These are the only failures the retry stage re-attempts.
    pub fn is_network(&self) -> bool {
        match self {
            Error::Network(e) => {
                !(e.is_builder() || e.is_redirect() || e.is_status() || e.is_decode())
            }
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Returns true if the call ended because it was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// Returns true if the failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout(),
            Error::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        if error.is_builder() {
            Error::Config(error)
        } else {
            Error::Network(error)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
