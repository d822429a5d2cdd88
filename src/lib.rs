//! Fluent HTTP requests on top of `reqwest`, with per-request transport overrides, an
//! interceptor pipeline and bounded retries.
//!
//! ```no_run
//! use std::time::Duration;
//! use reqchain::{HttpRequest, LogLevel};
//!
//! let response = HttpRequest::post("https://example.com/api/items")?
//!     .body_json(&serde_json::json!({"name": "widget"}))
//!     .read_timeout(Duration::from_secs(5))
//!     .retry_with(3, 200)
//!     .log_level(LogLevel::Basic)
//!     .execute();
//!
//! if let Some(error) = response.error() {
//!     eprintln!("request failed: {}", error);
//! }
//! # Ok::<(), reqchain::Error>(())
//! ```

pub mod call;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod interceptor;
pub mod method;
pub mod request;
pub mod response;
pub mod transport;

pub use call::{AsyncCall, Call, CallHandle, CancelHandle};
pub use context::{HttpContext, set_global_log, set_http_client};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use interceptor::{
    Authenticator, BasicAuthenticator, EventListener, Interceptor, LogLevel, LoggingInterceptor,
    Next, RetryInterceptor, RetryPolicy,
};
pub use method::Method;
pub use request::{
    DEFAULT_USER_AGENT, FormBuilder, HttpRequest, IntoRequestUrl, MultipartFormBuilder,
};
pub use response::{HttpResponse, RequestSnapshot};
pub use transport::{
    ClientSettings, ProxyCredentials, ProxySelector, TlsMaterial, Transport, TransportBuilder,
};
