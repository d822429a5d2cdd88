//! Process-wide defaults: the shared transport, the global logger and the dispatcher.

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use once_cell::sync::Lazy;

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::interceptor::{LogLevel, LoggingInterceptor};
use crate::method::Method;
use crate::request::{HttpRequest, IntoRequestUrl};
use crate::transport::Transport;

static GLOBAL: Lazy<HttpContext> = Lazy::new(HttpContext::new);

struct Shared {
    transport: ArcSwap<Transport>,
    global_log: ArcSwapOption<LoggingInterceptor>,
    dispatcher: Arc<Dispatcher>,
}

/// Defaults that requests created from this context start from.
///
/// Cloning is cheap and clones share state. Settings are replace-only: a call that has already
/// been prepared keeps the transport and logger it saw.
#[derive(Clone)]
pub struct HttpContext {
    shared: Arc<Shared>,
}

impl HttpContext {
    /// Creates a context with a default transport and no global logger.
    pub fn new() -> Self {
        Self::with_transport(Transport::default())
    }

    /// Creates a context whose requests run on `transport`.
    pub fn with_transport(transport: Transport) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport: ArcSwap::from_pointee(transport),
                global_log: ArcSwapOption::empty(),
                dispatcher: Arc::new(Dispatcher::new()),
            }),
        }
    }

    /// Returns a context with the same defaults whose dispatcher uses `threads` workers.
    pub fn with_dispatcher_threads(self, threads: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport: ArcSwap::new(self.shared.transport.load_full()),
                global_log: ArcSwapOption::new(self.shared.global_log.load_full()),
                dispatcher: Arc::new(Dispatcher::with_threads(threads)),
            }),
        }
    }

    /// The process-wide context used by [`HttpRequest::get`] and friends.
    pub fn global() -> &'static HttpContext {
        &GLOBAL
    }

    /// Returns the current default transport.
    pub fn transport(&self) -> Arc<Transport> {
        self.shared.transport.load_full()
    }

    /// Replaces the default transport. Calls already prepared are not affected.
    pub fn set_transport(&self, transport: Transport) {
        self.shared.transport.store(Arc::new(transport));
    }

    /// Logs every request that does not choose its own level. `LogLevel::None` turns it off.
    pub fn set_global_log(&self, level: LogLevel) {
        let logger = (level != LogLevel::None).then(|| LoggingInterceptor::new(level));
        self.set_global_logger(logger);
    }

    /// Like [`set_global_log`](Self::set_global_log), for a customized logger.
    pub fn set_global_logger(&self, logger: Option<LoggingInterceptor>) {
        self.shared.global_log.store(logger.map(Arc::new));
    }

    /// Returns the logger used by requests without their own level.
    pub fn global_logger(&self) -> Option<Arc<LoggingInterceptor>> {
        self.shared.global_log.load_full()
    }

    pub(crate) fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }

    /// Creates a request bound to this context. Fails if `url` is not an absolute http(s) URL.
    pub fn request(&self, method: Method, url: impl IntoRequestUrl) -> Result<HttpRequest> {
        HttpRequest::with_context(self.clone(), method, url)
    }

    /// GET request bound to this context.
    pub fn get(&self, url: impl IntoRequestUrl) -> Result<HttpRequest> {
        self.request(Method::Get, url)
    }

    /// POST request bound to this context.
    pub fn post(&self, url: impl IntoRequestUrl) -> Result<HttpRequest> {
        self.request(Method::Post, url)
    }

    /// PUT request bound to this context.
    pub fn put(&self, url: impl IntoRequestUrl) -> Result<HttpRequest> {
        self.request(Method::Put, url)
    }

    /// PATCH request bound to this context.
    pub fn patch(&self, url: impl IntoRequestUrl) -> Result<HttpRequest> {
        self.request(Method::Patch, url)
    }

    /// DELETE request bound to this context.
    pub fn delete(&self, url: impl IntoRequestUrl) -> Result<HttpRequest> {
        self.request(Method::Delete, url)
    }
}

impl Default for HttpContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContext")
            .field("transport", &self.shared.transport.load_full())
            .field(
                "global_log",
                &self.global_logger().map(|l| l.level()),
            )
            .field("dispatcher", &self.shared.dispatcher)
            .finish()
    }
}

/// Replaces the process-wide default transport.
pub fn set_http_client(transport: Transport) {
    HttpContext::global().set_transport(transport);
}

/// Sets the process-wide logging level for requests without their own level.
pub fn set_global_log(level: LogLevel) {
    HttpContext::global().set_global_log(level);
}
