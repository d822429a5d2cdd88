//! Fluent request builder.
//!
//! An [`HttpRequest`] collects everything about one request by value and is consumed when it
//! runs. Nothing touches the network before [`HttpRequest::execute`], [`HttpRequest::send`] or
//! [`AsyncCall::enqueue`]; configuration mistakes (bad header, unreadable file part, rejected
//! TLS material) are remembered and reported in the resulting [`HttpResponse`].

mod body;

use std::fmt::{self, Display};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::debug;
use reqwest::cookie::CookieStore;
use reqwest::header::{COOKIE, CACHE_CONTROL, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, Request, Url};
use serde::Serialize;

use crate::call::{AsyncCall, Call};
use crate::context::HttpContext;
use crate::error::{Error, Result};
use crate::interceptor::{
    AuthInterceptor, Authenticator, BasicAuthenticator, EventListener, EventListenerInterceptor,
    Interceptor, LogLevel, LoggingInterceptor, RetryInterceptor, RetryPolicy,
};
use crate::method::Method;
use crate::response::{HttpResponse, RequestSnapshot};
use crate::transport::{ClientSettings, ProxyCredentials, TlsMaterial, Transport};

use body::{Finalized, RequestBody};
pub use body::{FormBuilder, MultipartFormBuilder};

/// User agent sent unless the request sets its own.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/74.0.3729.169 Safari/537.36";

/// Values a request URL can be given as.
pub trait IntoRequestUrl {
    /// Parses and checks the URL. `method` only appears in the error.
    fn into_request_url(self, method: Method) -> Result<Url>;
}

impl IntoRequestUrl for &str {
    fn into_request_url(self, method: Method) -> Result<Url> {
        let url = Url::parse(self).map_err(|e| invalid_url(method, self, e.to_string()))?;
        check_url(method, url)
    }
}

impl IntoRequestUrl for String {
    fn into_request_url(self, method: Method) -> Result<Url> {
        self.as_str().into_request_url(method)
    }
}

impl IntoRequestUrl for &String {
    fn into_request_url(self, method: Method) -> Result<Url> {
        self.as_str().into_request_url(method)
    }
}

impl IntoRequestUrl for Url {
    fn into_request_url(self, method: Method) -> Result<Url> {
        check_url(method, self)
    }
}

impl IntoRequestUrl for &Url {
    fn into_request_url(self, method: Method) -> Result<Url> {
        check_url(method, self.clone())
    }
}

fn invalid_url(method: Method, url: &str, reason: impl Into<String>) -> Error {
    Error::InvalidUrl {
        method,
        url: url.to_string(),
        reason: reason.into(),
    }
}

fn check_url(method: Method, url: Url) -> Result<Url> {
    if !matches!(url.scheme(), "http" | "https") {
        let reason = format!("unsupported scheme {:?}", url.scheme());
        return Err(invalid_url(method, url.as_str(), reason));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid_url(method, url.as_str(), "missing host"));
    }
    Ok(url)
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// A request under construction.
///
/// ```no_run
/// use reqchain::HttpRequest;
///
/// let response = HttpRequest::get("https://example.com/search")?
///     .query("q", "rust")
///     .add_header("accept", "application/json")
///     .retry()
///     .execute();
/// println!("{:?}", response.status());
/// # Ok::<(), reqchain::Error>(())
/// ```
pub struct HttpRequest {
    context: HttpContext,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<RequestBody>,
    user_agent: String,
    log_level: Option<LogLevel>,
    settings: ClientSettings,
    retry: Option<RetryPolicy>,
    authenticator: Option<Arc<dyn Authenticator>>,
    event_listener: Option<Arc<dyn EventListener>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    network_interceptors: Vec<Arc<dyn Interceptor>>,
    error: Option<Error>,
}

impl HttpRequest {
    pub(crate) fn with_context(
        context: HttpContext,
        method: Method,
        url: impl IntoRequestUrl,
    ) -> Result<Self> {
        let url = url.into_request_url(method)?;
        Ok(Self {
            context,
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            log_level: None,
            settings: ClientSettings::default(),
            retry: None,
            authenticator: None,
            event_listener: None,
            interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            error: None,
        })
    }

    /// Creates a request on the process-wide [`HttpContext`].
    pub fn new(method: Method, url: impl IntoRequestUrl) -> Result<Self> {
        HttpContext::global().request(method, url)
    }

    /// GET request on the process-wide context.
    pub fn get(url: impl IntoRequestUrl) -> Result<Self> {
        Self::new(Method::Get, url)
    }

    /// POST request on the process-wide context.
    pub fn post(url: impl IntoRequestUrl) -> Result<Self> {
        Self::new(Method::Post, url)
    }

    /// PUT request on the process-wide context.
    pub fn put(url: impl IntoRequestUrl) -> Result<Self> {
        Self::new(Method::Put, url)
    }

    /// PATCH request on the process-wide context.
    pub fn patch(url: impl IntoRequestUrl) -> Result<Self> {
        Self::new(Method::Patch, url)
    }

    /// DELETE request on the process-wide context.
    pub fn delete(url: impl IntoRequestUrl) -> Result<Self> {
        Self::new(Method::Delete, url)
    }

    /// Returns the request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the target URL, query included.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the headers set so far. `User-Agent` is added at execution.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Keeps the first configuration error; it is reported when the request runs.
    fn record(&mut self, error: Error) {
        debug!("request: {} {}: {}", self.method, self.url, error);
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub(crate) fn set_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    // Query

    /// Appends `name=value`, encoding both.
    pub fn query(mut self, name: &str, value: impl Display) -> Self {
        self.url
            .query_pairs_mut()
            .append_pair(name, &value.to_string());
        self
    }

    /// Appends `name=value` as given; both must already be encoded.
    pub fn query_encoded(mut self, name: &str, value: &str) -> Self {
        let pair = format!("{}={}", name, value);
        self.append_raw_query(&pair);
        self
    }

    /// Appends `name` without a value.
    pub fn query_flag(mut self, name: &str) -> Self {
        self.url.query_pairs_mut().append_key_only(name);
        self
    }

    /// Replaces the whole query string. `%` and characters not allowed in a query are encoded.
    pub fn query_string(mut self, query: &str) -> Self {
        let escaped = query.replace('%', "%25");
        self.url.set_query(Some(&escaped));
        self
    }

    /// Replaces the whole query string with an already encoded one.
    pub fn query_string_encoded(mut self, query: &str) -> Self {
        self.url.set_query(Some(query));
        self
    }

    /// Appends every pair, encoding names and values.
    pub fn query_map<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Display,
    {
        for (name, value) in params {
            self = self.query(name.as_ref(), value);
        }
        self
    }

    fn append_raw_query(&mut self, pair: &str) {
        let query = match self.url.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, pair),
            _ => pair.to_string(),
        };
        self.url.set_query(Some(&query));
    }

    // Headers

    /// Adds a header value, keeping existing values of the same name.
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        match header_name(name).and_then(|n| Ok((n, header_value(name, value)?))) {
            Ok((name, value)) => {
                self.headers.append(name, value);
            }
            Err(e) => self.record(e),
        }
        self
    }

    /// Sets a header, replacing all existing values of the same name.
    pub fn set_header(mut self, name: &str, value: &str) -> Self {
        match header_name(name).and_then(|n| Ok((n, header_value(name, value)?))) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(e) => self.record(e),
        }
        self
    }

    /// Removes every value of a header.
    pub fn remove_header(mut self, name: &str) -> Self {
        match header_name(name) {
            Ok(name) => {
                self.headers.remove(name);
            }
            Err(e) => self.record(e),
        }
        self
    }

    /// Adds each header, keeping existing values.
    pub fn add_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            self = self.add_header(name.as_ref(), value.as_ref());
        }
        self
    }

    /// Adds a cookie to the `Cookie` header, folding any existing values into one line.
    pub fn add_cookie(self, name: &str, value: &str) -> Self {
        let mut cookies: Vec<&str> = self
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let cookie = format!("{}={}", name, value);
        cookies.push(&cookie);
        let joined = cookies.join("; ");
        self.set_header(COOKIE.as_str(), &joined)
    }

    /// Sets the `Cache-Control` header.
    pub fn cache_control(self, directives: &str) -> Self {
        self.set_header(CACHE_CONTROL.as_str(), directives)
    }

    /// Overrides the default `User-Agent`.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    // Bodies

    /// Sends `bytes` as the body with no content type.
    pub fn body(self, bytes: impl Into<Bytes>) -> Self {
        self.set_body(RequestBody::Raw {
            bytes: bytes.into(),
            content_type: None,
        })
    }

    /// Sends `bytes` as the body with the given content type.
    pub fn body_with_type(self, bytes: impl Into<Bytes>, content_type: &str) -> Self {
        self.set_body(RequestBody::Raw {
            bytes: bytes.into(),
            content_type: Some(content_type.to_string()),
        })
    }

    /// Sends a string body with no content type.
    pub fn body_string(self, body: impl Into<String>) -> Self {
        self.body(body.into())
    }

    /// Serializes `value` as the JSON body.
    pub fn body_json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(json) => self.body_with_type(json, "application/json"),
            Err(e) => {
                self.record(Error::Body(format!("cannot serialize JSON body: {}", e)));
                self
            }
        }
    }

    /// Starts a url-encoded form body.
    pub fn form_builder(self) -> FormBuilder {
        FormBuilder::new(self)
    }

    /// Starts a multipart form body.
    pub fn multipart_form_builder(self) -> MultipartFormBuilder {
        MultipartFormBuilder::new(self)
    }

    // Transport

    /// Timeout for establishing a connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.settings = self.settings.with_connect_timeout(timeout);
        self
    }

    /// Timeout for each read from the connection.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.settings = self.settings.with_read_timeout(timeout);
        self
    }

    /// Upper bound for each attempt as a whole.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.settings = self.settings.with_write_timeout(timeout);
        self
    }

    /// Routes the request through an HTTP proxy at `address`.
    pub fn proxy(mut self, address: SocketAddr) -> Self {
        let raw = format!("http://{}", address);
        match Url::parse(&raw) {
            Ok(url) => self.settings = self.settings.with_proxy(url),
            Err(e) => self.record(invalid_url(self.method, &raw, e.to_string())),
        }
        self
    }

    /// Routes the request through the proxy at `proxy`.
    pub fn proxy_url(mut self, proxy: Url) -> Self {
        self.settings = self.settings.with_proxy(proxy);
        self
    }

    /// Chooses a proxy per target URL; `None` connects directly.
    pub fn proxy_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&Url) -> Option<Url> + Send + Sync + 'static,
    {
        self.settings = self.settings.with_proxy_selector(Arc::new(selector));
        self
    }

    /// Basic credentials sent to the proxy.
    pub fn proxy_auth(mut self, username: &str, password: &str) -> Self {
        self.settings = self.settings.with_proxy_credentials(ProxyCredentials {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    /// `false` accepts certificates whose name does not match the host.
    pub fn hostname_verification(mut self, enabled: bool) -> Self {
        self.settings = self.settings.with_hostname_verification(enabled);
        self
    }

    /// `true` accepts any server certificate.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.settings = self.settings.with_accept_invalid_certs(accept);
        self
    }

    /// Client identity plus trust roots. Ignored unless both halves are present.
    pub fn tls(mut self, material: TlsMaterial) -> Self {
        self.settings.tls = material;
        self
    }

    /// PEM client certificate and key. Needs `trust_roots` too.
    pub fn client_identity(mut self, identity_pem: impl Into<Bytes>) -> Self {
        self.settings.tls.identity_pem = Some(identity_pem.into());
        self
    }

    /// PEM certificates to trust as roots.
    pub fn trust_roots(mut self, roots_pem: impl Into<Bytes>) -> Self {
        self.settings.tls.trust_roots_pem = Some(roots_pem.into());
        self
    }

    /// Reads and stores cookies through `store`.
    pub fn cookie_store<C: CookieStore + 'static>(mut self, store: Arc<C>) -> Self {
        self.settings = self.settings.with_cookie_store(store);
        self
    }

    /// `false` returns 3xx responses instead of following them.
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.settings = self.settings.with_follow_redirects(follow);
        self
    }

    /// `false` stops at redirects that switch between http and https.
    pub fn follow_ssl_redirects(mut self, follow: bool) -> Self {
        self.settings = self.settings.with_follow_ssl_redirects(follow);
        self
    }

    // Pipeline

    /// Retries network failures with the default policy.
    pub fn retry(self) -> Self {
        self.retry_policy(RetryPolicy::default())
    }

    /// Retries network failures up to `max_attempts` in total, `sleep_millis` apart.
    pub fn retry_with(self, max_attempts: u32, sleep_millis: u64) -> Self {
        self.retry_policy(RetryPolicy::new(max_attempts, sleep_millis))
    }

    /// Retries according to `policy`.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Logs everything, bodies included.
    pub fn log(self) -> Self {
        self.log_level(LogLevel::Body)
    }

    /// `LogLevel::None` defers to the context's global logger.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Reports the start and end of the call to `listener`.
    pub fn event_listener(mut self, listener: impl EventListener + 'static) -> Self {
        self.event_listener = Some(Arc::new(listener));
        self
    }

    /// Adds a stage that sees the call once, outside of retries.
    pub fn interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Adds a stage that sees every attempt, right before the client.
    pub fn network_interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.network_interceptors.push(Arc::new(interceptor));
        self
    }

    /// Answers `401` challenges through `authenticator`.
    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Answers `401` challenges with Basic credentials.
    pub fn basic_auth(self, username: &str, password: &str) -> Self {
        self.authenticator(BasicAuthenticator::new(username, password))
    }

    // Execution

    /// Runs the request, blocking until every attempt has finished.
    pub fn execute(self) -> HttpResponse {
        self.prepare().execute()
    }

    /// Runs the request on the caller's runtime.
    pub async fn send(self) -> HttpResponse {
        self.prepare().send().await
    }

    /// Prepares a callback-driven call. Nothing runs until `enqueue`.
    pub fn async_call(self) -> AsyncCall {
        AsyncCall::new(self.prepare())
    }

    /// Freezes the request into a [`Call`] against the context's current transport.
    #[tracing::instrument(skip_all, fields(method = %self.method, url = %self.url))]
    pub fn prepare(self) -> Call {
        let transport = self.context.transport();
        let dispatcher = Arc::clone(self.context.dispatcher());
        let logger = self.logging_stage(self.context.global_logger());
        let stages = self.stages(&transport, logger);

        let HttpRequest {
            method,
            url,
            mut headers,
            body,
            user_agent,
            settings,
            mut error,
            ..
        } = self;

        match header_value(USER_AGENT.as_str(), &user_agent) {
            Ok(value) => {
                headers.insert(USER_AGENT, value);
            }
            Err(e) => {
                error.get_or_insert(e);
            }
        }
        let body = match body {
            Some(body) => body.finalize(&mut headers),
            None => Ok(Finalized::absent(method)),
        };

        let snapshot = RequestSnapshot::new(method, url.clone(), headers.clone());
        let prepared = match error {
            Some(e) => Err(e),
            None => body.and_then(|body| {
                build_request(&transport, &settings, method, url, headers, body)
            }),
        };
        match prepared {
            Ok((client, request)) => Call::ready(dispatcher, snapshot, client, stages, request),
            Err(e) => Call::failed(dispatcher, snapshot, e),
        }
    }

    /// A non-`None` request level wins; otherwise the global logger, if any.
    fn logging_stage(
        &self,
        global: Option<Arc<LoggingInterceptor>>,
    ) -> Option<Arc<LoggingInterceptor>> {
        match self.log_level {
            Some(level) if level != LogLevel::None => Some(Arc::new(LoggingInterceptor::new(level))),
            _ => global,
        }
    }

    /// Pipeline stages, outermost first.
    fn stages(
        &self,
        transport: &Transport,
        logger: Option<Arc<LoggingInterceptor>>,
    ) -> Vec<Arc<dyn Interceptor>> {
        let mut stages: Vec<Arc<dyn Interceptor>> = Vec::new();

        if let Some(listener) = &self.event_listener {
            stages.push(Arc::new(EventListenerInterceptor::new(Arc::clone(listener))));
        }
        stages.extend(transport.interceptors().iter().cloned());
        stages.extend(self.interceptors.iter().cloned());
        if let Some(policy) = &self.retry {
            stages.push(Arc::new(RetryInterceptor::new(policy.clone())));
        }
        if let Some(logger) = logger {
            stages.push(logger);
        }
        if let Some(authenticator) = &self.authenticator {
            stages.push(Arc::new(AuthInterceptor::new(Arc::clone(authenticator))));
        }
        stages.extend(self.network_interceptors.iter().cloned());
        stages
    }
}

fn build_request(
    transport: &Transport,
    overrides: &ClientSettings,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Finalized,
) -> Result<(Client, Request)> {
    let (client, settings) = transport.derive(overrides)?;

    let mut builder = client.request(method.into(), url).headers(headers);
    builder = match body {
        Finalized::None => builder,
        Finalized::Bytes(bytes) => builder.body(bytes),
        Finalized::Multipart(form) => builder.multipart(form),
    };
    if let Some(timeout) = settings.write_timeout() {
        builder = builder.timeout(timeout);
    }
    let request = builder.build()?;
    Ok((client, request))
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::Next;
    use crate::interceptor::test_support::response;
    use async_trait::async_trait;
    use serde_json::json;

    /// Answers every request itself with a fixed status.
    struct Fixed(u16);

    #[async_trait]
    impl Interceptor for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn intercept(&self, _request: Request, _next: Next<'_>) -> Result<reqwest::Response> {
            Ok(response(self.0))
        }
    }

    fn context() -> HttpContext {
        HttpContext::new().with_dispatcher_threads(1)
    }

    #[test]
    fn test_well_formed_urls_construct() {
        let context = context();
        for url in [
            "http://localhost",
            "https://example.com:8443/a/b?c=d#e",
            "http://127.0.0.1:8080/",
            "http://[::1]/",
        ] {
            assert!(context.get(url).is_ok(), "{}", url);
        }
        let parsed: Url = "https://example.com/".parse().unwrap();
        assert!(context.put(&parsed).is_ok());
        assert!(context.put(parsed).is_ok());
        assert!(context.patch(String::from("http://localhost/")).is_ok());
    }

    #[test]
    fn test_malformed_urls_fail_with_invalid_url() {
        let context = context();
        for url in ["", "not a url", "/relative", "ftp://example.com/", "mailto:a@b.c"] {
            match context.post(url) {
                Err(Error::InvalidUrl { method, url: got, .. }) => {
                    assert_eq!(method, Method::Post);
                    assert_eq!(got, url);
                }
                other => panic!("{}: unexpected {:?}", url, other),
            }
        }
    }

    #[test]
    fn test_body_methods_get_empty_body() {
        let context = context();
        for method in [Method::Post, Method::Put, Method::Patch] {
            let call = context.request(method, "http://localhost/").unwrap().prepare();
            assert_eq!(call.request_body(), Some(&b""[..]), "{}", method);
        }
        let call = context.get("http://localhost/").unwrap().prepare();
        assert_eq!(call.request_body(), None);
    }

    #[test]
    fn test_last_body_wins() {
        let call = context()
            .post("http://localhost/")
            .unwrap()
            .form_builder()
            .add("a", 1)
            .build()
            .body_json(&json!({"b": 2}))
            .prepare();

        assert_eq!(call.request_body(), Some(&br#"{"b":2}"#[..]));
        assert_eq!(call.request().headers()["content-type"], "application/json");
    }

    #[test]
    fn test_form_replaces_raw_body() {
        let call = context()
            .post("http://localhost/")
            .unwrap()
            .body_string("raw")
            .form_builder()
            .add("name", "a b")
            .add_map([("x", 1), ("y", 2)])
            .build()
            .prepare();
        assert_eq!(call.request_body(), Some(&b"name=a+b&x=1&y=2"[..]));
    }

    #[test]
    fn test_query_helpers() {
        let request = context()
            .get("http://localhost/search?page=1")
            .unwrap()
            .query("q", "a b&c")
            .query_encoded("raw", "x%20y")
            .query_flag("debug")
            .query_map([("n", 5)]);
        assert_eq!(
            request.url().query(),
            Some("page=1&q=a+b%26c&raw=x%20y&debug&n=5")
        );

        let request = request.query_string("a=1 2&p=100%");
        assert_eq!(request.url().query(), Some("a=1%202&p=100%25"));

        let request = request.query_string_encoded("a=%41");
        assert_eq!(request.url().query(), Some("a=%41"));
    }

    #[test]
    fn test_header_helpers() {
        let request = context()
            .get("http://localhost/")
            .unwrap()
            .add_header("x-a", "1")
            .add_header("x-a", "2")
            .add_headers([("x-b", "3")])
            .set_header("x-b", "4")
            .add_header("x-c", "5")
            .remove_header("x-c")
            .add_cookie("s", "1")
            .add_cookie("t", "2")
            .cache_control("no-cache");

        let values: Vec<_> = request.headers().get_all("x-a").iter().collect();
        assert_eq!(values, ["1", "2"]);
        assert_eq!(request.headers()["x-b"], "4");
        assert!(request.headers().get("x-c").is_none());
        assert_eq!(request.headers()["cookie"], "s=1; t=2");
        assert_eq!(request.headers()["cache-control"], "no-cache");
    }

    #[test]
    fn test_add_cookie_keeps_every_existing_cookie_value() {
        let request = context()
            .get("http://localhost/")
            .unwrap()
            .add_header("cookie", "a=1")
            .add_header("cookie", "b=2")
            .add_cookie("c", "3");

        let values: Vec<_> = request.headers().get_all("cookie").iter().collect();
        assert_eq!(values, ["a=1; b=2; c=3"]);
    }

    #[test]
    fn test_invalid_header_is_reported_at_execution() {
        let response = context()
            .get("http://localhost/")
            .unwrap()
            .add_header("bad name", "x")
            .add_header("x-ok", "bad\nvalue")
            .execute();
        match response.error() {
            Some(Error::InvalidHeader { name, .. }) => assert_eq!(name, "bad name"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_user_agent_is_set() {
        let call = context().get("http://localhost/").unwrap().prepare();
        assert_eq!(call.request().headers()[USER_AGENT], DEFAULT_USER_AGENT);

        let call = context()
            .get("http://localhost/")
            .unwrap()
            .add_header("user-agent", "first")
            .user_agent("reqchain-test")
            .prepare();
        let values: Vec<_> = call.request().headers().get_all(USER_AGENT).iter().collect();
        assert_eq!(values, ["reqchain-test"]);
    }

    #[test]
    fn test_request_log_level_beats_global() {
        let context = context();
        let global = Some(Arc::new(LoggingInterceptor::new(LogLevel::Basic)));

        let request = context.get("http://localhost/").unwrap().log_level(LogLevel::Headers);
        let stage = request.logging_stage(global.clone()).unwrap();
        assert_eq!(stage.level(), LogLevel::Headers);

        let request = context.get("http://localhost/").unwrap().log_level(LogLevel::None);
        let stage = request.logging_stage(global.clone()).unwrap();
        assert_eq!(stage.level(), LogLevel::Basic);

        let request = context.get("http://localhost/").unwrap();
        assert_eq!(request.logging_stage(global).unwrap().level(), LogLevel::Basic);
        assert!(request.logging_stage(None).is_none());
    }

    #[test]
    fn test_pipeline_order() {
        struct Quiet;
        impl EventListener for Quiet {}

        let transport = Transport::builder().interceptor(Fixed(200)).build().unwrap();
        let context = HttpContext::with_transport(transport);
        context.set_global_log(LogLevel::Basic);

        let call = context
            .get("http://localhost/")
            .unwrap()
            .network_interceptor(Fixed(204))
            .basic_auth("u", "p")
            .retry()
            .interceptor(Fixed(201))
            .event_listener(Quiet)
            .prepare();
        assert_eq!(
            call.stage_names(),
            ["events", "fixed", "fixed", "retry", "logging", "auth", "fixed"]
        );
    }

    #[test]
    fn test_transport_swap_after_prepare() {
        let first = Transport::builder().interceptor(Fixed(201)).build().unwrap();
        let second = Transport::builder().interceptor(Fixed(202)).build().unwrap();
        let context = HttpContext::with_transport(first).with_dispatcher_threads(1);

        let call = context.get("http://localhost/").unwrap().prepare();
        context.set_transport(second);

        assert_eq!(call.execute().status().map(|s| s.as_u16()), Some(201));
        let later = context.get("http://localhost/").unwrap().execute();
        assert_eq!(later.status().map(|s| s.as_u16()), Some(202));
    }

    #[test]
    fn test_bad_tls_material_fails_at_execution() {
        let response = context()
            .get("https://localhost/")
            .unwrap()
            .client_identity("not pem")
            .trust_roots("not pem")
            .execute();
        assert!(matches!(response.error(), Some(Error::Config(_))));
        assert!(!response.is_network_error());
    }

    #[test]
    fn test_debug_shows_method_url_and_headers() {
        let request = context()
            .delete("http://localhost/items/1")
            .unwrap()
            .add_header("x-trace", "abc");
        let debug = format!("{:?}", request);
        assert!(debug.contains("Delete"));
        assert!(debug.contains("http://localhost/items/1"));
        assert!(debug.contains("x-trace"));
    }
}
