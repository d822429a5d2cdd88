//! Shared default transport and per-request client derivation.
//!
//! A [`Transport`] pairs a ready `reqwest::Client` with the [`ClientSettings`] it was built
//! from. Requests carry their own `ClientSettings` holding only the values they override; at
//! execution the overrides are laid over a copy of the transport's settings and, when any
//! client-level value changed, a fresh client is built from the result. The transport
//! itself is never modified.

mod proxy;
mod redirect;
mod tls;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use reqwest::{Client, Url};

use crate::error::{Error, Result};
use crate::interceptor::Interceptor;

pub use proxy::{ProxyCredentials, ProxySelector, ProxySettings};
pub use redirect::MAX_REDIRECTS;
pub use tls::TlsMaterial;

/// Client configuration values. Unset fields inherit from whatever they are laid over.
#[derive(Clone, Default)]
pub struct ClientSettings {
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
    pub(crate) proxy: ProxySettings,
    pub(crate) proxy_credentials: Option<ProxyCredentials>,
    pub(crate) hostname_verification: Option<bool>,
    pub(crate) accept_invalid_certs: Option<bool>,
    pub(crate) tls: TlsMaterial,
    pub(crate) cookie_store: Option<Arc<dyn CookieStore>>,
    pub(crate) follow_redirects: Option<bool>,
    pub(crate) follow_ssl_redirects: Option<bool>,
}

impl ClientSettings {
    /// Returns a copy of `self` with every value set in `overrides` replaced.
    pub fn overlay(&self, overrides: &ClientSettings) -> ClientSettings {
        ClientSettings {
            connect_timeout: overrides.connect_timeout.or(self.connect_timeout),
            read_timeout: overrides.read_timeout.or(self.read_timeout),
            write_timeout: overrides.write_timeout.or(self.write_timeout),
            proxy: self.proxy.overlay(&overrides.proxy),
            proxy_credentials: overrides
                .proxy_credentials
                .clone()
                .or_else(|| self.proxy_credentials.clone()),
            hostname_verification: overrides
                .hostname_verification
                .or(self.hostname_verification),
            accept_invalid_certs: overrides.accept_invalid_certs.or(self.accept_invalid_certs),
            tls: self.tls.overlay(&overrides.tls),
            cookie_store: overrides
                .cookie_store
                .clone()
                .or_else(|| self.cookie_store.clone()),
            follow_redirects: overrides.follow_redirects.or(self.follow_redirects),
            follow_ssl_redirects: overrides.follow_ssl_redirects.or(self.follow_ssl_redirects),
        }
    }

    /// True if any value that lives in the `reqwest::Client` is set.
    ///
    /// The write timeout is applied per request and does not count.
    pub fn has_client_values(&self) -> bool {
        self.connect_timeout.is_some()
            || self.read_timeout.is_some()
            || !self.proxy.is_empty()
            || self.proxy_credentials.is_some()
            || self.hostname_verification.is_some()
            || self.accept_invalid_certs.is_some()
            || self.tls.paired().is_some()
            || self.cookie_store.is_some()
            || self.follow_redirects.is_some()
            || self.follow_ssl_redirects.is_some()
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Deadline for a whole attempt. reqwest has no separate write phase, so the value
    /// becomes the request timeout.
    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects.unwrap_or(true)
    }

    pub fn follow_ssl_redirects(&self) -> bool {
        self.follow_ssl_redirects.unwrap_or(true)
    }

    /// Builds a client from these settings.
    pub(crate) fn build_client(&self) -> Result<Client> {
        let mut builder = Client::builder();

        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = self.read_timeout {
            builder = builder.read_timeout(timeout);
        }
        for proxy in self.proxy.to_proxies(self.proxy_credentials.as_ref())? {
            builder = builder.proxy(proxy);
        }
        if self.hostname_verification == Some(false) {
            builder = builder.danger_accept_invalid_hostnames(true);
        }
        if self.accept_invalid_certs == Some(true) {
            builder = builder.danger_accept_invalid_certs(true);
        }
        builder = self.tls.apply(builder)?;
        if let Some(store) = &self.cookie_store {
            builder = builder.cookie_provider(Arc::new(SharedCookieStore(Arc::clone(store))));
        }
        builder = builder.redirect(redirect::policy(
            self.follow_redirects(),
            self.follow_ssl_redirects(),
        ));

        builder.build().map_err(Error::Config)
    }

    // Chainable setters, used by `TransportBuilder`.

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn with_proxy(mut self, proxy: Url) -> Self {
        self.proxy.address = Some(proxy);
        self
    }

    pub fn with_proxy_selector(mut self, selector: ProxySelector) -> Self {
        self.proxy.selector = Some(selector);
        self
    }

    pub fn with_proxy_credentials(mut self, credentials: ProxyCredentials) -> Self {
        self.proxy_credentials = Some(credentials);
        self
    }

    pub fn with_hostname_verification(mut self, enabled: bool) -> Self {
        self.hostname_verification = Some(enabled);
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = Some(accept);
        self
    }

    pub fn with_tls(mut self, material: TlsMaterial) -> Self {
        self.tls = material;
        self
    }

    pub fn with_cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
        self.cookie_store = Some(store);
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = Some(follow);
        self
    }

    pub fn with_follow_ssl_redirects(mut self, follow: bool) -> Self {
        self.follow_ssl_redirects = Some(follow);
        self
    }
}

impl fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSettings")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("proxy", &self.proxy)
            .field("proxy_credentials", &self.proxy_credentials)
            .field("hostname_verification", &self.hostname_verification)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("tls", &self.tls)
            .field("cookie_store", &self.cookie_store.is_some())
            .field("follow_redirects", &self.follow_redirects)
            .field("follow_ssl_redirects", &self.follow_ssl_redirects)
            .finish()
    }
}

/// Lets a shared trait object stand in where reqwest wants a concrete store.
struct SharedCookieStore(Arc<dyn CookieStore>);

impl CookieStore for SharedCookieStore {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.0.set_cookies(cookie_headers, url)
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.0.cookies(url)
    }
}

/// The default HTTP engine requests run on, plus the interceptors every call gets.
#[derive(Clone)]
pub struct Transport {
    settings: ClientSettings,
    client: Client,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Transport {
    pub fn builder() -> TransportBuilder {
        TransportBuilder::default()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    /// Returns the client and effective settings for a request carrying `overrides`.
    pub(crate) fn derive(&self, overrides: &ClientSettings) -> Result<(Client, ClientSettings)> {
        let settings = self.settings.overlay(overrides);
        if !overrides.has_client_values() {
            return Ok((self.client.clone(), settings));
        }
        debug!("transport: building per-request client for {:?}", overrides);
        let client = settings.build_client()?;
        Ok((client, settings))
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            settings: ClientSettings::default(),
            client: Client::new(),
            interceptors: Vec::new(),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.interceptors.iter().map(|i| i.name()).collect();
        f.debug_struct("Transport")
            .field("settings", &self.settings)
            .field("interceptors", &names)
            .finish()
    }
}

/// Builds a [`Transport`].
#[derive(Default)]
pub struct TransportBuilder {
    settings: ClientSettings,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl TransportBuilder {
    pub fn settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.settings = self.settings.with_connect_timeout(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.settings = self.settings.with_read_timeout(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.settings = self.settings.with_write_timeout(timeout);
        self
    }

    pub fn proxy(mut self, proxy: Url) -> Self {
        self.settings = self.settings.with_proxy(proxy);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.settings = self.settings.with_follow_redirects(follow);
        self
    }

    pub fn follow_ssl_redirects(mut self, follow: bool) -> Self {
        self.settings = self.settings.with_follow_ssl_redirects(follow);
        self
    }

    /// Adds a stage that runs for every call on this transport, ahead of per-request stages.
    pub fn interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn build(self) -> Result<Transport> {
        let client = self.settings.build_client()?;
        Ok(Transport {
            settings: self.settings,
            client,
            interceptors: self.interceptors,
        })
    }
}
