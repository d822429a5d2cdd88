use std::fmt;
use std::sync::Arc;

use reqwest::{Proxy, Url};

use crate::error::{Error, Result};

/// Chooses a proxy per target URL; `None` means connect directly.
pub type ProxySelector = Arc<dyn Fn(&Url) -> Option<Url> + Send + Sync>;

/// Username and password presented to the proxy.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Proxy routing for a client. A fixed address wins over a selector.
#[derive(Clone, Default)]
pub struct ProxySettings {
    pub(crate) address: Option<Url>,
    pub(crate) selector: Option<ProxySelector>,
}

impl ProxySettings {
    pub(crate) fn is_empty(&self) -> bool {
        self.address.is_none() && self.selector.is_none()
    }

    pub(crate) fn overlay(&self, other: &ProxySettings) -> ProxySettings {
        ProxySettings {
            address: other.address.clone().or_else(|| self.address.clone()),
            selector: other.selector.clone().or_else(|| self.selector.clone()),
        }
    }

    /// Converts the settings to reqwest proxies, in match order.
    pub(crate) fn to_proxies(&self, credentials: Option<&ProxyCredentials>) -> Result<Vec<Proxy>> {
        let mut proxies = Vec::new();

        if let Some(address) = &self.address {
            proxies.push(Proxy::all(address.clone()).map_err(Error::Config)?);
        }
        if let Some(selector) = &self.selector {
            let selector = Arc::clone(selector);
            proxies.push(Proxy::custom(move |url| selector(url)));
        }

        if let Some(credentials) = credentials {
            proxies = proxies
                .into_iter()
                .map(|proxy| proxy.basic_auth(&credentials.username, &credentials.password))
                .collect();
        }
        Ok(proxies)
    }
}

impl fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySettings")
            .field("address", &self.address.as_ref().map(Url::as_str))
            .field("selector", &self.selector.is_some())
            .finish()
    }
}
