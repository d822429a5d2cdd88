use bytes::Bytes;
use log::warn;
use reqwest::{Certificate, ClientBuilder, Identity};

use crate::error::{Error, Result};

/// Client identity and trust roots, both PEM encoded.
///
/// The two are only used as a pair: an identity without trust roots (or the reverse) is
/// ignored and the client keeps the default trust configuration.
#[derive(Clone, Default)]
pub struct TlsMaterial {
    pub(crate) identity_pem: Option<Bytes>,
    pub(crate) trust_roots_pem: Option<Bytes>,
}

impl TlsMaterial {
    pub fn new(identity_pem: impl Into<Bytes>, trust_roots_pem: impl Into<Bytes>) -> Self {
        Self {
            identity_pem: Some(identity_pem.into()),
            trust_roots_pem: Some(trust_roots_pem.into()),
        }
    }

    /// Identity and trust roots, when both are present.
    pub fn paired(&self) -> Option<(&[u8], &[u8])> {
        match (&self.identity_pem, &self.trust_roots_pem) {
            (Some(identity), Some(roots)) => Some((identity.as_ref(), roots.as_ref())),
            _ => None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.identity_pem.is_none() && self.trust_roots_pem.is_none()
    }

    /// A complete override pair replaces the base material; anything else keeps it.
    pub(crate) fn overlay(&self, other: &TlsMaterial) -> TlsMaterial {
        if other.paired().is_some() {
            return other.clone();
        }
        if !other.is_empty() {
            warn!("tls: identity and trust roots must be set together, ignoring partial override");
        }
        self.clone()
    }

    pub(crate) fn apply(&self, builder: ClientBuilder) -> Result<ClientBuilder> {
        let Some((identity, roots)) = self.paired() else {
            return Ok(builder);
        };

        let identity = Identity::from_pem(identity).map_err(Error::Config)?;
        let roots = Certificate::from_pem_bundle(roots).map_err(Error::Config)?;

        let mut builder = builder.identity(identity).tls_built_in_root_certs(false);
        for root in roots {
            builder = builder.add_root_certificate(root);
        }
        Ok(builder)
    }
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("identity", &self.identity_pem.is_some())
            .field("trust_roots", &self.trust_roots_pem.is_some())
            .finish()
    }
}
