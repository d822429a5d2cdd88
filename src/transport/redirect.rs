use reqwest::Url;
use reqwest::redirect::Policy;

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 10;

#[derive(Debug, thiserror::Error)]
#[error("too many redirects ({0})")]
struct TooManyRedirects(usize);

/// True when following `next` would switch between http and https.
pub(crate) fn crosses_scheme(previous: &[Url], next: &Url) -> bool {
    previous
        .last()
        .is_some_and(|prev| prev.scheme() != next.scheme())
}

/// Builds the client redirect policy from the two redirect flags.
pub(crate) fn policy(follow_redirects: bool, follow_ssl_redirects: bool) -> Policy {
    if !follow_redirects {
        return Policy::none();
    }
    if follow_ssl_redirects {
        return Policy::limited(MAX_REDIRECTS);
    }
    Policy::custom(|attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            let hops = attempt.previous().len();
            return attempt.error(TooManyRedirects(hops));
        }
        if crosses_scheme(attempt.previous(), attempt.url()) {
            attempt.stop()
        } else {
            attempt.follow()
        }
    })
}
