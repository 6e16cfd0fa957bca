//! Cookie jar collaborator interface.

use http::Uri;

/// External cookie store consulted by the engine.
///
/// The engine injects `Cookie` headers when dispatching a request and feeds
/// `Set-Cookie` response headers back; storage, matching and expiry policy
/// all belong to the implementation.
pub trait CookieJar: Send + Sync {
    /// Cookie pairs (`name=value`) applicable to `url`, in send order.
    fn cookies_for_url(&self, url: &Uri) -> Vec<String>;

    /// Records `Set-Cookie` header values received from `url`. Returns
    /// `true` when at least one cookie was accepted.
    fn set_cookies_from_url(&self, cookies: &[String], url: &Uri) -> bool;
}
