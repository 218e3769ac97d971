//! Per-call cache options and their composition with proxy defaults.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::CacheStore;
use crate::config::CacheSettings;
use crate::http::{Method, Response};

/// Decides whether a response may be written to the cache.
pub type CacheCheck = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// The safety baseline every cache write must pass: no error, `200 OK`,
/// and a non-empty body. Always evaluated first.
pub fn baseline_cache_check(response: &Response) -> bool {
    response.error().is_none() && response.status().is_ok() && !response.body().is_empty()
}

/// Caller-supplied cache settings for one call.
///
/// Anything left unset is filled in by [`CachePolicy::compose`]. A call
/// without a key never caches.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use outpost::cache::CacheOptions;
///
/// let options = CacheOptions::new()
///     .namespace("MobileCheckKYC")
///     .key("0771990039")
///     .ttl(Duration::from_secs(24 * 60 * 60))
///     .check(|response| response.body().contains("FirstName"));
/// ```
#[derive(Clone, Default)]
pub struct CacheOptions {
    namespace: Option<String>,
    key: Option<String>,
    ttl: Option<Duration>,
    checks: Vec<CacheCheck>,
    dont_use_expired: bool,
    store: Option<Arc<dyn CacheStore>>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Adds a condition a response must meet, on top of the baseline, to be cached.
    #[must_use]
    pub fn check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.checks.push(Arc::new(check));
        self
    }

    /// Surface failures instead of falling back to a previously cached body.
    #[must_use]
    pub fn dont_use_expired(mut self, dont: bool) -> Self {
        self.dont_use_expired = dont;
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("namespace", &self.namespace)
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("checks", &self.checks.len())
            .field("dont_use_expired", &self.dont_use_expired)
            .field("store", &self.store.is_some())
            .finish()
    }
}

/// The effective cache policy of one call.
#[derive(Clone)]
pub struct CachePolicy {
    namespace: String,
    key: String,
    ttl: Duration,
    checks: Vec<CacheCheck>,
    allow_stale: bool,
    store: Option<Arc<dyn CacheStore>>,
}

impl CachePolicy {
    /// Fills in defaults and chains the baseline ahead of the caller's checks.
    ///
    /// - TTL: the caller's, else `settings.ttl()`; a zero TTL counts as unset.
    /// - Namespace: the caller's, else `"<url_key>_<METHOD>"`.
    /// - Store: the caller's, else `default_store`.
    pub fn compose(
        options: CacheOptions,
        settings: &CacheSettings,
        url_key: &str,
        method: &Method,
        default_store: Option<Arc<dyn CacheStore>>,
    ) -> Self {
        let ttl = options
            .ttl
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or_else(|| settings.ttl());
        let namespace = options
            .namespace
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| format!("{url_key}_{method}"));

        let mut checks: Vec<CacheCheck> = Vec::with_capacity(options.checks.len() + 1);
        checks.push(Arc::new(baseline_cache_check));
        checks.extend(options.checks);

        Self {
            namespace,
            key: options.key.unwrap_or_default(),
            ttl,
            checks,
            allow_stale: !options.dont_use_expired,
            store: options.store.or(default_store),
        }
    }

    /// Caching runs only when every part of the policy is present.
    pub fn is_active(&self) -> bool {
        !self.namespace.is_empty()
            && !self.key.is_empty()
            && !self.ttl.is_zero()
            && !self.checks.is_empty()
            && self.store.is_some()
    }

    /// `true` only if every check passes. Stops at the first failure.
    pub fn accepts(&self, response: &Response) -> bool {
        self.checks.iter().all(|check| check(response))
    }

    /// Whether a cached body may stand in for a failed call.
    pub fn allows_stale(&self) -> bool {
        self.allow_stale
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn store(&self) -> Option<&Arc<dyn CacheStore>> {
        self.store.as_ref()
    }
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("namespace", &self.namespace)
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("checks", &self.checks.len())
            .field("allow_stale", &self.allow_stale)
            .field("store", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::http::{RequestSpec, StatusCode};

    fn store() -> Option<Arc<dyn CacheStore>> {
        Some(Arc::new(MemoryStore::new()))
    }

    fn response(status: StatusCode, body: &str) -> Response {
        let request = RequestSpec::builder().address("http://a/b").build().unwrap();
        Response::new(request, status, body)
    }

    #[test]
    fn defaults_fill_namespace_and_ttl() {
        let policy = CachePolicy::compose(
            CacheOptions::new().key("42"),
            &CacheSettings::default(),
            "GetProfile",
            &Method::Post,
            store(),
        );
        assert_eq!(policy.namespace(), "GetProfile_POST");
        assert_eq!(policy.ttl(), Duration::from_secs(3600));
        assert!(policy.allows_stale());
        assert!(policy.is_active());
    }

    #[test]
    fn zero_ttl_falls_back_to_default() {
        let policy = CachePolicy::compose(
            CacheOptions::new().key("42").ttl(Duration::ZERO),
            &CacheSettings::default(),
            "k",
            &Method::Get,
            store(),
        );
        assert_eq!(policy.ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn missing_key_or_store_disables_caching() {
        let settings = CacheSettings::default();
        let no_key = CachePolicy::compose(CacheOptions::new(), &settings, "k", &Method::Get, store());
        assert!(!no_key.is_active());

        let no_store =
            CachePolicy::compose(CacheOptions::new().key("1"), &settings, "k", &Method::Get, None);
        assert!(!no_store.is_active());
    }

    #[test]
    fn caller_check_cannot_override_baseline() {
        let policy = CachePolicy::compose(
            CacheOptions::new().key("1").check(|_| true),
            &CacheSettings::default(),
            "k",
            &Method::Get,
            store(),
        );
        assert!(!policy.accepts(&response(StatusCode::INTERNAL_SERVER_ERROR, "oops")));
        assert!(!policy.accepts(&response(StatusCode::OK, "")));
        assert!(policy.accepts(&response(StatusCode::OK, "{}")));
    }

    #[test]
    fn every_caller_check_must_pass() {
        let policy = CachePolicy::compose(
            CacheOptions::new()
                .key("1")
                .check(|r| r.body().contains("Data"))
                .check(|r| r.body().contains("FirstName")),
            &CacheSettings::default(),
            "k",
            &Method::Get,
            store(),
        );
        assert!(!policy.accepts(&response(StatusCode::OK, r#"{"Data":{}}"#)));
        assert!(policy.accepts(&response(StatusCode::OK, r#"{"Data":{"FirstName":"A"}}"#)));
    }
}
