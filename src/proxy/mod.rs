//! The submission pipeline.
//!
//! A [`Proxy`] is bound to one service. Each [`ProxyCall`] goes through:
//!
//! 1. Request building: the builder is resolved against the endpoint table,
//!    then the cache and retry policies are composed.
//! 2. Cache lookup: a fresh entry is returned as-is. Any entry found, fresh
//!    or expired, is kept as the stale snapshot.
//! 3. Dispatch: the session is opened, then attempts run sequentially
//!    under one shared deadline until the retry policy is satisfied or
//!    attempts run out.
//! 4. Stale fallback: a failed call is answered with the snapshot unless
//!    the caller opted out.
//! 5. Write-back: an accepted response is stored, bounded by the write timeout.
//! 6. Decoding into the caller's type, for [`Proxy::submit_json`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{CacheLookup, CacheOptions, CachePolicy, CacheStore, MemoryStore};
use crate::config::ProxySettings;
use crate::endpoint::EndpointResolver;
use crate::error::{AttemptError, CacheError, ConfigError, ProxyError, TransportError};
use crate::http::{RequestSpec, RequestSpecBuilder, Response, split_address};
use crate::pool::{Channel, PoolRegistry};
use crate::retry::{RetryOptions, RetryPolicy};
use crate::transport::{Http1Transport, RpcTransport};

pub mod dispatch;

pub use dispatch::{Dispatcher, HttpDispatcher, RpcDispatcher, RpcSession};

/// Adjusts the request builder just before it is resolved.
pub type RequestHook = Arc<dyn Fn(RequestSpecBuilder) -> RequestSpecBuilder + Send + Sync>;

/// One logical call: which URL key to hit, with what, and how resiliently.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use outpost::cache::CacheOptions;
/// use outpost::http::{Method, RequestSpec};
/// use outpost::proxy::ProxyCall;
/// use outpost::retry::RetryOptions;
///
/// let call = ProxyCall::new("MobileCheckKYC")
///     .request(RequestSpec::builder().method(Method::Get).form_field("phonenumber", "0771990039"))
///     .cache(CacheOptions::new().namespace("MobileCheckKYC").key("0771990039"))
///     .retry(RetryOptions::new().attempts(2))
///     .timeout(Duration::from_secs(5));
/// assert_eq!(call.url_key(), "MobileCheckKYC");
/// ```
#[derive(Clone, Default)]
pub struct ProxyCall {
    url_key: String,
    request: RequestSpecBuilder,
    cache: Option<CacheOptions>,
    retry: Option<RetryOptions>,
    request_hook: Option<RequestHook>,
}

impl ProxyCall {
    pub fn new(url_key: impl Into<String>) -> Self {
        Self {
            url_key: url_key.into(),
            ..Self::default()
        }
    }

    pub fn url_key(&self) -> &str {
        &self.url_key
    }

    #[must_use]
    pub fn request(mut self, request: RequestSpecBuilder) -> Self {
        self.request = request;
        self
    }

    /// Enables caching. Without this the call never reads or writes the cache.
    #[must_use]
    pub fn cache(mut self, options: CacheOptions) -> Self {
        self.cache = Some(options);
        self
    }

    /// Enables retry. Without this the call is attempted exactly once.
    #[must_use]
    pub fn retry(mut self, options: RetryOptions) -> Self {
        self.retry = Some(options);
        self
    }

    /// Deadline shared by every attempt of the call.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request = self.request.timeout(timeout);
        self
    }

    #[must_use]
    pub fn request_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(RequestSpecBuilder) -> RequestSpecBuilder + Send + Sync + 'static,
    {
        self.request_hook = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ProxyCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCall")
            .field("url_key", &self.url_key)
            .field("request", &self.request)
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .field("request_hook", &self.request_hook.is_some())
            .finish()
    }
}

/// A resilient client for one service.
///
/// Holds no locks of its own; share it behind an `Arc` and call it from as
/// many tasks as needed.
pub struct Proxy<D: Dispatcher> {
    service: String,
    resolver: Arc<dyn EndpointResolver>,
    dispatcher: D,
    settings: ProxySettings,
    default_store: Arc<dyn CacheStore>,
    sweeper: Option<JoinHandle<()>>,
}

impl<D: Dispatcher> Proxy<D> {
    /// Binds `dispatcher` to `service`.
    ///
    /// The in-process store used by calls that name no store is created here.
    /// Its sweeper only starts when this runs inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if the service name is blank, the resolver has no
    /// domain for it, or `settings` are invalid.
    pub fn new(
        service: impl Into<String>,
        resolver: Arc<dyn EndpointResolver>,
        dispatcher: D,
        settings: ProxySettings,
    ) -> Result<Self, ConfigError> {
        let service = service.into();
        if service.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }
        if resolver.domain(&service).is_none() {
            return Err(ConfigError::UnknownService(service));
        }
        settings.validate()?;

        let store = Arc::new(MemoryStore::with_retention(settings.cache.stale_retention()));
        let sweeper = match (
            settings.cache.sweep_interval(),
            tokio::runtime::Handle::try_current(),
        ) {
            (Some(interval), Ok(_)) => Some(store.spawn_sweeper(interval)),
            _ => None,
        };

        Ok(Self {
            service,
            resolver,
            dispatcher,
            settings,
            default_store: store,
            sweeper,
        })
    }

    /// Replaces the store used by calls that name none.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        self.default_store = store;
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Runs `call` and returns its response.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::Config`] if the request cannot be resolved.
    /// - The final attempt's error (transport, pool, status or a rejected
    ///   retry condition) when no stale snapshot could stand in for it.
    pub async fn submit(&self, call: ProxyCall) -> Result<Response, ProxyError> {
        let (response, ()) = self.execute(call, |_| Ok(())).await?;
        Ok(response)
    }

    /// Runs `call` and decodes the JSON body into `T`.
    ///
    /// A fresh cache entry that does not decode is ignored and the call goes
    /// to the transport; the entry still serves as the stale snapshot.
    ///
    /// # Errors
    ///
    /// Everything [`submit`](Self::submit) returns, plus [`ProxyError::Decode`]
    /// when the final body (live or stale) does not decode.
    pub async fn submit_json<T: DeserializeOwned>(&self, call: ProxyCall) -> Result<(Response, T), ProxyError> {
        self.execute(call, |body| serde_json::from_str::<T>(body)).await
    }

    async fn execute<T, F>(&self, call: ProxyCall, decode: F) -> Result<(Response, T), ProxyError>
    where
        F: Fn(&str) -> Result<T, serde_json::Error> + Send + Sync,
    {
        let ProxyCall {
            url_key,
            request,
            cache,
            retry,
            request_hook,
        } = call;

        let builder = match &request_hook {
            Some(hook) => hook(request),
            None => request,
        };
        let spec = builder
            .resolve(self.resolver.as_ref(), &self.service, &url_key)?
            .with_default_timeout(self.dispatcher.default_timeout());
        let spec = Arc::new(spec);

        let cache = self.cache_policy(cache, &url_key, &spec);
        let retry = retry
            .map(|options| RetryPolicy::compose(options, &self.settings.retry))
            .unwrap_or_else(RetryPolicy::single);

        let mut snapshot = None;
        if let Some(policy) = &cache {
            match self.lookup(policy).await {
                CacheLookup::Fresh(body) => match decode(&body) {
                    Ok(value) => {
                        debug!(namespace = policy.namespace(), key = policy.key(), "cache hit");
                        return Ok((Response::cached(Arc::clone(&spec), body), value));
                    }
                    Err(e) => {
                        debug!(
                            namespace = policy.namespace(),
                            key = policy.key(),
                            error = %e,
                            "cached body does not decode, treating as miss"
                        );
                        snapshot = Some(body);
                    }
                },
                CacheLookup::Expired(body) => {
                    debug!(namespace = policy.namespace(), key = policy.key(), "cache entry expired");
                    snapshot = Some(body);
                }
                CacheLookup::Miss => {
                    debug!(namespace = policy.namespace(), key = policy.key(), "cache miss");
                }
            }
        }

        let started = Instant::now();
        // `None` also covers a timeout too large to place on the clock.
        let deadline = spec.timeout().and_then(|timeout| started.checked_add(timeout));
        let opened = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.dispatcher.open(&spec))
                .await
                .map_err(|_| started.elapsed()),
            None => Ok(self.dispatcher.open(&spec).await),
        };
        let mut response = match opened {
            Ok(Ok(session)) => self.dispatch(&session, &spec, &retry, started, deadline).await,
            Ok(Err(ProxyError::Pool(err))) => {
                warn!(service = %self.service, address = spec.address(), error = %err, "could not open session");
                Response::failed(Arc::clone(&spec), err)
            }
            Ok(Err(err)) => return Err(err),
            Err(elapsed) => {
                warn!(service = %self.service, address = spec.address(), ?elapsed, "deadline passed while opening session");
                Response::failed(Arc::clone(&spec), TransportError::DeadlineExceeded { elapsed })
            }
        };
        response.set_elapsed(started.elapsed());

        if !response.is_success() {
            let stale = match (&cache, snapshot) {
                (Some(policy), Some(body)) if policy.allows_stale() && !body.is_empty() => Some(body),
                _ => None,
            };
            if let Some(body) = stale {
                let value = decode(&body)?;
                warn!(
                    service = %self.service,
                    address = spec.address(),
                    error = ?response.error(),
                    "call failed, serving stale cached body"
                );
                response.recover_from_stale(body);
                return Ok((response, value));
            }

            let err = response
                .error()
                .cloned()
                .unwrap_or(AttemptError::Status(response.status()));
            warn!(
                service = %self.service,
                address = spec.address(),
                elapsed = ?response.elapsed(),
                error = %err,
                "call failed"
            );
            return Err(err.into());
        }

        if let Some(policy) = &cache {
            if policy.accepts(&response) {
                match self.write_back(policy, response.body()).await {
                    Ok(()) => debug!(
                        namespace = policy.namespace(),
                        key = policy.key(),
                        ttl = ?policy.ttl(),
                        "cached response"
                    ),
                    Err(e) => warn!(namespace = policy.namespace(), key = policy.key(), error = %e, "cache write failed"),
                }
            } else {
                debug!(namespace = policy.namespace(), key = policy.key(), "response not cacheable");
            }
        }

        let value = decode(response.body())?;
        Ok((response, value))
    }

    fn cache_policy(&self, options: Option<CacheOptions>, url_key: &str, spec: &RequestSpec) -> Option<CachePolicy> {
        let policy = CachePolicy::compose(
            options?,
            &self.settings.cache,
            url_key,
            spec.method(),
            Some(Arc::clone(&self.default_store)),
        );
        if !policy.is_active() {
            debug!(?policy, "cache options incomplete, caching disabled");
            return None;
        }
        if spec.payload().has_files() {
            debug!(address = spec.address(), "uploads bypass the cache");
            return None;
        }
        Some(policy)
    }

    async fn lookup(&self, policy: &CachePolicy) -> CacheLookup {
        let Some(store) = policy.store() else {
            return CacheLookup::Miss;
        };
        match store.get(policy.namespace(), policy.key()).await {
            Ok(CacheLookup::Fresh(body)) if body.is_empty() => CacheLookup::Miss,
            Ok(CacheLookup::Expired(body)) if body.is_empty() => CacheLookup::Miss,
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(namespace = policy.namespace(), key = policy.key(), error = %e, "cache read failed");
                CacheLookup::Miss
            }
        }
    }

    /// Stores `body` under the policy's key, giving up after `cache.write_timeout_ms`.
    async fn write_back(&self, policy: &CachePolicy, body: &str) -> Result<(), CacheError> {
        let Some(store) = policy.store() else {
            return Ok(());
        };
        let limit = self.settings.cache.write_timeout();
        let write = store.set(policy.namespace(), policy.key(), body.to_owned(), policy.ttl());
        match tokio::time::timeout(limit, write).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(limit)),
        }
    }

    async fn dispatch(
        &self,
        session: &D::Session,
        spec: &Arc<RequestSpec>,
        retry: &RetryPolicy,
        started: Instant,
        deadline: Option<Instant>,
    ) -> Response {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.dispatcher.attempt(session, spec))
                    .await
                    .unwrap_or_else(|_| {
                        Err(TransportError::DeadlineExceeded {
                            elapsed: started.elapsed(),
                        })
                    }),
                None => self.dispatcher.attempt(session, spec).await,
            };
            let mut response = match outcome {
                Ok((status, body)) => Response::new(Arc::clone(spec), status, body),
                Err(err) => Response::failed(Arc::clone(spec), err),
            };

            let err = match retry.evaluate(&response) {
                Ok(()) => return response,
                Err(err) => err,
            };
            response.set_error(err.clone());

            if attempt >= retry.attempts() {
                if retry.attempts() > 1 {
                    debug!(attempts = attempt, error = %err, "retries exhausted");
                }
                return response;
            }
            if matches!(err, AttemptError::Transport(TransportError::DeadlineExceeded { .. })) {
                return response;
            }
            let delay = retry.delay_for(attempt);
            if let Some(deadline) = deadline {
                if Instant::now().checked_add(delay).is_none_or(|wake| wake >= deadline) {
                    debug!(attempt, ?delay, "no time left for another attempt");
                    return response;
                }
            }
            debug!(attempt, max = retry.attempts(), error = %err, ?delay, "retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

impl Proxy<HttpDispatcher> {
    /// A proxy that talks plain HTTP/1.1 through [`Http1Transport`].
    ///
    /// # Errors
    ///
    /// See [`Proxy::new`].
    pub fn http(
        service: impl Into<String>,
        resolver: Arc<dyn EndpointResolver>,
        settings: ProxySettings,
    ) -> Result<Self, ConfigError> {
        Self::new(
            service,
            resolver,
            HttpDispatcher::new(Arc::new(Http1Transport::new())),
            settings,
        )
    }
}

impl<C: Channel> Proxy<RpcDispatcher<C>> {
    /// A proxy that invokes RPC methods over channels pooled in `registry`.
    ///
    /// The pool for the service's own domain is created up front.
    ///
    /// # Errors
    ///
    /// [`ProxyError::Config`] as for [`Proxy::new`], or [`ProxyError::Pool`]
    /// if the service's domain is not a usable destination.
    pub fn rpc(
        service: impl Into<String>,
        resolver: Arc<dyn EndpointResolver>,
        registry: Arc<PoolRegistry<C>>,
        transport: Arc<dyn RpcTransport<C>>,
        settings: ProxySettings,
    ) -> Result<Self, ProxyError> {
        let dispatcher = RpcDispatcher::new(registry, transport).timeout(settings.rpc_timeout());
        let proxy = Self::new(service, resolver, dispatcher, settings)?;

        let domain = proxy.resolver.domain(&proxy.service).unwrap_or_default().trim();
        let destination = if domain.is_empty() {
            String::new()
        } else {
            split_address(domain)?.0
        };
        proxy
            .dispatcher
            .registry()
            .get_pool(&destination, proxy.dispatcher.config())?;
        Ok(proxy)
    }
}

impl<D: Dispatcher> Drop for Proxy<D> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl<D: Dispatcher> fmt::Debug for Proxy<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("service", &self.service)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
