//! # outpost
//!
//! A resilient outbound-request pipeline. A [`Proxy`] resolves a logical
//! call (service + URL key) to an address, dispatches it over HTTP or over a
//! pooled RPC channel, and applies read-through caching with stale-data
//! fallback, composable retry, and per-destination connection pooling.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use outpost::cache::CacheOptions;
//! use outpost::config::ProxySettings;
//! use outpost::endpoint::{EndpointTable, ServiceEndpoint};
//! use outpost::http::{Method, RequestSpec};
//! use outpost::proxy::{Proxy, ProxyCall};
//! use outpost::retry::RetryOptions;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoints = EndpointTable::new().with_service(
//!         "members",
//!         ServiceEndpoint::new("http://members.internal").url("MobileCheckKYC", "/api/kyc/check"),
//!     );
//!     let proxy = Proxy::http("members", Arc::new(endpoints), ProxySettings::default())?;
//!
//!     let call = ProxyCall::new("MobileCheckKYC")
//!         .request(RequestSpec::builder().method(Method::Get).form_field("phonenumber", "0771990039"))
//!         .cache(
//!             CacheOptions::new()
//!                 .namespace("MobileCheckKYC")
//!                 .key("0771990039")
//!                 .ttl(Duration::from_secs(24 * 60 * 60)),
//!         )
//!         .retry(RetryOptions::new().attempts(3))
//!         .timeout(Duration::from_secs(5));
//!
//!     let response = proxy.submit(call).await?;
//!     println!("{} (from cache: {})", response.body(), response.from_cache());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod pool;
pub mod proxy;
pub mod retry;
pub mod transport;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheLookup, CacheOptions, CacheStore, MemoryStore};
pub use config::ProxySettings;
pub use error::{AttemptError, CacheError, ConfigError, PoolError, ProxyError, TransportError};
pub use http::{Method, RequestSpec, Response, StatusCode};
pub use pool::{Channel, ChannelState, Connector, PoolConfig, PoolRegistry};
pub use proxy::{Proxy, ProxyCall};
pub use retry::{Backoff, RetryOptions};
