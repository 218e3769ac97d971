//! Shared pools of long-lived channels, one per destination.
//!
//! - [`Channel`] is the handle a transport invokes over; it reports its
//!   liveness as a [`ChannelState`].
//! - [`Connector`] dials new channels.
//! - [`ConnectionPool`] bounds how many channels a destination may have and
//!   lends them out as [`Lease`]s that check themselves back in on drop.
//! - [`PoolRegistry`] owns the pools and guarantees one per destination.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PoolError;
use crate::transport::BoxFuture;

pub mod connection_pool;
pub mod registry;

pub use connection_pool::{ConnectionPool, Lease, PoolStats};
pub use registry::PoolRegistry;

/// Liveness state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl ChannelState {
    /// `Idle`, `Connecting` and `Ready` channels can carry calls.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Idle | Self::Connecting | Self::Ready)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::TransientFailure => "transient-failure",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persistent channel to one destination.
pub trait Channel: Send + Sync + 'static {
    fn state(&self) -> ChannelState;

    /// Releases the channel's resources. Called at most once per channel.
    fn close(&self) {}
}

/// Transport security used when dialing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    Insecure,
    Tls {
        /// Overrides the name verified against the server certificate.
        server_name: Option<String>,
    },
}

/// Dials new channels for a pool.
pub trait Connector<C>: Send + Sync {
    fn connect<'a>(
        &'a self,
        destination: &'a str,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<C, PoolError>>;
}

pub type HealthCheck<C> = Arc<dyn Fn(&C) -> bool + Send + Sync>;
pub type CloseFn<C> = Arc<dyn Fn(&C) + Send + Sync>;

/// Per-pool overrides. Anything unset comes from the registry's defaults.
///
/// Credentials are explicit: `None` means the connector dials with
/// [`Credentials::Insecure`].
pub struct PoolConfig<C> {
    pub(crate) health_check: Option<HealthCheck<C>>,
    pub(crate) close: Option<CloseFn<C>>,
    pub(crate) max_size: Option<usize>,
    pub(crate) max_idle: Option<Duration>,
    pub(crate) acquire_timeout: Option<Duration>,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) connector: Option<Arc<dyn Connector<C>>>,
}

impl<C> Default for PoolConfig<C> {
    fn default() -> Self {
        Self {
            health_check: None,
            close: None,
            max_size: None,
            max_idle: None,
            acquire_timeout: None,
            credentials: None,
            connector: None,
        }
    }
}

impl<C> Clone for PoolConfig<C> {
    fn clone(&self) -> Self {
        Self {
            health_check: self.health_check.clone(),
            close: self.close.clone(),
            max_size: self.max_size,
            max_idle: self.max_idle,
            acquire_timeout: self.acquire_timeout,
            credentials: self.credentials.clone(),
            connector: self.connector.clone(),
        }
    }
}

impl<C> fmt::Debug for PoolConfig<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("health_check", &self.health_check.is_some())
            .field("close", &self.close.is_some())
            .field("max_size", &self.max_size)
            .field("max_idle", &self.max_idle)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("credentials", &self.credentials)
            .field("connector", &self.connector.is_some())
            .finish()
    }
}

impl<C> PoolConfig<C> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn health_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.health_check = Some(Arc::new(check));
        self
    }

    #[must_use]
    pub fn close<F>(mut self, close: F) -> Self
    where
        F: Fn(&C) + Send + Sync + 'static,
    {
        self.close = Some(Arc::new(close));
        self
    }

    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    #[must_use]
    pub fn max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = Some(max_idle);
        self
    }

    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector<C>>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn has_explicit_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Mock channel and connector shared by the pool and proxy tests.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    pub struct MockChannel {
        pub id: usize,
        pub healthy: AtomicBool,
        pub closed: AtomicBool,
        live: Arc<AtomicUsize>,
    }

    impl Channel for MockChannel {
        fn state(&self) -> ChannelState {
            if self.healthy.load(Ordering::SeqCst) {
                ChannelState::Ready
            } else {
                ChannelState::TransientFailure
            }
        }

        fn close(&self) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Counts dials and live channels. Dials to `"unreachable:1"` fail.
    #[derive(Debug, Default)]
    pub struct MockConnector {
        pub dials: AtomicUsize,
        pub live: Arc<AtomicUsize>,
        pub credentials_seen: parking_lot::Mutex<Vec<Credentials>>,
    }

    impl Connector<MockChannel> for MockConnector {
        fn connect<'a>(
            &'a self,
            destination: &'a str,
            credentials: &'a Credentials,
        ) -> BoxFuture<'a, Result<MockChannel, PoolError>> {
            Box::pin(async move {
                self.credentials_seen.lock().push(credentials.clone());
                if destination == "unreachable:1" {
                    return Err(PoolError::Dial {
                        destination: destination.to_owned(),
                        reason: "connection refused".into(),
                    });
                }
                let id = self.dials.fetch_add(1, Ordering::SeqCst);
                self.live.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok(MockChannel {
                    id,
                    healthy: AtomicBool::new(true),
                    closed: AtomicBool::new(false),
                    live: Arc::clone(&self.live),
                })
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_idle_connecting_ready_are_usable() {
        assert!(ChannelState::Idle.is_usable());
        assert!(ChannelState::Connecting.is_usable());
        assert!(ChannelState::Ready.is_usable());
        assert!(!ChannelState::TransientFailure.is_usable());
        assert!(!ChannelState::Shutdown.is_usable());
        assert_eq!(ChannelState::TransientFailure.to_string(), "transient-failure");
    }

    #[test]
    fn credentials_are_an_explicit_flag() {
        let config: PoolConfig<testing::MockChannel> = PoolConfig::new();
        assert!(!config.has_explicit_credentials());
        let config = config.credentials(Credentials::Tls { server_name: None });
        assert!(config.has_explicit_credentials());
    }
}
