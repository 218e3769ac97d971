//! Destination-keyed registry of connection pools.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tracing::info;

use super::{Channel, CloseFn, ConnectionPool, Connector, HealthCheck, PoolConfig};
use crate::config::PoolSettings;
use crate::error::PoolError;

/// Owns one [`ConnectionPool`] per destination (`host[:port]`).
///
/// Pools are created lazily on first use and live until
/// [`shutdown`](Self::shutdown). Create one registry at startup and share it
/// (behind an `Arc`) with every proxy that dials the same destinations.
///
/// # Examples
///
/// ```rust,ignore
/// let registry = Arc::new(PoolRegistry::new(Arc::new(MyConnector), PoolSettings::default()));
/// let pool = registry.get_pool("rpc.internal:50051", None)?;
/// let lease = pool.get().await?;
/// ```
pub struct PoolRegistry<C: Channel> {
    pools: DashMap<String, Arc<ConnectionPool<C>>>,
    connector: Arc<dyn Connector<C>>,
    settings: PoolSettings,
    created: AtomicUsize,
}

impl<C: Channel> PoolRegistry<C> {
    pub fn new(connector: Arc<dyn Connector<C>>, settings: PoolSettings) -> Self {
        Self {
            pools: DashMap::new(),
            connector,
            settings,
            created: AtomicUsize::new(0),
        }
    }

    /// Returns the pool for `destination`, creating it on first use.
    ///
    /// `config` only applies when the pool is created; later calls get the
    /// existing pool unchanged. Concurrent first calls for the same
    /// destination construct exactly one pool.
    ///
    /// # Errors
    ///
    /// [`PoolError::EmptyDestination`] if `destination` is blank.
    pub fn get_pool(
        &self,
        destination: &str,
        config: Option<&PoolConfig<C>>,
    ) -> Result<Arc<ConnectionPool<C>>, PoolError> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(PoolError::EmptyDestination);
        }
        if let Some(pool) = self.pools.get(destination) {
            return Ok(Arc::clone(pool.value()));
        }

        // The shard stays locked while the closure runs, so only one caller builds.
        let pool = self
            .pools
            .entry(destination.to_owned())
            .or_insert_with(|| {
                self.created.fetch_add(1, Ordering::SeqCst);
                Arc::new(self.build(destination, config))
            })
            .value()
            .clone();
        Ok(pool)
    }

    /// Number of destinations with a pool.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Pools constructed over the registry's lifetime.
    pub fn pools_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Shuts every pool down and forgets them.
    pub fn shutdown(&self) {
        for entry in self.pools.iter() {
            entry.value().shutdown();
        }
        self.pools.clear();
        info!("pool registry shut down");
    }

    fn build(&self, destination: &str, config: Option<&PoolConfig<C>>) -> ConnectionPool<C> {
        let config = config.cloned().unwrap_or_default();
        let health_check: HealthCheck<C> = config
            .health_check
            .unwrap_or_else(|| Arc::new(|channel: &C| channel.state().is_usable()));
        let close: CloseFn<C> = config
            .close
            .unwrap_or_else(|| Arc::new(|channel: &C| channel.close()));
        let max_size = config.max_size.unwrap_or(self.settings.max_size);
        let max_idle = config.max_idle.unwrap_or_else(|| self.settings.max_idle());
        let acquire_timeout = config
            .acquire_timeout
            .unwrap_or_else(|| self.settings.acquire_timeout());
        let explicit_credentials = config.credentials.is_some();
        let credentials = config.credentials.unwrap_or_default();
        let connector = config
            .connector
            .unwrap_or_else(|| Arc::clone(&self.connector));

        info!(
            %destination,
            max_size,
            ?max_idle,
            explicit_credentials,
            "creating connection pool"
        );
        ConnectionPool::new(
            destination.to_owned(),
            connector,
            credentials,
            health_check,
            close,
            max_size,
            max_idle,
            acquire_timeout,
        )
    }
}

impl<C: Channel> fmt::Debug for PoolRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.pools.len())
            .field("settings", &self.settings)
            .finish()
    }
}
