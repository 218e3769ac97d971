//! A bounded pool of channels to a single destination.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{Channel, CloseFn, Connector, Credentials, HealthCheck};
use crate::error::PoolError;

struct IdleChannel<C> {
    channel: Arc<C>,
    since: Instant,
}

/// Point-in-time counters for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_size: usize,
    pub idle: usize,
    pub in_use: usize,
    /// Channels dialed over the pool's lifetime.
    pub created: u64,
}

/// A pool of at most `max_size` channels to one destination.
///
/// Each checkout holds a semaphore permit for as long as its [`Lease`] lives,
/// so at most `max_size` channels are ever lent out at once. Idle channels
/// older than `max_idle`, or failing the health check, are closed instead of
/// being handed out again.
pub struct ConnectionPool<C: Channel> {
    destination: String,
    connector: Arc<dyn Connector<C>>,
    credentials: Credentials,
    health_check: HealthCheck<C>,
    close: CloseFn<C>,
    max_size: usize,
    max_idle: Duration,
    acquire_timeout: Duration,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleChannel<C>>>,
    created: AtomicU64,
    closed: AtomicBool,
}

impl<C: Channel> ConnectionPool<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        destination: String,
        connector: Arc<dyn Connector<C>>,
        credentials: Credentials,
        health_check: HealthCheck<C>,
        close: CloseFn<C>,
        max_size: usize,
        max_idle: Duration,
        acquire_timeout: Duration,
    ) -> Self {
        let max_size = max_size.max(1);
        Self {
            destination,
            connector,
            credentials,
            health_check,
            close,
            max_size,
            max_idle,
            acquire_timeout,
            permits: Arc::new(Semaphore::new(max_size)),
            idle: Mutex::new(VecDeque::with_capacity(max_size)),
            created: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Checks out a channel, reusing an idle one when possible.
    ///
    /// Waits up to the acquire timeout for capacity.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Exhausted`] if no capacity frees up in time.
    /// - [`PoolError::Closed`] after [`shutdown`](Self::shutdown).
    /// - [`PoolError::Dial`] if a new channel cannot be connected.
    /// - [`PoolError::Unhealthy`] if a freshly dialed channel fails its health check.
    pub async fn get(self: &Arc<Self>) -> Result<Lease<C>, PoolError> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        let permit = match tokio::time::timeout(self.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(self.closed_error()),
            Err(_) => {
                return Err(PoolError::Exhausted {
                    destination: self.destination.clone(),
                    waited: self.acquire_timeout,
                });
            }
        };

        while let Some(idle) = self.pop_idle() {
            if idle.since.elapsed() > self.max_idle {
                debug!(destination = %self.destination, "closing channel past max idle");
                (self.close)(&idle.channel);
                continue;
            }
            if !(self.health_check)(&idle.channel) {
                debug!(
                    destination = %self.destination,
                    state = %idle.channel.state(),
                    "closing unhealthy idle channel"
                );
                (self.close)(&idle.channel);
                continue;
            }
            trace!(destination = %self.destination, "reusing idle channel");
            return Ok(self.lease(idle.channel, permit));
        }

        let channel = self
            .connector
            .connect(&self.destination, &self.credentials)
            .await?;
        self.created.fetch_add(1, Ordering::Relaxed);
        if !(self.health_check)(&channel) {
            let state = channel.state();
            (self.close)(&channel);
            return Err(PoolError::Unhealthy {
                destination: self.destination.clone(),
                state,
            });
        }
        debug!(destination = %self.destination, "dialed new channel");
        Ok(self.lease(Arc::new(channel), permit))
    }

    pub fn stats(&self) -> PoolStats {
        let available = self.permits.available_permits();
        PoolStats {
            max_size: self.max_size,
            idle: self.idle.lock().len(),
            in_use: if self.is_closed() {
                0
            } else {
                self.max_size.saturating_sub(available)
            },
            created: self.created.load(Ordering::Relaxed),
        }
    }

    /// Closes idle channels and rejects further checkouts.
    ///
    /// Outstanding leases stay valid; their channels are closed on return.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();
        let drained: Vec<_> = self.idle.lock().drain(..).collect();
        for idle in &drained {
            (self.close)(&idle.channel);
        }
        debug!(destination = %self.destination, closed = drained.len(), "pool shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pop_idle(&self) -> Option<IdleChannel<C>> {
        self.idle.lock().pop_front()
    }

    fn lease(self: &Arc<Self>, channel: Arc<C>, permit: OwnedSemaphorePermit) -> Lease<C> {
        Lease {
            channel,
            pool: Arc::clone(self),
            _permit: permit,
        }
    }

    fn check_in(&self, channel: Arc<C>) {
        if self.is_closed() || !(self.health_check)(&channel) {
            debug!(
                destination = %self.destination,
                state = %channel.state(),
                "closing channel on check-in"
            );
            (self.close)(&channel);
            return;
        }
        self.idle.lock().push_back(IdleChannel {
            channel,
            since: Instant::now(),
        });
    }

    fn closed_error(&self) -> PoolError {
        PoolError::Closed {
            destination: self.destination.clone(),
        }
    }
}

impl<C: Channel> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("destination", &self.destination)
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A checked-out channel. Returned to its pool when dropped.
pub struct Lease<C: Channel> {
    channel: Arc<C>,
    pool: Arc<ConnectionPool<C>>,
    // Released after `Drop::drop` has checked the channel back in.
    _permit: OwnedSemaphorePermit,
}

impl<C: Channel> Lease<C> {
    pub fn destination(&self) -> &str {
        self.pool.destination()
    }

    /// Hands the channel back to its pool. Equivalent to dropping the lease.
    pub fn release(self) {}
}

impl<C: Channel> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.channel
    }
}

impl<C: Channel> Drop for Lease<C> {
    fn drop(&mut self) {
        self.pool.check_in(Arc::clone(&self.channel));
    }
}

impl<C: Channel> fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("destination", &self.pool.destination)
            .field("state", &self.channel.state())
            .finish()
    }
}
