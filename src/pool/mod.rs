//! A fair, self-maintaining pool of MySQL connections.
//!
//! Callers [`acquire`][Pool::acquire] a connection, use it exclusively, and
//! drop it to return it. Behind the scenes the pool validates idle
//! connections, expires old ones, keeps the configured minimum warm,
//! optionally resizes itself under load, and refuses to hammer an unhealthy
//! server (circuit breaker).

use std::fmt::{self, Debug, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;

use crate::error::{PoolStatus, Result};
use crate::options::MySqlConnectOptions;

mod breaker;
mod connection;
mod inner;
mod maintenance;
mod metrics;
mod options;
mod sizer;

pub use connection::PoolConnection;
pub use metrics::PoolMetricsSnapshot;
pub use options::PoolOptions;

use inner::PoolInner;

/// An asynchronous pool of MySQL connections.
///
/// `Pool` is a cheap `Arc` handle; clone it freely across tasks. Dropping
/// the last handle does **not** close the pool's connections promptly; call
/// [`close`][Self::close] for an orderly shutdown.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,

    // background fibers; aborted on close
    tasks: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl Debug for Pool {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let status = self.inner.status();

        f.debug_struct("Pool")
            .field("size", &status.size)
            .field("idle", &status.idle)
            .field("waiters", &status.waiters)
            .finish()
    }
}

impl Pool {
    /// Shorthand for [`PoolOptions::connect`] with default options.
    pub async fn connect(url: &str) -> Result<Self> {
        PoolOptions::new()
            .connect_with(MySqlConnectOptions::from_str(url)?)
            .await
    }

    pub(crate) async fn new(
        options: PoolOptions,
        connect_options: MySqlConnectOptions,
    ) -> Result<Self> {
        let inner = PoolInner::new(options, connect_options);

        // open the configured minimum eagerly so the first acquisitions do
        // not pay connection latency
        for _ in 0..inner.options.min_connections {
            inner.create_idle_connection().await?;
        }

        let mut tasks = vec![
            maintenance::spawn_housekeeper(Arc::clone(&inner)),
            maintenance::spawn_keepalive(Arc::clone(&inner)),
        ];

        if inner.options.adaptive_sizing {
            tasks.push(sizer::spawn_sizer(Arc::clone(&inner)));
        }

        Ok(Self {
            inner,
            tasks: Arc::new(Mutex::new(tasks)),
        })
    }

    /// Take a connection from the pool, waiting fairly (FIFO) behind other
    /// acquirers when the pool is exhausted.
    ///
    /// The connection is returned when the [`PoolConnection`] drops. Fails
    /// with [`PoolTimedOut`][crate::Error::PoolTimedOut] after the
    /// configured acquire timeout, with
    /// [`CircuitOpen`][crate::Error::CircuitOpen] while the server is
    /// refusing connections, and with
    /// [`PoolClosed`][crate::Error::PoolClosed] after [`close`][Self::close].
    pub async fn acquire(&self) -> Result<PoolConnection> {
        self.inner.acquire().await
    }

    /// Total connections currently owned by the pool, including those being
    /// opened.
    pub fn size(&self) -> u32 {
        self.inner.size()
    }

    /// Connections currently idle in the pool.
    pub fn num_idle(&self) -> usize {
        self.inner.num_idle()
    }

    /// A point-in-time description of the pool.
    pub fn status(&self) -> PoolStatus {
        self.inner.status()
    }

    /// A point-in-time copy of the pool's activity counters.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Shut the pool down: fail all waiters, close idle connections, and
    /// wait (bounded) for checked-out connections to come home. Safe to
    /// call more than once.
    pub async fn close(&self) {
        for task in self.tasks.lock().expect("pool tasks poisoned").drain(..) {
            task.abort();
        }

        self.inner.close().await;
    }
}
