use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use sqlx::postgres::PgRow;
use strata_model::Value;
use tokio::runtime::{Builder, Runtime};

use super::connection::{ConnectionManager, PoolStats};
use crate::error::{Result, StrataError};

/// Synchronous facade over [`ConnectionManager`] for call sites that have
/// no async runtime, such as scripts or GUI event handlers.
///
/// Calls run on a dedicated single-worker runtime and the caller's thread
/// parks until the result arrives, so it may also be used from inside
/// another runtime's blocking section.
///
/// Pooled connections are bound to the runtime that opened them. When the
/// pool was opened through this adapter, dropping the adapter closes it so
/// other holders of the same [`ConnectionManager`] reopen it on their own
/// runtime instead of reusing dead connections.
pub struct BlockingConnectionManager {
    manager: ConnectionManager,
    runtime: Option<Runtime>,
    opened_pool: AtomicBool,
}

impl fmt::Debug for BlockingConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingConnectionManager")
            .field("manager", &self.manager)
            .field("opened_pool", &self.opened_pool.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl BlockingConnectionManager {
    pub fn new(manager: ConnectionManager) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("strata-db-blocking")
            .enable_all()
            .build()
            .map_err(|e| {
                StrataError::Internal(format!("blocking runtime: {e}"))
            })?;
        Ok(Self {
            manager,
            runtime: Some(runtime),
            opened_pool: AtomicBool::new(false),
        })
    }

    /// The async manager this adapter drives.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    fn run<F, T>(&self, make: impl FnOnce(ConnectionManager) -> F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let runtime = self.runtime.as_ref().ok_or_else(|| {
            StrataError::Internal("blocking runtime already shut down".into())
        })?;
        let was_connected = self.manager.is_connected();
        let fut = make(self.manager.clone());
        let (tx, rx) = mpsc::channel();
        runtime.spawn(async move {
            let _ = tx.send(fut.await);
        });
        let result = rx.recv().map_err(|_| {
            StrataError::Internal("blocking call abandoned".into())
        })?;
        if !was_connected && self.manager.is_connected() {
            self.opened_pool.store(true, Ordering::Relaxed);
        }
        result
    }

    /// Whether the pool currently open was opened on this adapter's runtime.
    pub fn owns_pool(&self) -> bool {
        self.opened_pool.load(Ordering::Relaxed) && self.manager.is_connected()
    }

    pub fn connect(&self) -> Result<()> {
        self.run(|m| async move { m.connect().await })
    }

    pub fn close(&self) -> Result<()> {
        let closed = self.run(|m| async move {
            m.close().await;
            Ok(())
        });
        self.opened_pool.store(false, Ordering::Relaxed);
        closed
    }

    pub fn execute(&self, sql: &str, args: &[Value]) -> Result<u64> {
        let (sql, args) = (sql.to_string(), args.to_vec());
        self.run(|m| async move { m.execute(&sql, &args).await })
    }

    pub fn fetch(&self, sql: &str, args: &[Value]) -> Result<Vec<PgRow>> {
        let (sql, args) = (sql.to_string(), args.to_vec());
        self.run(|m| async move { m.fetch(&sql, &args).await })
    }

    pub fn fetch_one(&self, sql: &str, args: &[Value]) -> Result<Option<PgRow>> {
        let (sql, args) = (sql.to_string(), args.to_vec());
        self.run(|m| async move { m.fetch_one(&sql, &args).await })
    }

    pub fn fetch_scalar<T>(&self, sql: &str, args: &[Value]) -> Result<Option<T>>
    where
        T: for<'r> sqlx::Decode<'r, sqlx::Postgres>
            + sqlx::Type<sqlx::Postgres>
            + Send
            + 'static,
    {
        let (sql, args) = (sql.to_string(), args.to_vec());
        self.run(|m| async move { m.fetch_scalar::<T>(&sql, &args).await })
    }

    pub fn stats(&self) -> Option<PoolStats> {
        self.manager.stats()
    }
}

impl Drop for BlockingConnectionManager {
    fn drop(&mut self) {
        if self.owns_pool() && self.close().is_err() {
            tracing::warn!(
                target: "strata::store",
                "failed to close pool opened by the blocking adapter"
            );
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
