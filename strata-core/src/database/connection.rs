use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, Transaction};
use strata_config::DatabaseConfig;
use strata_model::Value;
use tokio::sync::Mutex;

use crate::error::{Result, StrataError};

static SHARED: OnceCell<ConnectionManager> = OnceCell::new();

/// Statistics about the connection pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
    pub max_size: u32,
    pub min_idle: u32,
}

#[derive(Clone)]
pub struct PoolSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub search_path: Option<String>,
}

impl fmt::Debug for PoolSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolSettings")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("search_path", &self.search_path)
            .finish()
    }
}

impl PoolSettings {
    pub fn new(url: impl Into<String>) -> Self {
        let defaults = DatabaseConfig::default();
        Self {
            url: url.into(),
            max_connections: defaults.max_connections,
            min_connections: defaults.min_connections,
            acquire_timeout: defaults.acquire_timeout,
            search_path: None,
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let url = config.url.clone().ok_or_else(|| {
            StrataError::Configuration("DATABASE_URL is not configured".into())
        })?;
        Ok(Self {
            url,
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            acquire_timeout: config.acquire_timeout,
            search_path: config.search_path.clone(),
        })
    }
}

/// Lazily created Postgres pool with idempotent shutdown.
///
/// Cloning is cheap and every clone shares the same pool. The pool is
/// opened on first use and may be reopened after [`close`](Self::close).
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    settings: PoolSettings,
    pool: Mutex<Option<PgPool>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("ConnectionManager")
            .field("settings", &self.inner.settings)
            .field("stats", &stats)
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                pool: Mutex::new(None),
            }),
        }
    }

    /// Wraps an already open pool, e.g. one handed out by a test harness.
    pub fn from_pool(pool: PgPool) -> Self {
        let options = pool.options();
        let settings = PoolSettings {
            url: String::new(),
            max_connections: options.get_max_connections(),
            min_connections: options.get_min_connections(),
            acquire_timeout: options.get_acquire_timeout(),
            search_path: None,
        };
        Self {
            inner: Arc::new(Inner {
                settings,
                pool: Mutex::new(Some(pool)),
            }),
        }
    }

    /// Process-wide manager. The first caller's settings win.
    pub fn shared(settings: PoolSettings) -> ConnectionManager {
        SHARED.get_or_init(|| ConnectionManager::new(settings)).clone()
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Opens the pool if it is not open yet.
    pub async fn connect(&self) -> Result<()> {
        self.pool().await.map(|_| ())
    }

    /// Handle to the open pool, opening it on first use.
    pub async fn pool(&self) -> Result<PgPool> {
        let mut guard = self.inner.pool.lock().await;
        if let Some(pool) = guard.as_ref().filter(|p| !p.is_closed()) {
            return Ok(pool.clone());
        }
        let pool = self.open().await?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    async fn open(&self) -> Result<PgPool> {
        let settings = &self.inner.settings;
        if settings.url.is_empty() {
            return Err(StrataError::Configuration(
                "database URL is empty".into(),
            ));
        }
        let search_path = settings.search_path.clone();
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .max_lifetime(Duration::from_secs(1800))
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                let search_path = search_path.clone();
                Box::pin(async move {
                    if let Some(path) = search_path {
                        sqlx::query(&format!("SET search_path = {path}"))
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                })
            })
            .connect(&settings.url)
            .await?;

        tracing::info!(
            target: "strata::store",
            max_connections = settings.max_connections,
            min_connections = settings.min_connections,
            "database pool initialized"
        );
        Ok(pool)
    }

    /// Closes the pool. Safe to call any number of times.
    pub async fn close(&self) {
        let pool = self.inner.pool.lock().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!(target: "strata::store", "database pool closed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .pool
            .try_lock()
            .map(|g| g.as_ref().is_some_and(|p| !p.is_closed()))
            .unwrap_or(false)
    }

    /// Pool statistics, or `None` when the pool is not open.
    pub fn stats(&self) -> Option<PoolStats> {
        let guard = self.inner.pool.try_lock().ok()?;
        let pool = guard.as_ref()?;
        Some(PoolStats {
            size: pool.size(),
            idle: u32::try_from(pool.num_idle()).unwrap_or(u32::MAX),
            max_size: self.inner.settings.max_connections,
            min_idle: self.inner.settings.min_connections,
        })
    }

    /// Runs a statement and returns the affected row count.
    pub async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64> {
        let pool = self.pool().await?;
        let result = bind_all(sqlx::query(sql), args).execute(&pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn fetch(&self, sql: &str, args: &[Value]) -> Result<Vec<PgRow>> {
        let pool = self.pool().await?;
        Ok(bind_all(sqlx::query(sql), args).fetch_all(&pool).await?)
    }

    /// First row, or `None` when the query returns nothing.
    pub async fn fetch_one(
        &self,
        sql: &str,
        args: &[Value],
    ) -> Result<Option<PgRow>> {
        let pool = self.pool().await?;
        Ok(bind_all(sqlx::query(sql), args)
            .fetch_optional(&pool)
            .await?)
    }

    /// First column of the first row. `None` when there is no row or the
    /// value is SQL `NULL`.
    pub async fn fetch_scalar<T>(
        &self,
        sql: &str,
        args: &[Value],
    ) -> Result<Option<T>>
    where
        T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        let row = self.fetch_one(sql, args).await?;
        match row {
            Some(row) => Ok(row.try_get::<Option<T>, _>(0)?),
            None => Ok(None),
        }
    }

    /// Starts a transaction on a pooled connection.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let pool = self.pool().await?;
        Ok(pool.begin().await?)
    }
}

/// Binds each value as a positional parameter.
pub fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Decimal(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Date(v) => query.bind(*v),
            Value::Timestamp(v) => query.bind(*v),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_is_idempotent_without_pool() {
        let manager =
            ConnectionManager::new(PoolSettings::new("postgres://localhost/x"));
        assert!(manager.stats().is_none());
        manager.close().await;
        manager.close().await;
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn empty_url_is_configuration_error() {
        let manager = ConnectionManager::new(PoolSettings::new(""));
        assert!(matches!(
            manager.connect().await,
            Err(StrataError::Configuration(_))
        ));
    }

    #[test]
    fn settings_require_url() {
        let config = DatabaseConfig::default();
        assert!(PoolSettings::from_config(&config).is_err());
        let settings = PoolSettings::from_config(&DatabaseConfig {
            url: Some("postgres://localhost/market".into()),
            max_connections: 3,
            ..DatabaseConfig::default()
        })
        .unwrap();
        assert_eq!(settings.max_connections, 3);
        assert!(!format!("{settings:?}").contains("localhost"));
    }
}
