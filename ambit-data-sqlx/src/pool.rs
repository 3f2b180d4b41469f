//! Process-wide connection pool: sizing, startup probe, liveness ping.

use std::time::Duration;

use ambit_core::config::{AmbitConfig, ConfigError, ConfigProperties, PropertyMeta};
use ambit_core::health::{HealthIndicator, HealthStatus};
use ambit_data::DataError;
use sqlx::pool::PoolOptions;
use sqlx::{Connection, Database, Pool};
use tracing::{debug, error, info};

pub const DEFAULT_MAX_OPEN_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_IDLE_CONNECTIONS: u32 = 5;
/// Idle connections are never reaped sooner than this.
pub const MIN_IDLE_DURATION: Duration = Duration::from_secs(19);
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
/// Budget of the startup probe and of health pings.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for [`ConnectionPool::open`].
///
/// Counts are signed so that zero or negative values coming from
/// configuration can be told apart from "unset"; both fall back to the
/// defaults.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub url: String,
    pub max_open_connections: i64,
    pub max_idle_connections: i64,
    pub max_idle_duration: Duration,
    pub acquire_timeout: Option<Duration>,
    pub ping_timeout: Option<Duration>,
}

/// Effective pool limits after defaults and clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizing {
    pub max_open: u32,
    pub max_idle: u32,
    pub idle_duration: Duration,
    pub acquire_timeout: Duration,
    pub ping_timeout: Duration,
}

impl PoolConfig {
    /// Configuration for `url` with every limit at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_open_connections: 0,
            max_idle_connections: 0,
            max_idle_duration: Duration::ZERO,
            acquire_timeout: None,
            ping_timeout: None,
        }
    }

    pub fn max_open(mut self, n: i64) -> Self {
        self.max_open_connections = n;
        self
    }

    /// Connections to keep open while idle.
    ///
    /// sqlx has no idle cap, so this becomes the pool's `min_connections`:
    /// a floor that the pool fills eagerly in the background and maintains,
    /// rather than a ceiling on idle connections. Idle connections above it
    /// are reaped after the idle duration.
    pub fn max_idle(mut self, n: i64) -> Self {
        self.max_idle_connections = n;
        self
    }

    pub fn idle_duration(mut self, d: Duration) -> Self {
        self.max_idle_duration = d;
        self
    }

    pub fn acquire_timeout(mut self, d: Duration) -> Self {
        self.acquire_timeout = Some(d);
        self
    }

    pub fn ping_timeout(mut self, d: Duration) -> Self {
        self.ping_timeout = Some(d);
        self
    }

    /// Resolve the effective limits.
    ///
    /// Non-positive counts take their defaults, idle is capped at open, and
    /// the idle duration is floored at [`MIN_IDLE_DURATION`].
    pub fn sizing(&self) -> PoolSizing {
        let max_open = positive_or(self.max_open_connections, DEFAULT_MAX_OPEN_CONNECTIONS);
        let max_idle = positive_or(self.max_idle_connections, DEFAULT_MAX_IDLE_CONNECTIONS).min(max_open);
        PoolSizing {
            max_open,
            max_idle,
            idle_duration: self.max_idle_duration.max(MIN_IDLE_DURATION),
            acquire_timeout: self
                .acquire_timeout
                .filter(|d| !d.is_zero())
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT),
            ping_timeout: self.ping_timeout.filter(|d| !d.is_zero()).unwrap_or(PING_TIMEOUT),
        }
    }
}

fn positive_or(value: i64, default: u32) -> u32 {
    if value <= 0 {
        default
    } else {
        u32::try_from(value).unwrap_or(u32::MAX)
    }
}

impl ConfigProperties for PoolConfig {
    fn prefix() -> &'static str {
        "app.database"
    }

    fn properties_metadata() -> Vec<PropertyMeta> {
        vec![
            PropertyMeta::required("app.database.url", "String", "Connection URL of the data store"),
            PropertyMeta::with_default(
                "app.database.pool.max.open",
                "i64",
                DEFAULT_MAX_OPEN_CONNECTIONS,
                "Maximum number of open connections",
            ),
            PropertyMeta::with_default(
                "app.database.pool.max.idle",
                "i64",
                DEFAULT_MAX_IDLE_CONNECTIONS,
                "Connections kept open while idle",
            ),
            PropertyMeta::with_default(
                "app.database.pool.idle.timeout",
                "Duration",
                MIN_IDLE_DURATION.as_secs(),
                "Seconds an idle connection may live (floored)",
            ),
            PropertyMeta::with_default(
                "app.database.pool.acquire.timeout",
                "Duration",
                DEFAULT_ACQUIRE_TIMEOUT.as_secs(),
                "Seconds to wait for a pooled connection",
            ),
            PropertyMeta::with_default(
                "app.database.ping.timeout",
                "Duration",
                PING_TIMEOUT.as_secs(),
                "Seconds allowed for the startup probe and health pings",
            ),
        ]
    }

    fn from_config(config: &AmbitConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            url: config.get("app.database.url")?,
            max_open_connections: config.get_or("app.database.pool.max.open", 0)?,
            max_idle_connections: config.get_or("app.database.pool.max.idle", 0)?,
            max_idle_duration: config.get_or("app.database.pool.idle.timeout", Duration::ZERO)?,
            acquire_timeout: config.get_or("app.database.pool.acquire.timeout", None)?,
            ping_timeout: config.get_or("app.database.ping.timeout", None)?,
        })
    }
}

/// Shared handle to the process-wide pool.
///
/// Cheap to clone; every clone refers to the same set of connections.
#[derive(Debug)]
pub struct ConnectionPool<DB: Database> {
    pool: Pool<DB>,
    sizing: PoolSizing,
}

impl<DB: Database> Clone for ConnectionPool<DB> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            sizing: self.sizing,
        }
    }
}

impl<DB: Database> ConnectionPool<DB> {
    /// Build the pool and probe the data store once.
    ///
    /// Fails with `DataError::Connection` when the URL is malformed or the
    /// store cannot be reached within the ping timeout. A pool that failed
    /// its probe is closed before returning.
    pub async fn open(config: &PoolConfig) -> Result<Self, DataError> {
        let sizing = config.sizing();
        let pool = PoolOptions::<DB>::new()
            .max_connections(sizing.max_open)
            .min_connections(sizing.max_idle)
            .idle_timeout(Some(sizing.idle_duration))
            .acquire_timeout(sizing.acquire_timeout)
            .connect_lazy(&config.url)
            .map_err(|e| DataError::Connection(format!("invalid connection url: {e}")))?;

        let this = Self { pool, sizing };
        if let Err(reason) = this.probe(sizing.ping_timeout).await {
            error!(%reason, "cannot open database connection");
            this.pool.close().await;
            return Err(DataError::Connection(reason));
        }

        info!(
            max_open = sizing.max_open,
            max_idle = sizing.max_idle,
            idle_secs = sizing.idle_duration.as_secs(),
            "database connected"
        );
        Ok(this)
    }

    /// Wrap an existing sqlx pool without probing it.
    pub fn from_pool(pool: Pool<DB>) -> Self {
        let sizing = PoolConfig::new("").sizing();
        Self { pool, sizing }
    }

    /// `true` if a connection answered within `timeout`. Never waits longer
    /// than `timeout`, even when the pool is saturated.
    pub async fn ping(&self, timeout: Duration) -> bool {
        match self.probe(timeout).await {
            Ok(()) => true,
            Err(reason) => {
                error!(%reason, "database ping failed");
                false
            }
        }
    }

    async fn probe(&self, timeout: Duration) -> Result<(), String> {
        let check = async {
            let mut conn = self.pool.acquire().await.map_err(|e| e.to_string())?;
            conn.ping().await.map_err(|e| e.to_string())
        };
        match tokio::time::timeout(timeout, check).await {
            Ok(result) => result,
            Err(_) => Err(format!("no answer within {}ms", timeout.as_millis())),
        }
    }

    pub fn sizing(&self) -> PoolSizing {
        self.sizing
    }

    /// The underlying sqlx pool, for statements that run outside the
    /// ambient transaction layer (migrations, bulk jobs).
    pub fn inner(&self) -> &Pool<DB> {
        &self.pool
    }

    /// Connections currently open (idle or checked out).
    pub fn size(&self) -> u32 {
        self.pool.size()
    }

    pub fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Close every connection. Waits for checked-out connections to return.
    pub async fn close(&self) {
        debug!("closing database pool");
        self.pool.close().await;
    }
}

/// Health indicator that pings the pool.
pub struct PoolHealth<DB: Database> {
    pool: ConnectionPool<DB>,
    timeout: Duration,
}

impl<DB: Database> PoolHealth<DB> {
    pub fn new(pool: ConnectionPool<DB>) -> Self {
        let timeout = pool.sizing().ping_timeout;
        Self { pool, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl<DB: Database> HealthIndicator for PoolHealth<DB> {
    fn name(&self) -> &str {
        "db"
    }

    async fn check(&self) -> HealthStatus {
        if self.pool.ping(self.timeout).await {
            HealthStatus::Up
        } else {
            HealthStatus::Down(format!("no answer within {}ms", self.timeout.as_millis()))
        }
    }
}
