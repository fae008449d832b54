//! Connection pool for the job record store.
//!
//! The worker binary sizes the pool from the environment and reports pool
//! health on every reconciliation sweep.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use manuals_core::{Error, Result};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
/// Connections are recycled after this long.
const MAX_LIFETIME_SECS: u64 = 1800;

/// Pool sizing and timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long an acquire may wait for a free connection.
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DATABASE_MAX_CONNECTIONS` | `10` | Pool size ceiling |
    /// | `DATABASE_MIN_CONNECTIONS` | `1` | Connections kept open |
    /// | `DATABASE_CONNECT_TIMEOUT_SECS` | `30` | Acquire timeout |
    /// | `DATABASE_IDLE_TIMEOUT_SECS` | `600` | Idle connection lifetime |
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse_u32 = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u32>().ok());
        let parse_secs = |name: &str| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        let defaults = Self::default();
        Self {
            max_connections: parse_u32("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            min_connections: parse_u32("DATABASE_MIN_CONNECTIONS")
                .unwrap_or(defaults.min_connections),
            connect_timeout: parse_secs("DATABASE_CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.connect_timeout),
            idle_timeout: parse_secs("DATABASE_IDLE_TIMEOUT_SECS")
                .unwrap_or(defaults.idle_timeout),
        }
        .normalized()
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self.normalized()
    }

    pub fn with_min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self.normalized()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// At least one connection; the floor never exceeds the ceiling.
    fn normalized(mut self) -> Self {
        self.max_connections = self.max_connections.max(1);
        self.min_connections = self.min_connections.min(self.max_connections);
        self
    }
}

/// Create a pool with default sizing.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connect_timeout_secs = config.connect_timeout.as_secs(),
        "Creating database connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(Duration::from_secs(MAX_LIFETIME_SECS))
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolMetrics {
    pub size: u32,
    pub idle: usize,
}

impl PoolMetrics {
    /// Every open connection is checked out.
    pub fn is_saturated(&self) -> bool {
        self.size > 0 && self.idle == 0
    }
}

/// Log pool usage and warn when no connection is idle.
pub fn log_pool_metrics(pool: &PgPool) -> PoolMetrics {
    let metrics = PoolMetrics {
        size: pool.size(),
        idle: pool.num_idle(),
    };

    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        pool_size = metrics.size,
        pool_idle = metrics.idle,
        "Pool health check"
    );
    if metrics.is_saturated() {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = metrics.size,
            "Connection pool has no idle connections"
        );
    }
    metrics
}
