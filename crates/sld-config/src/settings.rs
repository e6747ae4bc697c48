//! Typed configuration view.
//!
//! Every field has a default so an empty config is valid except for the
//! price stream URL, which must come from a layer or `SLD_PRICE_WS_URL`
//! before the daemon can start ingestion.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::LoadedConfig;

pub const ENV_DATABASE_URL: &str = "SLD_DATABASE_URL";
pub const ENV_PRICE_WS_URL: &str = "SLD_PRICE_WS_URL";
pub const ENV_DAEMON_ADDR: &str = "SLD_DAEMON_ADDR";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub price_stream: PriceStreamConfig,
    pub execution: ExecutionConfig,
    pub daemon: DaemonConfig,
    pub database: DatabaseConfig,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceStreamConfig {
    pub url: Option<String>,
    /// Capacity of the gateway → dispatcher queue.
    pub queue_capacity: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for PriceStreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            queue_capacity: 1024,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl PriceStreamConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn require_url(&self) -> Result<&str> {
        self.url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .with_context(|| format!("price_stream.url not set (config layer or {ENV_PRICE_WS_URL})"))
    }
}

/// Retry policy applied to execution and to repository writes made by an
/// order instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub initial_interval_ms: u64,
    pub backoff_coefficient: f64,
    pub max_interval_ms: u64,
    pub max_attempts: u32,
    pub schedule_to_close_ms: u64,
    /// Simulated latency of the paper execution gateway.
    pub paper_latency_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 5_000,
            backoff_coefficient: 2.0,
            max_interval_ms: 60_000,
            max_attempts: 5,
            schedule_to_close_ms: 300_000,
            paper_latency_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub addr: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// When absent the daemon runs on the in-memory repository.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

impl AppConfig {
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        serde_json::from_value(loaded.config_json.clone()).context("config does not match schema")
    }

    /// Apply `SLD_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|k| std::env::var(k).ok())
    }

    /// Apply overrides from an arbitrary lookup (tests pass a map here).
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database.url = Some(url);
        }
        if let Some(url) = lookup(ENV_PRICE_WS_URL) {
            self.price_stream.url = Some(url);
        }
        if let Some(addr) = lookup(ENV_DAEMON_ADDR) {
            self.daemon.addr = addr;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let ps = &self.price_stream;
        if ps.queue_capacity == 0 {
            bail!("price_stream.queue_capacity must be > 0");
        }
        if ps.initial_backoff_ms == 0 || ps.initial_backoff_ms > ps.max_backoff_ms {
            bail!("price_stream backoff must satisfy 0 < initial_backoff_ms <= max_backoff_ms");
        }

        let ex = &self.execution;
        if ex.max_attempts == 0 {
            bail!("execution.max_attempts must be >= 1");
        }
        if !ex.backoff_coefficient.is_finite() || ex.backoff_coefficient < 1.0 {
            bail!("execution.backoff_coefficient must be >= 1.0");
        }
        if ex.initial_interval_ms > ex.max_interval_ms {
            bail!("execution.initial_interval_ms must be <= execution.max_interval_ms");
        }

        self.daemon
            .addr
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("daemon.addr is not a socket address: {}", self.daemon.addr))?;
        Ok(())
    }

    /// Copy safe for printing: the database URL (which may carry a password)
    /// is replaced with a marker.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        if out.database.url.is_some() {
            out.database.url = Some("REDACTED".to_string());
        }
        out
    }
}
