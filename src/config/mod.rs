/// Configuration management for the Runway engine
///
/// Handles clock, executor, queue, database and health parameters.
/// Every field can be overridden through RUNWAY_* environment variables
/// for container deployment.

use serde::{Deserialize, Serialize};

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Executor and clock configuration
    pub engine: EngineConfig,
    /// Queue retry configuration
    pub queue: QueueConfig,
    /// Schedule store configuration
    pub database: DatabaseConfig,
    /// Worker health classification thresholds
    pub health: HealthConfig,
}

/// Clock and executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cron clock tick interval in seconds (default: 60)
    pub tick_interval_secs: u64,
    /// Per-execution timeout in seconds (default: 300)
    pub execution_timeout_secs: u64,
    /// Per-node transform timeout in seconds (default: 60)
    pub node_timeout_secs: u64,
}

/// Queue retry and backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Base delay for exponential retry backoff in milliseconds (default: 5000)
    pub backoff_base_ms: u64,
    /// Delivery attempts before a job is recorded as permanently failed (default: 2)
    pub max_attempts: u32,
}

/// Schedule store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection url for the durable schedule store
    /// (default: "sqlite::memory:", e.g. "sqlite://data/schedules.db")
    pub schedule_db_url: String,
}

/// Success-rate thresholds for worker health classification (percentages)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// At or above this rate the worker is healthy (default: 95)
    pub healthy_pct: f64,
    /// At or above this rate the worker is degraded (default: 50)
    pub degraded_pct: f64,
    /// At or above this rate the worker is unhealthy; below it, critical (default: 20)
    pub unhealthy_pct: f64,
}

fn env_parsed<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                tick_interval_secs: env_parsed("RUNWAY_TICK_INTERVAL_SECS", 60),
                execution_timeout_secs: env_parsed("RUNWAY_EXECUTION_TIMEOUT_SECS", 300),
                node_timeout_secs: env_parsed("RUNWAY_NODE_TIMEOUT_SECS", 60),
            },
            queue: QueueConfig {
                backoff_base_ms: env_parsed("RUNWAY_BACKOFF_BASE_MS", 5000),
                max_attempts: env_parsed("RUNWAY_QUEUE_MAX_ATTEMPTS", 2),
            },
            database: DatabaseConfig {
                schedule_db_url: std::env::var("RUNWAY_SCHEDULE_DB_URL")
                    .unwrap_or_else(|_| "sqlite::memory:".to_string()),
            },
            health: HealthConfig {
                healthy_pct: env_parsed("RUNWAY_HEALTH_HEALTHY_PCT", 95.0),
                degraded_pct: env_parsed("RUNWAY_HEALTH_DEGRADED_PCT", 50.0),
                unhealthy_pct: env_parsed("RUNWAY_HEALTH_UNHEALTHY_PCT", 20.0),
            },
        }
    }
}
