//! Configuration management for the nodeflow engine
//!
//! Handles server configuration, database location, engine polling limits and
//! the remote task service connection.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// DAG engine configuration
    pub engine: EngineConfig,
    /// Remote task service configuration
    pub dispatcher: DispatcherConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the SQLite database (default: "data")
    pub data_dir: String,
}

/// Engine limits for remote task polling and live run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay between two status polls of a dispatched task
    pub poll_interval_ms: u64,
    /// Upper bound on how long a single node may wait for its remote task
    pub max_poll_wait_ms: u64,
    /// Number of entries kept in the rolling run log
    pub log_capacity: usize,
}

/// Remote task service connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Base URL of the task service (e.g., "http://127.0.0.1:3030")
    pub base_url: String,
    /// Optional bearer token sent with every request
    pub api_key: Option<String>,
    /// Responses larger than this are rejected
    pub max_response_bytes: usize,
    /// Per-request timeout
    pub request_timeout_ms: u64,
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_wait(&self) -> Duration {
        Duration::from_millis(self.max_poll_wait_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: env_or("NODEFLOW_POLL_INTERVAL_MS", 2000),
            max_poll_wait_ms: env_or("NODEFLOW_MAX_POLL_WAIT_MS", 300_000),
            log_capacity: env_or("NODEFLOW_LOG_CAPACITY", 100),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("NODEFLOW_TASKS_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3030".to_string()),
            api_key: std::env::var("NODEFLOW_TASKS_API_KEY").ok(),
            max_response_bytes: env_or("NODEFLOW_TASKS_MAX_RESPONSE_BYTES", 16 * 1024 * 1024),
            request_timeout_ms: env_or("NODEFLOW_TASKS_TIMEOUT_MS", 30_000),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("NODEFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("NODEFLOW_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("NODEFLOW_DATA_DIR")
                    .unwrap_or_else(|_| "data".to_string()),
            },
            engine: EngineConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

/// Read a numeric env var, falling back when missing or unparseable
fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_values_fall_back() {
        std::env::set_var("NODEFLOW_TEST_BOGUS_NUMBER", "not-a-number");
        assert_eq!(env_or("NODEFLOW_TEST_BOGUS_NUMBER", 42u64), 42);
        std::env::remove_var("NODEFLOW_TEST_BOGUS_NUMBER");
    }

    #[test]
    fn engine_durations_follow_millis() {
        let engine = EngineConfig {
            poll_interval_ms: 2000,
            max_poll_wait_ms: 5000,
            log_capacity: 100,
        };
        assert_eq!(engine.poll_interval(), Duration::from_secs(2));
        assert_eq!(engine.max_poll_wait(), Duration::from_secs(5));
    }
}
