//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::str::FromStr;

const MIB: u64 = 1024 * 1024;

/// Shortest accepted pressure check interval, in seconds
const MIN_PRESSURE_INTERVAL: u64 = 1;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Diagnostic name of the server's cache
    pub cache_name: String,
    /// Byte budget of the server's cache
    pub max_cache_bytes: u64,
    /// Combined byte budget enforced across all registered caches
    pub global_budget_bytes: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Memory pressure check interval in seconds
    pub pressure_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_NAME` - Name of the server cache (default: "server")
    /// - `MAX_CACHE_BYTES` - Server cache budget in bytes (default: 64 MiB)
    /// - `GLOBAL_BUDGET_BYTES` - Budget across all caches (default: 256 MiB)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `PRESSURE_INTERVAL` - Pressure check frequency in seconds (default: 5, minimum: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_name: env::var("CACHE_NAME").unwrap_or(defaults.cache_name),
            max_cache_bytes: parse_var("MAX_CACHE_BYTES").unwrap_or(defaults.max_cache_bytes),
            global_budget_bytes: parse_var("GLOBAL_BUDGET_BYTES")
                .unwrap_or(defaults.global_budget_bytes),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            pressure_interval: parse_interval("PRESSURE_INTERVAL")
                .unwrap_or(defaults.pressure_interval),
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn parse_interval(name: &str) -> Option<u64> {
    parse_var::<u64>(name).map(|secs| secs.max(MIN_PRESSURE_INTERVAL))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_name: "server".to_string(),
            max_cache_bytes: 64 * MIB,
            global_budget_bytes: 256 * MIB,
            server_port: 3000,
            pressure_interval: 5,
        }
    }
}
