//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::{CacheStats, CacheSummary};

/// Response body for the GET operation (GET /get/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: String,
}

impl GetResponse {
    /// Creates a new GetResponse
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Response body for the SET operation (PUT /set)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
    /// Bytes charged to the cache for this value
    pub memory_usage: u64,
}

impl SetResponse {
    /// Creates a new SetResponse
    pub fn new(key: impl Into<String>, memory_usage: u64) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
            memory_usage,
        }
    }
}

/// Response body for the DELETE operation (DELETE /del/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    /// Creates a new DeleteResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of evictions
    pub evictions: u64,
    /// Current number of entries in cache
    pub total_entries: usize,
    /// Bytes currently cached
    pub current_size: u64,
    /// Byte budget
    pub max_size: u64,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<CacheStats> for StatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            total_entries: stats.total_entries,
            current_size: stats.current_size,
            max_size: stats.max_size,
        }
    }
}

/// Response body for the registry listing (GET /caches)
#[derive(Debug, Clone, Serialize)]
pub struct CachesResponse {
    /// Bytes held by all registered caches
    pub total_size: u64,
    /// One summary per live cache
    pub caches: Vec<CacheSummary>,
}

impl CachesResponse {
    /// Creates a new CachesResponse, totalling the summaries
    pub fn new(caches: Vec<CacheSummary>) -> Self {
        Self {
            total_size: caches.iter().map(|c| c.current_size).sum(),
            caches,
        }
    }
}

/// Response body for POST /caches/reduce
#[derive(Debug, Clone, Serialize)]
pub struct ReduceResponse {
    /// Bytes requested
    pub requested: u64,
    /// Bytes actually freed
    pub freed: u64,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_response_serialize() {
        let resp = GetResponse::new("test_key", "test_value");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("test_key"));
        assert!(json.contains("test_value"));
    }

    #[test]
    fn test_set_response_serialize() {
        let resp = SetResponse::new("my_key", 5);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("my_key"));
        assert!(json.contains("successfully"));
        assert!(json.contains("\"memory_usage\":5"));
    }

    #[test]
    fn test_delete_response_serialize() {
        let resp = DeleteResponse::new("deleted_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("deleted_key"));
        assert!(json.contains("deleted"));
    }

    #[test]
    fn test_stats_response_from_stats() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            evictions: 5,
            total_entries: 100,
            current_size: 4096,
            max_size: 8192,
        };
        let resp = StatsResponse::from(stats);
        assert!((resp.hit_rate - 0.8).abs() < 0.001);
        assert_eq!(resp.current_size, 4096);
        assert_eq!(resp.max_size, 8192);
    }

    #[test]
    fn test_stats_response_zero_requests() {
        let resp = StatsResponse::from(CacheStats::default());
        assert_eq!(resp.hit_rate, 0.0);
    }

    #[test]
    fn test_caches_response_totals() {
        let resp = CachesResponse::new(vec![
            CacheSummary {
                name: "a".to_string(),
                entries: 2,
                current_size: 30,
                max_size: 100,
            },
            CacheSummary {
                name: "b".to_string(),
                entries: 1,
                current_size: 12,
                max_size: 100,
            },
        ]);
        assert_eq!(resp.total_size, 42);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"name\":\"a\""));
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }
}
