//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

use crate::cache::{MAX_KEY_LENGTH, MAX_VALUE_SIZE};

/// Request body for the SET operation (PUT /set)
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: The value to store; its byte length is its memory usage
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: String,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        if self.key.len() > MAX_KEY_LENGTH {
            return Some(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            ));
        }
        if self.value.len() > MAX_VALUE_SIZE {
            return Some(format!(
                "Value exceeds maximum size of {} bytes",
                MAX_VALUE_SIZE
            ));
        }
        None
    }
}

/// Request body for POST /caches/reduce
#[derive(Debug, Clone, Deserialize)]
pub struct ReduceRequest {
    /// Bytes to free across all registered caches
    pub amount: u64,
}

/// Request body for PUT /caches/max
#[derive(Debug, Clone, Deserialize)]
pub struct MaxSizeRequest {
    /// New byte budget for the server cache
    pub max_size: u64,
}
