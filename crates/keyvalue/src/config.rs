// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 The runlock authors
//
// This file is part of runlock.
//
// runlock is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// runlock is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with runlock. If not, see <https://www.gnu.org/licenses/>.

//! Configuration support for KeyValue store backends.
//!
//! ## Purpose
//! Environment-based selection and configuration of the store backend, plus
//! factories producing trait objects for injection. No global client handles:
//! whoever owns the config constructs the store and passes it down.
//!
//! ## Environment Variables
//!
//! - `RUNLOCK_KV_BACKEND`: backend type (default: "memory")
//!   - "memory" | "in-memory" → [`InMemoryKVStore`]
//!   - "redis" → Redis stores (requires `redis-backend` feature)
//! - `RUNLOCK_REDIS_URL`: Redis server URL (default: "redis://localhost:6379")
//! - `RUNLOCK_REDIS_NAMESPACE`: key prefix for isolation (default: "runlock")
//! - `RUNLOCK_KV_TIMEOUT_MS`: per-round-trip timeout (default: 2000)

use crate::{BlockingKeyValueStore, InMemoryKVStore, KVError, KVResult, KeyValueStore};
use std::sync::Arc;
use std::time::Duration;

/// Default bound for a single store round trip.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(2000);

/// Backend type configuration.
#[derive(Clone, Debug)]
pub enum BackendType {
    /// In-memory map backend (default, always available)
    InMemory,
    /// Redis backend (requires `redis-backend` feature)
    Redis {
        /// Redis server URL
        url: String,
        /// Redis key namespace prefix
        namespace: String,
    },
}

impl Default for BackendType {
    fn default() -> Self {
        Self::InMemory
    }
}

/// KeyValue store configuration.
#[derive(Clone, Debug)]
pub struct KVConfig {
    /// Backend type
    pub backend: BackendType,
    /// Upper bound for any single store round trip. A round trip exceeding
    /// this is reported as [`KVError::Unavailable`].
    pub op_timeout: Duration,
}

impl Default for KVConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::InMemory,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

impl KVConfig {
    /// Create configuration from environment variables.
    ///
    /// See the module documentation for the variable list.
    pub fn from_env() -> KVResult<Self> {
        let backend_str = std::env::var("RUNLOCK_KV_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase();

        let backend = match backend_str.as_str() {
            "memory" | "in-memory" => BackendType::InMemory,

            "redis" => {
                let url = std::env::var("RUNLOCK_REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string());
                let namespace = std::env::var("RUNLOCK_REDIS_NAMESPACE")
                    .unwrap_or_else(|_| "runlock".to_string());
                BackendType::Redis { url, namespace }
            }

            other => {
                return Err(KVError::ConfigError(format!(
                    "Unknown backend type: {other}. Valid options: memory, redis"
                )));
            }
        };

        let op_timeout = match std::env::var("RUNLOCK_KV_TIMEOUT_MS") {
            Ok(raw) => {
                let millis: u64 = raw.parse().map_err(|_| {
                    KVError::ConfigError(format!("RUNLOCK_KV_TIMEOUT_MS is not an integer: {raw}"))
                })?;
                Duration::from_millis(millis)
            }
            Err(_) => DEFAULT_OP_TIMEOUT,
        };

        Ok(Self { backend, op_timeout })
    }

    /// Create configuration with an explicit backend.
    pub fn new(backend: BackendType) -> Self {
        Self {
            backend,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

/// Create an async KeyValue store from explicit configuration.
///
/// ## Examples
/// ```rust
/// use runlock_keyvalue::{create_store_from_config, BackendType, KVConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = create_store_from_config(KVConfig::new(BackendType::InMemory)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn create_store_from_config(config: KVConfig) -> KVResult<Arc<dyn KeyValueStore>> {
    match config.backend {
        BackendType::InMemory => Ok(Arc::new(InMemoryKVStore::new())),

        #[cfg(feature = "redis-backend")]
        BackendType::Redis { url, namespace } => {
            use crate::redis::RedisKVStore;
            let store = RedisKVStore::new(&url, &namespace, config.op_timeout).await?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "redis-backend"))]
        BackendType::Redis { .. } => Err(KVError::ConfigError(
            "Redis backend requires 'redis-backend' feature".to_string(),
        )),
    }
}

/// Create a blocking KeyValue store from explicit configuration.
///
/// The in-memory backend returned here is a fresh instance; processes that
/// want the async and blocking bindings to share one in-memory map should
/// construct a single [`InMemoryKVStore`] and clone it instead.
pub fn create_blocking_store_from_config(
    config: KVConfig,
) -> KVResult<Arc<dyn BlockingKeyValueStore>> {
    match config.backend {
        BackendType::InMemory => Ok(Arc::new(InMemoryKVStore::new())),

        #[cfg(feature = "redis-backend")]
        BackendType::Redis { url, namespace } => {
            use crate::redis::RedisBlockingKVStore;
            let store = RedisBlockingKVStore::new(&url, &namespace, config.op_timeout)?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "redis-backend"))]
        BackendType::Redis { .. } => Err(KVError::ConfigError(
            "Redis backend requires 'redis-backend' feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = KVConfig::default();
        match config.backend {
            BackendType::InMemory => {}
            _ => panic!("Default should be InMemory"),
        }
        assert_eq!(config.op_timeout, DEFAULT_OP_TIMEOUT);
    }

    #[test]
    #[serial]
    fn test_config_from_env_default() {
        std::env::remove_var("RUNLOCK_KV_BACKEND");
        std::env::remove_var("RUNLOCK_KV_TIMEOUT_MS");

        let config = KVConfig::from_env().unwrap();
        match config.backend {
            BackendType::InMemory => {}
            _ => panic!("Default should be InMemory"),
        }
    }

    #[test]
    #[serial]
    fn test_config_from_env_redis() {
        std::env::set_var("RUNLOCK_KV_BACKEND", "redis");
        std::env::set_var("RUNLOCK_REDIS_URL", "redis://localhost:6379");
        std::env::set_var("RUNLOCK_REDIS_NAMESPACE", "test");
        std::env::set_var("RUNLOCK_KV_TIMEOUT_MS", "500");

        let config = KVConfig::from_env().unwrap();
        match config.backend {
            BackendType::Redis { url, namespace } => {
                assert_eq!(url, "redis://localhost:6379");
                assert_eq!(namespace, "test");
            }
            _ => panic!("Expected Redis backend"),
        }
        assert_eq!(config.op_timeout, Duration::from_millis(500));

        std::env::remove_var("RUNLOCK_KV_BACKEND");
        std::env::remove_var("RUNLOCK_REDIS_URL");
        std::env::remove_var("RUNLOCK_REDIS_NAMESPACE");
        std::env::remove_var("RUNLOCK_KV_TIMEOUT_MS");
    }

    #[test]
    #[serial]
    fn test_config_from_env_invalid_backend() {
        std::env::set_var("RUNLOCK_KV_BACKEND", "etcd");

        let result = KVConfig::from_env();
        match result {
            Err(e) => assert!(format!("{e}").contains("Unknown backend type")),
            Ok(_) => panic!("Expected error for invalid backend"),
        }

        std::env::remove_var("RUNLOCK_KV_BACKEND");
    }

    #[test]
    #[serial]
    fn test_config_from_env_invalid_timeout() {
        std::env::set_var("RUNLOCK_KV_TIMEOUT_MS", "soon");

        let result = KVConfig::from_env();
        assert!(result.is_err());

        std::env::remove_var("RUNLOCK_KV_TIMEOUT_MS");
    }

    #[tokio::test]
    async fn test_create_store_in_memory() {
        let store = create_store_from_config(KVConfig::new(BackendType::InMemory))
            .await
            .unwrap();

        assert!(store
            .conditional_set("k", "v", Duration::from_secs(5))
            .await
            .unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[test]
    fn test_create_blocking_store_in_memory() {
        let store = create_blocking_store_from_config(KVConfig::new(BackendType::InMemory)).unwrap();

        assert!(store.conditional_set("k", "v", Duration::from_secs(5)).unwrap());
        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));
    }
}
