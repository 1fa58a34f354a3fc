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

//! Redis-based KeyValueStore implementations.
//!
//! ## Purpose
//! Provides the distributed backend for cross-process locking:
//! [`RedisKVStore`] for the async request path and [`RedisBlockingKVStore`]
//! for worker processes. Both speak the same wire commands, so holders on
//! either binding contend correctly with each other.
//!
//! ## Atomicity
//! - `conditional_set` is a single `SET key value NX EX ttl` command; the
//!   existence check, the write, and the TTL are one server-side operation.
//! - `compare_and_delete` is a Lua script (GET/compare/DEL) so two processes
//!   can never interleave between the check and the delete.
//!
//! ## Failure Classification
//! Connection failures and timeouts surface as [`KVError::Unavailable`].
//! Every round trip is bounded: `tokio::time::timeout` on the async binding,
//! socket read/write timeouts on the blocking one. A timeout is treated
//! identically to a refused connection.

use crate::{BlockingKeyValueStore, KVError, KVResult, KeyValueStore};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, RedisError, Script};
use std::future::Future;
use std::time::Duration;
use tracing::instrument;

/// Atomic delete-if-value-matches, server side.
const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

fn classify(err: RedisError) -> KVError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
    {
        KVError::Unavailable(format!("redis: {err}"))
    } else {
        KVError::BackendError(format!("redis: {err}"))
    }
}

/// Redis-based KeyValueStore for the async request path.
///
/// ## Architecture
/// - `redis` crate with async ConnectionManager (automatic reconnection)
/// - Namespace prefix so multiple deployments can share one Redis instance
/// - Native `EX` expiry; no manual TTL bookkeeping
pub struct RedisKVStore {
    manager: ConnectionManager,
    namespace: String,
    op_timeout: Duration,
}

impl RedisKVStore {
    /// Connect to Redis.
    ///
    /// ## Arguments
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `namespace` - key prefix for isolation (e.g., "runlock")
    /// * `op_timeout` - upper bound for any single round trip
    ///
    /// ## Errors
    /// [`KVError::Unavailable`] if the initial connection fails.
    pub async fn new(url: &str, namespace: &str, op_timeout: Duration) -> KVResult<Self> {
        let client = Client::open(url).map_err(classify)?;
        let manager = tokio::time::timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                KVError::Unavailable(format!("redis: connect to {url} exceeded {op_timeout:?}"))
            })?
            .map_err(classify)?;

        Ok(Self {
            manager,
            namespace: format!("{namespace}:"),
            op_timeout,
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T, RedisError>>) -> KVResult<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(classify(err)),
            Err(_) => Err(KVError::Unavailable(format!(
                "redis: round trip exceeded {:?}",
                self.op_timeout
            ))),
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisKVStore {
    #[instrument(skip(self, value))]
    async fn conditional_set(&self, key: &str, value: &str, ttl: Duration) -> KVResult<bool> {
        let mut conn = self.manager.clone();
        let prefixed = self.prefixed(key);
        let ttl_secs = ttl.as_secs().max(1);

        // SET NX EX replies OK when set, nil when the key existed.
        let reply: Option<String> = self
            .bounded(
                redis::cmd("SET")
                    .arg(&prefixed)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs)
                    .query_async(&mut conn),
            )
            .await?;

        Ok(reply.is_some())
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> KVResult<Option<String>> {
        let mut conn = self.manager.clone();
        let prefixed = self.prefixed(key);

        let value: Option<String> = self
            .bounded(redis::cmd("GET").arg(&prefixed).query_async(&mut conn))
            .await?;

        Ok(value)
    }

    #[instrument(skip(self, expected))]
    async fn compare_and_delete(&self, key: &str, expected: &str) -> KVResult<bool> {
        let mut conn = self.manager.clone();
        let prefixed = self.prefixed(key);
        let script = Script::new(COMPARE_AND_DELETE_SCRIPT);

        let deleted: i64 = self
            .bounded(script.key(&prefixed).arg(expected).invoke_async(&mut conn))
            .await?;

        Ok(deleted == 1)
    }
}

/// Redis-based KeyValueStore for blocking worker processes.
///
/// Each operation checks out a fresh connection with socket timeouts applied,
/// mirroring how short-lived worker jobs use the store. Commands and the
/// namespace scheme are byte-identical to [`RedisKVStore`].
pub struct RedisBlockingKVStore {
    client: Client,
    namespace: String,
    op_timeout: Duration,
}

impl RedisBlockingKVStore {
    /// Create a blocking Redis store. The connection is established lazily on
    /// first use; `op_timeout` bounds connect, read, and write.
    pub fn new(url: &str, namespace: &str, op_timeout: Duration) -> KVResult<Self> {
        let client = Client::open(url).map_err(classify)?;
        Ok(Self {
            client,
            namespace: format!("{namespace}:"),
            op_timeout,
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    fn connect(&self) -> KVResult<redis::Connection> {
        let conn = self
            .client
            .get_connection_with_timeout(self.op_timeout)
            .map_err(classify)?;
        conn.set_read_timeout(Some(self.op_timeout)).map_err(classify)?;
        conn.set_write_timeout(Some(self.op_timeout)).map_err(classify)?;
        Ok(conn)
    }
}

impl BlockingKeyValueStore for RedisBlockingKVStore {
    fn conditional_set(&self, key: &str, value: &str, ttl: Duration) -> KVResult<bool> {
        let mut conn = self.connect()?;
        let prefixed = self.prefixed(key);
        let ttl_secs = ttl.as_secs().max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(&prefixed)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query(&mut conn)
            .map_err(classify)?;

        Ok(reply.is_some())
    }

    fn get(&self, key: &str) -> KVResult<Option<String>> {
        let mut conn = self.connect()?;
        let prefixed = self.prefixed(key);

        let value: Option<String> = redis::cmd("GET")
            .arg(&prefixed)
            .query(&mut conn)
            .map_err(classify)?;

        Ok(value)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> KVResult<bool> {
        let mut conn = self.connect()?;
        let prefixed = self.prefixed(key);
        let script = Script::new(COMPARE_AND_DELETE_SCRIPT);

        let deleted: i64 = script
            .key(&prefixed)
            .arg(expected)
            .invoke(&mut conn)
            .map_err(classify)?;

        Ok(deleted == 1)
    }
}
