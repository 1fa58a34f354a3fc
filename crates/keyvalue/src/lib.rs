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

//! # runlock KeyValue Store
//!
//! ## Purpose
//! Provides the minimal key-value primitive the runlock lock manager needs:
//! an atomic set-if-absent with TTL, a plain read, and an atomic
//! compare-and-delete. Nothing store-specific leaks above this crate.
//!
//! ## Architecture Context
//! Two processes with different concurrency models contend on the same keys:
//! an async HTTP service and one or more blocking background workers. Both
//! must observe identical atomicity, so the crate exposes the same three
//! operations through two traits:
//!
//! - [`KeyValueStore`]: non-blocking (async) binding for the request path
//! - [`BlockingKeyValueStore`]: thread-blocking binding for worker processes
//!
//! ## Error Contract
//! "The store said no" and "the store did not answer" are different things
//! and callers depend on telling them apart:
//!
//! - `Ok(false)` from [`conditional_set`](KeyValueStore::conditional_set) is
//!   contention — the operation executed and the key already existed.
//! - [`KVError::Unavailable`] is a transport failure or a round-trip timeout.
//!   Callers use it to decide whether to fall back to a secondary mutex.
//!
//! ## Backend Support
//! - **InMemory**: mutex-guarded map with lazy TTL expiry (always available)
//! - **Redis**: distributed, native TTL (feature: `redis-backend`)
//!
//! ## Examples
//! ```rust
//! use runlock_keyvalue::{InMemoryKVStore, KeyValueStore};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let kv = InMemoryKVStore::new();
//!
//! let set = kv.conditional_set("task:7:lock", "token-a", Duration::from_secs(60)).await?;
//! assert!(set);
//!
//! // Second conditional set loses: the key exists.
//! let set = kv.conditional_set("task:7:lock", "token-b", Duration::from_secs(60)).await?;
//! assert!(!set);
//!
//! // Only the matching value may delete.
//! assert!(!kv.compare_and_delete("task:7:lock", "token-b").await?);
//! assert!(kv.compare_and_delete("task:7:lock", "token-a").await?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use std::time::Duration;

pub mod config;
pub mod error;
pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

pub use config::{
    create_blocking_store_from_config, create_store_from_config, BackendType, KVConfig,
};
pub use error::{KVError, KVResult};
pub use memory::InMemoryKVStore;

#[cfg(feature = "redis-backend")]
pub use redis::{RedisBlockingKVStore, RedisKVStore};

/// Non-blocking key-value binding used by the request-handling path.
///
/// ## Design Decisions
/// - **No exists-then-set**: `conditional_set` is a single atomic operation
///   at the store; a separate existence probe would reopen the race this
///   crate exists to close.
/// - **Values are opaque strings**: the lock layer stores ownership tokens,
///   nothing else.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Set `key = value` only if `key` does not currently exist, applying
    /// `ttl` atomically with the set.
    ///
    /// ## Returns
    /// - `Ok(true)`: the key was set and is now owned by `value`
    /// - `Ok(false)`: the key already existed (contention, not an error)
    /// - `Err(KVError::Unavailable)`: the store could not be reached in time
    async fn conditional_set(&self, key: &str, value: &str, ttl: Duration) -> KVResult<bool>;

    /// Read the current value of `key` without touching its TTL.
    async fn get(&self, key: &str) -> KVResult<Option<String>>;

    /// Delete `key` only if its current value equals `expected`, as a single
    /// atomic server-side operation.
    ///
    /// ## Returns
    /// - `Ok(true)`: the key was deleted
    /// - `Ok(false)`: the value did not match (or the key was gone already)
    async fn compare_and_delete(&self, key: &str, expected: &str) -> KVResult<bool>;
}

/// Thread-blocking key-value binding used by background worker processes.
///
/// Semantics are identical to [`KeyValueStore`] operation for operation; only
/// the concurrency model differs. A worker using this trait and an API
/// instance using the async trait contend correctly with each other because
/// both speak the same store protocol.
pub trait BlockingKeyValueStore: Send + Sync {
    /// Blocking form of [`KeyValueStore::conditional_set`].
    fn conditional_set(&self, key: &str, value: &str, ttl: Duration) -> KVResult<bool>;

    /// Blocking form of [`KeyValueStore::get`].
    fn get(&self, key: &str) -> KVResult<Option<String>>;

    /// Blocking form of [`KeyValueStore::compare_and_delete`].
    fn compare_and_delete(&self, key: &str, expected: &str) -> KVResult<bool>;
}
