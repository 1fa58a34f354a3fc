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

//! Acquire/release semantics over the key-value abstraction.
//!
//! Two flavors with identical observable behavior: [`LockManager`] suspends
//! on store round trips (request path), [`BlockingLockManager`] blocks the
//! calling thread (worker path). Both can hold the same keys against each
//! other when pointed at the same store.

use crate::{LockError, LockResult};
use runlock_keyvalue::{BlockingKeyValueStore, KeyValueStore};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default lease duration for an acquired lock.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(3600);

/// Proof of lock ownership: a 128-bit random value generated fresh on every
/// acquire attempt and stored as the key's value. Only the holder presenting
/// the matching token may delete the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The token's wire form, as stored in the key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Async lock manager for the request-handling path.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn KeyValueStore>,
    default_ttl: Duration,
}

impl LockManager {
    /// Create a lock manager with the default one-hour TTL.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(store, DEFAULT_LOCK_TTL)
    }

    /// Create a lock manager with an explicit default TTL.
    pub fn with_ttl(store: Arc<dyn KeyValueStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Attempt to acquire `key` with the manager's default TTL.
    ///
    /// ## Returns
    /// - `Ok(Some(token))`: lock acquired; the caller owns it until release
    ///   or TTL expiry
    /// - `Ok(None)`: another holder is active (contention, not an error)
    /// - `Err(LockError::Unavailable)`: the store did not answer; the caller
    ///   may fall back to a secondary mutex
    pub async fn acquire(&self, key: &str) -> LockResult<Option<LockToken>> {
        self.acquire_with_ttl(key, self.default_ttl).await
    }

    /// Attempt to acquire `key` with an explicit TTL.
    pub async fn acquire_with_ttl(&self, key: &str, ttl: Duration) -> LockResult<Option<LockToken>> {
        let token = LockToken::generate();
        match self.store.conditional_set(key, token.as_str(), ttl).await {
            Ok(true) => {
                debug!(key, ttl_secs = ttl.as_secs(), "lock acquired");
                Ok(Some(token))
            }
            Ok(false) => {
                debug!(key, "lock contended");
                Ok(None)
            }
            Err(err) => Err(LockError::from(err)),
        }
    }

    /// Release `key` if `token` still owns it.
    ///
    /// Never fails: a token mismatch means the TTL expired and someone else
    /// may hold the key now — deleting it would corrupt their lock, so the
    /// release is skipped and logged. A store failure is logged too; the TTL
    /// will reap the key.
    pub async fn release(&self, key: &str, token: &LockToken) {
        match self.store.compare_and_delete(key, token.as_str()).await {
            Ok(true) => debug!(key, "lock released"),
            Ok(false) => warn!(key, "lock no longer held by this token; release skipped"),
            Err(err) => warn!(key, error = %err, "lock release failed; key will expire via TTL"),
        }
    }
}

/// Blocking lock manager for worker processes.
///
/// Same protocol and key/token shapes as [`LockManager`]; acquire and release
/// block the calling thread for the store round trip.
#[derive(Clone)]
pub struct BlockingLockManager {
    store: Arc<dyn BlockingKeyValueStore>,
    default_ttl: Duration,
}

impl BlockingLockManager {
    /// Create a blocking lock manager with the default one-hour TTL.
    pub fn new(store: Arc<dyn BlockingKeyValueStore>) -> Self {
        Self::with_ttl(store, DEFAULT_LOCK_TTL)
    }

    /// Create a blocking lock manager with an explicit default TTL.
    pub fn with_ttl(store: Arc<dyn BlockingKeyValueStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Blocking form of [`LockManager::acquire`].
    pub fn acquire(&self, key: &str) -> LockResult<Option<LockToken>> {
        self.acquire_with_ttl(key, self.default_ttl)
    }

    /// Blocking form of [`LockManager::acquire_with_ttl`].
    pub fn acquire_with_ttl(&self, key: &str, ttl: Duration) -> LockResult<Option<LockToken>> {
        let token = LockToken::generate();
        match self.store.conditional_set(key, token.as_str(), ttl) {
            Ok(true) => {
                debug!(key, ttl_secs = ttl.as_secs(), "lock acquired");
                Ok(Some(token))
            }
            Ok(false) => {
                debug!(key, "lock contended");
                Ok(None)
            }
            Err(err) => Err(LockError::from(err)),
        }
    }

    /// Blocking form of [`LockManager::release`].
    pub fn release(&self, key: &str, token: &LockToken) {
        match self.store.compare_and_delete(key, token.as_str()) {
            Ok(true) => debug!(key, "lock released"),
            Ok(false) => warn!(key, "lock no longer held by this token; release skipped"),
            Err(err) => warn!(key, error = %err, "lock release failed; key will expire via TTL"),
        }
    }
}
