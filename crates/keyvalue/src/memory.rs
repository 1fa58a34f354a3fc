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

//! In-memory KeyValue store implementation.
//!
//! ## Purpose
//! Provides a map-based implementation for testing and single-process
//! deployments. Implements both the async and the blocking trait over the
//! same data, so a test can exercise the two call paths against one store.
//!
//! ## Limitations
//! - Not persistent (data lost on restart)
//! - Not distributed (single process only)
//! - TTL expiry is lazy: expired entries are dropped when next observed

use crate::{BlockingKeyValueStore, KVResult, KeyValueStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Entry in the in-memory store with its expiry deadline.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory KeyValue store implementation.
///
/// ## Example
/// ```rust
/// use runlock_keyvalue::{InMemoryKVStore, KeyValueStore};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let kv = InMemoryKVStore::new();
/// assert!(kv.conditional_set("key", "value", Duration::from_secs(5)).await?);
/// assert_eq!(kv.get("key").await?, Some("value".to_string()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryKVStore {
    data: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryKVStore {
    /// Create a new in-memory KeyValue store.
    pub fn new() -> Self {
        Self::default()
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let mut data = self.data.lock();
        match data.get(key) {
            Some(entry) if !entry.is_expired() => false,
            _ => {
                data.insert(key.to_string(), Entry::new(value, ttl));
                true
            }
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        let mut data = self.data.lock();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    fn delete_if_matches(&self, key: &str, expected: &str) -> bool {
        let mut data = self.data.lock();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                false
            }
            Some(entry) if entry.value == expected => {
                data.remove(key);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKVStore {
    async fn conditional_set(&self, key: &str, value: &str, ttl: Duration) -> KVResult<bool> {
        Ok(self.set_if_absent(key, value, ttl))
    }

    async fn get(&self, key: &str) -> KVResult<Option<String>> {
        Ok(self.read(key))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> KVResult<bool> {
        Ok(self.delete_if_matches(key, expected))
    }
}

impl BlockingKeyValueStore for InMemoryKVStore {
    fn conditional_set(&self, key: &str, value: &str, ttl: Duration) -> KVResult<bool> {
        Ok(self.set_if_absent(key, value, ttl))
    }

    fn get(&self, key: &str) -> KVResult<Option<String>> {
        Ok(self.read(key))
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> KVResult<bool> {
        Ok(self.delete_if_matches(key, expected))
    }
}
