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

//! Lock manager integration tests.
//!
//! These tests verify:
//! - The mutual-exclusion invariant under concurrent acquire races
//! - TTL expiry making an unreleased lock acquirable again
//! - Propagation of store unavailability as a distinct condition

use async_trait::async_trait;
use futures::future::join_all;
use runlock_keyvalue::{InMemoryKVStore, KVError, KVResult, KeyValueStore};
use runlock_locks::{task_lock_key, LockError, LockManager};
use std::sync::Arc;
use std::time::Duration;

/// Store double simulating a network partition: every call fails closed.
struct UnavailableStore;

#[async_trait]
impl KeyValueStore for UnavailableStore {
    async fn conditional_set(&self, _key: &str, _value: &str, _ttl: Duration) -> KVResult<bool> {
        Err(KVError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _key: &str) -> KVResult<Option<String>> {
        Err(KVError::Unavailable("connection refused".to_string()))
    }

    async fn compare_and_delete(&self, _key: &str, _expected: &str) -> KVResult<bool> {
        Err(KVError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_racing_acquires_yield_exactly_one_winner() {
    let manager = LockManager::new(Arc::new(InMemoryKVStore::new()));
    let key = task_lock_key(11);

    let attempts = (0..16).map(|_| {
        let manager = manager.clone();
        let key = key.clone();
        tokio::spawn(async move { manager.acquire(&key).await.unwrap() })
    });

    let outcomes: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = outcomes.iter().filter(|o| o.is_some()).count();
    assert_eq!(winners, 1, "exactly one acquire may win the race");
    assert_eq!(outcomes.len() - winners, 15);
}

#[tokio::test]
async fn test_unreleased_lock_expires_via_ttl() {
    let manager = LockManager::new(Arc::new(InMemoryKVStore::new()));
    let key = task_lock_key(12);

    let _abandoned = manager
        .acquire_with_ttl(&key, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    // Before expiry the lock is still held.
    assert!(manager.acquire(&key).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(1100)).await;

    // After expiry a second caller may take over.
    assert!(manager.acquire(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_unavailable_store_is_not_reported_as_contention() {
    let manager = LockManager::new(Arc::new(UnavailableStore));

    match manager.acquire(&task_lock_key(13)).await {
        Err(LockError::Unavailable(_)) => {}
        Err(e) => panic!("expected Unavailable, got {e}"),
        Ok(outcome) => panic!("expected Unavailable, got {outcome:?}"),
    }
}

#[tokio::test]
async fn test_release_on_unavailable_store_does_not_panic() {
    let healthy = LockManager::new(Arc::new(InMemoryKVStore::new()));
    let key = task_lock_key(14);
    let token = healthy.acquire(&key).await.unwrap().unwrap();

    // Release through a partitioned store: must warn-and-return, not fail.
    let partitioned = LockManager::new(Arc::new(UnavailableStore));
    partitioned.release(&key, &token).await;
}
