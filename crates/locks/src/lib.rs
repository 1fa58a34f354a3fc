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

//! # runlock Lock Manager
//!
//! ## Purpose
//! Mutual exclusion across processes via tokenized, TTL-bounded keys in a
//! shared store. At most one live `(key, token)` pair exists for a key at any
//! instant; only the holder presenting the matching token may delete it.
//!
//! ## Design Decisions
//! - **Fresh token per attempt**: a 128-bit random value generated on every
//!   acquire; stale holders can never release a successor's lock.
//! - **TTL expiry**: an unreleased key self-expires, bounding the blast
//!   radius of a crashed holder. Default lease is one hour.
//! - **Contention is not an error**: a lost acquire returns `Ok(None)`; only
//!   store unavailability is an `Err`, because callers fall back to a
//!   different mutex on it.
//! - **Tolerant release**: releasing a lock you no longer hold is a logged
//!   no-op, and a release that cannot reach the store is a logged warning —
//!   the TTL finishes the job.
//! - **No retry, no queueing**: whichever conditional set reaches the store
//!   first wins; backoff policy belongs to callers.
//!
//! ## Examples
//! ```rust
//! use runlock_keyvalue::InMemoryKVStore;
//! use runlock_locks::{task_lock_key, LockManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = LockManager::new(Arc::new(InMemoryKVStore::new()));
//! let key = task_lock_key(42);
//!
//! if let Some(token) = manager.acquire(&key).await? {
//!     // ... protected section ...
//!     manager.release(&key, &token).await;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod manager;

pub use error::{LockError, LockResult};
pub use manager::{BlockingLockManager, LockManager, LockToken, DEFAULT_LOCK_TTL};

/// Build the canonical lock key for a task identifier: `task:<id>:lock`.
pub fn task_lock_key(task_id: i64) -> String {
    format!("task:{task_id}:lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_lock_key_convention() {
        assert_eq!(task_lock_key(11), "task:11:lock");
    }
}
