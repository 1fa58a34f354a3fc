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

//! Error types for distributed lock operations.

use runlock_keyvalue::KVError;
use thiserror::Error;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur during lock operations.
///
/// Contention is deliberately absent: a contended acquire is `Ok(None)`, not
/// an error, and the two must never be conflated because callers decide
/// between "refuse to run" and "fall back to the row mutex" based on which
/// one they see.
#[derive(Error, Debug)]
pub enum LockError {
    /// The underlying store could not be reached (or timed out). Callers may
    /// fall back to a secondary mutex.
    #[error("lock store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but the operation failed. Not a fallback trigger;
    /// the store's state is suspect rather than unreachable.
    #[error("lock backend error: {0}")]
    Backend(String),
}

impl From<KVError> for LockError {
    fn from(err: KVError) -> Self {
        match err {
            KVError::Unavailable(msg) => LockError::Unavailable(msg),
            other => LockError::Backend(other.to_string()),
        }
    }
}
