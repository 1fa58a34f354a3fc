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

//! Error types for the task runner guard.
//!
//! Expected conditions (contention, task-logic failure, stale releases) are
//! NOT here — they travel inside [`RunOutcome`](crate::RunOutcome) or are
//! recovered locally. These variants are reserved for infrastructure
//! problems the guard cannot route around.

use thiserror::Error;

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur while guarding a task run.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The lock store was unreachable and the database fallback is disabled,
    /// so no mutex could be taken at all.
    #[error("lock store unavailable and database fallback disabled: {0}")]
    LockUnavailable(String),

    /// The lock store answered but misbehaved (not an unavailability; the
    /// fallback does not engage because the store's state is suspect).
    #[error("lock error: {0}")]
    Lock(String),

    /// Task repository (relational store) error.
    #[error("task repository error: {0}")]
    Repository(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for RunnerError {
    fn from(err: sqlx::Error) -> Self {
        RunnerError::Repository(format!("SQL error: {err}"))
    }
}
