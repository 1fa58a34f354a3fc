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

//! # runlock Task Runner Guard
//!
//! ## Purpose
//! The single chokepoint every task execution passes through, regardless of
//! which process triggers it. An HTTP handler and a background worker must
//! never process the same logical task concurrently; this crate guarantees it
//! with a layered mutex:
//!
//! 1. Try the distributed lock (`task:<id>:lock` in the shared store).
//! 2. If the store is unreachable, fall back to an atomic conditional update
//!    on the task row's status field in the relational store.
//! 3. Release whichever mutex was taken exactly once — on success, failure,
//!    panic, and cancellation alike.
//!
//! ## Entry Points
//! - [`TaskRunner::try_run`]: async guard for the request-handling path
//! - [`WorkerRunner::run_task`]: blocking guard for worker processes
//!
//! Both produce a [`RunOutcome`]: `Ran` (the task executed), `Rejected`
//! (another runner holds the task — an expected condition, not an error), or
//! `Failed` (the task logic itself errored; the mutex was still released).
//!
//! ## Collaborator Boundaries
//! The relational store is reached only through [`TaskRepository`], and
//! status broadcasts go through [`Notifier`]; both are injected so tests can
//! substitute fakes and no global client handles exist anywhere.
//!
//! ## Example
//! ```rust
//! use runlock_keyvalue::InMemoryKVStore;
//! use runlock_locks::LockManager;
//! use runlock_runner::{NoopNotifier, RunOutcome, SqliteTaskRepository, TaskRunner};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = Arc::new(SqliteTaskRepository::new("sqlite::memory:").await?);
//! repo.insert_task(7, "reindex").await?;
//!
//! let runner = TaskRunner::new(
//!     LockManager::new(Arc::new(InMemoryKVStore::new())),
//!     repo,
//!     Arc::new(NoopNotifier),
//! );
//!
//! let outcome = runner.try_run(7, async { Ok::<_, anyhow::Error>(42) }).await?;
//! assert!(matches!(outcome, RunOutcome::Ran(42)));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod guard;
pub mod notify;
pub mod repository;
pub mod worker;

pub use config::RunnerConfig;
pub use error::{RunnerError, RunnerResult};
pub use guard::{RejectReason, RunOutcome, TaskRunner};
pub use notify::{BroadcastNotifier, NoopNotifier, Notifier, TaskEvent};
pub use repository::{SqliteTaskRepository, TaskRepository, TaskStatus};
pub use worker::WorkerRunner;
