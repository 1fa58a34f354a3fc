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

//! Async task runner guard for the request-handling path.
//!
//! ## Protocol
//! [`TaskRunner::try_run`] wraps one task execution in a mutex:
//!
//! 1. Acquire `task:<id>:lock` in the shared store. Contention rejects the
//!    attempt without touching the database.
//! 2. If the store is unreachable, degrade to the task row itself: one atomic
//!    conditional update on `status` becomes the mutex. Contention and
//!    unreachability are distinct signals; only the latter degrades.
//! 3. Run the task future, then release exactly the mutex that was taken.
//!    Release happens on success, task failure, and cancellation alike. For
//!    the distributed lock a stale token makes release a no-op, so a lock
//!    lost to TTL expiry is never stolen back from its new holder.
//!
//! Cancellation safety comes from a drop guard: if the `try_run` future is
//! dropped mid-execution, the guard spawns the release onto the still-running
//! runtime instead of blocking in `Drop`.

use crate::notify::{Notifier, TaskEvent};
use crate::repository::{TaskRepository, TaskStatus};
use crate::{RunnerConfig, RunnerError, RunnerResult};
use runlock_keyvalue::create_store_from_config;
use runlock_locks::{task_lock_key, LockError, LockManager, LockToken};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, instrument, warn};

/// Why a run attempt was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Another runner currently holds the task, via the distributed lock or
    /// the status row.
    AlreadyRunning,
    /// The lock store was unreachable and the database fallback could not
    /// take the row either (the conditional update itself errored).
    FallbackFailed(String),
}

/// Outcome of a guarded run attempt.
#[derive(Debug)]
pub enum RunOutcome<T> {
    /// The task executed to completion and produced a value.
    Ran(T),
    /// The attempt was refused before the task ran. Expected under
    /// concurrent submission, not an error.
    Rejected(RejectReason),
    /// The task logic itself errored. The mutex was released and the task
    /// was marked `failed`; a later attempt may run it again.
    Failed(anyhow::Error),
}

impl<T> RunOutcome<T> {
    /// True when the task actually executed and succeeded.
    pub fn is_ran(&self) -> bool {
        matches!(self, RunOutcome::Ran(_))
    }

    /// True when the attempt was refused without running the task.
    pub fn is_rejected(&self) -> bool {
        matches!(self, RunOutcome::Rejected(_))
    }
}

/// Which mutex this run attempt holds.
enum Held {
    /// Distributed lock in the shared store.
    Distributed { key: String, token: LockToken },
    /// The task row's own status field, taken by conditional update.
    StatusRow,
}

/// Releases the held mutex if `try_run` never reaches its explicit release,
/// which happens when the future is cancelled (dropped mid-await).
///
/// `Drop` cannot await, so the release is spawned onto the current runtime.
/// If no runtime is left (process teardown) the distributed lock is left to
/// its TTL and the row to operator repair, with a warning either way.
struct CleanupGuard {
    task_id: i64,
    locks: LockManager,
    repo: Arc<dyn TaskRepository>,
    held: Option<Held>,
}

impl CleanupGuard {
    fn disarm(&mut self) -> Option<Held> {
        self.held.take()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };

        let task_id = self.task_id;
        let locks = self.locks.clone();
        let repo = Arc::clone(&self.repo);

        match Handle::try_current() {
            Ok(handle) => {
                warn!(task_id, "run cancelled before completion; releasing mutex");
                handle.spawn(async move {
                    // A cancelled run is a failed run. On the fallback path
                    // this write is also the row release.
                    if let Err(err) = repo.mark_finished(task_id, TaskStatus::Failed).await {
                        warn!(task_id, error = %err, "failed to mark cancelled task");
                    }
                    if let Held::Distributed { key, token } = held {
                        locks.release(&key, &token).await;
                    }
                });
            }
            Err(_) => {
                warn!(
                    task_id,
                    "no runtime to release mutex on; lock will expire via TTL"
                );
            }
        }
    }
}

/// Async guard serializing executions of a task across processes.
///
/// Cheap to clone; handlers typically hold one per application state.
#[derive(Clone)]
pub struct TaskRunner {
    locks: LockManager,
    repo: Arc<dyn TaskRepository>,
    notifier: Arc<dyn Notifier>,
    fallback_enabled: bool,
}

impl TaskRunner {
    /// Create a runner with the database fallback enabled.
    pub fn new(
        locks: LockManager,
        repo: Arc<dyn TaskRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            locks,
            repo,
            notifier,
            fallback_enabled: true,
        }
    }

    /// Toggle the database fallback. With the fallback disabled, an
    /// unreachable lock store makes `try_run` fail with
    /// [`RunnerError::LockUnavailable`] instead of degrading.
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    /// Build a runner from [`RunnerConfig`], constructing the configured
    /// key-value store.
    pub async fn from_config(
        config: &RunnerConfig,
        repo: Arc<dyn TaskRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> RunnerResult<Self> {
        let store = create_store_from_config(config.kv.clone())
            .await
            .map_err(|e| RunnerError::Config(format!("failed to create lock store: {e}")))?;
        let locks = LockManager::with_ttl(store, config.lock_ttl);
        Ok(Self::new(locks, repo, notifier).with_fallback(config.fallback_enabled))
    }

    /// Run `task` for `task_id` under the single-runner guarantee.
    ///
    /// ## Returns
    /// - `Ok(RunOutcome::Ran(value))`: this attempt held the mutex and the
    ///   task succeeded
    /// - `Ok(RunOutcome::Rejected(_))`: another runner holds the task, or
    ///   the degraded path could not take the row
    /// - `Ok(RunOutcome::Failed(_))`: the task logic errored; the task is
    ///   marked `failed` and the mutex is released
    /// - `Err(_)`: infrastructure refused in a way the guard cannot route
    ///   around (fallback disabled, or the lock store misbehaved)
    #[instrument(skip(self, task))]
    pub async fn try_run<T, F>(&self, task_id: i64, task: F) -> RunnerResult<RunOutcome<T>>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let key = task_lock_key(task_id);

        let held = match self.locks.acquire(&key).await {
            Ok(Some(token)) => Held::Distributed { key, token },
            Ok(None) => {
                debug!(task_id, "task already locked; rejecting run");
                self.notifier.notify(task_id, TaskEvent::Rejected).await;
                return Ok(RunOutcome::Rejected(RejectReason::AlreadyRunning));
            }
            Err(LockError::Unavailable(reason)) => {
                if !self.fallback_enabled {
                    return Err(RunnerError::LockUnavailable(reason));
                }
                warn!(task_id, reason, "lock store unavailable; degrading to row mutex");
                match self.repo.try_mark_running(task_id).await {
                    Ok(true) => Held::StatusRow,
                    Ok(false) => {
                        debug!(task_id, "row mutex held elsewhere; rejecting run");
                        self.notifier.notify(task_id, TaskEvent::Rejected).await;
                        return Ok(RunOutcome::Rejected(RejectReason::AlreadyRunning));
                    }
                    Err(err) => {
                        warn!(task_id, error = %err, "row mutex unavailable too; rejecting run");
                        self.notifier.notify(task_id, TaskEvent::Rejected).await;
                        return Ok(RunOutcome::Rejected(RejectReason::FallbackFailed(
                            err.to_string(),
                        )));
                    }
                }
            }
            Err(LockError::Backend(reason)) => {
                // The store answered but its state is suspect; taking the row
                // here could mean two mutexes for one task.
                return Err(RunnerError::Lock(reason));
            }
        };

        // Armed the moment the mutex exists, before any further await point:
        // a cancellation from here on always reaches the release path.
        let mut guard = CleanupGuard {
            task_id,
            locks: self.locks.clone(),
            repo: Arc::clone(&self.repo),
            held: Some(held),
        };

        if matches!(guard.held, Some(Held::Distributed { .. })) {
            // Exclusion is already guaranteed by the token; this status
            // write is informational and must not abort the run.
            if let Err(err) = self.repo.mark_running(task_id).await {
                warn!(task_id, error = %err, "could not record running status");
            }
        }

        self.notifier.notify(task_id, TaskEvent::Started).await;

        let result = task.await;

        // Past the await: this attempt completed, so the drop guard must not
        // fire a second release.
        let held = guard.disarm();
        drop(guard);

        let (status, outcome) = match result {
            Ok(value) => (TaskStatus::Done, RunOutcome::Ran(value)),
            Err(err) => (TaskStatus::Failed, RunOutcome::Failed(err)),
        };

        // On the row path this write IS the release; on the lock path it is
        // advisory and the compare-and-delete below does the releasing.
        if let Err(err) = self.repo.mark_finished(task_id, status).await {
            warn!(task_id, error = %err, "could not record terminal status");
        }
        if let Some(Held::Distributed { key, token }) = held {
            self.locks.release(&key, &token).await;
        }

        self.notifier
            .notify(task_id, TaskEvent::Finished { status })
            .await;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopNotifier;
    use crate::repository::SqliteTaskRepository;
    use runlock_keyvalue::InMemoryKVStore;

    async fn runner_with_repo() -> (TaskRunner, Arc<SqliteTaskRepository>) {
        let repo = Arc::new(SqliteTaskRepository::new("sqlite::memory:").await.unwrap());
        let runner = TaskRunner::new(
            LockManager::new(Arc::new(InMemoryKVStore::new())),
            repo.clone(),
            Arc::new(NoopNotifier),
        );
        (runner, repo)
    }

    #[tokio::test]
    async fn test_successful_run_marks_done_and_releases() {
        let (runner, repo) = runner_with_repo().await;
        repo.insert_task(1, "t").await.unwrap();

        let outcome = runner
            .try_run(1, async { Ok::<_, anyhow::Error>("out") })
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Ran("out")));
        assert_eq!(repo.status(1).await.unwrap(), Some(TaskStatus::Done));

        // The lock is free again.
        let outcome = runner
            .try_run(1, async { Ok::<_, anyhow::Error>("again") })
            .await
            .unwrap();
        assert!(outcome.is_ran());
    }

    #[tokio::test]
    async fn test_failed_task_marks_failed_and_releases() {
        let (runner, repo) = runner_with_repo().await;
        repo.insert_task(1, "t").await.unwrap();

        let outcome = runner
            .try_run(1, async { Err::<(), _>(anyhow::anyhow!("boom")) })
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Failed(_)));
        assert_eq!(repo.status(1).await.unwrap(), Some(TaskStatus::Failed));

        // Failure released the mutex: a rerun is accepted immediately.
        let outcome = runner
            .try_run(1, async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        assert!(outcome.is_ran());
    }

    #[tokio::test]
    async fn test_contended_task_is_rejected_not_errored() {
        let (runner, repo) = runner_with_repo().await;
        repo.insert_task(1, "t").await.unwrap();

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let runner = runner.clone();
            tokio::spawn(async move {
                runner
                    .try_run(1, async move {
                        started_tx.send(()).ok();
                        release_rx.await.ok();
                        Ok::<_, anyhow::Error>(())
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        let outcome = runner
            .try_run(1, async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Rejected(RejectReason::AlreadyRunning)
        ));

        release_tx.send(()).unwrap();
        assert!(holder.await.unwrap().unwrap().is_ran());
    }
}
