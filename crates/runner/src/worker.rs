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

//! Blocking task runner guard for worker processes.
//!
//! ## Purpose
//! Same single-runner protocol as [`TaskRunner`](crate::TaskRunner), shaped
//! for processes whose task slots are plain threads: the lock round trips
//! block the calling thread, and the task body is a closure, not a future.
//! The repository and notifier stay async behind a private current-thread
//! runtime, so both paths share one set of collaborator traits.
//!
//! ## Release Ordering
//! The mutex is released as soon as the task body returns, before any
//! activity records are written. Activity persistence is best-effort output,
//! not part of the critical section, and must never extend it.

use crate::guard::{RejectReason, RunOutcome};
use crate::notify::{Notifier, TaskEvent};
use crate::repository::{TaskRepository, TaskStatus};
use crate::{RunnerConfig, RunnerError, RunnerResult};
use runlock_keyvalue::create_blocking_store_from_config;
use runlock_locks::{task_lock_key, BlockingLockManager, LockError, LockToken};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{info, instrument, warn};

enum Held {
    Distributed { key: String, token: LockToken },
    StatusRow,
}

/// Releases the held mutex inline if anything panics between the mutex being
/// taken and the explicit release. Unlike the async guard this can release
/// directly: a worker thread unwinding is free to block.
struct Cleanup<'a> {
    runner: &'a WorkerRunner,
    task_id: i64,
    held: Option<Held>,
}

impl Cleanup<'_> {
    fn disarm(&mut self) -> Option<Held> {
        self.held.take()
    }
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };

        warn!(task_id = self.task_id, "run aborted before completion; releasing mutex");
        if let Err(err) = self
            .runner
            .rt
            .block_on(self.runner.repo.mark_finished(self.task_id, TaskStatus::Failed))
        {
            warn!(task_id = self.task_id, error = %err, "failed to mark panicked task");
        }
        if let Held::Distributed { key, token } = held {
            self.runner.locks.release(&key, &token);
        }
    }
}

/// Blocking guard serializing task executions from worker threads.
///
/// Point it at the same lock store and task database as the async runners in
/// other processes and the two paths exclude each other.
pub struct WorkerRunner {
    locks: BlockingLockManager,
    repo: Arc<dyn TaskRepository>,
    notifier: Arc<dyn Notifier>,
    fallback_enabled: bool,
    rt: Runtime,
}

impl WorkerRunner {
    /// Create a worker runner with the database fallback enabled.
    pub fn new(
        locks: BlockingLockManager,
        repo: Arc<dyn TaskRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> RunnerResult<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RunnerError::Config(format!("failed to build worker runtime: {e}")))?;
        Ok(Self {
            locks,
            repo,
            notifier,
            fallback_enabled: true,
            rt,
        })
    }

    /// Toggle the database fallback, as on the async runner.
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    /// Build a worker runner from [`RunnerConfig`], constructing the
    /// configured blocking key-value store.
    pub fn from_config(
        config: &RunnerConfig,
        repo: Arc<dyn TaskRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> RunnerResult<Self> {
        let store = create_blocking_store_from_config(config.kv.clone())
            .map_err(|e| RunnerError::Config(format!("failed to create lock store: {e}")))?;
        let locks = BlockingLockManager::with_ttl(store, config.lock_ttl);
        Ok(Self::new(locks, repo, notifier)?.with_fallback(config.fallback_enabled))
    }

    /// Run `job` for `task_id` under the single-runner guarantee, blocking
    /// until it finishes.
    ///
    /// `job` returns the activity records the run produced; they are written
    /// to the repository after the mutex is released and returned in
    /// [`RunOutcome::Ran`].
    #[instrument(skip(self, job))]
    pub fn run_task<F>(&self, task_id: i64, job: F) -> RunnerResult<RunOutcome<Vec<String>>>
    where
        F: FnOnce() -> anyhow::Result<Vec<String>>,
    {
        let key = task_lock_key(task_id);

        let held = match self.locks.acquire(&key) {
            Ok(Some(token)) => Held::Distributed { key, token },
            Ok(None) => {
                info!(task_id, "task already locked; skipping run");
                self.rt
                    .block_on(self.notifier.notify(task_id, TaskEvent::Rejected));
                return Ok(RunOutcome::Rejected(RejectReason::AlreadyRunning));
            }
            Err(LockError::Unavailable(reason)) => {
                if !self.fallback_enabled {
                    return Err(RunnerError::LockUnavailable(reason));
                }
                warn!(task_id, reason, "lock store unavailable; degrading to row mutex");
                match self.rt.block_on(self.repo.try_mark_running(task_id)) {
                    Ok(true) => Held::StatusRow,
                    Ok(false) => {
                        info!(task_id, "row mutex held elsewhere; skipping run");
                        self.rt
                            .block_on(self.notifier.notify(task_id, TaskEvent::Rejected));
                        return Ok(RunOutcome::Rejected(RejectReason::AlreadyRunning));
                    }
                    Err(err) => {
                        warn!(task_id, error = %err, "row mutex unavailable too; skipping run");
                        self.rt
                            .block_on(self.notifier.notify(task_id, TaskEvent::Rejected));
                        return Ok(RunOutcome::Rejected(RejectReason::FallbackFailed(
                            err.to_string(),
                        )));
                    }
                }
            }
            Err(LockError::Backend(reason)) => {
                return Err(RunnerError::Lock(reason));
            }
        };

        // Armed the moment the mutex exists: a panic in the advisory status
        // write or the notifier still reaches the release path.
        let mut cleanup = Cleanup {
            runner: self,
            task_id,
            held: Some(held),
        };

        if matches!(cleanup.held, Some(Held::Distributed { .. })) {
            if let Err(err) = self.rt.block_on(self.repo.mark_running(task_id)) {
                warn!(task_id, error = %err, "could not record running status");
            }
        }

        self.rt
            .block_on(self.notifier.notify(task_id, TaskEvent::Started));

        let result = job();

        let held = cleanup.disarm();
        drop(cleanup);

        let (status, activities) = match &result {
            Ok(activities) => (TaskStatus::Done, activities.clone()),
            Err(_) => (TaskStatus::Failed, Vec::new()),
        };

        if let Err(err) = self.rt.block_on(self.repo.mark_finished(task_id, status)) {
            warn!(task_id, error = %err, "could not record terminal status");
        }
        if let Some(Held::Distributed { key, token }) = held {
            self.locks.release(&key, &token);
        }

        // Outside the critical section from here on.
        for content in &activities {
            if let Err(err) = self.rt.block_on(self.repo.record_activity(task_id, content)) {
                warn!(task_id, error = %err, "failed to record activity");
            }
        }

        self.rt
            .block_on(self.notifier.notify(task_id, TaskEvent::Finished { status }));

        match result {
            Ok(activities) => Ok(RunOutcome::Ran(activities)),
            Err(err) => Ok(RunOutcome::Failed(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopNotifier;
    use crate::repository::SqliteTaskRepository;
    use async_trait::async_trait;
    use runlock_keyvalue::InMemoryKVStore;

    /// Notifier double whose transport dies on the first event.
    struct PanickingNotifier;

    #[async_trait]
    impl Notifier for PanickingNotifier {
        async fn notify(&self, _task_id: i64, event: TaskEvent) {
            if event == TaskEvent::Started {
                panic!("notification transport gone");
            }
        }
    }

    // The runner must own the runtime the repository was created on: sqlx
    // returns pool connections via a task spawned on the creating runtime, so
    // splitting repo creation and use across runtimes loses the in-memory
    // database (or deadlocks pool acquires) depending on scheduling.
    fn runner_with_notifier(notifier: Arc<dyn Notifier>) -> (WorkerRunner, Arc<SqliteTaskRepository>, Arc<InMemoryKVStore>) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let repo = Arc::new(rt.block_on(SqliteTaskRepository::new("sqlite::memory:")).unwrap());
        let store = Arc::new(InMemoryKVStore::new());
        let runner = WorkerRunner {
            locks: BlockingLockManager::new(store.clone()),
            repo: repo.clone(),
            notifier,
            fallback_enabled: true,
            rt,
        };
        (runner, repo, store)
    }

    fn setup() -> (WorkerRunner, Arc<SqliteTaskRepository>, Arc<InMemoryKVStore>) {
        runner_with_notifier(Arc::new(NoopNotifier))
    }

    #[test]
    fn test_run_task_records_activities_and_done() {
        let (runner, repo, _store) = setup();
        runner.rt.block_on(repo.insert_task(1, "t")).unwrap();

        let outcome = runner
            .run_task(1, || Ok(vec!["step one".to_string(), "step two".to_string()]))
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Ran(ref a) if a.len() == 2));

        assert_eq!(
            runner.rt.block_on(repo.status(1)).unwrap(),
            Some(TaskStatus::Done)
        );
        assert_eq!(
            runner.rt.block_on(repo.activities(1)).unwrap(),
            vec!["step one".to_string(), "step two".to_string()]
        );
    }

    #[test]
    fn test_failed_job_marks_failed_and_frees_lock() {
        let (runner, repo, store) = setup();
        runner.rt.block_on(repo.insert_task(1, "t")).unwrap();

        let outcome = runner.run_task(1, || Err(anyhow::anyhow!("boom"))).unwrap();
        assert!(matches!(outcome, RunOutcome::Failed(_)));
        assert_eq!(
            runner.rt.block_on(repo.status(1)).unwrap(),
            Some(TaskStatus::Failed)
        );

        // The lock key is gone; a rerun proceeds.
        let blocking = BlockingLockManager::new(store);
        let token = blocking.acquire(&task_lock_key(1)).unwrap();
        assert!(token.is_some());
    }

    #[test]
    fn test_contended_task_is_skipped() {
        let (runner, repo, store) = setup();
        runner.rt.block_on(repo.insert_task(1, "t")).unwrap();

        let blocking = BlockingLockManager::new(store);
        let token = blocking.acquire(&task_lock_key(1)).unwrap().unwrap();

        let outcome = runner.run_task(1, || Ok(vec![])).unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Rejected(RejectReason::AlreadyRunning)
        ));
        // The holder's lock survived the rejected attempt.
        assert!(blocking.acquire(&task_lock_key(1)).unwrap().is_none());
        blocking.release(&task_lock_key(1), &token);
    }

    #[test]
    fn test_panic_before_job_body_releases_the_lock() {
        // The mutex already exists while the Started notification runs; a
        // panic there must release it even though the job never started.
        let (runner, repo, store) = runner_with_notifier(Arc::new(PanickingNotifier));
        runner.rt.block_on(repo.insert_task(1, "t")).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            runner.run_task(1, || Ok(vec![]))
        }));
        assert!(result.is_err());

        assert_eq!(
            runner.rt.block_on(repo.status(1)).unwrap(),
            Some(TaskStatus::Failed)
        );
        let blocking = BlockingLockManager::new(store);
        assert!(blocking.acquire(&task_lock_key(1)).unwrap().is_some());
    }

    #[test]
    fn test_panicking_job_releases_the_lock() {
        let (runner, repo, store) = setup();
        runner.rt.block_on(repo.insert_task(1, "t")).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            runner.run_task(1, || panic!("task blew up"))
        }));
        assert!(result.is_err());

        assert_eq!(
            runner.rt.block_on(repo.status(1)).unwrap(),
            Some(TaskStatus::Failed)
        );
        let blocking = BlockingLockManager::new(store);
        assert!(blocking.acquire(&task_lock_key(1)).unwrap().is_some());
    }
}
