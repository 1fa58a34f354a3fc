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

//! Task repository boundary: the one slice of the relational store the guard
//! touches.
//!
//! ## Purpose
//! The guard needs exactly one thing from the database: the task's `status`
//! field, with one atomic conditional transition into `running` that doubles
//! as a mutex when the lock store is unreachable. Everything else about the
//! task model stays outside this crate.
//!
//! ## Fallback Mutex
//! `UPDATE tasks SET status = 'running' WHERE id = ? AND status != 'running'`
//! executed as a single statement: one affected row means the caller owns the
//! run; zero means another runner got there first. No select-then-update.

use crate::{RunnerError, RunnerResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;
use tracing::instrument;

/// Lifecycle state of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, never started
    Pending,
    /// An execution currently owns this task
    Running,
    /// Last execution completed successfully
    Done,
    /// Last execution failed
    Failed,
}

impl TaskStatus {
    /// The status' wire/database form.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(RunnerError::Repository(format!("unknown task status: {other}"))),
        }
    }
}

/// Relational-store boundary used by the guard.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Atomically transition the task into `running` unless it already is.
    /// This single statement is the fallback mutex: `Ok(true)` means the
    /// caller owns the run, `Ok(false)` means another runner got there first.
    async fn try_mark_running(&self, task_id: i64) -> RunnerResult<bool>;

    /// Unconditionally record `running`. Used on the distributed-lock path,
    /// where exclusion is already guaranteed by the token and this write is
    /// advisory.
    async fn mark_running(&self, task_id: i64) -> RunnerResult<()>;

    /// Record a terminal status. On the fallback path this write IS the
    /// mutex release (the row stops matching `status = 'running'`).
    async fn mark_finished(&self, task_id: i64, status: TaskStatus) -> RunnerResult<()>;

    /// Append one per-run activity record for the task. Best-effort from the
    /// caller's perspective; never interacts with any mutex.
    async fn record_activity(&self, task_id: i64, content: &str) -> RunnerResult<()>;

    /// Current status of the task, if the task exists.
    async fn status(&self, task_id: i64) -> RunnerResult<Option<TaskStatus>>;
}

/// SQLite-backed task repository.
///
/// Schema is created lazily on connect:
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS tasks (
///   id INTEGER PRIMARY KEY,
///   title TEXT NOT NULL,
///   status TEXT NOT NULL DEFAULT 'pending',
///   created_at TEXT NOT NULL DEFAULT (datetime('now'))
/// );
/// ```
///
/// plus an `activities` table for per-run results.
#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    /// Connect and initialize the schema.
    ///
    /// `database_url` is any valid `sqlx` SQLite URL, e.g. `sqlite::memory:`
    /// or `sqlite://tasks.db`.
    #[instrument(skip(database_url))]
    pub async fn new(database_url: &str) -> RunnerResult<Self> {
        // One connection: an sqlx in-memory SQLite database is per-connection,
        // and the conditional update serializes on the row anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .map_err(|e| RunnerError::Repository(format!("failed to connect SQLite: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
              id INTEGER PRIMARY KEY,
              title TEXT NOT NULL,
              status TEXT NOT NULL DEFAULT 'pending',
              created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| RunnerError::Repository(format!("failed to create tasks table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activities (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              task_id INTEGER NOT NULL,
              content TEXT NOT NULL,
              created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| RunnerError::Repository(format!("failed to create activities table: {e}")))?;

        Ok(Self { pool })
    }

    /// Insert a task row with an explicit identifier in `pending` state.
    pub async fn insert_task(&self, task_id: i64, title: &str) -> RunnerResult<()> {
        sqlx::query("INSERT INTO tasks (id, title, status) VALUES (?1, ?2, 'pending')")
            .bind(task_id)
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All activity contents recorded for a task, oldest first.
    pub async fn activities(&self, task_id: i64) -> RunnerResult<Vec<String>> {
        let rows = sqlx::query("SELECT content FROM activities WHERE task_id = ?1 ORDER BY id")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.get::<String, _>("content")).collect())
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self))]
    async fn try_mark_running(&self, task_id: i64) -> RunnerResult<bool> {
        let result =
            sqlx::query("UPDATE tasks SET status = 'running' WHERE id = ?1 AND status != 'running'")
                .bind(task_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn mark_running(&self, task_id: i64) -> RunnerResult<()> {
        sqlx::query("UPDATE tasks SET status = 'running' WHERE id = ?1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_finished(&self, task_id: i64, status: TaskStatus) -> RunnerResult<()> {
        sqlx::query("UPDATE tasks SET status = ?2 WHERE id = ?1")
            .bind(task_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_activity(&self, task_id: i64, content: &str) -> RunnerResult<()> {
        sqlx::query("INSERT INTO activities (task_id, content) VALUES (?1, ?2)")
            .bind(task_id)
            .bind(content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn status(&self, task_id: i64) -> RunnerResult<Option<TaskStatus>> {
        let row = sqlx::query("SELECT status FROM tasks WHERE id = ?1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("status");
                Ok(Some(raw.parse()?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_repo() -> SqliteTaskRepository {
        SqliteTaskRepository::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_try_mark_running_is_exclusive() {
        let repo = create_repo().await;
        repo.insert_task(1, "t").await.unwrap();

        assert!(repo.try_mark_running(1).await.unwrap());
        assert!(!repo.try_mark_running(1).await.unwrap());
        assert_eq!(repo.status(1).await.unwrap(), Some(TaskStatus::Running));
    }

    #[tokio::test]
    async fn test_mark_finished_releases_the_row() {
        let repo = create_repo().await;
        repo.insert_task(1, "t").await.unwrap();

        assert!(repo.try_mark_running(1).await.unwrap());
        repo.mark_finished(1, TaskStatus::Done).await.unwrap();
        assert_eq!(repo.status(1).await.unwrap(), Some(TaskStatus::Done));

        // The row mutex is free again.
        assert!(repo.try_mark_running(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_try_mark_running_missing_row_is_contention() {
        let repo = create_repo().await;
        assert!(!repo.try_mark_running(99).await.unwrap());
        assert_eq!(repo.status(99).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_activities_round_trip() {
        let repo = create_repo().await;
        repo.insert_task(1, "t").await.unwrap();

        repo.record_activity(1, "unit a done").await.unwrap();
        repo.record_activity(1, "unit b done").await.unwrap();

        assert_eq!(
            repo.activities(1).await.unwrap(),
            vec!["unit a done".to_string(), "unit b done".to_string()]
        );
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [TaskStatus::Pending, TaskStatus::Running, TaskStatus::Done, TaskStatus::Failed] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<TaskStatus>().is_err());
    }
}
