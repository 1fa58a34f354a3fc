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

//! Status-event notification boundary.
//!
//! ## Purpose
//! The guard announces run transitions to whoever fans them out to clients
//! (an SSE layer, a websocket hub — external collaborators). Notifications
//! are strictly best-effort: a notifier can drop events, and its failures are
//! logged and never affect the task outcome or any mutex.

use crate::repository::TaskStatus;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Run-lifecycle event emitted by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    /// A runner acquired the mutex and is about to execute the task.
    Started,
    /// A run attempt was refused because another runner holds the task.
    Rejected,
    /// The run finished and the mutex was released.
    Finished {
        /// Terminal status recorded for the task
        status: TaskStatus,
    },
}

impl TaskEvent {
    /// JSON payload handed to downstream transports, e.g.
    /// `{"task_id":7,"event":"finished","status":"done"}`.
    pub fn payload(&self, task_id: i64) -> String {
        #[derive(Serialize)]
        struct Envelope {
            task_id: i64,
            #[serde(flatten)]
            event: TaskEvent,
        }

        // A unit/scalar enum with serde derives cannot fail to serialize.
        serde_json::to_string(&Envelope { task_id, event: *self })
            .unwrap_or_else(|_| format!("{{\"task_id\":{task_id}}}"))
    }
}

/// Notification sink accepting `(task_id, event)` pairs, fire-and-forget.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one event. Implementations swallow and log their own
    /// failures; the guard never inspects a result here.
    async fn notify(&self, task_id: i64, event: TaskEvent);
}

/// Notifier that discards everything.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _task_id: i64, _event: TaskEvent) {}
}

/// Fan-out notifier over a tokio broadcast channel.
///
/// The SSE layer (or any other transport) subscribes via
/// [`BroadcastNotifier::subscribe`] and serializes events with
/// [`TaskEvent::payload`]. Lagging or absent subscribers lose events; that is
/// the contract.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<(i64, TaskEvent)>,
}

impl BroadcastNotifier {
    /// Create a notifier whose channel buffers up to `capacity` events per
    /// subscriber before lagging.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Open a new subscription for events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<(i64, TaskEvent)> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, task_id: i64, event: TaskEvent) {
        if self.tx.send((task_id, event)).is_err() {
            debug!(task_id, ?event, "no event subscribers; notification dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscriber() {
        let notifier = BroadcastNotifier::new(16);
        let mut rx = notifier.subscribe();

        notifier.notify(7, TaskEvent::Started).await;
        notifier
            .notify(7, TaskEvent::Finished { status: TaskStatus::Done })
            .await;

        assert_eq!(rx.recv().await.unwrap(), (7, TaskEvent::Started));
        assert_eq!(
            rx.recv().await.unwrap(),
            (7, TaskEvent::Finished { status: TaskStatus::Done })
        );
    }

    #[tokio::test]
    async fn test_notify_without_subscribers_is_a_noop() {
        let notifier = BroadcastNotifier::new(16);
        notifier.notify(7, TaskEvent::Rejected).await;
    }

    #[test]
    fn test_payload_shape() {
        let json = TaskEvent::Finished { status: TaskStatus::Failed }.payload(11);
        assert_eq!(json, r#"{"task_id":11,"event":"finished","status":"failed"}"#);

        let json = TaskEvent::Started.payload(3);
        assert_eq!(json, r#"{"task_id":3,"event":"started"}"#);
    }
}
