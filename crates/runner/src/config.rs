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

//! Runner configuration.
//!
//! ## Environment Variables
//!
//! - `RUNLOCK_LOCK_TTL_SECS`: lease duration for task locks (default: 3600)
//! - `RUNLOCK_DB_FALLBACK`: enable the row-mutex fallback when the lock
//!   store is unreachable (default: "true")
//!
//! plus the `RUNLOCK_KV_*` variables read by
//! [`KVConfig::from_env`](runlock_keyvalue::KVConfig::from_env) for the
//! store itself.

use crate::{RunnerError, RunnerResult};
use runlock_keyvalue::KVConfig;
use runlock_locks::DEFAULT_LOCK_TTL;
use std::time::Duration;

/// Configuration for [`TaskRunner`](crate::TaskRunner) and
/// [`WorkerRunner`](crate::WorkerRunner).
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Lease duration for acquired task locks.
    pub lock_ttl: Duration,
    /// Whether an unreachable lock store degrades to the row mutex.
    pub fallback_enabled: bool,
    /// Key-value store backing the distributed lock.
    pub kv: KVConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            lock_ttl: DEFAULT_LOCK_TTL,
            fallback_enabled: true,
            kv: KVConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> RunnerResult<Self> {
        let lock_ttl = match std::env::var("RUNLOCK_LOCK_TTL_SECS") {
            Ok(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    RunnerError::Config(format!("RUNLOCK_LOCK_TTL_SECS is not an integer: {raw}"))
                })?;
                if secs == 0 {
                    return Err(RunnerError::Config(
                        "RUNLOCK_LOCK_TTL_SECS must be positive".to_string(),
                    ));
                }
                Duration::from_secs(secs)
            }
            Err(_) => DEFAULT_LOCK_TTL,
        };

        let fallback_enabled = match std::env::var("RUNLOCK_DB_FALLBACK") {
            Ok(raw) => match raw.to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                other => {
                    return Err(RunnerError::Config(format!(
                        "RUNLOCK_DB_FALLBACK is not a boolean: {other}"
                    )));
                }
            },
            Err(_) => true,
        };

        let kv = KVConfig::from_env()
            .map_err(|e| RunnerError::Config(format!("invalid store configuration: {e}")))?;

        Ok(Self {
            lock_ttl,
            fallback_enabled,
            kv,
        })
    }
}
