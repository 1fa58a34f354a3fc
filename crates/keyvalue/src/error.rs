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

//! Error types for KeyValue operations.

use thiserror::Error;

/// Result type for KeyValue operations.
pub type KVResult<T> = Result<T, KVError>;

/// Errors that can occur during KeyValue operations.
///
/// Contention is never an error: a conditional set that loses returns
/// `Ok(false)`. The variants here are reserved for the store itself
/// misbehaving.
#[derive(Error, Debug)]
pub enum KVError {
    /// The store could not be reached, or a round trip exceeded its bounded
    /// timeout. Callers may fall back to a secondary mutex on this variant.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but the operation failed (protocol or data error).
    /// The store's state is suspect; this does not trigger fallback.
    #[error("backend error: {0}")]
    BackendError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),
}
