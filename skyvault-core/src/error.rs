// Copyright 2025 Skyvault (https://github.com/skyvault)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types shared across the workspace.
//!
//! The variants map to the propagation policy: `Transient` is retried by the
//! ingest workers, `VerificationFailed` aborts the archive deletion phase,
//! `InvalidInput` surfaces to the caller, `Fatal` relies on process restart.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SkyvaultError>;

#[derive(Debug, Clone, Error)]
pub enum SkyvaultError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl SkyvaultError {
    /// Whether a retry at the worker layer can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SkyvaultError::Transient(_) | SkyvaultError::Storage(_))
    }

    /// Idempotent-skip marker; not an error for at-least-once writers.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, SkyvaultError::AlreadyExists(_))
    }
}

impl From<bincode::Error> for SkyvaultError {
    fn from(e: bincode::Error) -> Self {
        SkyvaultError::Codec(e.to_string())
    }
}

impl From<std::io::Error> for SkyvaultError {
    fn from(e: std::io::Error) -> Self {
        SkyvaultError::Storage(e.to_string())
    }
}
