// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Loop Error Taxonomy
//!
//! | Variant | Raised by | Propagation |
//! |---------|-----------|-------------|
//! | `Validation` | trigger registration, deposits, path building, config | returned to the caller |
//! | `ExecutionTimeout` | cycle engine executor bound | converted to a `failure` outcome |
//! | `ExecutionFailure` | executor error or panic | converted to a `failure` outcome |
//! | `PersistenceUnavailable` | repositories | logged, loop continues in memory |

use thiserror::Error;

use crate::domain::repository::RepositoryError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoopError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Executor exceeded its {timeout_ms}ms bound")]
    ExecutionTimeout { timeout_ms: u64 },

    #[error("Execution failed: {0}")]
    ExecutionFailure(String),

    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),
}

impl LoopError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<RepositoryError> for LoopError {
    fn from(err: RepositoryError) -> Self {
        LoopError::PersistenceUnavailable(err.to_string())
    }
}

pub type LoopResult<T> = Result<T, LoopError>;
