// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Persistence Contracts
//!
//! Durable state is the pheromone table (as raw decay entries) and the cycle
//! history. Interfaces live here; implementations live in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | State | Implementations |
//! |-------|-------|----------------|
//! | `PheromoneRepository` | `Vec<DecayEntry>` | `InMemoryPheromoneRepository`, `JsonFilePheromoneRepository` |
//! | `HistoryRepository` | `HistoryEntry` log | `InMemoryHistoryRepository`, `JsonFileHistoryRepository` |
//!
//! Persistence is best-effort: the cycle engine bounds every call with a
//! timeout and keeps running in memory when a repository is unavailable.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::decay::DecayEntry;
use crate::domain::history::HistoryEntry;

/// Where loop state is kept.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    InMemory,
    JsonFile { directory: PathBuf },
}

#[async_trait]
pub trait PheromoneRepository: Send + Sync {
    /// Insert or replace one trail, keyed by `entry.key`.
    async fn save(&self, entry: &DecayEntry) -> Result<(), RepositoryError>;

    /// Replace the stored snapshot with `entries`.
    async fn save_all(&self, entries: &[DecayEntry]) -> Result<(), RepositoryError>;

    /// Last saved snapshot, empty when nothing was saved yet.
    async fn load_all(&self) -> Result<Vec<DecayEntry>, RepositoryError>;
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Append one completed cycle.
    async fn append(&self, entry: &HistoryEntry) -> Result<(), RepositoryError>;

    /// Newest `limit` entries in completion order.
    async fn load_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
