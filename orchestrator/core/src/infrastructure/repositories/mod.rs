// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Adapters for the persistence contracts in `crate::domain::repository`.
//!
//! - **InMemoryPheromoneRepository** / **InMemoryHistoryRepository**: process
//!   lifetime only; the default backend and the one tests use.
//! - **JsonFilePheromoneRepository** / **JsonFileHistoryRepository**: a state
//!   directory holding `pheromones.json` (one object keyed by path) and
//!   `history.jsonl` (one cycle per line).

pub mod json_file;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::decay::DecayEntry;
use crate::domain::history::HistoryEntry;
use crate::domain::repository::{HistoryRepository, PheromoneRepository, RepositoryError};

pub use json_file::{JsonFileHistoryRepository, JsonFilePheromoneRepository};

#[derive(Clone, Default)]
pub struct InMemoryPheromoneRepository {
    entries: Arc<RwLock<HashMap<String, DecayEntry>>>,
}

impl InMemoryPheromoneRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PheromoneRepository for InMemoryPheromoneRepository {
    async fn save(&self, entry: &DecayEntry) -> Result<(), RepositoryError> {
        self.entries.write().insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn save_all(&self, entries: &[DecayEntry]) -> Result<(), RepositoryError> {
        let mut stored = self.entries.write();
        stored.clear();
        stored.extend(entries.iter().map(|e| (e.key.clone(), e.clone())));
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<DecayEntry>, RepositoryError> {
        Ok(self.entries.read().values().cloned().collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryHistoryRepository {
    entries: Arc<RwLock<Vec<HistoryEntry>>>,
}

impl InMemoryHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryRepository for InMemoryHistoryRepository {
    async fn append(&self, entry: &HistoryEntry) -> Result<(), RepositoryError> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    async fn load_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let entries = self.entries.read();
        let skip = entries.len().saturating_sub(limit);
        Ok(entries[skip..].to_vec())
    }
}
