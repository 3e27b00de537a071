// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Picks concrete repository implementations for the configured
//! [`StorageBackend`]. The domain layer only sees the traits.

use std::sync::Arc;

use crate::domain::repository::{HistoryRepository, PheromoneRepository, StorageBackend};
use crate::infrastructure::repositories::{
    InMemoryHistoryRepository, InMemoryPheromoneRepository, JsonFileHistoryRepository,
    JsonFilePheromoneRepository,
};

/// Creates a PheromoneRepository implementation based on the configured backend
pub fn create_pheromone_repository(backend: &StorageBackend) -> Arc<dyn PheromoneRepository> {
    match backend {
        StorageBackend::InMemory => Arc::new(InMemoryPheromoneRepository::new()),
        StorageBackend::JsonFile { directory } => Arc::new(JsonFilePheromoneRepository::new(directory)),
    }
}

/// Creates a HistoryRepository implementation based on the configured backend.
/// File-backed history is kept near `capacity` entries.
pub fn create_history_repository(backend: &StorageBackend, capacity: usize) -> Arc<dyn HistoryRepository> {
    match backend {
        StorageBackend::InMemory => Arc::new(InMemoryHistoryRepository::new()),
        StorageBackend::JsonFile { directory } => Arc::new(JsonFileHistoryRepository::new(directory, capacity)),
    }
}
