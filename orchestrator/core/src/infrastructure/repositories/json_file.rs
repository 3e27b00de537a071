// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::decay::DecayEntry;
use crate::domain::history::HistoryEntry;
use crate::domain::repository::{HistoryRepository, PheromoneRepository, RepositoryError};

const PHEROMONE_FILE: &str = "pheromones.json";
const HISTORY_FILE: &str = "history.jsonl";

/// On-disk form of one trail; the key is the enclosing object's field name.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTrail {
    strength: f64,
    last_touched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_deposit_at: Option<DateTime<Utc>>,
}

impl StoredTrail {
    fn from_entry(entry: &DecayEntry) -> Self {
        Self {
            strength: entry.strength,
            last_touched_at: entry.last_touched_at,
            last_deposit_at: entry.last_deposit_at,
        }
    }

    fn into_entry(self, key: String) -> DecayEntry {
        DecayEntry {
            key,
            strength: self.strength,
            last_touched_at: self.last_touched_at,
            last_deposit_at: self.last_deposit_at,
        }
    }
}

/// `pheromones.json` in the state directory, rewritten whole on every save
/// through a temp file and rename.
pub struct JsonFilePheromoneRepository {
    path: PathBuf,
    // Lazily loaded copy of the file; `None` until first touched.
    cache: Mutex<Option<BTreeMap<String, StoredTrail>>>,
}

impl JsonFilePheromoneRepository {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            path: directory.as_ref().join(PHEROMONE_FILE),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<BTreeMap<String, StoredTrail>, RepositoryError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, trails: &BTreeMap<String, StoredTrail>) -> Result<(), RepositoryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(trails)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl PheromoneRepository for JsonFilePheromoneRepository {
    async fn save(&self, entry: &DecayEntry) -> Result<(), RepositoryError> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.read_file().await?);
        }
        let Some(trails) = cache.as_mut() else {
            return Err(RepositoryError::Unavailable("pheromone cache not loaded".to_string()));
        };
        trails.insert(entry.key.clone(), StoredTrail::from_entry(entry));
        self.write_file(trails).await
    }

    async fn save_all(&self, entries: &[DecayEntry]) -> Result<(), RepositoryError> {
        let trails: BTreeMap<String, StoredTrail> = entries
            .iter()
            .map(|entry| (entry.key.clone(), StoredTrail::from_entry(entry)))
            .collect();
        let mut cache = self.cache.lock().await;
        self.write_file(&trails).await?;
        *cache = Some(trails);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<DecayEntry>, RepositoryError> {
        let mut cache = self.cache.lock().await;
        let trails = self.read_file().await?;
        let entries = trails
            .iter()
            .map(|(key, trail)| trail.clone().into_entry(key.clone()))
            .collect();
        *cache = Some(trails);
        Ok(entries)
    }
}

/// `history.jsonl` in the state directory, one entry per line, appended as
/// cycles complete. Once the file holds more than twice `capacity` lines it
/// is rewritten down to the newest `capacity` entries, on append or load.
pub struct JsonFileHistoryRepository {
    path: PathBuf,
    capacity: usize,
    // Lines currently in the file; `None` until first counted.
    lines: Mutex<Option<usize>>,
}

impl JsonFileHistoryRepository {
    pub fn new(directory: impl AsRef<Path>, capacity: usize) -> Self {
        Self {
            path: directory.as_ref().join(HISTORY_FILE),
            capacity: capacity.max(1),
            lines: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed entries oldest first, plus the raw non-empty line count.
    async fn read_entries(&self) -> Result<(Vec<HistoryEntry>, usize), RepositoryError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        let mut lines = 0;
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            lines += 1;
            match serde_json::from_str::<HistoryEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(line = line_no + 1, error = %e, path = ?self.path, "Skipping unreadable history line");
                }
            }
        }
        Ok((entries, lines))
    }

    /// Rewrite the file with the newest `keep` of `entries`. Returns the
    /// number of lines written.
    async fn compact(&self, mut entries: Vec<HistoryEntry>, keep: usize) -> Result<usize, RepositoryError> {
        let total = entries.len();
        let recent = entries.split_off(total.saturating_sub(keep));
        tracing::debug!(kept = recent.len(), dropped = total - recent.len(), "Compacting history file");

        let mut buffer = Vec::new();
        for entry in &recent {
            serde_json::to_writer(&mut buffer, entry)?;
            buffer.push(b'\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, buffer).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(recent.len())
    }
}

#[async_trait]
impl HistoryRepository for JsonFileHistoryRepository {
    async fn append(&self, entry: &HistoryEntry) -> Result<(), RepositoryError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut lines = self.lines.lock().await;
        let mut count = match *lines {
            Some(count) => count,
            None => self.read_entries().await?.1,
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        count += 1;

        if count > self.capacity.saturating_mul(2) {
            let (entries, _) = self.read_entries().await?;
            count = self.compact(entries, self.capacity).await?;
        }
        *lines = Some(count);
        Ok(())
    }

    async fn load_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let mut lines = self.lines.lock().await;
        let (mut entries, count) = self.read_entries().await?;

        if count > limit.saturating_mul(2) {
            let keep = limit.max(self.capacity);
            *lines = Some(self.compact(entries.clone(), keep).await?);
        } else {
            *lines = Some(count);
        }

        let total = entries.len();
        Ok(entries.split_off(total.saturating_sub(limit)))
    }
}
