// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

// Loop Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing one
// control loop:
// - engine tunables (exploration, executor and persistence bounds)
// - pheromone learning rule
// - history capacity
// - trigger registrations and arbiter cadence
// - storage backend
// - logging

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::errors::{LoopError, LoopResult};
use crate::domain::history::DEFAULT_HISTORY_CAPACITY;
use crate::domain::pheromone::{PathKey, PheromoneSettings};
use crate::domain::repository::StorageBackend;
use crate::domain::trigger::TriggerSpec;

pub const API_VERSION: &str = "halo.dev/v1";
pub const KIND: &str = "LoopConfig";

/// Top-level loop configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfigManifest {
    /// API version (must be "halo.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "LoopConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: LoopConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable loop name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Everything one running loop needs. Swapped as a whole on reconfiguration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LoopConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub pheromone: PheromoneSettings,

    #[serde(default)]
    pub history: HistorySettings,

    #[serde(default)]
    pub arbiter: ArbiterSettings,

    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,

    #[serde(default)]
    pub storage: StorageBackend,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Probability of exploring a non-best candidate
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// Number of ranked paths considered per cycle
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Steps run when no path has been reinforced yet
    #[serde(default = "default_path_steps")]
    pub default_path: Vec<String>,

    #[serde(with = "humantime_serde", default = "default_executor_timeout")]
    pub executor_timeout: Duration,

    /// Bound on each repository call
    #[serde(with = "humantime_serde", default = "default_persistence_timeout")]
    pub persistence_timeout: Duration,

    /// Fixed seed for reproducible exploration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySettings {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterSettings {
    /// How often time triggers and held thresholds are evaluated
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// How long an unacknowledged trigger stays suppressed
    #[serde(with = "humantime_serde", default = "default_pending_ttl")]
    pub pending_ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_epsilon() -> f64 {
    0.1
}

fn default_top_k() -> usize {
    5
}

fn default_path_steps() -> Vec<String> {
    vec!["observe".to_string()]
}

fn default_executor_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_persistence_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_pending_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            top_k: default_top_k(),
            default_path: default_path_steps(),
            executor_timeout: default_executor_timeout(),
            persistence_timeout: default_persistence_timeout(),
            rng_seed: None,
        }
    }
}

impl EngineSettings {
    pub fn default_path_key(&self) -> LoopResult<PathKey> {
        PathKey::build(&self.default_path)
    }
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            pending_ttl: default_pending_ttl(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> LoopResult<()> {
        let engine = &self.engine;
        if !(0.0..=1.0).contains(&engine.epsilon) {
            return Err(LoopError::validation(format!(
                "engine.epsilon must be within [0, 1], got {}",
                engine.epsilon
            )));
        }
        if engine.top_k == 0 {
            return Err(LoopError::validation("engine.top_k must be at least 1"));
        }
        engine.default_path_key()?;
        if engine.executor_timeout.is_zero() || engine.persistence_timeout.is_zero() {
            return Err(LoopError::validation(
                "engine.executor_timeout and engine.persistence_timeout must be greater than zero",
            ));
        }

        self.pheromone.validate()?;

        if self.history.capacity == 0 {
            return Err(LoopError::validation("history.capacity must be at least 1"));
        }
        if self.arbiter.tick_interval.is_zero() {
            return Err(LoopError::validation("arbiter.tick_interval must be greater than zero"));
        }

        let mut seen = HashSet::new();
        for trigger in &self.triggers {
            trigger.validate()?;
            if !seen.insert(trigger.id.as_str()) {
                return Err(LoopError::validation(format!(
                    "duplicate trigger id '{}'",
                    trigger.id
                )));
            }
        }

        match self.observability.logging.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(LoopError::validation(format!(
                "observability.logging.format must be 'json' or 'text', got '{other}'"
            ))),
        }
    }
}

impl Default for LoopConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "halo-loop".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: LoopConfig::default(),
        }
    }
}

impl LoopConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. HALO_CONFIG_PATH environment variable
    /// 2. ./halo-config.yaml (working directory)
    /// 3. ~/.halo/config.yaml (user home)
    /// 4. /etc/halo/config.yaml (Unix) or C:\ProgramData\Halo\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("HALO_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./halo-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".halo").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/halo/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Halo\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("HALO_EPSILON") {
            match val.trim().parse::<f64>() {
                Ok(epsilon) => {
                    tracing::info!("Environment override: HALO_EPSILON={}", epsilon);
                    self.spec.engine.epsilon = epsilon;
                }
                Err(_) => {
                    tracing::warn!("Invalid value for HALO_EPSILON: '{}'. Expected a number. Ignoring.", val);
                }
            }
        }

        if let Some(val) = lookup("HALO_HISTORY_CAPACITY") {
            match val.trim().parse::<usize>() {
                Ok(capacity) => {
                    tracing::info!("Environment override: HALO_HISTORY_CAPACITY={}", capacity);
                    self.spec.history.capacity = capacity;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for HALO_HISTORY_CAPACITY: '{}'. Expected a positive integer. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Some(val) = lookup("HALO_STATE_DIR") {
            if val.trim().is_empty() {
                tracing::warn!("Empty HALO_STATE_DIR. Ignoring.");
            } else {
                tracing::info!("Environment override: HALO_STATE_DIR={}", val);
                self.spec.storage = StorageBackend::JsonFile {
                    directory: PathBuf::from(val),
                };
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        self.spec.validate()?;
        Ok(())
    }
}
