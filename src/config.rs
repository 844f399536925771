//! Runtime configuration
//!
//! Serializable tunables for one [`crate::runtime::ToolRuntime`] instance,
//! loadable from TOML. Everything has a sensible default; embedding
//! platforms usually construct this in code and tests always do.

use crate::bridge::default_pool_size;
use crate::cache::EvictionPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cache policy selection, TOML-friendly
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum CachePolicy {
    NoCache,
    TimeBased { ttl_secs: u64 },
    Lru,
    Intelligent,
}

impl CachePolicy {
    pub fn to_eviction_policy(&self) -> EvictionPolicy {
        match self {
            CachePolicy::NoCache => EvictionPolicy::NoCache,
            CachePolicy::TimeBased { ttl_secs } => EvictionPolicy::TimeBased {
                ttl: Duration::from_secs(*ttl_secs),
            },
            CachePolicy::Lru => EvictionPolicy::Lru,
            CachePolicy::Intelligent => EvictionPolicy::Intelligent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(flatten)]
    pub policy: CachePolicy,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: CachePolicy::Lru,
            max_size: 128,
        }
    }
}

/// Full runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker-pool size for blocking capabilities
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Seconds between supervisor cycles
    #[serde(default = "defaults::supervisor_interval_secs")]
    pub supervisor_interval_secs: u64,

    /// Grace window before auto-cleanup removes terminal entries
    #[serde(default = "defaults::grace_period_secs")]
    pub grace_period_secs: u64,

    /// Window for graceful stop before forced termination
    #[serde(default = "defaults::stop_escalation_secs")]
    pub stop_escalation_secs: u64,

    /// Per-call execution deadline
    #[serde(default = "defaults::command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Output size cap in bytes
    #[serde(default = "defaults::max_output_size")]
    pub max_output_size: usize,

    /// Registry file location; defaults to `.toolhost/processes.json`
    /// under the working directory when unset
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
}

mod defaults {
    pub fn supervisor_interval_secs() -> u64 {
        3
    }
    pub fn grace_period_secs() -> u64 {
        5
    }
    pub fn stop_escalation_secs() -> u64 {
        8
    }
    pub fn command_timeout_secs() -> u64 {
        60
    }
    pub fn max_output_size() -> usize {
        2_097_152
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            cache: CacheConfig::default(),
            supervisor_interval_secs: defaults::supervisor_interval_secs(),
            grace_period_secs: defaults::grace_period_secs(),
            stop_escalation_secs: defaults::stop_escalation_secs(),
            command_timeout_secs: defaults::command_timeout_secs(),
            max_output_size: defaults::max_output_size(),
            registry_path: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .context("Failed to read runtime config file")?;
        toml::from_str(&contents).context("Failed to parse runtime config file")
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let toml_string =
            toml::to_string_pretty(self).context("Failed to serialize runtime config")?;
        fs::write(path.as_ref(), toml_string).context("Failed to write runtime config file")
    }

    /// Default config file location for host platforms that persist one
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".toolhost").join("config.toml"))
    }

    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_secs(self.supervisor_interval_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn stop_escalation(&self) -> Duration {
        Duration::from_secs(self.stop_escalation_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Registry path resolved against a working directory
    pub fn registry_path_for(&self, working_dir: &Path) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| working_dir.join(".toolhost").join("processes.json"))
    }
}
