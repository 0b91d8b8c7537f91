use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::executor::ExecutorConfig;

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout() -> u64 {
    600
}

fn default_max_attempts() -> usize {
    5
}

fn default_backoff_secs() -> u64 {
    5
}

fn default_pacing_millis() -> u64 {
    1000
}

fn default_disable_threshold() -> u32 {
    5
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One named backend profile. `interface_format` selects the adapter;
/// `supports_json` records whether the backend reliably emits structured
/// output without coaxing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub interface_format: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub supports_json: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            interface_format: String::new(),
            model_name: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
            supports_json: false,
        }
    }
}

impl ProviderConfig {
    pub fn is_meaningful(&self) -> bool {
        !(self.api_key.is_empty()
            && self.base_url.is_empty()
            && self.interface_format.is_empty()
            && self.model_name.is_empty())
    }
}

/// Tuning for the resilient executor and revision engine.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RevisionSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    #[serde(default = "default_pacing_millis")]
    pub pacing_millis: u64,
    #[serde(default = "default_disable_threshold")]
    pub disable_threshold: u32,
}

impl Default for RevisionSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
            pacing_millis: default_pacing_millis(),
            disable_threshold: default_disable_threshold(),
        }
    }
}

impl RevisionSettings {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_attempts: self.max_attempts.max(1),
            backoff_step: Duration::from_secs(self.backoff_secs),
            pacing: Duration::from_millis(self.pacing_millis),
            disable_threshold: self.disable_threshold.max(1),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub provider_profiles: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub revision: RevisionSettings,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_provider_profile(&self, name: &str) -> Option<&ProviderConfig> {
        self.provider_profiles.get(name)
    }

    pub fn upsert_provider_profile<S: Into<String>>(&mut self, name: S, profile: ProviderConfig) {
        self.provider_profiles.insert(name.into(), profile);
    }

    pub fn remove_provider_profile(&mut self, name: &str) -> Option<ProviderConfig> {
        self.provider_profiles.remove(name)
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            Config::from_path(&path)?
        } else {
            Config::default()
        };

        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn reload(&mut self) -> Result<(), ConfigError> {
        if self.path.exists() {
            self.config = Config::from_path(&self.path)?;
        } else {
            self.config = Config::default();
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.to_path(&self.path)
    }
}
