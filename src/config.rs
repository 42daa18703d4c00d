//! Referee configuration
//!
//! Supports both global (~/.config/referee/config.toml) and local
//! (.referee/config.toml) configuration. Environment variables override both.
//!
//! ```toml
//! [client]
//! endpoint = "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
//! api_key = "sk-..."
//! model = "qwen-plus"
//! temperature = 0.7
//! json_mode = true
//! verbose = false
//!
//! [progress]
//! confidence_cutoff = 0.5
//! ```

use crate::trace::redact_credential;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "qwen-plus";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_CONFIDENCE_CUTOFF: f64 = 0.5;

pub const ENV_ENDPOINT: &str = "REFEREE_ENDPOINT";
pub const ENV_API_KEY: &str = "REFEREE_API_KEY";
pub const ENV_MODEL: &str = "REFEREE_MODEL";

const CONFIG_DIR_NAME: &str = "referee";
const LOCAL_DIR_NAME: &str = ".referee";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level configuration file
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub progress: ProgressConfig,
}

/// Settings for the chat-completion endpoint
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct ClientConfig {
    /// Full URL of the chat-completion endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Bearer credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Ask the endpoint for a JSON object response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_mode: Option<bool>,

    /// Log outbound requests and raw responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
}

impl ClientConfig {
    /// The endpoint, if set to something other than whitespace
    pub fn endpoint(&self) -> Option<&str> {
        non_blank(self.endpoint.as_deref())
    }

    /// The credential, if set to something other than whitespace
    pub fn api_key(&self) -> Option<&str> {
        non_blank(self.api_key.as_deref())
    }

    pub fn model(&self) -> &str {
        non_blank(self.model.as_deref()).unwrap_or(DEFAULT_MODEL)
    }

    pub fn temperature(&self) -> f64 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn json_mode(&self) -> bool {
        self.json_mode.unwrap_or(true)
    }

    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }

    /// Merge two configs, with `other` taking precedence
    pub fn merge(mut self, other: Self) -> Self {
        if other.endpoint.is_some() {
            self.endpoint = other.endpoint;
        }
        if other.api_key.is_some() {
            self.api_key = other.api_key;
        }
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.temperature.is_some() {
            self.temperature = other.temperature;
        }
        if other.json_mode.is_some() {
            self.json_mode = other.json_mode;
        }
        if other.verbose.is_some() {
            self.verbose = other.verbose;
        }
        self
    }
}

/// Settings for the progress engine
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct ProgressConfig {
    /// Minimum confidence that counts as a proof attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_cutoff: Option<f64>,
}

impl ProgressConfig {
    pub fn cutoff(&self) -> f64 {
        self.confidence_cutoff
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_CONFIDENCE_CUTOFF)
    }
}

impl Config {
    /// Load config, merging global, local and environment
    ///
    /// Priority: environment > local > global > defaults
    pub fn load() -> Self {
        Self::layered(None).with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Like [`Config::load`], with an explicit file layered above the local
    /// config. A missing or invalid explicit file is an error.
    pub fn load_with(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = explicit.map(Self::load_from_path).transpose()?;
        Ok(Self::layered(explicit).with_env_overrides(|name| std::env::var(name).ok()))
    }

    fn layered(explicit: Option<Self>) -> Self {
        let global = Self::load_global().unwrap_or_default();
        let local = Self::load_local().unwrap_or_default();
        global
            .merge(local)
            .merge(explicit.unwrap_or_default())
    }

    /// Load global config from ~/.config/referee/config.toml
    fn load_global() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let config_path = config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
        Self::load_if_present(&config_path)
    }

    /// Load local config from .referee/config.toml
    fn load_local() -> Option<Self> {
        let referee_dir = find_referee_dir()?;
        Self::load_if_present(&referee_dir.join(CONFIG_FILE_NAME))
    }

    fn load_if_present(path: &Path) -> Option<Self> {
        if !path.is_file() {
            return None;
        }
        match Self::load_from_path(path) {
            Ok(config) => {
                tracing::debug!("Loaded config from {}", path.display());
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Ignoring config: {}", e);
                None
            }
        }
    }

    /// Load config from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Merge two configs, with `other` taking precedence
    pub fn merge(self, other: Self) -> Self {
        Self {
            client: self.client.merge(other.client),
            progress: ProgressConfig {
                confidence_cutoff: other
                    .progress
                    .confidence_cutoff
                    .or(self.progress.confidence_cutoff),
            },
        }
    }

    /// Apply `REFEREE_*` variables read through `lookup`. Blank values are
    /// ignored.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(endpoint) = read(ENV_ENDPOINT) {
            self.client.endpoint = Some(endpoint);
        }
        if let Some(key) = read(ENV_API_KEY) {
            self.client.api_key = Some(key);
        }
        if let Some(model) = read(ENV_MODEL) {
            self.client.model = Some(model);
        }
        self
    }

    /// A copy safe to print: the credential is reduced to its prefix.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.client.api_key = copy.client.api_key.as_deref().map(redact_credential);
        copy
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Find the .referee directory by walking up the directory tree
fn find_referee_dir() -> Option<PathBuf> {
    let current_dir = std::env::current_dir().ok()?;
    let mut dir = current_dir.as_path();

    loop {
        let referee_path = dir.join(LOCAL_DIR_NAME);
        if referee_path.is_dir() {
            return Some(referee_path);
        }

        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }
    None
}
