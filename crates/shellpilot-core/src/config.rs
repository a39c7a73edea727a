//! Persisted settings.
//!
//! One JSON file holds everything a front end needs to start a session:
//! known servers, the model endpoint, the assistant persona, history and
//! output limits, and user-supplied safety rule overrides. Every field has
//! a default, so an empty or partial file is valid.

use crate::engine::EngineOptions;
use crate::interpreter::Persona;
use crate::safety::RuleOverride;
use crate::transport::{Credential, SshConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Settings file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Unknown server '{0}'")]
    UnknownServer(String),
}

/// A saved SSH target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub credential: Credential,
}

impl ServerEntry {
    pub fn ssh_config(&self, connect_timeout: Duration) -> SshConfig {
        SshConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            credential: self.credential.clone(),
            connect_timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    pub url: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "llama2".to_string(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistantSettings {
    pub name: String,
    pub role: String,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        let persona = Persona::default();
        Self {
            name: persona.name,
            role: persona.role,
        }
    }
}

impl AssistantSettings {
    pub fn persona(&self) -> Persona {
        Persona {
            name: self.name.clone(),
            role: self.role.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistorySettings {
    /// Turns retained before the oldest are evicted.
    pub max_len: usize,
    /// Turns included as model context.
    pub window: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_len: 200,
            window: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub servers: Vec<ServerEntry>,
    /// Name of the server used last, reconnected to on startup.
    pub last_server: Option<String>,
    pub model: ModelSettings,
    pub assistant: AssistantSettings,
    pub history: HistorySettings,
    pub max_output_chars: usize,
    pub command_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub safety_overrides: Vec<RuleOverride>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            last_server: None,
            model: ModelSettings::default(),
            assistant: AssistantSettings::default(),
            history: HistorySettings::default(),
            max_output_chars: 150_000,
            command_timeout_secs: 30,
            connect_timeout_secs: 10,
            safety_overrides: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults; a
    /// present but unreadable or malformed file is an error, never
    /// silently replaced.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let write = |source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write)?;
        }
        // Serializing a Settings value cannot fail; treat it as I/O anyway.
        let json = serde_json::to_string_pretty(self).map_err(|e| SettingsError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(write)
    }

    pub fn server(&self, name: &str) -> Result<&ServerEntry, SettingsError> {
        self.servers
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| SettingsError::UnknownServer(name.to_string()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.model.request_timeout_secs)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_history: self.history.max_len,
            history_window: self.history.window,
            max_output_chars: self.max_output_chars,
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }
}

fn default_port() -> u16 {
    22
}
