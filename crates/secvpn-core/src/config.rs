//! Controller Configuration
//!
//! Server catalog, initial selection, default settings and the optional
//! pending-state watchdog, loaded from TOML or JSON.

use crate::servers::ServerProfile;
use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Complete controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Server selected at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_server: Option<String>,
    /// Force `Disconnected` after this many seconds in a pending state.
    /// Unset means the controller waits for the transport indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_timeout_secs: Option<u64>,
    /// Initial user settings
    #[serde(default)]
    pub settings: Settings,
    /// All server profiles
    pub servers: Vec<ServerProfile>,
}

impl ControllerConfig {
    /// Load from a file, picking the format from the extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let format = match ext {
            "toml" => ConfigFormat::Toml,
            "json" => ConfigFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::parse(&content, format)
    }

    /// Load from a string in the given format
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config: Self = match format {
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?
            }
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Built-in catalog
    pub fn default_config() -> Self {
        Self {
            selected_server: Some("de-1".to_string()),
            settings: Settings::default(),
            pending_timeout_secs: None,
            servers: Self::default_servers(),
        }
    }

    fn default_servers() -> Vec<ServerProfile> {
        vec![
            ServerProfile {
                id: "us-1".to_string(),
                name: "US Server 1".to_string(),
                country: "United States".to_string(),
                city: "New York".to_string(),
                remote_address: "192.169.69.1".to_string(),
                ovpn_file: "client".to_string(),
            },
            ServerProfile {
                id: "uk-1".to_string(),
                name: "UK Server 1".to_string(),
                country: "United Kingdom".to_string(),
                city: "London".to_string(),
                remote_address: "178.62.1.1".to_string(),
                ovpn_file: "client".to_string(),
            },
            ServerProfile {
                id: "de-1".to_string(),
                name: "Germany Server 1".to_string(),
                country: "Germany".to_string(),
                city: "Frankfurt".to_string(),
                remote_address: "185.186.78.1".to_string(),
                ovpn_file: "client".to_string(),
            },
            ServerProfile {
                id: "jp-1".to_string(),
                name: "Japan Server 1".to_string(),
                country: "Japan".to_string(),
                city: "Tokyo".to_string(),
                remote_address: "103.231.88.1".to_string(),
                ovpn_file: "client".to_string(),
            },
        ]
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::DuplicateServer(server.id.clone()));
            }
        }

        if let Some(ref id) = self.selected_server {
            if !seen.contains(id.as_str()) {
                return Err(ConfigError::UnknownServer(id.clone()));
            }
        }

        if self.pending_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }

    /// Pending-state watchdog timeout, if enabled
    pub fn pending_timeout(&self) -> Option<Duration> {
        self.pending_timeout_secs.map(Duration::from_secs)
    }

    /// Export as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Export as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Configuration format
#[derive(Debug, Clone, Copy)]
pub enum ConfigFormat {
    Toml,
    Json,
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("No servers configured")]
    NoServers,

    #[error("Duplicate server id: {0}")]
    DuplicateServer(String),

    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("Pending timeout must be at least one second")]
    InvalidTimeout,

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported config format")]
    UnsupportedFormat,
}
