//! Server Catalog
//!
//! Server profiles known to the client and the shared handle to the
//! server currently selected by the user.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// VPN server profile (stored in config file)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Stable server identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Country
    pub country: String,
    /// City
    pub city: String,
    /// Remote host handed to the transport
    pub remote_address: String,
    /// OpenVPN profile file shipped with the app
    #[serde(default = "default_ovpn_file")]
    pub ovpn_file: String,
}

fn default_ovpn_file() -> String {
    "client".to_string()
}

impl ServerProfile {
    /// Human readable location ("City, Country")
    pub fn location(&self) -> String {
        format!("{}, {}", self.city, self.country)
    }

    /// Connection parameters for the transport
    pub fn params(&self) -> ServerParams {
        ServerParams {
            server_id: self.id.clone(),
            location: self.location(),
            remote_address: self.remote_address.clone(),
            ovpn_file: self.ovpn_file.clone(),
        }
    }
}

/// Parameters passed to the transport's connect command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerParams {
    /// Catalog id of the target server
    pub server_id: String,
    /// "City, Country"
    pub location: String,
    /// Remote host
    pub remote_address: String,
    /// OpenVPN profile file
    pub ovpn_file: String,
}

struct SelectionInner {
    catalog: Vec<ServerProfile>,
    selected: Option<String>,
}

/// Shared handle to the catalog and the selected server
///
/// Cloning is cheap; all clones observe the same selection.
#[derive(Clone)]
pub struct ServerSelection {
    inner: Arc<RwLock<SelectionInner>>,
}

impl ServerSelection {
    /// Create a selection over a catalog
    pub fn new(catalog: Vec<ServerProfile>, selected: Option<String>) -> Self {
        let selected = selected.filter(|id| catalog.iter().any(|s| &s.id == id));
        Self {
            inner: Arc::new(RwLock::new(SelectionInner { catalog, selected })),
        }
    }

    /// All servers in the catalog
    pub fn servers(&self) -> Vec<ServerProfile> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .catalog
            .clone()
    }

    /// Find a server by id
    pub fn find(&self, id: &str) -> Option<ServerProfile> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .catalog
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    /// Select a server by id
    pub fn select(&self, id: &str) -> Result<ServerProfile, ConfigError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let profile = inner
            .catalog
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownServer(id.to_string()))?;

        info!(server = %profile.id, "Selected server {}", profile.name);
        inner.selected = Some(profile.id.clone());
        Ok(profile)
    }

    /// Currently selected server
    pub fn current(&self) -> Option<ServerProfile> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let id = inner.selected.as_ref()?;
        inner.catalog.iter().find(|s| &s.id == id).cloned()
    }

    /// Connection parameters of the selected server
    pub fn current_params(&self) -> Option<ServerParams> {
        self.current().map(|s| s.params())
    }
}
