//! User Settings
//!
//! Settings are owned by the host's configuration layer. The controller
//! only ever reads a fresh snapshot through [`SettingsProvider`] and
//! never persists or caches it.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// Settings snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Connect automatically on startup and when the app comes to the foreground
    #[serde(default)]
    pub auto_connect: bool,
    /// Block traffic while the tunnel is down (interpreted by the host)
    #[serde(default)]
    pub kill_switch: bool,
}

/// Read-only access to the current settings
pub trait SettingsProvider: Send + Sync {
    /// Snapshot of the current settings
    fn settings(&self) -> Settings;
}

/// In-process settings store, shared between the host and the controller
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    /// Create a settings store
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Replace all settings
    pub fn set(&self, settings: Settings) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    /// Toggle auto-connect
    pub fn set_auto_connect(&self, enabled: bool) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .auto_connect = enabled;
    }
}

impl SettingsProvider for SharedSettings {
    fn settings(&self) -> Settings {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}
