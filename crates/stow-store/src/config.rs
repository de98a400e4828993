use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stow_types::{FileHandle, DEFAULT_BACKEND};

use crate::error::{StoreError, StoreResult};

/// Configuration of one named backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Registered driver implementing this backend.
    pub driver: String,
    /// Placement weight. `<= 0` keeps the backend out of new-upload placement
    /// while leaving it addressable.
    pub weight: i64,
    /// Prefix applied when a caller supplies neither key nor prefix.
    pub prefix: String,
    /// Handles from this backend are served through a proxy.
    pub proxy: bool,
    /// The backend stores objects off-host.
    pub remote: bool,
    /// Driver-specific settings, parsed by the driver itself.
    #[serde(rename = "setting")]
    pub settings: toml::Table,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            driver: DEFAULT_BACKEND.to_string(),
            weight: 1,
            prefix: String::new(),
            proxy: false,
            remote: false,
            settings: toml::Table::new(),
        }
    }
}

impl BackendConfig {
    /// A config using the given driver with default weight.
    pub fn with_driver(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            ..Default::default()
        }
    }

    /// Whether new uploads may be placed on this backend.
    pub fn is_placeable(&self) -> bool {
        self.weight > 0
    }
}

/// A named backend as seen by its driver.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub name: String,
    pub config: BackendConfig,
}

impl Instance {
    pub fn new(name: impl Into<String>, config: BackendConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Mint a handle owned by this backend, flagged from its config.
    pub fn new_file(
        &self,
        prefix: impl Into<String>,
        key: impl Into<String>,
        ext: impl Into<String>,
        size: u64,
    ) -> FileHandle {
        FileHandle::new(self.name.as_str(), prefix, key, ext, size)
            .with_flags(self.config.proxy, self.config.remote)
    }

    /// Deserialize the driver settings into a typed struct.
    pub fn settings<T: DeserializeOwned>(&self) -> StoreResult<T> {
        toml::Value::Table(self.config.settings.clone())
            .try_into()
            .map_err(|e| StoreError::InvalidSetting(format!("{}: {e}", self.name)))
    }
}
