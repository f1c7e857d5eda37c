use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    APP_ID, CONFIG_FILE_NAME, CONTROL_CHARACTERISTIC_UUID, CONTROL_SERVICE_UUID,
    DEFAULT_SCAN_TIMEOUT_SECS, DEVICE_NAME_PREFIX,
};
use crate::error::{LinkError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub name_prefix: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    /// Upper bound of a device discovery, enforced by the transport
    pub scan_timeout_secs: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEVICE_NAME_PREFIX.into(),
            service_uuid: CONTROL_SERVICE_UUID,
            characteristic_uuid: CONTROL_CHARACTERISTIC_UUID,
            scan_timeout_secs: DEFAULT_SCAN_TIMEOUT_SECS,
        }
    }
}

impl AdapterConfig {
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_ID).join(CONFIG_FILE_NAME))
            .ok_or_else(|| {
                LinkError::Config("Cannot find the user configuration directory".into())
            })
    }

    /// A missing file means defaults, a malformed one is an error
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(LinkError::Config(format!(
                    "Failed to read {}: {err}",
                    path.display()
                )))
            }
        };

        serde_json::from_str(&content)
            .map_err(|err| LinkError::Config(format!("Failed to parse {}: {err}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                LinkError::Config(format!("Failed to create {}: {err}", parent.display()))
            })?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|err| LinkError::Config(format!("Failed to serialize config: {err}")))?;
        fs::write(path, content)
            .map_err(|err| LinkError::Config(format!("Failed to write {}: {err}", path.display())))
    }
}
