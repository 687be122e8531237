//! Library configuration.
//!
//! Holds the gateway base URL and the knobs for coordinate handling.
//! Configuration is stored at `~/.config/fieldcache/config.json`; embedders
//! can also construct a `Config` directly.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "fieldcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// What the submission pipeline does when coordinate acquisition ultimately
/// returns nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatePolicy {
    /// Abort the submission with an error notification. The default.
    #[default]
    Require,
    /// Submit anyway with empty coordinate fields.
    AllowMissing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gateway_base_url: String,
    #[serde(default)]
    pub coordinate_policy: CoordinatePolicy,
    /// Extra acquisition attempts after the first (so `2` means up to three
    /// attempts per acquisition).
    #[serde(default = "default_location_retry_count")]
    pub location_retry_count: u32,
}

fn default_location_retry_count() -> u32 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_base_url: String::new(),
            coordinate_policy: CoordinatePolicy::default(),
            location_retry_count: default_location_retry_count(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Default directory for the offline cache files.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
