use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// Ceilings that keep the error list from growing without bound.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Limits {
    // Zero means no ceiling
    pub max_errors: usize,
    pub max_error_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_errors: 100,
            max_error_len: 1024,
        }
    }
}

// Runtime tunables, the rule set decides what a valid bag is
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub preserve_attributes: bool,
    pub keep_db: bool,
    pub limits: Limits,
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Settings, SettingsError> {
        let data = fs::read_to_string(path)?;
        Ok(toml::from_str(&data)?)
    }
}
