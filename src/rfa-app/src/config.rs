// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "rfa.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, String),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, String),

    #[error("config file {0} has no [{1}] section")]
    MissingSection(PathBuf, &'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Candidate locations for `rfa.toml`, in lookup order: working directory,
/// user config directory, then `/etc/rfa`.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("rfa").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc/rfa").join(CONFIG_FILE_NAME));
    paths
}

/// Deserialize section `key` of the TOML document `content`.
///
/// `origin` only labels errors. `Ok(None)` means the section is absent.
fn parse_section<T: DeserializeOwned>(
    content: &str,
    origin: &Path,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let parse_err = |e: &dyn std::fmt::Display| ConfigError::Parse(origin.to_path_buf(), e.to_string());

    let mut table: toml::Table = toml::from_str(content).map_err(|e| parse_err(&e))?;
    let Some(section) = table.remove(key) else {
        return Ok(None);
    };
    <T as serde::Deserialize>::deserialize(section)
        .map(Some)
        .map_err(|e| parse_err(&e))
}

/// A configuration struct stored as one `[section]` of `rfa.toml`.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    fn section_key() -> &'static str;

    /// Check cross-field constraints after deserialization.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    fn load_from_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let cfg = parse_section::<Self>(content, origin, Self::section_key())?
            .ok_or_else(|| ConfigError::MissingSection(origin.to_path_buf(), Self::section_key()))?;
        cfg.validate().map_err(ConfigError::Invalid)?;
        Ok(cfg)
    }

    /// Load from an explicit path. The section must be present.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e.to_string()))?;
        Self::load_from_str(&content, path)
    }

    /// Load the first file in `paths` that exists and carries the section.
    ///
    /// Files without the section are skipped. Returns the defaults and
    /// `None` when nothing matched.
    fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in paths.iter().filter(|p| p.exists()) {
            let content = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Read(path.clone(), e.to_string()))?;
            if let Some(cfg) = parse_section::<Self>(&content, path, Self::section_key())? {
                cfg.validate().map_err(ConfigError::Invalid)?;
                return Ok((cfg, Some(path.clone())));
            }
        }
        let cfg = Self::default();
        cfg.validate().map_err(ConfigError::Invalid)?;
        Ok((cfg, None))
    }

    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        Self::load_from_paths(&config_search_paths())
    }

    /// Explicit path if given, otherwise the default search.
    fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        match explicit {
            Some(path) => Ok((Self::load_from_file(path)?, Some(path.to_path_buf()))),
            None => Self::load_from_default_paths(),
        }
    }
}
