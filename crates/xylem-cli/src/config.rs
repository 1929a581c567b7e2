//! Configuration file support.

use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults applied when no options file is given.
    pub defaults: Defaults,
    /// Extra pipeline options handed to every source.
    pub options: IndexMap<String, serde_json::Value>,
}

/// Default CLI options.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
    pub portable: bool,
    pub parallelism: Option<usize>,
    pub max_parallelism: Option<usize>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            portable: false,
            parallelism: None,
            max_parallelism: None,
        }
    }
}

impl Config {
    /// Load config from the given path, or from the default location
    /// (~/.config/xylem/config.toml).
    pub fn load(path: Option<&Path>) -> Self {
        Self::load_from_path(path.map(Path::to_path_buf).or_else(Self::default_path))
    }

    /// Load config from a specific path. Missing or unreadable files fall
    /// back to the defaults.
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("xylem").join("config.toml"))
    }
}
