//! Configuration loading for mailtap applications
//!
//! Provides utilities for locating and loading JSON configuration files
//! from the shared mailtap config directory (~/.config/mailtap/).
//!
//! The tap never writes to this directory: credentials and stored tokens
//! are read-only inputs, so there is no save counterpart here.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Get the mailtap config directory (~/.config/mailtap/)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("mailtap"))
}

/// Get the path to a config file within the mailtap config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Check if a config file exists in the mailtap config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Load and parse a JSON config file from the mailtap config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir() {
        let dir = config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("mailtap"));
    }

    #[test]
    fn test_config_path() {
        let path = config_path("test.json");
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.ends_with("mailtap/test.json"));
    }

    #[test]
    fn test_load_json_file_missing() {
        let result: Result<serde_json::Value> = load_json_file(Path::new("/nonexistent/cfg.json"));
        assert!(result.is_err());
    }
}
