use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE: &str = "http://localhost:5001";

#[derive(Debug, Default, Serialize, Deserialize)]
/// Persisted application settings for Snapview.
pub struct AppConfig {
    pub api_base_url: Option<String>,
    pub access_code: Option<String>,
    pub display_name: Option<String>,
    pub window_width: Option<f32>,
    pub window_height: Option<f32>,
}

impl AppConfig {
    /// Returns the user config file path, if a config directory is available.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("snapview").join("config.toml"))
    }

    /// Loads config from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        toml::from_str(&contents).unwrap_or_default()
    }

    /// Writes config to disk, ignoring filesystem/serialization errors.
    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(s) = toml::to_string_pretty(self) {
            let _ = std::fs::write(&path, s);
        }
    }

    /// Effective API base URL; the env var wins over the config file.
    pub fn api_base(&self) -> String {
        if let Ok(url) = std::env::var("SNAPVIEW_API_BASE") {
            if !url.trim().is_empty() {
                return url;
            }
        }
        self.api_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_toml() {
        let config = AppConfig {
            api_base_url: Some("https://api.example".to_string()),
            access_code: Some("abc123".to_string()),
            display_name: Some("Snapview".to_string()),
            window_width: Some(1200.0),
            window_height: Some(800.0),
        };
        let s = toml::to_string_pretty(&config).expect("config should serialize");
        let back: AppConfig = toml::from_str(&s).expect("config should deserialize");
        assert_eq!(back.api_base_url.as_deref(), Some("https://api.example"));
        assert_eq!(back.access_code.as_deref(), Some("abc123"));
        assert_eq!(back.window_width, Some(1200.0));
    }

    #[test]
    fn empty_config_falls_back_to_defaults() {
        let config: AppConfig = toml::from_str("").expect("empty toml should parse");
        assert!(config.access_code.is_none());
        assert_eq!(config.api_base(), DEFAULT_API_BASE);
    }
}
