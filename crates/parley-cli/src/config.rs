//! Configuration file support

use parley_api::HttpBackendConfig;
use parley_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for parley
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API root of the chat backend
    pub base_url: String,
    /// Bearer token (alternative to PARLEY_API_TOKEN)
    pub api_token: Option<String>,
    /// Request streamed replies
    pub stream: bool,
    /// History messages per page
    pub page_size: usize,
    /// Abort a reply after this many seconds without data
    pub stream_idle_timeout_secs: u64,
    /// How long a message opened from search stays highlighted
    pub highlight_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            base_url: HttpBackendConfig::default().base_url,
            api_token: None,
            stream: engine.stream,
            page_size: engine.page_size,
            stream_idle_timeout_secs: engine.stream_idle_timeout.as_secs(),
            highlight_ms: engine.highlight_duration.as_millis() as u64,
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Write the commented example config if no config file exists yet
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    /// Token from the config file, then from PARLEY_API_TOKEN
    pub fn api_token(&self) -> Option<String> {
        self.api_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var("PARLEY_API_TOKEN").ok())
    }

    pub fn backend_config(&self) -> HttpBackendConfig {
        HttpBackendConfig {
            base_url: self.base_url.clone(),
            api_token: self.api_token(),
            ..Default::default()
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            page_size: self.page_size,
            stream: self.stream,
            stream_idle_timeout: Duration::from_secs(self.stream_idle_timeout_secs),
            highlight_duration: Duration::from_millis(self.highlight_ms),
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# parley configuration file
# Place at ~/.config/parley/config.toml (Linux), ~/Library/Application Support/parley/config.toml (Mac)
# or %APPDATA%\parley\config.toml (Windows). PARLEY_CONFIG_PATH overrides the location.

# API root of the chat backend
base_url = "http://localhost:8000/api/v1"

# Bearer token (optional - PARLEY_API_TOKEN works too)
# api_token = "..."

# Stream replies as they are generated
stream = true

# History messages fetched per page
page_size = 20

# Give up on a reply after this many seconds without data
stream_idle_timeout_secs = 60

# Highlight duration for messages opened from search
highlight_ms = 2000
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_matches_defaults() {
        let config = Config::parse(example_config()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = Config::parse("page_size = 50\nstream = false\n").unwrap();
        assert_eq!(config.page_size, 50);
        assert!(!config.stream);
        assert_eq!(config.base_url, "http://localhost:8000/api/v1");
        assert_eq!(config.stream_idle_timeout_secs, 60);
    }

    #[test]
    fn test_engine_config_conversion() {
        let config = Config {
            stream_idle_timeout_secs: 5,
            highlight_ms: 750,
            ..Default::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.stream_idle_timeout, Duration::from_secs(5));
        assert_eq!(engine.highlight_duration, Duration::from_millis(750));
        assert_eq!(engine.page_size, 20);
    }

    #[test]
    fn test_token_from_file_wins() {
        let config = Config {
            api_token: Some("from-file".into()),
            ..Default::default()
        };
        assert_eq!(config.backend_config().api_token.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!(Config::parse("page_size = \"many\"").is_err());
    }
}
