//! Configuration file support

use quill_transcript::CacheConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for quill
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding persisted transcripts
    pub store_dir: Option<PathBuf>,
    /// Entry cache limits
    pub cache: CacheConfig,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quill")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("QUILL_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Default transcript directory
    pub fn default_store_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quill")
            .join("transcripts")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, falling back to defaults on any problem
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            store_dir: Some(Self::default_store_dir()),
            cache: CacheConfig::default(),
        };
        default_config.save_to(&path)?;
        Ok(path)
    }

    /// Resolve the transcript directory, CLI override first
    pub fn store_dir(&self, cli_override: Option<PathBuf>) -> PathBuf {
        cli_override
            .or_else(|| self.store_dir.clone())
            .unwrap_or_else(Self::default_store_dir)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# quill configuration file
# Place at ~/.config/quill/config.toml (Linux) or set QUILL_CONFIG_PATH

# Where persisted transcripts live (optional)
# store_dir = "/home/me/.local/share/quill/transcripts"

[cache]
# Maximum number of transcripts kept in memory
max_entries = 100
# Seconds an idle cached transcript stays valid
ttl_secs = 120
"#
}
